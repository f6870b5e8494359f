use super::*;
use crate::analyzer::BurnAnalyzer;
use crate::config::{AnalyzerConfig, ProcessingConfig, SensorConfig};
use crate::events::{EventBus, RigEvent};
use crate::frame::ThermalFrame;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;

fn sensor() -> SensorConfig {
    SensorConfig {
        width: WIDTH,
        height: HEIGHT,
        fps: 9.0,
        pixel_area_cm2: 0.25,
    }
}

fn processing() -> ProcessingConfig {
    ProcessingConfig {
        workers: 2,
        worker_wake_ms: 20,
        watcher_poll_ms: 20,
        drain_timeout_sec: 5,
    }
}

fn write_frame(dir: &Path, index: u32, hot: bool) -> PathBuf {
    let mut frame = ThermalFrame::uniform(WIDTH, HEIGHT, 20.0).unwrap();
    if hot {
        frame.fill_rect(4, 4, 10, 10, 300.0);
    }
    let path = dir.join(format!("sample_{:06}.gray", index));
    std::fs::write(&path, frame.to_be_bytes()).unwrap();
    path
}

struct Harness {
    processor: FrameProcessor,
    analyzer: Arc<Mutex<BurnAnalyzer>>,
    fire: FireIndicator,
    event_bus: EventBus,
}

fn harness() -> Harness {
    let analyzer = Arc::new(Mutex::new(BurnAnalyzer::new(
        AnalyzerConfig::default(),
        sensor(),
    )));
    let fire = FireIndicator::new();
    let event_bus = EventBus::new(16);
    let processor = FrameProcessor::new(
        Arc::clone(&analyzer),
        fire.clone(),
        event_bus.clone(),
        &sensor(),
        &processing(),
    );

    Harness {
        processor,
        analyzer,
        fire,
        event_bus,
    }
}

#[derive(Default)]
struct RecordingSink {
    paths: Mutex<Vec<PathBuf>>,
}

impl FrameSink for RecordingSink {
    fn submit(&self, path: PathBuf) -> bool {
        self.paths.lock().push(path);
        true
    }
}

#[test]
fn test_fire_indicator() {
    let fire = FireIndicator::new();
    let shared = fire.clone();
    assert!(!fire.is_active());

    shared.raise();
    assert!(fire.is_active());
    shared.raise();
    assert!(fire.is_active());

    fire.lower();
    assert!(!shared.is_active());
}

#[tokio::test]
async fn test_processor_analyzes_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    let mut events = h.event_bus.subscribe();
    h.processor.start(1).unwrap();

    assert!(h.processor.enqueue(write_frame(dir.path(), 1, false)));
    assert!(h.processor.enqueue(write_frame(dir.path(), 2, true)));
    assert!(h.processor.enqueue(write_frame(dir.path(), 3, true)));

    assert!(h.processor.drain(Duration::from_secs(5)).await);

    let stats = h.processor.stats();
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 0);

    {
        let analyzer = h.analyzer.lock();
        assert_eq!(analyzer.frames_processed(), 3);
        assert_eq!(analyzer.ignition().map(|(frame, _)| frame), Some(2));
    }

    assert!(h.fire.is_active());
    match events.try_recv().unwrap() {
        RigEvent::IgnitionDetected { frame_number, .. } => assert_eq!(frame_number, 2),
        other => panic!("Unexpected event: {:?}", other),
    }

    tokio::task::spawn_blocking(move || h.processor.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_parallel_workers_share_one_analyzer() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    let mut events = h.event_bus.subscribe();
    h.processor.start(4).unwrap();

    for index in 1..=40 {
        let hot = index % 3 == 0;
        assert!(h.processor.enqueue(write_frame(dir.path(), index, hot)));
    }

    assert!(h.processor.drain(Duration::from_secs(10)).await);
    assert_eq!(h.processor.stats().processed, 40);

    {
        let analyzer = h.analyzer.lock();
        assert_eq!(analyzer.frames_processed(), 40);

        let numbers: Vec<u64> = analyzer.results().iter().map(|r| r.frame_number).collect();
        assert_eq!(numbers, (1..=40).collect::<Vec<u64>>());

        let cumulative: Vec<u64> = analyzer
            .results()
            .iter()
            .map(|r| r.cumulative_burn_pixels)
            .collect();
        assert!(cumulative.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(analyzer.ignition().is_some());
    }

    let mut ignitions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, RigEvent::IgnitionDetected { .. }) {
            ignitions += 1;
        }
    }
    assert_eq!(ignitions, 1);
    assert!(h.fire.is_active());

    tokio::task::spawn_blocking(move || h.processor.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_bad_frame_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    h.processor.start(2).unwrap();

    let truncated = dir.path().join("sample_000001.gray");
    std::fs::write(&truncated, [0u8; 10]).unwrap();

    h.processor.enqueue(truncated);
    h.processor.enqueue(dir.path().join("sample_missing.gray"));
    h.processor.enqueue(write_frame(dir.path(), 2, false));

    assert!(h.processor.drain(Duration::from_secs(5)).await);

    let stats = h.processor.stats();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(h.analyzer.lock().frames_processed(), 1);

    tokio::task::spawn_blocking(move || h.processor.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_drain_on_idle_queue_returns_immediately() {
    let h = harness();
    assert!(h.processor.drain(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_drain_times_out_without_workers() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();

    h.processor.enqueue(write_frame(dir.path(), 1, false));
    assert!(!h.processor.drain(Duration::from_millis(50)).await);
    assert_eq!(h.processor.pending(), 1);

    // Stopping settles the abandoned frame
    h.processor.stop();
    assert_eq!(h.processor.pending(), 0);
}

#[test]
fn test_enqueue_after_stop_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    h.processor.start(1).unwrap();
    h.processor.stop();

    assert!(!h.processor.enqueue(write_frame(dir.path(), 1, false)));
    assert_eq!(h.processor.pending(), 0);
}

#[test]
fn test_watcher_waits_for_complete_frames() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = PollingWatcher::new(
        dir.path(),
        "sample_",
        "gray",
        sensor().frame_bytes(),
        Duration::from_millis(20),
    );
    let sink = RecordingSink::default();

    let partial = dir.path().join("sample_000002.gray");
    std::fs::write(&partial, [0u8; 16]).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    let first = write_frame(dir.path(), 1, false);

    assert_eq!(watcher.scan(&sink), 1);
    assert_eq!(*sink.paths.lock(), vec![first.clone()]);

    // Nothing new until the partial file is complete
    assert_eq!(watcher.scan(&sink), 0);
    let second = write_frame(dir.path(), 2, false);
    assert_eq!(watcher.scan(&sink), 1);
    assert_eq!(*sink.paths.lock(), vec![first.clone(), second]);

    watcher.reset();
    assert_eq!(watcher.scan(&sink), 2);
}

#[test]
fn test_watcher_forgets_purged_files() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = PollingWatcher::new(
        dir.path(),
        "sample_",
        "gray",
        sensor().frame_bytes(),
        Duration::from_millis(20),
    );
    let sink = RecordingSink::default();

    let path = write_frame(dir.path(), 1, false);
    assert_eq!(watcher.scan(&sink), 1);

    std::fs::remove_file(&path).unwrap();
    assert_eq!(watcher.scan(&sink), 0);

    write_frame(dir.path(), 1, false);
    assert_eq!(watcher.scan(&sink), 1);
}

#[test]
fn test_watcher_tracks_large_staging_directory() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = PollingWatcher::new(
        dir.path(),
        "sample_",
        "gray",
        sensor().frame_bytes(),
        Duration::from_millis(20),
    );
    let sink = RecordingSink::default();

    let paths: Vec<PathBuf> = (1..=300).map(|i| write_frame(dir.path(), i, false)).collect();
    assert_eq!(watcher.scan(&sink), 300);
    assert_eq!(watcher.scan(&sink), 0);

    for path in paths.iter().step_by(2) {
        std::fs::remove_file(path).unwrap();
    }
    assert_eq!(watcher.scan(&sink), 0);

    for index in (1..=300).step_by(2) {
        write_frame(dir.path(), index, false);
    }
    assert_eq!(watcher.scan(&sink), 150);
    assert_eq!(sink.paths.lock().len(), 450);
}

#[tokio::test]
async fn test_watcher_feeds_processor() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    let processor = Arc::new(h.processor);
    processor.start(1).unwrap();

    let watcher = PollingWatcher::new(
        dir.path(),
        "sample_",
        "gray",
        sensor().frame_bytes(),
        Duration::from_millis(10),
    );
    let cancel = CancellationToken::new();
    let task = watcher.spawn(Arc::clone(&processor) as Arc<dyn FrameSink>, cancel.clone());

    for index in 1..=4 {
        write_frame(dir.path(), index, false);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while processor.stats().enqueued < 4 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(processor.drain(Duration::from_secs(5)).await);
    assert_eq!(h.analyzer.lock().frames_processed(), 4);

    cancel.cancel();
    task.await.unwrap();
    tokio::task::spawn_blocking(move || processor.stop())
        .await
        .unwrap();
}
