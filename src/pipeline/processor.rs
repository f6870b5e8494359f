use crate::analyzer::{BurnAnalyzer, FrameAnalysis};
use crate::config::{ProcessingConfig, SensorConfig};
use crate::error::FrameError;
use crate::events::{EventBus, RigEvent};
use crate::frame::ThermalFrame;

use super::indicator::FireIndicator;
use super::FrameSink;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Frame pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    pub pending: usize,
}

/// State shared between the processor handle and its workers
struct Shared {
    analyzer: Arc<Mutex<BurnAnalyzer>>,
    fire: FireIndicator,
    event_bus: EventBus,
    width: u32,
    height: u32,
    running: AtomicBool,
    pending: AtomicUsize,
    idle: Notify,
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn finish_item(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// FIFO of frame paths drained by a fixed pool of analysis threads.
///
/// The analyzer is shared behind one mutex, so each frame's analysis is a
/// single critical section regardless of worker count.
pub struct FrameProcessor {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<PathBuf>>>,
    receiver: Receiver<PathBuf>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    wake_interval: Duration,
}

impl FrameProcessor {
    pub fn new(
        analyzer: Arc<Mutex<BurnAnalyzer>>,
        fire: FireIndicator,
        event_bus: EventBus,
        sensor: &SensorConfig,
        processing: &ProcessingConfig,
    ) -> Self {
        let (sender, receiver) = channel::unbounded();

        Self {
            shared: Arc::new(Shared {
                analyzer,
                fire,
                event_bus,
                width: sensor.width,
                height: sensor.height,
                running: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                enqueued: AtomicU64::new(0),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(Vec::new()),
            wake_interval: Duration::from_millis(processing.worker_wake_ms.max(1)),
        }
    }

    /// Spawn `worker_count` analysis threads
    pub fn start(&self, worker_count: usize) -> std::io::Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            warn!("Frame processor already started");
            return Ok(());
        }

        self.shared.running.store(true, Ordering::SeqCst);

        for index in 0..worker_count.max(1) {
            let shared = Arc::clone(&self.shared);
            let receiver = self.receiver.clone();
            let wake = self.wake_interval;

            let handle = std::thread::Builder::new()
                .name(format!("frame-worker-{}", index))
                .spawn(move || worker_loop(index, shared, receiver, wake))?;
            workers.push(handle);
        }

        info!("Frame processor started with {} workers", workers.len());
        Ok(())
    }

    /// Queue a frame path. Never blocks; returns false once stopped.
    pub fn enqueue(&self, path: PathBuf) -> bool {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            debug!("Frame processor stopped, dropping {}", path.display());
            return false;
        };

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(path).is_err() {
            self.shared.finish_item();
            return false;
        }
        self.shared.enqueued.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Number of queued plus in-flight frames
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every queued frame has been analyzed or skipped.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    "Frame queue not drained within {:?} ({} frames pending)",
                    timeout,
                    self.pending()
                );
                return self.pending() == 0;
            }
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            enqueued: self.shared.enqueued.load(Ordering::SeqCst),
            processed: self.shared.processed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
            pending: self.pending(),
        }
    }

    /// Stop accepting frames and join the workers after their current frame
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.sender.lock().take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Frame worker panicked");
            }
        }

        // Anything still queued will never be analyzed
        let abandoned = self.receiver.try_iter().count();
        if abandoned > 0 {
            warn!("{} queued frames abandoned at shutdown", abandoned);
            for _ in 0..abandoned {
                self.shared.finish_item();
            }
        }

        info!("Frame processor stopped");
    }
}

impl FrameSink for FrameProcessor {
    fn submit(&self, path: PathBuf) -> bool {
        self.enqueue(path)
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>, receiver: Receiver<PathBuf>, wake: Duration) {
    debug!("Frame worker {} running", index);

    while shared.running.load(Ordering::SeqCst) {
        let path = match receiver.recv_timeout(wake) {
            Ok(path) => path,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match analyze(&shared, &path) {
            Ok(analysis) => {
                shared.processed.fetch_add(1, Ordering::SeqCst);
                publish_outcome(&shared, &analysis);
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                error!("Skipping frame {}: {}", path.display(), e);
            }
        }

        shared.finish_item();
    }

    debug!("Frame worker {} exiting", index);
}

fn analyze(shared: &Shared, path: &Path) -> Result<FrameAnalysis, FrameError> {
    let frame = ThermalFrame::read(path, shared.width, shared.height)?;
    let mut analyzer = shared.analyzer.lock();
    analyzer.process_frame(&frame, shared.fire.is_active())
}

fn publish_outcome(shared: &Shared, analysis: &FrameAnalysis) {
    if analysis.ignited_now {
        shared.fire.raise();
        shared.event_bus.emit(RigEvent::IgnitionDetected {
            frame_number: analysis.result.frame_number,
            elapsed_sec: analysis.result.elapsed_sec,
        });
    }

    if analysis.auto_stop {
        shared.event_bus.emit(RigEvent::AutoStopRequested {
            frame_number: analysis.result.frame_number,
        });
    }
}
