use super::FrameSink;
use crate::capture::storage;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Polls the staging directory and hands complete frame files to a sink.
///
/// A file is forwarded once, the first time its size reaches the full frame
/// size. Partially written files are revisited on the next poll.
#[derive(Clone)]
pub struct PollingWatcher {
    folder: PathBuf,
    prefix: String,
    extension: String,
    frame_bytes: u64,
    poll_interval: Duration,
    seen: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PollingWatcher {
    pub fn new(
        folder: impl Into<PathBuf>,
        prefix: &str,
        extension: &str,
        frame_bytes: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            folder: folder.into(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            frame_bytes,
            poll_interval,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Forget every file already forwarded, ahead of a new run
    pub fn reset(&self) {
        self.seen.lock().clear();
    }

    /// One directory scan; returns how many frames were forwarded
    pub fn scan(&self, sink: &dyn FrameSink) -> usize {
        let frames = storage::list_frames(&self.folder, &self.prefix, &self.extension);
        let present: HashSet<&PathBuf> = frames.iter().collect();
        let mut seen = self.seen.lock();

        // Drop entries purged from disk so a reused name is picked up again
        seen.retain(|path| present.contains(path));
        drop(present);

        let mut forwarded = 0;
        for path in frames {
            if seen.contains(&path) {
                continue;
            }

            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size < self.frame_bytes {
                trace!("{} not complete yet ({} bytes)", path.display(), size);
                continue;
            }

            if sink.submit(path.clone()) {
                forwarded += 1;
            }
            seen.insert(path);
        }

        forwarded
    }

    /// Run the poll loop until `cancel` fires
    pub fn spawn(&self, sink: Arc<dyn FrameSink>, cancel: CancellationToken) -> JoinHandle<()> {
        let watcher = self.clone();

        tokio::spawn(async move {
            info!("Watching {} for frames", watcher.folder.display());
            let mut interval = tokio::time::interval(watcher.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        // Directory listing and stat calls block
                        let scanner = watcher.clone();
                        let sink = Arc::clone(&sink);
                        match tokio::task::spawn_blocking(move || scanner.scan(sink.as_ref())).await {
                            Ok(forwarded) if forwarded > 0 => {
                                debug!("Watcher forwarded {} frames", forwarded);
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Frame scan failed: {}", e),
                        }
                    }
                }
            }

            info!("Frame watcher stopped");
        })
    }
}
