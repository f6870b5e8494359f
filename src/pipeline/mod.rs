mod indicator;
mod processor;
mod watcher;

#[cfg(test)]
mod tests;

pub use indicator::FireIndicator;
pub use processor::{FrameProcessor, ProcessorStats};
pub use watcher::PollingWatcher;

use std::path::PathBuf;

/// Destination for frame files discovered in the staging directory
pub trait FrameSink: Send + Sync {
    /// Hand over one frame path; false if the sink no longer accepts work
    fn submit(&self, path: PathBuf) -> bool;
}
