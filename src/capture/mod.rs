mod device;
mod manager;
pub mod storage;

pub use device::{DeviceCheck, DeviceConfidence};
pub use manager::{CaptureManager, CaptureOutcome, CaptureRequest, CaptureStatus};
pub use storage::PurgeReport;
