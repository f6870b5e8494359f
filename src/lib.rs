pub mod analyzer;
pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod pipeline;
pub mod protocol;
pub mod results;
pub mod transport;

pub use analyzer::{BurnAnalyzer, BurnSummary};
pub use app::{BurnRig, ShutdownReason};
pub use capture::CaptureManager;
pub use config::BurnCamConfig;
pub use error::{BurnCamError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, RigEvent};
pub use frame::ThermalFrame;
pub use pipeline::{FireIndicator, FrameProcessor, PollingWatcher};
pub use protocol::{ProtocolController, ProtocolState, Response, RigControl};
pub use transport::{SerialTransport, TcpTransport, Transport};
