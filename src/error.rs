use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BurnCamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Malformed or unreadable frame files
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid frame size for {path}: {actual} bytes (expected {expected})")]
    SizeMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to read frame {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Capture device and process lifecycle failures
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("A capture session is already active")]
    AlreadyActive,

    #[error("Capture executable '{executable}' not found")]
    ExecutableNotFound { executable: String },

    #[error("Capture process failed to launch: {details}")]
    LaunchFailed { details: String },

    #[error("Staging directory {path} is not writable: {source}")]
    StorageNotWritable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture did not finish within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Capture process I/O failed: {0}")]
    Process(#[source] std::io::Error),
}

/// Command-level failures answered with an error response
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Cannot {command}: system in {state} state")]
    InvalidState {
        command: &'static str,
        state: &'static str,
    },

    #[error("{details}")]
    CommandFailed { details: String },
}

/// Transport setup failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open serial device {device}: {source}")]
    SerialOpen {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to configure serial device {device}: {details}")]
    SerialConfigure { device: String, details: String },

    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Event bus delivery failures
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("No subscribers for event {event_type}")]
    NoSubscribers { event_type: &'static str },

    #[error("Receiver lagged behind by {count} events")]
    Lagged { count: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl BurnCamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BurnCamError>;
