use crate::analyzer::BurnSummary;
use crate::protocol::ProtocolState;
use uuid::Uuid;

/// System shutdown reason
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
    /// A component failed in a way the rig cannot recover from
    Error(String),
}

/// Protocol state plus the run it refers to
#[derive(Debug, Default)]
pub(super) struct RunState {
    pub state: ProtocolState,
    pub last_results: Option<BurnSummary>,
    /// Identifier of the run in progress; completions for other ids are stale
    pub run_id: Option<Uuid>,
}
