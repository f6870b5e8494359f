use super::command::Command;
use super::response::Response;
use super::state::ProtocolState;

use crate::analyzer::{BurnSummary, LiveUpdate};
use crate::capture::CaptureStatus;
use crate::error::ProtocolError;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Accepted START parameters after defaults were applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunParameters {
    pub duration_sec: u32,
    pub temp_threshold: f64,
}

/// What STATUS reports about the rig
#[derive(Debug, Clone)]
pub struct RigSnapshot {
    pub state: ProtocolState,
    pub capture: CaptureStatus,
    /// Present while a run is in progress
    pub live: Option<LiveUpdate>,
}

/// The operations a protocol controller dispatches to.
///
/// Implemented once by the rig orchestrator and shared by every transport.
#[async_trait]
pub trait RigControl: Send + Sync {
    /// Defaults for START arguments that were omitted or malformed
    fn run_defaults(&self) -> RunParameters;

    /// Move IDLE to BUSY and launch a run
    async fn start_run(&self, params: RunParameters) -> Result<(), ProtocolError>;

    /// Halt any active capture and converge to IDLE
    async fn stop_run(&self);

    /// Halt, clear stored results and re-initialize analysis
    async fn reset(&self);

    async fn snapshot(&self) -> RigSnapshot;

    async fn last_results(&self) -> Option<BurnSummary>;

    async fn state(&self) -> ProtocolState;

    fn fire_active(&self) -> bool;
}

/// Turns request lines into exactly one response each
#[derive(Clone)]
pub struct ProtocolController {
    rig: Arc<dyn RigControl>,
    transport: &'static str,
}

impl ProtocolController {
    pub fn new(rig: Arc<dyn RigControl>, transport: &'static str) -> Self {
        Self { rig, transport }
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }

    pub async fn handle_line(&self, line: &str) -> Response {
        let command = Command::parse(line);
        debug!("[{}] {:?}", self.transport, command);
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> Response {
        match command {
            Command::Start {
                duration_sec,
                temp_threshold,
            } => {
                let defaults = self.rig.run_defaults();
                let params = RunParameters {
                    duration_sec: duration_sec.unwrap_or(defaults.duration_sec),
                    temp_threshold: temp_threshold.unwrap_or(defaults.temp_threshold),
                };

                match self.rig.start_run(params).await {
                    Ok(()) => {
                        info!(
                            "[{}] Run started: {}s, threshold {}°C",
                            self.transport, params.duration_sec, params.temp_threshold
                        );
                        Response::new("started")
                            .with("duration_sec", params.duration_sec)
                            .with("temp_threshold", params.temp_threshold)
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Command::Stop => {
                self.rig.stop_run().await;
                Response::new("stopped")
            }
            Command::Status => {
                let snapshot = self.rig.snapshot().await;
                let state = snapshot.state.as_str();
                let mut response = Response::new(state)
                    .with("state", state)
                    .merge(&snapshot.capture);
                if let Some(live) = &snapshot.live {
                    response = response.merge(live);
                }
                response
            }
            Command::Results => match self.rig.last_results().await {
                Some(summary) => Response::new("complete").merge(&summary),
                None => Response::new(self.rig.state().await.as_str())
                    .with("message", "No results available"),
            },
            Command::Reset => {
                self.rig.reset().await;
                Response::new("reset").with("message", "System reset")
            }
            Command::FireStatus => {
                Response::new(if self.rig.fire_active() { "true" } else { "false" })
            }
            Command::Unknown(verb) => {
                Response::error(ProtocolError::UnknownCommand { command: verb }.to_string())
            }
        }
    }
}
