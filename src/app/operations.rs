use super::BurnRig;
use crate::analyzer::BurnSummary;
use crate::capture::CaptureRequest;
use crate::error::ProtocolError;
use crate::events::RigEvent;
use crate::protocol::{ProtocolState, RigControl, RigSnapshot, RunParameters};

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

impl BurnRig {
    /// Halt the capture and wait for queued frames, bounded by the drain timeout
    async fn halt_and_drain(&self) {
        if self.capture.stop().await {
            info!("Capture halted");
        }
        if !self.processor.drain(self.drain_timeout()).await {
            warn!(
                "{} frames still pending after drain timeout",
                self.processor.pending()
            );
        }
    }
}

#[async_trait]
impl RigControl for BurnRig {
    fn run_defaults(&self) -> RunParameters {
        RunParameters {
            duration_sec: self.config.capture.default_duration_sec,
            temp_threshold: self.config.analyzer.temp_threshold_delta,
        }
    }

    async fn start_run(&self, params: RunParameters) -> Result<(), ProtocolError> {
        let run_id = {
            let mut run = self.run.write().await;
            if run.state != ProtocolState::Idle {
                return Err(ProtocolError::InvalidState {
                    command: "start",
                    state: run.state.as_str(),
                });
            }
            let run_id = Uuid::new_v4();
            run.state = ProtocolState::Busy;
            run.run_id = Some(run_id);
            run_id
        };

        info!(
            "Starting run {}: {}s, threshold {}°C",
            run_id, params.duration_sec, params.temp_threshold
        );

        {
            let mut analyzer = self.analyzer.lock();
            analyzer.reset();
            analyzer.set_temp_threshold_delta(params.temp_threshold);
        }
        self.fire.lower();
        self.capture.purge_stale_frames();
        self.watcher.reset();

        match self
            .capture
            .start(CaptureRequest::Duration(params.duration_sec))
            .await
        {
            Ok(expected_frames) => {
                self.event_bus.emit(RigEvent::CaptureStarted {
                    run_id,
                    duration_sec: params.duration_sec,
                    expected_frames,
                });
                self.spawn_monitor(run_id);
                Ok(())
            }
            Err(e) => {
                error!("Run {} failed to start: {}", run_id, e);
                let mut run = self.run.write().await;
                if run.run_id == Some(run_id) {
                    run.state = ProtocolState::Error;
                    run.run_id = None;
                }
                Err(ProtocolError::CommandFailed {
                    details: "Failed to start capture".to_string(),
                })
            }
        }
    }

    async fn stop_run(&self) {
        info!("Stop requested");
        self.halt_and_drain().await;

        let summary = self.analyzer.lock().summary();
        let mut run = self.run.write().await;
        if let Some(run_id) = run.run_id.take() {
            info!(
                "Run {} stopped after {} frames",
                run_id, summary.total_frames
            );
            run.last_results = Some(summary);
        }
        run.state = ProtocolState::Idle;
        drop(run);

        self.fire.lower();
    }

    async fn reset(&self) {
        info!("Resetting rig");
        self.halt_and_drain().await;

        self.analyzer.lock().reset();
        let report = self.capture.purge_stale_frames();
        self.watcher.reset();

        {
            let mut run = self.run.write().await;
            run.state = ProtocolState::Idle;
            run.last_results = None;
            run.run_id = None;
        }
        self.fire.lower();

        info!("Rig reset ({} staged frames removed)", report.removed);
    }

    async fn snapshot(&self) -> RigSnapshot {
        let state = self.run.read().await.state;
        let capture = self.capture.status();
        let live = (state == ProtocolState::Busy).then(|| self.analyzer.lock().live_update(None));

        RigSnapshot {
            state,
            capture,
            live,
        }
    }

    async fn last_results(&self) -> Option<BurnSummary> {
        self.run.read().await.last_results.clone()
    }

    async fn state(&self) -> ProtocolState {
        self.run.read().await.state
    }

    fn fire_active(&self) -> bool {
        self.fire.is_active()
    }
}
