use super::BurnRig;
use crate::capture::CaptureOutcome;
use crate::events::{CompletionReason, RigEvent};
use crate::protocol::ProtocolState;
use crate::results;

use std::path::Path;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Settling time between halting the capture and draining on auto-stop
const AUTO_STOP_SETTLE: Duration = Duration::from_secs(1);

impl BurnRig {
    /// Supervise the capture of `run_id` in the background
    pub(super) fn spawn_monitor(&self, run_id: Uuid) {
        let rig = self.clone();
        let handle = tokio::spawn(async move {
            rig.monitor_run(run_id).await;
        });
        self.track(handle);
    }

    async fn monitor_run(&self, run_id: Uuid) {
        let poll = Duration::from_millis(self.config.monitor.completion_poll_ms.max(1));
        let snapshot_every = Duration::from_secs(self.config.monitor.partial_interval_sec.max(1));

        let wait = self.capture.wait_for_completion(None, poll);
        tokio::pin!(wait);

        let mut snapshots = interval_at(Instant::now() + snapshot_every, snapshot_every);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                _ = snapshots.tick() => self.write_partial_results(),
            }
        };

        debug!("Run {} capture ended: {:?}", run_id, outcome);
        match outcome {
            CaptureOutcome::Completed => {
                info!("Capture complete, waiting for analysis...");
                self.finish_run(run_id, CompletionReason::CaptureFinished)
                    .await;
            }
            // STOP, RESET or auto-stop already own the transition
            CaptureOutcome::Stopped => {}
            CaptureOutcome::Failed { .. } | CaptureOutcome::TimedOut => {
                self.fail_run(run_id, "Capture failed").await;
            }
        }
    }

    /// Halt the capture once the analyzer reports the fire stopped spreading
    pub(super) async fn handle_auto_stop(&self, frame_number: u64) {
        let run_id = {
            let run = self.run.read().await;
            match (run.state, run.run_id) {
                (ProtocolState::Busy, Some(run_id)) => run_id,
                _ => {
                    debug!("Auto-stop at frame {} ignored: no run in progress", frame_number);
                    return;
                }
            }
        };

        info!("Auto-stop triggered by low ROS at frame {}", frame_number);
        self.capture.stop().await;
        tokio::time::sleep(AUTO_STOP_SETTLE).await;
        self.finish_run(run_id, CompletionReason::AutoStop).await;
    }

    /// Drain, store the summary and return to IDLE. Stale run ids are ignored.
    pub(super) async fn finish_run(&self, run_id: Uuid, reason: CompletionReason) {
        // Frames written just before the process exited may predate the last poll
        let late = self.watcher.scan(self.processor.as_ref());
        if late > 0 {
            debug!("{} late frames picked up before drain", late);
        }

        if !self.processor.drain(self.drain_timeout()).await {
            warn!("Run {} finished with frames still pending", run_id);
        }

        let summary = self.analyzer.lock().summary();
        {
            let mut run = self.run.write().await;
            if run.run_id != Some(run_id) {
                debug!("Completion of stale run {} ignored", run_id);
                return;
            }
            run.state = ProtocolState::Idle;
            run.run_id = None;
            run.last_results = Some(summary.clone());
        }
        self.fire.lower();

        info!(
            "Run {} complete: {} frames, {:.2}% burned, avg ROS {:.2} cm²/s",
            run_id,
            summary.total_frames,
            summary.final_burn_percentage,
            summary.avg_ros_cm2_per_sec
        );

        if let Some(dir) = &self.config.monitor.results_dir {
            match results::archive(Path::new(dir), run_id, reason, &summary) {
                Ok(path) => info!("Run results archived to {}", path.display()),
                Err(e) => {
                    error!("Failed to archive run results: {}", e);
                    self.event_bus.emit(RigEvent::SystemError {
                        component: "results".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.event_bus.emit(RigEvent::RunCompleted {
            run_id,
            reason,
            summary,
        });
    }

    pub(super) async fn fail_run(&self, run_id: Uuid, message: &str) {
        {
            let mut run = self.run.write().await;
            if run.run_id != Some(run_id) {
                debug!("Failure of stale run {} ignored", run_id);
                return;
            }
            run.state = ProtocolState::Error;
            run.run_id = None;
        }
        self.fire.lower();

        self.event_bus.emit(RigEvent::RunFailed {
            run_id,
            message: message.to_string(),
        });
    }

    fn write_partial_results(&self) {
        let summary = self.analyzer.lock().summary();
        let path = Path::new(&self.config.monitor.partial_results_path);
        if let Err(e) = results::write_snapshot(path, &summary) {
            warn!("Failed to write partial results: {}", e);
        }
    }
}
