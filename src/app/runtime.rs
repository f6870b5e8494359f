use super::{BurnRig, ShutdownReason};
use crate::analyzer::BurnSummary;
use crate::error::{BurnCamError, Result};
use crate::events::{EventFilter, EventReceiver, RigEvent};
use crate::protocol::{RigControl, RunParameters};
use tokio::signal;
use tracing::{error, info};

impl BurnRig {
    /// Run until a signal or `request_shutdown`, then shut down gracefully
    pub async fn run(&self) -> Result<i32> {
        info!("Burn rig is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .lock()
            .take()
            .ok_or_else(|| BurnCamError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers();

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| BurnCamError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);
        self.event_bus.emit(RigEvent::ShutdownRequested {
            reason: format!("{:?}", shutdown_reason),
        });

        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = exit_code.max(1);
        }

        info!("Burn rig shutdown complete");
        Ok(exit_code)
    }

    /// Single capture without any transport; returns the final summary
    pub async fn run_standalone(&self, params: RunParameters) -> Result<BurnSummary> {
        let mut receiver = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec!["run_completed", "run_failed"]),
            "standalone",
        );

        self.start_run(params).await?;
        info!("Standalone capture running for {}s", params.duration_sec);

        let outcome = tokio::select! {
            event = receiver.recv() => event?,
            _ = signal::ctrl_c() => {
                info!("Interrupted, stopping capture");
                self.stop_run().await;
                return self
                    .last_results()
                    .await
                    .ok_or_else(|| BurnCamError::system("Run interrupted before any results"));
            }
        };

        match outcome {
            RigEvent::RunCompleted { summary, .. } => Ok(summary),
            RigEvent::RunFailed { message, .. } => Err(BurnCamError::system(message)),
            other => Err(BurnCamError::system(format!(
                "Unexpected event: {}",
                other.description()
            ))),
        }
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        #[cfg(unix)]
        {
            let rig = self.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            rig.request_shutdown(ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        let rig = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                rig.request_shutdown(ShutdownReason::Signal("SIGINT".to_string()));
            }
        });
    }
}
