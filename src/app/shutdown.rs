use super::BurnRig;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Upper bound on waiting for one background task to wind down
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl BurnRig {
    /// Stop the capture, settle the queue and wind down every background task
    pub async fn shutdown(&self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        // Transports, watcher and listeners watch this token
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if self.capture.stop().await {
            info!("Capture process stopped");
        }

        if !self.processor.drain(self.drain_timeout()).await {
            warn!("Shutting down with {} frames unanalyzed", self.processor.pending());
        }

        let processor = Arc::clone(&self.processor);
        if let Err(e) = tokio::task::spawn_blocking(move || processor.stop()).await {
            error!("Error stopping frame workers: {}", e);
            exit_code = 1;
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            match timeout(TASK_STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    error!("Background task failed: {}", e);
                    exit_code = 1;
                }
                Err(_) => {
                    warn!("Background task did not stop in time, aborting it");
                    abort.abort();
                }
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
