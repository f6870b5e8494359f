use super::BurnRig;
use crate::capture::DeviceConfidence;
use crate::error::{BurnCamError, EventBusError, Result};
use crate::events::{EventFilter, EventReceiver, RigEvent};
use crate::pipeline::FrameSink;
use std::sync::Arc;
use tracing::{error, info, warn};

impl BurnRig {
    /// Prepare storage and start the frame pipeline.
    ///
    /// An unverified capture device only warns; unwritable storage is fatal.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing burn rig components");

        match self.capture.verify().confidence() {
            DeviceConfidence::Verified => info!("Capture device verified"),
            DeviceConfidence::Degraded => {
                warn!("Capture device only partially verified, continuing")
            }
            DeviceConfidence::Unavailable => {
                warn!("Capture device not detected; START will likely fail")
            }
        }

        self.capture.prepare_storage().await?;

        let report = self.capture.purge_stale_frames();
        if report.removed > 0 || report.failed > 0 {
            info!(
                "Purged {} stale frames ({} could not be removed)",
                report.removed, report.failed
            );
        }

        self.processor
            .start(self.config.processing.workers)
            .map_err(|e| {
                error!("Failed to start frame workers: {}", e);
                self.event_bus.emit(RigEvent::SystemError {
                    component: "processing".to_string(),
                    error: e.to_string(),
                });
                BurnCamError::component("processing".to_string(), e.to_string())
            })?;

        let sink: Arc<dyn FrameSink> = Arc::clone(&self.processor) as Arc<dyn FrameSink>;
        let watcher_task = self
            .watcher
            .spawn(sink, self.cancellation_token.child_token());
        self.track(watcher_task);

        self.spawn_auto_stop_listener();

        info!("All components initialized successfully");
        Ok(())
    }

    /// React to analyzer auto-stop requests for the run in progress
    fn spawn_auto_stop_listener(&self) {
        let mut receiver = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec!["auto_stop_requested"]),
            "auto-stop",
        );
        let cancel = self.cancellation_token.child_token();
        let rig = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => event,
                };

                match event {
                    Ok(RigEvent::AutoStopRequested { frame_number }) => {
                        rig.handle_auto_stop(frame_number).await;
                    }
                    Ok(_) => {}
                    Err(EventBusError::Lagged { .. }) => continue,
                    Err(_) => break,
                }
            }
        });
        self.track(handle);
    }
}
