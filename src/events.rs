use crate::analyzer::BurnSummary;
use crate::error::EventBusError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a run reached completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The capture process exited on its own
    CaptureFinished,
    /// The analyzer reported the fire stopped spreading
    AutoStop,
}

/// Events that can occur on the burn rig
#[derive(Debug, Clone)]
pub enum RigEvent {
    /// A capture run was launched
    CaptureStarted {
        run_id: Uuid,
        duration_sec: u32,
        expected_frames: u64,
    },
    /// Cumulative burned area crossed the ignition threshold
    IgnitionDetected { frame_number: u64, elapsed_sec: f64 },
    /// The analyzer asks for the running capture to be halted
    AutoStopRequested { frame_number: u64 },
    /// A run finished and its summary was stored
    RunCompleted {
        run_id: Uuid,
        reason: CompletionReason,
        summary: BurnSummary,
    },
    /// A run failed and the rig moved to the error state
    RunFailed { run_id: Uuid, message: String },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested { reason: String },
}

impl RigEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            RigEvent::CaptureStarted {
                run_id,
                duration_sec,
                expected_frames,
            } => format!(
                "Capture {} started: {}s, {} frames expected",
                run_id, duration_sec, expected_frames
            ),
            RigEvent::IgnitionDetected {
                frame_number,
                elapsed_sec,
            } => format!("Ignition at frame {} ({:.2}s)", frame_number, elapsed_sec),
            RigEvent::AutoStopRequested { frame_number } => {
                format!("Auto-stop requested at frame {}", frame_number)
            }
            RigEvent::RunCompleted {
                run_id,
                reason,
                summary,
            } => format!(
                "Run {} completed ({:?}): {} frames, {:.2}% burned",
                run_id, reason, summary.total_frames, summary.final_burn_percentage
            ),
            RigEvent::RunFailed { run_id, message } => {
                format!("Run {} failed: {}", run_id, message)
            }
            RigEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            RigEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            RigEvent::CaptureStarted { .. } => "capture_started",
            RigEvent::IgnitionDetected { .. } => "ignition_detected",
            RigEvent::AutoStopRequested { .. } => "auto_stop_requested",
            RigEvent::RunCompleted { .. } => "run_completed",
            RigEvent::RunFailed { .. } => "run_failed",
            RigEvent::SystemError { .. } => "system_error",
            RigEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus for component coordination using broadcast channels.
///
/// Publishing is synchronous so analysis worker threads can emit events
/// without entering the runtime.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RigEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RigEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: RigEvent) -> Result<usize, EventBusError> {
        match &event {
            RigEvent::IgnitionDetected { .. } | RigEvent::AutoStopRequested { .. } => {
                info!("{}", event.description());
            }
            RigEvent::RunFailed { .. } | RigEvent::SystemError { .. } => {
                error!("{}", event.description());
            }
            _ => debug!("Publishing event: {}", event.description()),
        }

        let event_type = event.event_type();
        self.sender
            .send(event)
            .map_err(|_| EventBusError::NoSubscribers { event_type })
    }

    /// Publish, treating a bus without listeners as a normal condition
    pub fn emit(&self, event: RigEvent) {
        if let Err(e) = self.publish(event) {
            debug!("{}", e);
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &RigEvent) -> bool {
        match self {
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<RigEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<RigEvent>, filter: EventFilter, name: &str) -> Self {
        Self {
            receiver,
            filter,
            name: name.to_string(),
        }
    }

    /// Receive the next event passing the filter
    pub async fn recv(&mut self) -> Result<RigEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, count);
                    return Err(EventBusError::Lagged { count });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Receive without blocking; `Ok(None)` when nothing matching is queued
    pub fn try_recv(&mut self) -> Result<Option<RigEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, count);
                    return Err(EventBusError::Lagged { count });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(RigEvent::IgnitionDetected {
                frame_number: 7,
                elapsed_sec: 0.7,
            })
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            RigEvent::IgnitionDetected { frame_number, .. } => assert_eq!(frame_number, 7),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        event_bus.emit(RigEvent::ShutdownRequested {
            reason: "test".to_string(),
        });

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(4);
        let result = event_bus.publish(RigEvent::AutoStopRequested { frame_number: 1 });
        assert!(matches!(
            result,
            Err(EventBusError::NoSubscribers {
                event_type: "auto_stop_requested"
            })
        ));

        // emit swallows the same condition
        event_bus.emit(RigEvent::AutoStopRequested { frame_number: 2 });
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let filter = EventFilter::EventTypes(vec!["run_completed"]);
        let mut receiver = EventReceiver::new(event_bus.subscribe(), filter, "test");

        event_bus.emit(RigEvent::IgnitionDetected {
            frame_number: 1,
            elapsed_sec: 0.0,
        });
        event_bus.emit(RigEvent::RunCompleted {
            run_id: Uuid::new_v4(),
            reason: CompletionReason::AutoStop,
            summary: BurnSummary::default(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "run_completed");
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_event_properties() {
        let event = RigEvent::SystemError {
            component: "capture".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(event.event_type(), "system_error");
        assert_eq!(event.description(), "Error in capture: boom");

        assert!(EventFilter::EventTypes(vec!["system_error"]).matches(&event));
        assert!(!EventFilter::EventTypes(vec!["run_failed"]).matches(&event));
    }
}
