use super::types::{RunState, ShutdownReason};
use crate::analyzer::BurnAnalyzer;
use crate::capture::CaptureManager;
use crate::config::BurnCamConfig;
use crate::events::EventBus;
use crate::pipeline::{FireIndicator, FrameProcessor, PollingWatcher};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Broadcast capacity of the rig event bus
const EVENT_BUS_CAPACITY: usize = 64;

/// Wires capture, analysis and the protocol state together.
///
/// Cheap to clone; every clone drives the same rig.
#[derive(Clone)]
pub struct BurnRig {
    pub(super) config: Arc<BurnCamConfig>,
    pub(super) event_bus: EventBus,

    // Components
    pub(super) capture: Arc<CaptureManager>,
    pub(super) analyzer: Arc<Mutex<BurnAnalyzer>>,
    pub(super) processor: Arc<FrameProcessor>,
    pub(super) watcher: PollingWatcher,
    pub(super) fire: FireIndicator,

    // Protocol state shared by every transport
    pub(super) run: Arc<RwLock<RunState>>,

    // Lifecycle management
    pub(super) tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Arc<Mutex<Option<oneshot::Receiver<ShutdownReason>>>>,
    pub(super) cancellation_token: CancellationToken,
}

impl BurnRig {
    /// Create a rig with the given configuration. Nothing runs until `initialize`.
    pub fn new(config: BurnCamConfig) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let fire = FireIndicator::new();

        let capture = Arc::new(CaptureManager::new(
            config.capture.clone(),
            config.sensor.fps,
        ));

        let analyzer = Arc::new(Mutex::new(BurnAnalyzer::new(
            config.analyzer.clone(),
            config.sensor.clone(),
        )));

        let processor = Arc::new(FrameProcessor::new(
            Arc::clone(&analyzer),
            fire.clone(),
            event_bus.clone(),
            &config.sensor,
            &config.processing,
        ));

        let watcher = PollingWatcher::new(
            capture.folder(),
            &config.capture.file_prefix,
            &config.capture.file_extension,
            config.sensor.frame_bytes(),
            Duration::from_millis(config.processing.watcher_poll_ms.max(1)),
        );

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config: Arc::new(config),
            event_bus,
            capture,
            analyzer,
            processor,
            watcher,
            fire,
            run: Arc::new(RwLock::new(RunState::default())),
            tasks: Arc::new(Mutex::new(Vec::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Arc::new(Mutex::new(Some(shutdown_receiver))),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BurnCamConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn capture(&self) -> &CaptureManager {
        &self.capture
    }

    pub fn processor(&self) -> &FrameProcessor {
        &self.processor
    }

    pub fn fire_indicator(&self) -> &FireIndicator {
        &self.fire
    }

    /// Token cancelled when the rig shuts down; transports should watch it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Ask a running `run()` loop to shut down
    pub fn request_shutdown(&self, reason: ShutdownReason) {
        if let Some(sender) = self.shutdown_sender.lock().take() {
            let _ = sender.send(reason);
        }
    }

    pub(super) fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.config.processing.drain_timeout_sec)
    }

    pub(super) fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}
