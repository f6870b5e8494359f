use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared "fire currently active" flag handed to every analysis call
#[derive(Debug, Clone, Default)]
pub struct FireIndicator {
    active: Arc<AtomicBool>,
}

impl FireIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn raise(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            debug!("Fire indicator raised");
        }
    }

    pub fn lower(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("Fire indicator lowered");
        }
    }
}
