//! Shutdown coordination between signal handlers and the server loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown state. Cloning shares the underlying flags.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    /// Set once a shutdown was requested; the loop drains on its next tick
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once the loop has stopped and every resource was released
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Requests a shutdown. Returns `false` if one was already requested.
    pub fn initiate_shutdown(&self) -> bool {
        let first = !self.shutdown_initiated.swap(true, Ordering::AcqRel);
        if first {
            info!("🛑 Shutdown initiated - server will drain on the next tick");
        }
        first
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Server loop stopped - ready for final cleanup");
    }
}
