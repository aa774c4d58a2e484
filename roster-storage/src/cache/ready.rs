//! One-shot readiness gate.

use std::sync::Arc;
use tokio::sync::watch;

/// Write-once readiness signal shared by any number of waiters.
///
/// Closing an already closed gate is a no-op; a gate never reopens.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Open the gate. Returns true only for the call that opened it.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                return false;
            }
            *ready = true;
            true
        })
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the gate is closed. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a
        // closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
