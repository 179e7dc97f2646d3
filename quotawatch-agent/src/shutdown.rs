//! Cooperative cancellation.
//!
//! One [`ShutdownTrigger`] fans out to any number of [`Shutdown`] handles.
//! Dropping the trigger counts as cancellation, so an agent can never be
//! left running after its owner went away.

use tokio::sync::watch;

/// Creates a connected trigger/handle pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Fires cancellation.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signals every handle. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Creates another handle observing this trigger.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes cancellation.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Returns true once cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Completes when cancellation is signalled (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the trigger was dropped, which also cancels.
        let _ = rx.wait_for(|&stop| stop).await;
    }
}
