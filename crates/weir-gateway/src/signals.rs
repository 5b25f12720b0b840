//! Shutdown signalling.
//!
//! One broadcast flag shared by every task. Long-lived loops select on
//! `Shutdown::recv()` next to their socket operations, so a shutdown is
//! observed at the next suspension point rather than after a timeout.

use tokio::sync::watch;

/// Sending half: owned by the process entry point and the supervisor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half: cloned into every task that must stop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected shutdown pair.
#[must_use]
pub fn shutdown_pair() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    /// Signal shutdown to every receiver. Idempotent.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    /// A fresh receiver for a late-constructed task.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown { rx: self.tx.subscribe() }
    }
}

impl Shutdown {
    /// Wait until shutdown is signalled.
    ///
    /// Returns immediately if it already was. Cancel-safe: this is a watch
    /// read, losing the future loses nothing.
    pub async fn recv(&mut self) {
        // An Err means the sender is gone, which only happens when the
        // process is tearing down anyway: treat it as signalled.
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Non-blocking check.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        *self.rx.borrow()
    }
}
