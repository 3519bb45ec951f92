//! Graceful shutdown coordination.

use tokio::sync::watch;

/// Shutdown signal that can be cloned and awaited.
///
/// Once triggered it stays triggered, so it is safe to await repeatedly
/// inside a `select!` loop.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    ///
    /// Also resolves if the coordinator is dropped.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Shutdown coordinator that can send shutdown signals.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_created_before_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        assert!(!signal.is_shutdown());

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("signal should fire");
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_recv_is_repeatable() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        coordinator.shutdown();

        signal.recv().await;
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("second recv should also resolve");

        let mut late = coordinator.signal();
        tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .expect("late subscriber sees shutdown");
    }

    #[tokio::test]
    async fn test_dropped_coordinator_releases_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.signal();
        drop(coordinator);

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("dropping the coordinator should release waiters");
    }
}
