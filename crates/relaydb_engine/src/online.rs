//! Connectivity signal gating all remote traffic.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared online/offline signal.
///
/// The application feeds connectivity changes in through
/// [`OnlineDetector::set_online`]; the transport waits on the signal
/// before every request, so no traffic is attempted while offline.
///
/// Cloning yields a handle to the same signal.
#[derive(Debug, Clone)]
pub struct OnlineDetector {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl OnlineDetector {
    /// Creates a detector with the given initial connectivity.
    pub fn new(online: bool) -> Self {
        let (tx, rx) = watch::channel(online);
        Self { tx: Arc::new(tx), rx }
    }

    /// The current connectivity.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Publishes a connectivity change.
    pub fn set_online(&self, online: bool) {
        let _ = self.tx.send(online);
    }

    /// Resolves as soon as the signal is (or becomes) online.
    pub async fn wait_until_online(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for OnlineDetector {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_online() {
        let detector = OnlineDetector::new(true);
        detector.wait_until_online().await;
        assert!(detector.is_online());
    }

    #[tokio::test]
    async fn wait_blocks_until_online() {
        let detector = OnlineDetector::new(false);
        let waiting = detector.clone();
        let task = tokio::spawn(async move {
            waiting.wait_until_online().await;
        });
        assert!(!task.is_finished());

        detector.set_online(true);
        task.await.unwrap();
        assert!(detector.is_online());
    }

    #[test]
    fn clones_share_the_signal() {
        let detector = OnlineDetector::new(true);
        let other = detector.clone();
        detector.set_online(false);
        assert!(!other.is_online());
    }
}
