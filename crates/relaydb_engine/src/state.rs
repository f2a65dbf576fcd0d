//! Observable sync lifecycle state.

use tokio::sync::watch;

/// The replica's position in the sync lifecycle.
///
/// States advance strictly forward during startup; a replica never moves
/// backwards once it reaches [`SyncState::Synced`], even while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Preparing local bookkeeping tables.
    Bootstrapping,
    /// Streaming the initial bulk snapshot from the remote.
    Pulling,
    /// Replaying batches committed remotely since the last known time.
    GettingLatest,
    /// Fully caught up; live catch-up and queue draining are running.
    Synced,
}

/// Publishes state transitions to any number of observers.
#[derive(Debug)]
pub(crate) struct StatePublisher {
    tx: watch::Sender<SyncState>,
}

impl StatePublisher {
    pub(crate) fn new() -> (Self, watch::Receiver<SyncState>) {
        let (tx, rx) = watch::channel(SyncState::Bootstrapping);
        (Self { tx }, rx)
    }

    pub(crate) fn set(&self, state: SyncState) {
        // Observers may all be gone; that is not an error.
        let _ = self.tx.send(state);
    }
}

/// Waits until the observed state reaches [`SyncState::Synced`].
pub async fn wait_for_synced(rx: &mut watch::Receiver<SyncState>) {
    while *rx.borrow() != SyncState::Synced {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_observed() {
        let (publisher, mut rx) = StatePublisher::new();
        assert_eq!(*rx.borrow(), SyncState::Bootstrapping);

        publisher.set(SyncState::Pulling);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SyncState::Pulling);
    }

    #[tokio::test]
    async fn wait_for_synced_returns_on_synced() {
        let (publisher, mut rx) = StatePublisher::new();
        let waiter = tokio::spawn(async move {
            wait_for_synced(&mut rx).await;
            *rx.borrow()
        });
        publisher.set(SyncState::Pulling);
        publisher.set(SyncState::GettingLatest);
        publisher.set(SyncState::Synced);
        assert_eq!(waiter.await.unwrap(), SyncState::Synced);
    }
}
