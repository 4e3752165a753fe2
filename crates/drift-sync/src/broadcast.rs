//! # Status Broadcaster
//!
//! Multicasts engine status snapshots over a `tokio::sync::watch` channel.
//! Every change replaces the whole snapshot, so observers may coalesce
//! (watch keeps only the latest value) but can never see updates out of
//! order, and a late subscriber immediately observes the current snapshot.

use tokio::sync::watch;

use drift_core::SyncStatus;

/// Single-writer status channel. The engine owns the sender; any number of
/// observers hold receivers.
#[derive(Debug)]
pub struct StatusChannel {
    tx: watch::Sender<SyncStatus>,
}

impl StatusChannel {
    pub fn new(initial: SyncStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        StatusChannel { tx }
    }

    /// Current snapshot.
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Subscribes an observer; the receiver starts at the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Publishes the snapshot produced by `f` from the current one.
    pub fn update(&self, f: impl FnOnce(SyncStatus) -> SyncStatus) {
        let next = f(self.current());
        // send_replace never fails; a watch channel keeps the value even
        // with zero receivers
        self.tx.send_replace(next);
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        StatusChannel::new(SyncStatus::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_late_subscriber_sees_current_snapshot() {
        let channel = StatusChannel::default();
        channel.update(|s| s.with_pending_count(4));

        let rx = channel.subscribe();
        assert_eq!(rx.borrow().pending_count, 4);
    }

    #[tokio::test]
    async fn test_updates_are_observed_in_order() {
        let channel = StatusChannel::default();
        let mut rx = channel.subscribe();

        channel.update(|s| s.with_is_syncing(true));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_syncing);

        channel.update(|s| s.with_is_syncing(false).with_pending_count(0));
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert!(!snapshot.is_syncing);
    }

    #[tokio::test]
    async fn test_observers_coalesce_to_latest() {
        let channel = StatusChannel::default();
        let mut rx = channel.subscribe();

        channel.update(|s| s.with_sync_progress(0.25));
        channel.update(|s| s.with_sync_progress(0.5));
        channel.update(|s| s.with_sync_progress(1.0));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().sync_progress, 1.0);
    }
}
