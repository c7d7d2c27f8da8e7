//! Lock change notification

use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 64;

/// Payload-free signal that some lock changed state
///
/// Observers re-read whatever they display; a lagged receiver has only missed
/// redundant signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatusChanged;

/// Single-topic broadcaster for [`LockStatusChanged`]
#[derive(Clone)]
pub struct LockNotifier {
    tx: broadcast::Sender<LockStatusChanged>,
}

impl LockNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockStatusChanged> {
        self.tx.subscribe()
    }

    pub fn notify(&self) {
        // send() only fails when nobody is listening
        if self.tx.send(LockStatusChanged).is_err() {
            trace!("lock change with no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_every_subscriber_sees_the_signal() {
        let notifier = LockNotifier::new();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.notify();
        assert_eq!(a.try_recv(), Ok(LockStatusChanged));
        assert_eq!(b.try_recv(), Ok(LockStatusChanged));
        assert_eq!(a.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_notify_without_subscribers_is_harmless() {
        LockNotifier::new().notify();
    }

    #[test]
    fn test_lagging_subscriber_recovers() {
        let notifier = LockNotifier::new();
        let mut rx = notifier.subscribe();
        for _ in 0..(CHANNEL_CAPACITY + 5) {
            notifier.notify();
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(_))));
        assert_eq!(rx.try_recv(), Ok(LockStatusChanged));
    }
}
