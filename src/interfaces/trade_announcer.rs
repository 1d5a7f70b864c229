// ============================================================================
// Trade Announcer Interface
// Outbound delivery of executed trades to Clearing
// ============================================================================

use crate::domain::TradeAnnouncement;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnounceError {
    #[error("announcement transport unavailable: {0}")]
    Unavailable(String),
    #[error("announcement channel is full")]
    Backpressure,
    #[error("announcement channel closed")]
    Closed,
}

/// Delivers trade announcements. Called from the announcer thread, never
/// from the matching thread. Failures are retried, so delivery is
/// at-least-once and receivers deduplicate on `trade_id`.
pub trait TradeAnnouncer: Send + Sync {
    fn announce(&self, announcement: &TradeAnnouncement) -> Result<(), AnnounceError>;
}

/// Drops every announcement.
pub struct NoOpAnnouncer;

impl TradeAnnouncer for NoOpAnnouncer {
    fn announce(&self, _announcement: &TradeAnnouncement) -> Result<(), AnnounceError> {
        Ok(())
    }
}

/// Keeps delivered announcements in memory. Can be told to fail the next
/// `n` calls to exercise the retry path.
#[derive(Default)]
pub struct InMemoryAnnouncer {
    delivered: Mutex<Vec<TradeAnnouncement>>,
    failures_remaining: AtomicU32,
}

impl InMemoryAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: u32) -> Self {
        let announcer = Self::default();
        announcer.fail_next(times);
        announcer
    }

    pub fn fail_next(&self, times: u32) {
        self.failures_remaining.store(times, Ordering::Release);
    }

    pub fn delivered(&self) -> Vec<TradeAnnouncement> {
        self.delivered.lock().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().len()
    }
}

impl TradeAnnouncer for InMemoryAnnouncer {
    fn announce(&self, announcement: &TradeAnnouncement) -> Result<(), AnnounceError> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AnnounceError::Unavailable("injected failure".to_string()));
        }
        self.delivered.lock().push(announcement.clone());
        Ok(())
    }
}

/// Forwards announcements into a tokio channel drained by an async outbox.
#[cfg(feature = "async")]
pub struct ChannelAnnouncer {
    sender: tokio::sync::mpsc::Sender<TradeAnnouncement>,
}

#[cfg(feature = "async")]
impl ChannelAnnouncer {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<TradeAnnouncement>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[cfg(feature = "async")]
impl TradeAnnouncer for ChannelAnnouncer {
    fn announce(&self, announcement: &TradeAnnouncement) -> Result<(), AnnounceError> {
        use tokio::sync::mpsc::error::TrySendError;

        self.sender
            .try_send(announcement.clone())
            .map_err(|err| match err {
                TrySendError::Full(_) => AnnounceError::Backpressure,
                TrySendError::Closed(_) => AnnounceError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Order, Side, Trade};
    use crate::numeric::{Price, Quantity};

    fn announcement() -> TradeAnnouncement {
        let maker = Order::limit(
            "BTC-USD",
            "maker",
            Side::Sell,
            Price::from_integer(100).unwrap(),
            Quantity::from_integer(1).unwrap(),
        );
        let taker = Order::limit(
            "BTC-USD",
            "taker",
            Side::Buy,
            Price::from_integer(100).unwrap(),
            Quantity::from_integer(1).unwrap(),
        );
        Trade::between(&maker, &taker, Quantity::from_integer(1).unwrap(), 1).announcement()
    }

    #[test]
    fn test_injected_failures_then_delivery() {
        let announcer = InMemoryAnnouncer::failing(2);
        let msg = announcement();

        assert!(announcer.announce(&msg).is_err());
        assert!(announcer.announce(&msg).is_err());
        assert!(announcer.announce(&msg).is_ok());
        assert_eq!(announcer.delivered_count(), 1);
        assert_eq!(announcer.delivered()[0].trade_id, msg.trade_id);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_channel_announcer_forwards() {
        let (announcer, mut receiver) = ChannelAnnouncer::new(1);
        let msg = announcement();

        announcer.announce(&msg).unwrap();
        assert_eq!(announcer.announce(&msg), Err(AnnounceError::Backpressure));
        assert_eq!(receiver.recv().await.unwrap().trade_id, msg.trade_id);

        drop(receiver);
        assert_eq!(announcer.announce(&msg), Err(AnnounceError::Closed));
    }
}
