// ============================================================================
// Order Events
// What the matching thread reports after each command
// ============================================================================

use crate::domain::{OrderId, RejectReason, Trade};
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Events emitted by the matching core, in command order.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OrderEvent {
    /// Order passed the matching thread's checks and was sequenced
    OrderAccepted {
        order_id: OrderId,
        sequence: u64,
        timestamp: DateTime<Utc>,
    },

    /// Order rejected with reason
    OrderRejected {
        order_id: OrderId,
        reason: RejectReason,
        timestamp: DateTime<Utc>,
    },

    /// Order matched, trade generated
    OrderMatched {
        trade: Trade,
        timestamp: DateTime<Utc>,
    },

    /// Order partially filled
    OrderPartiallyFilled {
        order_id: OrderId,
        filled_quantity: Quantity,
        remaining_quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Order fully filled
    OrderFilled {
        order_id: OrderId,
        total_filled: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Order cancelled, by request or by IOC/FOK expiry
    OrderCancelled {
        order_id: OrderId,
        unfilled_quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Cancel for an order that is not resting
    CancelRejected {
        order_id: OrderId,
        reason: RejectReason,
        timestamp: DateTime<Utc>,
    },

    /// Order added to book
    OrderAddedToBook {
        order_id: OrderId,
        price: Price,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Iceberg carved a new displayed slice from its hidden quantity
    IcebergReplenished {
        order_id: OrderId,
        displayed: Quantity,
        hidden: Quantity,
        timestamp: DateTime<Utc>,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            OrderEvent::OrderAccepted { order_id, .. }
            | OrderEvent::OrderRejected { order_id, .. }
            | OrderEvent::OrderPartiallyFilled { order_id, .. }
            | OrderEvent::OrderFilled { order_id, .. }
            | OrderEvent::OrderCancelled { order_id, .. }
            | OrderEvent::CancelRejected { order_id, .. }
            | OrderEvent::OrderAddedToBook { order_id, .. }
            | OrderEvent::IcebergReplenished { order_id, .. } => Some(*order_id),
            OrderEvent::OrderMatched { .. } => None,
        }
    }
}

/// Receives the events of each processed command, in sequence order.
///
/// Called on the matching thread, so implementations must not block. Slow
/// consumers should copy what they need onto their own queue.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &OrderEvent);

    /// All events of one command. Override to hand them off in one go.
    fn on_events(&self, events: &[OrderEvent]) {
        events.iter().for_each(|event| self.on_event(event));
    }
}

/// Discards every event.
pub struct NoOpEventHandler;

impl EventHandler for NoOpEventHandler {
    fn on_event(&self, _event: &OrderEvent) {}

    fn on_events(&self, _events: &[OrderEvent]) {}
}

/// Writes each event as a structured `tracing` record.
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn on_event(&self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderMatched { trade, .. } => tracing::info!(
                trade_id = %trade.id,
                buy = %trade.buy_order_id,
                sell = %trade.sell_order_id,
                taker_side = ?trade.taker_side,
                price = %trade.price,
                quantity = %trade.quantity,
                sequence = trade.sequence_number,
                "trade"
            ),
            OrderEvent::OrderRejected { order_id, reason, .. }
            | OrderEvent::CancelRejected { order_id, reason, .. } => {
                tracing::debug!(%order_id, %reason, "rejected")
            },
            other => tracing::debug!(event = ?other, "order event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl EventHandler for Counting {
        fn on_event(&self, _event: &OrderEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn cancel_rejected(order_id: OrderId) -> OrderEvent {
        OrderEvent::CancelRejected {
            order_id,
            reason: RejectReason::UnknownOrder,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_batch_defaults_to_each_event() {
        let handler = Counting(AtomicUsize::new(0));
        let events = vec![cancel_rejected(OrderId::new()), cancel_rejected(OrderId::new())];
        handler.on_events(&events);
        assert_eq!(handler.0.load(Ordering::Relaxed), 2);

        LoggingEventHandler.on_events(&events);
        NoOpEventHandler.on_events(&events);
    }

    #[test]
    fn test_event_order_id() {
        let order_id = OrderId::new();
        assert_eq!(cancel_rejected(order_id).order_id(), Some(order_id));
    }
}
