// ============================================================================
// Read-Side Publication
// Everything query callers see is copied out by the matching thread
// ============================================================================
//
//   snapshot  RwLock<Arc<OrderBookSnapshot>>   swapped, never mutated
//   trades    SkipMap<trade seq, Trade>        bounded, oldest evicted
//   orders    SkipMap<OrderId, OrderReport>    terminal reports evicted FIFO

use crate::domain::{Order, OrderBookSnapshot, OrderId, OrderKind, OrderState, RejectReason, Side, Trade};
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Copy of an order's externally visible status.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderReport {
    pub order_id: OrderId,
    pub user_id: Arc<str>,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub kind: OrderKind,
    pub state: OrderState,
    pub reject_reason: Option<RejectReason>,
    pub sequence: u64,
    pub updated_at: DateTime<Utc>,
}

impl OrderReport {
    pub fn of(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: Arc::clone(&order.user_id),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            filled_quantity: order.filled_quantity(),
            kind: order.kind,
            state: order.state(),
            reject_reason: None,
            sequence: order.sequence_number(),
            updated_at: Utc::now(),
        }
    }

    pub fn rejected(order: &Order, reason: RejectReason) -> Self {
        Self {
            reject_reason: Some(reason),
            ..Self::of(order)
        }
    }

    pub fn remaining_quantity(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_quantity)
    }
}

/// Point-in-time counters for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineStats {
    pub commands_processed: u64,
    pub last_sequence: u64,
    pub trades_executed: u64,
    pub orders_rejected: u64,
    pub orders_cancelled: u64,
    pub busy_rejections: u64,
    pub resting_orders: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub commands_processed: AtomicU64,
    pub last_sequence: AtomicU64,
    pub trades_executed: AtomicU64,
    pub orders_rejected: AtomicU64,
    pub orders_cancelled: AtomicU64,
    pub busy_rejections: AtomicU64,
    pub resting_orders: AtomicU64,
}

impl StatsCounters {
    pub fn load(&self) -> EngineStats {
        EngineStats {
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            last_sequence: self.last_sequence.load(Ordering::Acquire),
            trades_executed: self.trades_executed.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            resting_orders: self.resting_orders.load(Ordering::Relaxed),
        }
    }
}

/// Shared read side. Written only from the matching thread (and once
/// during recovery, before that thread exists).
pub(crate) struct Publisher {
    snapshot: RwLock<Arc<OrderBookSnapshot>>,
    trades: SkipMap<u64, Trade>,
    trade_history: usize,
    orders: SkipMap<OrderId, OrderReport>,
    terminal: SegQueue<OrderId>,
    order_history: usize,
    pub stats: StatsCounters,
}

impl Publisher {
    pub fn new(symbol: &str, trade_history: usize, order_history: usize) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(OrderBookSnapshot::empty(symbol))),
            trades: SkipMap::new(),
            trade_history,
            orders: SkipMap::new(),
            terminal: SegQueue::new(),
            order_history,
            stats: StatsCounters::default(),
        }
    }

    // ========================================================================
    // Writers (matching thread)
    // ========================================================================

    pub fn publish_snapshot(&self, snapshot: OrderBookSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn record_trade(&self, trade: Trade) {
        self.trades.insert(trade.sequence_number, trade);
        while self.trades.len() > self.trade_history {
            match self.trades.front() {
                Some(oldest) => {
                    oldest.remove();
                },
                None => break,
            }
        }
    }

    pub fn record_report(&self, report: OrderReport) {
        let order_id = report.order_id;
        let terminal = report.state.is_terminal();
        self.orders.insert(order_id, report);

        if !terminal {
            return;
        }
        self.terminal.push(order_id);
        while self.terminal.len() > self.order_history {
            let Some(evicted) = self.terminal.pop() else {
                break;
            };
            if let Some(entry) = self.orders.get(&evicted) {
                if entry.value().state.is_terminal() {
                    entry.remove();
                }
            }
        }
    }

    // ========================================================================
    // Readers (any thread)
    // ========================================================================

    pub fn snapshot(&self) -> Arc<OrderBookSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.trades
            .iter()
            .rev()
            .take(limit)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn report(&self, order_id: &OrderId) -> Option<OrderReport> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn knows(&self, order_id: &OrderId) -> bool {
        self.orders.contains_key(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderStateTransition;

    fn order() -> Order {
        Order::limit(
            "BTC-USD",
            "user",
            Side::Buy,
            Price::from_integer(100).unwrap(),
            Quantity::from_integer(1).unwrap(),
        )
    }

    fn trade(sequence: u64) -> Trade {
        let maker = order();
        let mut taker = order();
        taker.side = Side::Sell;
        Trade::between(&maker, &taker, Quantity::from_integer(1).unwrap(), sequence)
    }

    #[test]
    fn test_trades_newest_first_and_bounded() {
        let publisher = Publisher::new("BTC-USD", 3, 10);
        for seq in 1..=5 {
            publisher.record_trade(trade(seq));
        }

        let recent: Vec<u64> = publisher
            .recent_trades(10)
            .iter()
            .map(|t| t.sequence_number)
            .collect();
        assert_eq!(recent, vec![5, 4, 3]);
        assert_eq!(publisher.recent_trades(1)[0].sequence_number, 5);
    }

    #[test]
    fn test_terminal_reports_evicted_in_order() {
        let publisher = Publisher::new("BTC-USD", 10, 2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut order = order();
            order.apply(OrderStateTransition::Cancel).unwrap();
            ids.push(order.id);
            publisher.record_report(OrderReport::of(&order));
        }
        let resting = order();
        publisher.record_report(OrderReport::of(&resting));

        assert!(!publisher.knows(&ids[0]));
        assert!(publisher.knows(&ids[1]));
        assert!(publisher.knows(&ids[2]));
        assert_eq!(publisher.report(&resting.id).unwrap().state, OrderState::New);
    }

    #[test]
    fn test_snapshot_swap() {
        let publisher = Publisher::new("BTC-USD", 1, 1);
        let before = publisher.snapshot();
        publisher.publish_snapshot(OrderBookSnapshot::empty("BTC-USD").at_sequence(7));

        assert_eq!(before.sequence, 0);
        assert_eq!(publisher.snapshot().sequence, 7);
    }

    #[test]
    fn test_rejected_report_carries_reason() {
        let report = OrderReport::rejected(&order(), RejectReason::PostOnlyWouldCross);
        assert_eq!(report.reject_reason, Some(RejectReason::PostOnlyWouldCross));
        assert_eq!(report.remaining_quantity(), Quantity::from_integer(1).unwrap());
    }
}
