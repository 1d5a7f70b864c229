// ============================================================================
// Matching Core
// Applies sequenced commands to the order book, one at a time
// ============================================================================

use crate::domain::order_book::Reduction;
use crate::domain::{
    Command, Order, OrderBook, OrderId, OrderState, OrderStateTransition, RejectReason,
    SequencedCommand, Side, TimeInForce, Trade,
};
use crate::engine::publisher::OrderReport;
use crate::interfaces::{EventHandler, OrderEvent};
use crate::numeric::Price;
use chrono::Utc;
use smallvec::SmallVec;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Trades produced by a single command; most commands produce few.
pub type TradeBatch = SmallVec<[Trade; 4]>;

/// Everything one command produced, in the order it happened.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    pub sequence: u64,
    pub events: Vec<OrderEvent>,
    pub trades: TradeBatch,
    /// Status copies for every order the command touched
    pub reports: Vec<OrderReport>,
}

impl CommandOutcome {
    fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        self.events.iter().find_map(|event| match event {
            OrderEvent::OrderRejected { reason, .. } | OrderEvent::CancelRejected { reason, .. } => {
                Some(*reason)
            },
            _ => None,
        })
    }
}

/// Price-time priority matcher. Owns the book; whoever holds the core is the
/// book's single writer.
///
/// # Example
/// ```text
/// Book:  SELL 10 @ 100 (A, seq 1)
///        SELL  5 @ 100 (B, seq 2)
///
/// Incoming: BUY 12 @ 101
/// Result: 10 from A @ 100, then 2 from B @ 100
/// ```
pub struct MatchingCore {
    book: OrderBook,
    event_handler: Arc<dyn EventHandler>,
    last_sequence: u64,
    last_trade_sequence: u64,
    seen_ids: SeenIds,
}

impl MatchingCore {
    pub const DEFAULT_ID_HISTORY: usize = 100_000;

    /// Orders already resting in `book` count as seen.
    pub fn new(book: OrderBook, event_handler: Arc<dyn EventHandler>) -> Self {
        let mut seen_ids = SeenIds::new(Self::DEFAULT_ID_HISTORY);
        for side in [Side::Buy, Side::Sell] {
            for node in book.resting_orders(side) {
                seen_ids.insert(node.order.id);
            }
        }
        Self {
            book,
            event_handler,
            last_sequence: 0,
            last_trade_sequence: 0,
            seen_ids,
        }
    }

    /// How many finished order ids are remembered for duplicate detection.
    /// Ids still resting are always detected.
    pub fn with_id_history(mut self, capacity: usize) -> Self {
        self.seen_ids.set_capacity(capacity);
        self
    }

    /// Continue numbering after recovered state.
    pub fn resume_from(mut self, last_sequence: u64, last_trade_sequence: u64) -> Self {
        self.last_sequence = last_sequence;
        self.last_trade_sequence = last_trade_sequence;
        self
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn last_trade_sequence(&self) -> u64 {
        self.last_trade_sequence
    }

    /// Apply one command.
    pub fn process(&mut self, command: SequencedCommand) -> CommandOutcome {
        if command.sequence <= self.last_sequence {
            tracing::error!(
                sequence = command.sequence,
                last = self.last_sequence,
                "command sequence went backwards"
            );
        }
        self.last_sequence = command.sequence;

        let mut outcome = CommandOutcome::new(command.sequence);
        match command.command {
            Command::Submit(order) => self.submit(order, &mut outcome),
            Command::Cancel(order_id) => self.cancel(order_id, &mut outcome),
        }

        if !outcome.events.is_empty() {
            self.event_handler.on_events(&outcome.events);
        }
        outcome
    }

    // ========================================================================
    // Submit
    // ========================================================================

    fn submit(&mut self, mut order: Order, outcome: &mut CommandOutcome) {
        order.set_sequence_number(outcome.sequence);

        let first_sighting = self.seen_ids.insert(order.id);
        if !first_sighting || self.book.contains(&order.id) {
            // The earlier order keeps its report; only the event is emitted
            outcome.events.push(OrderEvent::OrderRejected {
                order_id: order.id,
                reason: RejectReason::DuplicateOrderId,
                timestamp: Utc::now(),
            });
            return;
        }
        if let Err(reason) = self.admission_check(&order) {
            self.reject(order, reason, outcome);
            return;
        }

        outcome.events.push(OrderEvent::OrderAccepted {
            order_id: order.id,
            sequence: outcome.sequence,
            timestamp: Utc::now(),
        });

        if order.time_in_force == TimeInForce::FillOrKill
            && self
                .book
                .crossing_liquidity(order.side, order.price, order.quantity)
                < order.quantity
        {
            self.expire(order, outcome);
            return;
        }

        if !self.match_against_book(&mut order, outcome) {
            self.expire(order, outcome);
            return;
        }

        if order.is_filled() {
            outcome.events.push(OrderEvent::OrderFilled {
                order_id: order.id,
                total_filled: order.filled_quantity(),
                timestamp: Utc::now(),
            });
            outcome.reports.push(OrderReport::of(&order));
            return;
        }

        if order.filled_quantity().is_positive() {
            outcome.events.push(OrderEvent::OrderPartiallyFilled {
                order_id: order.id,
                filled_quantity: order.filled_quantity(),
                remaining_quantity: order.remaining_quantity(),
                timestamp: Utc::now(),
            });
        }

        if order.time_in_force.can_rest() {
            self.rest(order, outcome);
        } else {
            self.expire(order, outcome);
        }
    }

    fn admission_check(&self, order: &Order) -> Result<(), RejectReason> {
        if *order.symbol != *self.book.symbol() {
            return Err(RejectReason::SymbolMismatch);
        }
        order.validate()?;
        if order.kind.is_post_only() && self.book.would_cross(order.side, order.price) {
            return Err(RejectReason::PostOnlyWouldCross);
        }
        Ok(())
    }

    /// Returns false if the book refused an execution; the taker must not rest.
    fn match_against_book(&mut self, taker: &mut Order, outcome: &mut CommandOutcome) -> bool {
        let maker_side = taker.side.opposite();

        while taker.remaining_quantity().is_positive() {
            let (maker_id, quantity, trade) = {
                let Some(maker) = self.book.best_maker(maker_side) else {
                    break;
                };
                if !crosses(taker.side, taker.price, maker.order.price) {
                    break;
                }
                let quantity = taker.remaining_quantity().min(maker.displayed());
                let trade = Trade::between(&maker.order, taker, quantity, self.last_trade_sequence + 1);
                (maker.order.id, quantity, trade)
            };

            let reduction = match self.book.reduce_or_remove(&maker_id, quantity) {
                Ok(reduction) => reduction,
                Err(err) => {
                    tracing::error!(%maker_id, %err, "maker could not absorb execution");
                    return false;
                },
            };
            if let Err(err) = taker.fill(quantity) {
                tracing::error!(order_id = %taker.id, %err, "taker fill rejected after maker fill");
                return false;
            }

            self.last_trade_sequence += 1;
            outcome.events.push(OrderEvent::OrderMatched {
                trade: trade.clone(),
                timestamp: Utc::now(),
            });
            outcome.trades.push(trade);
            self.record_maker(maker_id, reduction, outcome);
        }
        true
    }

    fn record_maker(&self, maker_id: OrderId, reduction: Reduction, outcome: &mut CommandOutcome) {
        let now = Utc::now();
        match reduction {
            Reduction::Removed(maker) => {
                outcome.events.push(OrderEvent::OrderFilled {
                    order_id: maker_id,
                    total_filled: maker.filled_quantity(),
                    timestamp: now,
                });
                outcome.reports.push(OrderReport::of(&maker));
            },
            Reduction::Reduced { remaining } => {
                if let Some(node) = self.book.get(&maker_id) {
                    outcome.events.push(OrderEvent::OrderPartiallyFilled {
                        order_id: maker_id,
                        filled_quantity: node.order.filled_quantity(),
                        remaining_quantity: remaining,
                        timestamp: now,
                    });
                    outcome.reports.push(OrderReport::of(&node.order));
                }
            },
            Reduction::Replenished {
                displayed,
                remaining,
            } => {
                if let Some(node) = self.book.get(&maker_id) {
                    outcome.events.push(OrderEvent::OrderPartiallyFilled {
                        order_id: maker_id,
                        filled_quantity: node.order.filled_quantity(),
                        remaining_quantity: remaining,
                        timestamp: now,
                    });
                    outcome.events.push(OrderEvent::IcebergReplenished {
                        order_id: maker_id,
                        displayed,
                        hidden: node.hidden(),
                        timestamp: now,
                    });
                    outcome.reports.push(OrderReport::of(&node.order));
                }
            },
        }
    }

    fn rest(&mut self, mut order: Order, outcome: &mut CommandOutcome) {
        if let Err(err) = order.apply(OrderStateTransition::Rest) {
            tracing::error!(order_id = %order.id, %err, "illegal transition while resting");
            self.expire(order, outcome);
            return;
        }
        let (order_id, price, remaining) = (order.id, order.price, order.remaining_quantity());
        let report = OrderReport::of(&order);

        match self.book.insert_resting(order) {
            Ok(()) => {
                outcome.events.push(OrderEvent::OrderAddedToBook {
                    order_id,
                    price,
                    quantity: remaining,
                    timestamp: Utc::now(),
                });
                outcome.reports.push(report);
            },
            Err(err) => {
                tracing::error!(%order_id, %err, "book refused resting order");
                outcome.events.push(OrderEvent::OrderCancelled {
                    order_id,
                    unfilled_quantity: remaining,
                    timestamp: Utc::now(),
                });
                outcome.reports.push(OrderReport {
                    state: OrderState::Cancelled,
                    ..report
                });
            },
        }
    }

    /// IOC/FOK remainder, or an FOK that could not be filled in full.
    fn expire(&mut self, mut order: Order, outcome: &mut CommandOutcome) {
        if let Err(err) = order.apply(OrderStateTransition::Cancel) {
            // Already terminal; its report still goes out
            tracing::error!(order_id = %order.id, %err, "illegal transition while expiring");
            outcome.reports.push(OrderReport::of(&order));
            return;
        }
        outcome.events.push(OrderEvent::OrderCancelled {
            order_id: order.id,
            unfilled_quantity: order.remaining_quantity(),
            timestamp: Utc::now(),
        });
        outcome.reports.push(OrderReport::of(&order));
    }

    fn reject(&mut self, mut order: Order, reason: RejectReason, outcome: &mut CommandOutcome) {
        if let Err(err) = order.apply(OrderStateTransition::Reject) {
            tracing::error!(order_id = %order.id, %err, "illegal transition while rejecting");
        }
        tracing::debug!(order_id = %order.id, %reason, "order rejected");
        outcome.events.push(OrderEvent::OrderRejected {
            order_id: order.id,
            reason,
            timestamp: Utc::now(),
        });
        outcome.reports.push(OrderReport::rejected(&order, reason));
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    fn cancel(&mut self, order_id: OrderId, outcome: &mut CommandOutcome) {
        let Some(mut order) = self.book.remove(&order_id) else {
            outcome.events.push(OrderEvent::CancelRejected {
                order_id,
                reason: RejectReason::UnknownOrder,
                timestamp: Utc::now(),
            });
            return;
        };

        if let Err(err) = order.apply(OrderStateTransition::Cancel) {
            tracing::error!(%order_id, %err, "illegal transition while cancelling");
        }
        outcome.events.push(OrderEvent::OrderCancelled {
            order_id,
            unfilled_quantity: order.remaining_quantity(),
            timestamp: Utc::now(),
        });
        outcome.reports.push(OrderReport::of(&order));
    }
}

/// Ids the core has admitted, bounded by FIFO eviction.
struct SeenIds {
    ids: HashSet<OrderId>,
    order: VecDeque<OrderId>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// False if `id` was already present.
    fn insert(&mut self, id: OrderId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        self.evict();
        true
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    fn evict(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[inline]
fn crosses(taker_side: Side, limit: Price, maker_price: Price) -> bool {
    match taker_side {
        Side::Buy => limit >= maker_price,
        Side::Sell => limit <= maker_price,
    }
}
