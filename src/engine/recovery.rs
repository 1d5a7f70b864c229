// ============================================================================
// Recovery Loader
// Rebuilds the resting book from the order store before admission opens
// ============================================================================
//
// Recovery process:
// 1. List open orders for the symbol
// 2. Validate every order before touching the book
// 3. Insert in sequence order as resting orders (no matching, no trades)
// 4. Refuse a recovered book whose best bid crosses its best ask

use crate::domain::{Order, OrderBook, OrderId, OrderState, OrderStateTransition};
use crate::interfaces::{OrderStore, StoreError};
use crate::numeric::Price;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecoveryError {
    #[error("order store error: {0}")]
    Store(#[from] StoreError),

    #[error("order {order_id} belongs to {found}, not {expected}")]
    SymbolMismatch {
        order_id: OrderId,
        expected: String,
        found: String,
    },

    #[error("order {order_id} cannot be restored: {reason}")]
    InvalidOrder { order_id: OrderId, reason: String },

    #[error("sequence {sequence} assigned to more than one open order")]
    DuplicateSequence { sequence: u64 },

    #[error("recovered book is crossed: best bid {bid} >= best ask {ask}")]
    CrossedBook { bid: Price, ask: Price },
}

/// Outcome of a successful recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Orders inserted into the book
    pub restored: usize,
    /// Orders already present and left untouched
    pub skipped: usize,
    /// Highest command sequence among the open orders
    pub last_sequence: u64,
    /// Highest trade sequence issued before the restart
    pub last_trade_sequence: u64,
    pub elapsed_ms: u64,
}

pub struct RecoveryLoader {
    store: Arc<dyn OrderStore>,
}

impl RecoveryLoader {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Restore open orders for `book`'s symbol. Running it twice against the
    /// same book leaves the book unchanged the second time.
    pub fn recover(&self, book: &mut OrderBook) -> Result<RecoveryReport, RecoveryError> {
        let started = Instant::now();
        let symbol = book.symbol().to_string();
        tracing::info!(%symbol, "recovering open orders");

        let mut orders = self.store.list_open_orders(&symbol)?;
        let last_trade_sequence = self.store.last_trade_sequence(&symbol)?;

        orders.sort_by_key(Order::sequence_number);
        for order in &orders {
            validate(order, &symbol)?;
        }
        for pair in orders.windows(2) {
            if pair[0].sequence_number() == pair[1].sequence_number() {
                return Err(RecoveryError::DuplicateSequence {
                    sequence: pair[1].sequence_number(),
                });
            }
        }

        let mut report = RecoveryReport {
            last_sequence: orders.last().map_or(0, Order::sequence_number),
            last_trade_sequence,
            ..RecoveryReport::default()
        };

        for mut order in orders {
            if book.contains(&order.id) {
                report.skipped += 1;
                continue;
            }
            if order.state() == OrderState::New {
                order
                    .apply(OrderStateTransition::Rest)
                    .map_err(|err| invalid(&order, err.to_string()))?;
            }
            let order_id = order.id;
            book.insert_resting(order)
                .map_err(|err| RecoveryError::InvalidOrder {
                    order_id,
                    reason: err.to_string(),
                })?;
            report.restored += 1;
        }

        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            if bid >= ask {
                return Err(RecoveryError::CrossedBook { bid, ask });
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            %symbol,
            restored = report.restored,
            skipped = report.skipped,
            last_sequence = report.last_sequence,
            elapsed_ms = report.elapsed_ms,
            "recovery complete"
        );
        Ok(report)
    }
}

fn invalid(order: &Order, reason: impl Into<String>) -> RecoveryError {
    RecoveryError::InvalidOrder {
        order_id: order.id,
        reason: reason.into(),
    }
}

fn validate(order: &Order, symbol: &str) -> Result<(), RecoveryError> {
    if &*order.symbol != symbol {
        return Err(RecoveryError::SymbolMismatch {
            order_id: order.id,
            expected: symbol.to_string(),
            found: order.symbol.to_string(),
        });
    }
    if order.state().is_terminal() {
        return Err(invalid(order, format!("state {:?} is terminal", order.state())));
    }
    if order.sequence_number() == 0 {
        return Err(invalid(order, "missing sequence number"));
    }
    order
        .validate()
        .map_err(|reason| invalid(order, reason.code()))?;
    if !order.remaining_quantity().is_positive() {
        return Err(invalid(order, "no remaining quantity"));
    }
    Ok(())
}
