// ============================================================================
// Order Store Interface
// Durable source of open orders consulted before admission
// ============================================================================

use crate::domain::{Order, OrderId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("order store unavailable: {0}")]
    Unavailable(String),
    #[error("order store returned corrupt data: {0}")]
    Corrupt(String),
}

/// Read access to persisted orders. Owned by the order service; the engine
/// only reads from it during recovery.
pub trait OrderStore: Send + Sync {
    /// Non-terminal orders for `symbol`, in any order. Recovery restores
    /// them by ascending sequence number; two orders sharing a sequence
    /// number make recovery fail.
    fn list_open_orders(&self, symbol: &str) -> Result<Vec<Order>, StoreError>;

    /// Highest trade sequence already issued for `symbol`.
    fn last_trade_sequence(&self, _symbol: &str) -> Result<u64, StoreError> {
        Ok(0)
    }
}

/// Store backed by a map; for tests and embedded deployments.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<BTreeMap<OrderId, Order>>,
    trade_sequences: RwLock<BTreeMap<String, u64>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }

    pub fn remove(&self, order_id: &OrderId) -> Option<Order> {
        self.orders.write().remove(order_id)
    }

    pub fn set_last_trade_sequence(&self, symbol: &str, sequence: u64) {
        self.trade_sequences.write().insert(symbol.to_string(), sequence);
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn list_open_orders(&self, symbol: &str) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .values()
            .filter(|order| &*order.symbol == symbol && !order.state().is_terminal())
            .cloned()
            .collect())
    }

    fn last_trade_sequence(&self, symbol: &str) -> Result<u64, StoreError> {
        Ok(self.trade_sequences.read().get(symbol).copied().unwrap_or(0))
    }
}
