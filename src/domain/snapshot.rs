// ============================================================================
// Order Book Snapshot
// Read-only copy handed to query paths
// ============================================================================

use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Aggregated displayed liquidity at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Quantity,
    pub order_count: usize,
}

/// Immutable point-in-time view of the order book.
///
/// Built by copying out of the live book; it never shares state with it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderBookSnapshot {
    pub symbol: String,
    /// Best (highest) bid first
    pub bids: Vec<DepthLevel>,
    /// Best (lowest) ask first
    pub asks: Vec<DepthLevel>,
    /// Sequence of the last command applied before the copy was taken
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            sequence: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn at_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Copy limited to `depth` levels per side.
    pub fn truncated(&self, depth: usize) -> Self {
        Self {
            symbol: self.symbol.clone(),
            bids: self.bids.iter().take(depth).copied().collect(),
            asks: self.asks.iter().take(depth).copied().collect(),
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|level| level.price)
    }

    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.checked_sub(bid).ok(),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<Price> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let sum = bid.checked_add(ask).ok()?;
        Some(Price::from_raw(sum.raw_value() / 2))
    }

    pub fn total_bid_quantity(&self) -> Quantity {
        self.bids.iter().map(|level| level.quantity).sum()
    }

    pub fn total_ask_quantity(&self) -> Quantity {
        self.asks.iter().map(|level| level.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: i64, qty: i64) -> DepthLevel {
        DepthLevel {
            price: Price::from_integer(price).unwrap(),
            quantity: Quantity::from_integer(qty).unwrap(),
            order_count: 1,
        }
    }

    #[test]
    fn test_snapshot_derived_values() {
        let mut snapshot = OrderBookSnapshot::empty("BTC-USD");
        snapshot.bids = vec![level(50000, 1), level(49900, 2)];
        snapshot.asks = vec![level(50100, 2)];

        assert_eq!(snapshot.best_bid(), Some(Price::from_integer(50000).unwrap()));
        assert_eq!(snapshot.best_ask(), Some(Price::from_integer(50100).unwrap()));
        assert_eq!(snapshot.spread(), Some(Price::from_integer(100).unwrap()));
        assert_eq!(snapshot.mid_price(), Some(Price::from_integer(50050).unwrap()));
        assert_eq!(snapshot.total_bid_quantity(), Quantity::from_integer(3).unwrap());
    }

    #[test]
    fn test_truncated_keeps_best_levels() {
        let mut snapshot = OrderBookSnapshot::empty("BTC-USD").at_sequence(9);
        snapshot.bids = vec![level(100, 1), level(99, 1), level(98, 1)];

        let top = snapshot.truncated(2);
        assert_eq!(top.bids.len(), 2);
        assert_eq!(top.bids[1].price, Price::from_integer(99).unwrap());
        assert_eq!(top.sequence, 9);
        assert!(top.spread().is_none());
    }
}
