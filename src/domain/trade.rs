// ============================================================================
// Trade Domain Model
// ============================================================================

use crate::numeric::{NumericResult, Price, Quantity};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::{Order, OrderId, Side};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Globally unique trade identifier; Clearing deduplicates on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TradeId(Uuid);

impl TradeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TradeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single execution between a resting maker and an incoming taker.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trade {
    pub id: TradeId,
    pub symbol: Arc<str>,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buy_user_id: Arc<str>,
    pub sell_user_id: Arc<str>,
    /// The resting order; its price is the execution price
    pub maker_order_id: OrderId,
    /// Side of the incoming order
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Quantity,
    /// Per-symbol trade sequence, strictly increasing
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// Build a trade from the two orders involved. Buy/sell ids are mapped
    /// from the taker's side; the price is always the maker's.
    pub fn between(maker: &Order, taker: &Order, quantity: Quantity, sequence_number: u64) -> Self {
        let (buy, sell) = match taker.side {
            Side::Buy => (taker, maker),
            Side::Sell => (maker, taker),
        };

        Self {
            id: TradeId::new(),
            symbol: Arc::clone(&taker.symbol),
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            buy_user_id: Arc::clone(&buy.user_id),
            sell_user_id: Arc::clone(&sell.user_id),
            maker_order_id: maker.id,
            taker_side: taker.side,
            price: maker.price,
            quantity,
            sequence_number,
            timestamp: Utc::now(),
        }
    }

    /// Notional value of the trade (price * quantity)
    pub fn notional_value(&self) -> NumericResult<Price> {
        self.price.checked_mul(self.quantity)
    }

    /// Outbound message for Clearing.
    pub fn announcement(&self) -> TradeAnnouncement {
        TradeAnnouncement {
            trade_id: self.id,
            symbol: self.symbol.to_string(),
            buy_user_id: self.buy_user_id.to_string(),
            sell_user_id: self.sell_user_id.to_string(),
            price: self.price,
            quantity: self.quantity,
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
        }
    }
}

/// Trade announcement delivered at-least-once to Clearing. Consumers must
/// deduplicate on `trade_id`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TradeAnnouncement {
    pub trade_id: TradeId,
    pub symbol: String,
    pub buy_user_id: String,
    pub sell_user_id: String,
    pub price: Price,
    pub quantity: Quantity,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(feature = "serde")]
impl TradeAnnouncement {
    /// JSON payload for an outbox row or broker message.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(side: Side, user: &str, price: i64, qty: i64) -> Order {
        Order::limit(
            "BTC-USD",
            user,
            side,
            Price::from_integer(price).unwrap(),
            Quantity::from_integer(qty).unwrap(),
        )
    }

    #[test]
    fn test_trade_maps_sides_from_taker() {
        let maker = order(Side::Sell, "seller", 100, 10);
        let taker = order(Side::Buy, "buyer", 101, 5);

        let trade = Trade::between(&maker, &taker, Quantity::from_integer(5).unwrap(), 1);

        assert_eq!(trade.buy_order_id, taker.id);
        assert_eq!(trade.sell_order_id, maker.id);
        assert_eq!(&*trade.buy_user_id, "buyer");
        assert_eq!(trade.price, Price::from_integer(100).unwrap());
        assert_eq!(trade.maker_order_id, maker.id);
        assert_eq!(trade.taker_side, Side::Buy);
    }

    #[test]
    fn test_announcement_carries_users() {
        let maker = order(Side::Buy, "alice", 99, 7);
        let taker = order(Side::Sell, "bob", 99, 7);
        let trade = Trade::between(&maker, &taker, Quantity::from_integer(7).unwrap(), 42);

        let announcement = trade.announcement();
        assert_eq!(announcement.trade_id, trade.id);
        assert_eq!(announcement.buy_user_id, "alice");
        assert_eq!(announcement.sell_user_id, "bob");
        assert_eq!(announcement.sequence_number, 42);
        assert_eq!(
            trade.notional_value().unwrap(),
            Price::from_integer(693).unwrap()
        );
    }
}
