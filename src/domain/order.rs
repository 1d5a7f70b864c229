// ============================================================================
// Order Domain Model
// ============================================================================

use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use self::state::{OrderState, OrderStateTransition, StateError};

// ============================================================================
// Value Objects
// ============================================================================

/// Caller-supplied order identifier. Doubles as the idempotency key for
/// submissions: the engine never books two orders with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeInForce {
    /// Good Till Cancel - remainder rests until filled or cancelled
    GoodTillCancel,
    /// Immediate Or Cancel - fill what crosses, cancel the remainder
    ImmediateOrCancel,
    /// Fill Or Kill - fill the entire order immediately or do nothing
    FillOrKill,
}

impl TimeInForce {
    pub fn can_rest(self) -> bool {
        matches!(self, TimeInForce::GoodTillCancel)
    }
}

/// Order behaviour. Every path that creates or mutates an order matches on
/// this, so a new behaviour cannot be silently ignored by the matching loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OrderKind {
    /// Plain limit order, fully displayed
    Limit,
    /// Maker-only limit order: rejected if it would take liquidity
    PostOnly,
    /// Only `display_quantity` is shown; the rest is replenished in slices
    Iceberg {
        display_quantity: Quantity,
        post_only: bool,
    },
}

impl OrderKind {
    pub fn is_post_only(&self) -> bool {
        match self {
            OrderKind::Limit => false,
            OrderKind::PostOnly => true,
            OrderKind::Iceberg { post_only, .. } => *post_only,
        }
    }

    /// Size of a displayed slice, `None` for fully displayed orders.
    pub fn display_quantity(&self) -> Option<Quantity> {
        match self {
            OrderKind::Limit | OrderKind::PostOnly => None,
            OrderKind::Iceberg {
                display_quantity, ..
            } => Some(*display_quantity),
        }
    }
}

/// Why a submission or cancel was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RejectReason {
    InvalidPrice,
    InvalidQuantity,
    PostOnlyWouldCross,
    /// Sequencer ring is full
    EngineBusy,
    /// Recovery has not completed
    EngineNotReady,
    EngineStopped,
    SymbolMismatch,
    DuplicateOrderId,
    UnknownOrder,
}

impl RejectReason {
    /// Wire code used by the RPC adapters.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidPrice => "INVALID_PRICE",
            RejectReason::InvalidQuantity => "INVALID_QUANTITY",
            RejectReason::PostOnlyWouldCross => "POST_ONLY_WOULD_CROSS",
            RejectReason::EngineBusy => "ENGINE_BUSY",
            RejectReason::EngineNotReady => "ENGINE_NOT_READY",
            RejectReason::EngineStopped => "ENGINE_STOPPED",
            RejectReason::SymbolMismatch => "SYMBOL_MISMATCH",
            RejectReason::DuplicateOrderId => "DUPLICATE_ORDER_ID",
            RejectReason::UnknownOrder => "UNKNOWN_ORDER",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Submission payload as it arrives from the RPC adapters, flags and all.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NewOrder {
    pub order_id: OrderId,
    pub symbol: String,
    pub user_id: String,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    pub is_iceberg: bool,
    pub display_quantity: Option<Quantity>,
}

// ============================================================================
// Order State Machine
// ============================================================================

pub mod state {
    #[cfg(feature = "serde")]
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub enum OrderState {
        New,
        Resting,
        PartiallyFilled,
        Filled,
        Cancelled,
        Rejected,
    }

    impl OrderState {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
            )
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OrderStateTransition {
        Reject,
        Rest,
        PartialFill,
        Fill,
        Cancel,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
    #[error("invalid order state transition from {from:?} via {transition:?}")]
    pub struct StateError {
        pub from: OrderState,
        pub transition: OrderStateTransition,
    }

    impl OrderState {
        pub fn transition(&self, transition: OrderStateTransition) -> Result<OrderState, StateError> {
            use OrderState::*;
            use OrderStateTransition as T;

            match (self, transition) {
                (New, T::Reject) => Ok(Rejected),
                (New, T::Rest) | (PartiallyFilled, T::Rest) => Ok(Resting),
                (New | Resting | PartiallyFilled, T::PartialFill) => Ok(PartiallyFilled),
                (New | Resting | PartiallyFilled, T::Fill) => Ok(Filled),
                (New | Resting | PartiallyFilled, T::Cancel) => Ok(Cancelled),
                _ => Err(StateError {
                    from: *self,
                    transition,
                }),
            }
        }
    }
}

/// Raised when a fill would break quantity conservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FillError {
    #[error("fill quantity must be positive")]
    NonPositive,
    #[error("fill of {requested} exceeds remaining {remaining}")]
    Overfill {
        requested: Quantity,
        remaining: Quantity,
    },
    #[error(transparent)]
    State(#[from] StateError),
}

// ============================================================================
// Order Entity
// ============================================================================

/// An order as owned by the matching thread.
///
/// `filled_quantity`, `state` and `sequence_number` are private so the only
/// way to move them is through `fill`, `apply` and the admission path.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Order {
    pub id: OrderId,
    pub symbol: Arc<str>,
    pub user_id: Arc<str>,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub time_in_force: TimeInForce,
    pub kind: OrderKind,
    pub timestamp: DateTime<Utc>,

    filled_quantity: Quantity,
    state: OrderState,
    sequence_number: u64,
}

impl Order {
    pub fn new(
        id: OrderId,
        symbol: &str,
        user_id: &str,
        side: Side,
        price: Price,
        quantity: Quantity,
        time_in_force: TimeInForce,
        kind: OrderKind,
    ) -> Self {
        Self {
            id,
            symbol: Arc::from(symbol),
            user_id: Arc::from(user_id),
            side,
            price,
            quantity,
            time_in_force,
            kind,
            timestamp: Utc::now(),
            filled_quantity: Quantity::ZERO,
            state: OrderState::New,
            sequence_number: 0,
        }
    }

    /// Plain GTC limit order.
    pub fn limit(symbol: &str, user_id: &str, side: Side, price: Price, quantity: Quantity) -> Self {
        Self::new(
            OrderId::new(),
            symbol,
            user_id,
            side,
            price,
            quantity,
            TimeInForce::GoodTillCancel,
            OrderKind::Limit,
        )
    }

    /// Translate the flag-based request into the closed `OrderKind` and
    /// validate it.
    pub fn from_request(request: NewOrder) -> Result<Self, RejectReason> {
        let kind = match (request.is_iceberg, request.post_only) {
            (true, post_only) => OrderKind::Iceberg {
                display_quantity: request
                    .display_quantity
                    .ok_or(RejectReason::InvalidQuantity)?,
                post_only,
            },
            (false, true) => OrderKind::PostOnly,
            (false, false) => OrderKind::Limit,
        };

        let order = Self::new(
            request.order_id,
            &request.symbol,
            &request.user_id,
            request.side,
            request.price,
            request.quantity,
            request.time_in_force,
            kind,
        );
        order.validate()?;
        Ok(order)
    }

    /// Stateless admission checks. Checks that need the book (post-only
    /// crossing, duplicate ids) happen on the matching thread.
    pub fn validate(&self) -> Result<(), RejectReason> {
        if !self.price.is_positive() {
            return Err(RejectReason::InvalidPrice);
        }
        if !self.quantity.is_positive() {
            return Err(RejectReason::InvalidQuantity);
        }
        if let Some(display) = self.kind.display_quantity() {
            if !display.is_positive() || display > self.quantity {
                return Err(RejectReason::InvalidQuantity);
            }
        }
        Ok(())
    }

    /// Restore fill progress and state loaded from the order store.
    pub fn with_progress(
        mut self,
        filled_quantity: Quantity,
        state: OrderState,
        sequence_number: u64,
    ) -> Self {
        self.filled_quantity = filled_quantity;
        self.state = state;
        self.sequence_number = sequence_number;
        self
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn filled_quantity(&self) -> Quantity {
        self.filled_quantity
    }

    pub fn remaining_quantity(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn is_filled(&self) -> bool {
        self.remaining_quantity().is_zero()
    }

    // ========================================================================
    // Mutation (matching thread only)
    // ========================================================================

    pub(crate) fn set_sequence_number(&mut self, sequence: u64) {
        self.sequence_number = sequence;
    }

    /// Apply a state transition, leaving the order untouched on error.
    pub fn apply(&mut self, transition: OrderStateTransition) -> Result<OrderState, StateError> {
        self.state = self.state.transition(transition)?;
        Ok(self.state)
    }

    /// Record an execution of `quantity` against this order.
    pub fn fill(&mut self, quantity: Quantity) -> Result<OrderState, FillError> {
        if !quantity.is_positive() {
            return Err(FillError::NonPositive);
        }
        let remaining = self.remaining_quantity();
        if quantity > remaining {
            return Err(FillError::Overfill {
                requested: quantity,
                remaining,
            });
        }

        let transition = if quantity == remaining {
            OrderStateTransition::Fill
        } else {
            OrderStateTransition::PartialFill
        };
        let next = self.state.transition(transition)?;
        self.filled_quantity = self.filled_quantity.saturating_add(quantity);
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: i64) -> Quantity {
        Quantity::from_integer(n).unwrap()
    }

    fn request() -> NewOrder {
        NewOrder {
            order_id: OrderId::new(),
            symbol: "BTC-USD".to_string(),
            user_id: "user1".to_string(),
            side: Side::Buy,
            price: Price::from_integer(100).unwrap(),
            quantity: qty(10),
            time_in_force: TimeInForce::GoodTillCancel,
            post_only: false,
            is_iceberg: false,
            display_quantity: None,
        }
    }

    #[test]
    fn test_order_creation() {
        let order = Order::limit("BTC-USD", "user1", Side::Buy, Price::from_integer(100).unwrap(), qty(1));
        assert_eq!(order.remaining_quantity(), qty(1));
        assert_eq!(order.filled_quantity(), Quantity::ZERO);
        assert_eq!(order.state(), OrderState::New);
    }

    #[test]
    fn test_fill_progression() {
        let mut order = Order::limit("BTC-USD", "u", Side::Sell, Price::from_integer(100).unwrap(), qty(10));
        order.apply(OrderStateTransition::Rest).unwrap();

        assert_eq!(order.fill(qty(3)).unwrap(), OrderState::PartiallyFilled);
        assert_eq!(order.remaining_quantity(), qty(7));
        assert_eq!(order.fill(qty(7)).unwrap(), OrderState::Filled);
        assert!(order.is_filled());
    }

    #[test]
    fn test_overfill_is_refused() {
        let mut order = Order::limit("BTC-USD", "u", Side::Buy, Price::from_integer(100).unwrap(), qty(5));
        assert!(matches!(order.fill(qty(6)), Err(FillError::Overfill { .. })));
        assert!(matches!(order.fill(Quantity::ZERO), Err(FillError::NonPositive)));
        assert_eq!(order.filled_quantity(), Quantity::ZERO);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut order = Order::limit("BTC-USD", "u", Side::Buy, Price::from_integer(100).unwrap(), qty(5));
        order.apply(OrderStateTransition::Cancel).unwrap();
        assert!(order.state().is_terminal());
        assert!(order.apply(OrderStateTransition::Rest).is_err());
        assert!(order.fill(qty(1)).is_err());
        assert_eq!(order.state(), OrderState::Cancelled);
    }

    #[test]
    fn test_from_request_builds_kind() {
        let mut req = request();
        req.post_only = true;
        assert_eq!(Order::from_request(req).unwrap().kind, OrderKind::PostOnly);

        let mut req = request();
        req.is_iceberg = true;
        req.display_quantity = Some(qty(2));
        let order = Order::from_request(req).unwrap();
        assert_eq!(order.kind.display_quantity(), Some(qty(2)));
        assert!(!order.kind.is_post_only());
    }

    #[test]
    fn test_from_request_validation() {
        let mut req = request();
        req.price = Price::ZERO;
        assert_eq!(Order::from_request(req).unwrap_err(), RejectReason::InvalidPrice);

        let mut req = request();
        req.quantity = qty(-1);
        assert_eq!(Order::from_request(req).unwrap_err(), RejectReason::InvalidQuantity);

        let mut req = request();
        req.is_iceberg = true;
        req.display_quantity = Some(qty(11));
        assert_eq!(Order::from_request(req).unwrap_err(), RejectReason::InvalidQuantity);

        let mut req = request();
        req.is_iceberg = true;
        assert_eq!(Order::from_request(req).unwrap_err(), RejectReason::InvalidQuantity);
    }

    #[test]
    fn test_reject_codes() {
        assert_eq!(RejectReason::EngineBusy.to_string(), "ENGINE_BUSY");
        assert_eq!(RejectReason::PostOnlyWouldCross.code(), "POST_ONLY_WOULD_CROSS");
    }
}
