// ============================================================================
// Domain Models Module
// Contains all core domain entities and value objects
// ============================================================================

pub mod command;
pub mod config;
pub mod order;
pub mod order_book;
pub mod snapshot;
pub mod trade;

pub use command::{Command, SequencedCommand};
pub use config::{ConfigError, EngineConfig, IcebergRefill, PublishPolicy, RetryPolicy};
pub use order::{FillError, NewOrder, Order, OrderId, OrderKind, RejectReason, Side, TimeInForce};
pub use order_book::{BookError, BookSide, OrderBook, OrderNode, PriceLevel, Reduction};
pub use snapshot::{DepthLevel, OrderBookSnapshot};
pub use trade::{Trade, TradeAnnouncement, TradeId};

// Re-export state machine
pub use order::state::{OrderState, OrderStateTransition, StateError};
