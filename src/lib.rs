// ============================================================================
// Symbol Matching Engine Library
// Per-symbol limit order matching behind a lock-free sequencer
// ============================================================================

//! # Symbol Matching Engine
//!
//! A single-writer matching engine for one trading symbol.
//!
//! ## Features
//!
//! - **Lock-free MPSC sequencer** assigning a total order to every command
//! - **Price-time priority** with GTC, IOC and FOK time-in-force
//! - **Post-only and iceberg orders** with configurable refill priority
//! - **Crash recovery** of resting orders from an [`interfaces::OrderStore`]
//! - **Copy-on-publish snapshots** so queries never touch the live book
//! - **At-least-once trade announcement** with retry and an unresolved list
//!
//! ## Example
//!
//! ```rust
//! use symbol_matching_engine::prelude::*;
//! use symbol_matching_engine::numeric::{Price, Quantity};
//!
//! let engine = create_from_config(EngineConfig::ephemeral("BTC-USD")).unwrap();
//! engine.start().unwrap();
//!
//! let sell = Order::limit(
//!     "BTC-USD",
//!     "alice",
//!     Side::Sell,
//!     Price::from_integer(50000).unwrap(),
//!     Quantity::from_integer(1).unwrap(),
//! );
//! let ack = engine.submit(sell).unwrap();
//! assert_eq!(ack.sequence, 1);
//!
//! // Shutdown drains everything that was acknowledged
//! engine.shutdown();
//! let snapshot = engine.get_order_book(10);
//! println!("Best ask: {:?}", snapshot.best_ask());
//! ```

pub mod domain;
pub mod engine;
pub mod interfaces;
pub mod numeric;
pub mod sequencer;
pub mod utils;

// Re-exports for convenience
pub mod prelude {
    pub use crate::domain::order::state::{OrderState, OrderStateTransition};
    pub use crate::domain::{
        EngineConfig, IcebergRefill, NewOrder, Order, OrderBookSnapshot, OrderId, OrderKind,
        PublishPolicy, RejectReason, RetryPolicy, Side, TimeInForce, Trade, TradeAnnouncement,
    };
    pub use crate::engine::{
        create_from_config, EngineError, EngineStats, Lifecycle, MatchingEngine,
        MatchingEngineBuilder, OrderReport, RecoveryReport, SubmitAck, SubmitRejection,
    };
    pub use crate::interfaces::{
        EventHandler, InMemoryAnnouncer, InMemoryOrderStore, LoggingEventHandler,
        NoOpAnnouncer, NoOpEventHandler, OrderEvent, OrderStore, TradeAnnouncer,
    };
    pub use crate::sequencer::{Sequencer, SequencerConsumer, SequencerProducer};
}
