// ============================================================================
// Interfaces Module
// Contains all trait definitions and contracts
// ============================================================================

mod event_handler;
mod order_store;
mod trade_announcer;

pub use event_handler::{EventHandler, LoggingEventHandler, NoOpEventHandler, OrderEvent};
pub use order_store::{InMemoryOrderStore, OrderStore, StoreError};
#[cfg(feature = "async")]
pub use trade_announcer::ChannelAnnouncer;
pub use trade_announcer::{AnnounceError, InMemoryAnnouncer, NoOpAnnouncer, TradeAnnouncer};
