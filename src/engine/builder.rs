// ============================================================================
// Engine Builder
// Wires configuration and collaborators into a matching engine
// ============================================================================

use crate::domain::{EngineConfig, IcebergRefill, PublishPolicy, RetryPolicy};
use crate::engine::{EngineError, MatchingEngine};
use crate::interfaces::{
    EventHandler, InMemoryOrderStore, NoOpAnnouncer, NoOpEventHandler, OrderStore, TradeAnnouncer,
};
use std::sync::Arc;

/// Creates a matching engine from configuration with no-op announcement and
/// event handling and an empty in-memory order store.
///
/// # Example
/// ```
/// use symbol_matching_engine::prelude::*;
/// use symbol_matching_engine::engine::create_from_config;
///
/// let engine = create_from_config(EngineConfig::ephemeral("AAPL")).unwrap();
/// assert_eq!(engine.symbol(), "AAPL");
/// ```
pub fn create_from_config(config: EngineConfig) -> Result<MatchingEngine, EngineError> {
    MatchingEngineBuilder::from_config(config).build()
}

/// Builder for creating matching engines with fluent API
///
/// # Example
/// ```
/// use symbol_matching_engine::prelude::*;
/// use std::sync::Arc;
///
/// let engine = MatchingEngineBuilder::new("BTC-USD")
///     .ring_capacity(4096)
///     .snapshot_depth(20)
///     .order_store(Arc::new(InMemoryOrderStore::new()))
///     .event_handler(Arc::new(LoggingEventHandler))
///     .build()
///     .unwrap();
///
/// engine.start().unwrap();
/// engine.shutdown();
/// ```
pub struct MatchingEngineBuilder {
    config: EngineConfig,
    order_store: Option<Arc<dyn OrderStore>>,
    trade_announcer: Option<Arc<dyn TradeAnnouncer>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl MatchingEngineBuilder {
    /// Create a new builder for the specified symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::from_config(EngineConfig::new(symbol))
    }

    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            order_store: None,
            trade_announcer: None,
            event_handler: None,
        }
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    pub fn order_store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.order_store = Some(store);
        self
    }

    pub fn trade_announcer(mut self, announcer: Arc<dyn TradeAnnouncer>) -> Self {
        self.trade_announcer = Some(announcer);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    pub fn snapshot_depth(mut self, depth: usize) -> Self {
        self.config.snapshot_depth = depth;
        self
    }

    pub fn publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.config.publish_policy = policy;
        self
    }

    pub fn iceberg_refill(mut self, refill: IcebergRefill) -> Self {
        self.config.iceberg_refill = refill;
        self
    }

    pub fn announce_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.announce_retry = retry;
        self
    }

    /// Skip recovery; the book starts empty
    pub fn without_recovery(mut self) -> Self {
        self.config.recover_on_start = false;
        self
    }

    /// Pin the matching thread (effective with the `numa` feature)
    pub fn pin_to_core(mut self, core_id: usize) -> Self {
        self.config.matching_core_id = Some(core_id);
        self
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Build the matching engine. A missing order store is only an error when
    /// recovery is enabled.
    pub fn build(self) -> Result<MatchingEngine, EngineError> {
        let order_store = match self.order_store {
            Some(store) => store,
            None if self.config.recover_on_start => {
                return Err(EngineError::MissingCollaborator("order store"))
            },
            None => Arc::new(InMemoryOrderStore::new()),
        };
        let trade_announcer = self
            .trade_announcer
            .unwrap_or_else(|| Arc::new(NoOpAnnouncer));
        let event_handler = self
            .event_handler
            .unwrap_or_else(|| Arc::new(NoOpEventHandler));

        MatchingEngine::new(self.config, order_store, trade_announcer, event_handler)
    }

    /// Get the configuration without building (for inspection)
    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }
}
