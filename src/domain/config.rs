// ============================================================================
// Engine Configuration
// Per-symbol settings for admission, matching and publication
// ============================================================================

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Policies
// ============================================================================

/// What happens to an iceberg's time priority when its displayed slice is
/// consumed and a new slice is carved from the hidden remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IcebergRefill {
    /// The new slice re-enters at the tail of its level (standard behaviour)
    #[default]
    LoseTimePriority,
    /// The new slice keeps the order's current queue position
    RetainTimePriority,
}

/// How often the matching thread republishes the read-side snapshot.
/// A snapshot is always published when the queue drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PublishPolicy {
    EveryCommand,
    EveryN(u32),
}

/// Retry schedule for trade announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetryPolicy {
    /// `None` retries until shutdown
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling up to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(8),
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("ring capacity must be a power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),
    #[error("ring capacity must be at least 2, got {0}")]
    CapacityTooSmall(usize),
    #[error("snapshot depth must be positive")]
    ZeroSnapshotDepth,
    #[error("{0} history capacity must be positive")]
    ZeroHistory(&'static str),
    #[error("publish interval must be positive")]
    ZeroPublishInterval,
    #[error("retry policy needs initial backoff <= max backoff and at least one attempt")]
    InvalidRetryPolicy,
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Settings for one symbol's engine instance.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Trading symbol (e.g., "BTC-USD")
    pub symbol: String,

    /// Sequencer slots; must be a power of two
    pub ring_capacity: usize,

    /// Levels per side kept in the published snapshot
    pub snapshot_depth: usize,

    pub publish_policy: PublishPolicy,

    /// Sleep once the idle backoff is exhausted
    pub idle_sleep: Duration,

    /// Trades retained for `get_trades`
    pub trade_history: usize,

    /// Terminal order reports retained for status queries
    pub order_history: usize,

    pub iceberg_refill: IcebergRefill,

    /// Rebuild the book from the order store before admitting traffic
    pub recover_on_start: bool,

    /// Pin the matching thread to this core (`numa` feature)
    pub matching_core_id: Option<usize>,

    pub announce_retry: RetryPolicy,
}

impl EngineConfig {
    pub const DEFAULT_RING_CAPACITY: usize = 1 << 20;

    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ring_capacity: Self::DEFAULT_RING_CAPACITY,
            snapshot_depth: 50,
            publish_policy: PublishPolicy::EveryCommand,
            idle_sleep: Duration::from_micros(50),
            trade_history: 10_000,
            order_history: 100_000,
            iceberg_refill: IcebergRefill::LoseTimePriority,
            recover_on_start: true,
            matching_core_id: None,
            announce_retry: RetryPolicy::default(),
        }
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    pub fn with_snapshot_depth(mut self, depth: usize) -> Self {
        self.snapshot_depth = depth;
        self
    }

    pub fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    pub fn with_trade_history(mut self, trades: usize) -> Self {
        self.trade_history = trades;
        self
    }

    pub fn with_order_history(mut self, orders: usize) -> Self {
        self.order_history = orders;
        self
    }

    pub fn with_iceberg_refill(mut self, refill: IcebergRefill) -> Self {
        self.iceberg_refill = refill;
        self
    }

    pub fn with_recovery(mut self, recover_on_start: bool) -> Self {
        self.recover_on_start = recover_on_start;
        self
    }

    pub fn with_matching_core(mut self, core_id: usize) -> Self {
        self.matching_core_id = Some(core_id);
        self
    }

    pub fn with_announce_retry(mut self, retry: RetryPolicy) -> Self {
        self.announce_retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if !self.ring_capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo(self.ring_capacity));
        }
        if self.ring_capacity < 2 {
            return Err(ConfigError::CapacityTooSmall(self.ring_capacity));
        }
        if self.snapshot_depth == 0 {
            return Err(ConfigError::ZeroSnapshotDepth);
        }
        if self.trade_history == 0 {
            return Err(ConfigError::ZeroHistory("trade"));
        }
        if self.order_history == 0 {
            return Err(ConfigError::ZeroHistory("order"));
        }
        if self.publish_policy == PublishPolicy::EveryN(0) {
            return Err(ConfigError::ZeroPublishInterval);
        }
        let retry = &self.announce_retry;
        if retry.initial_backoff > retry.max_backoff || retry.max_attempts == Some(0) {
            return Err(ConfigError::InvalidRetryPolicy);
        }
        Ok(())
    }
}

// ============================================================================
// Presets
// ============================================================================

impl EngineConfig {
    /// Snapshot after every command, spin briefly when idle.
    pub fn low_latency(symbol: impl Into<String>) -> Self {
        Self::new(symbol)
            .with_publish_policy(PublishPolicy::EveryCommand)
            .with_idle_sleep(Duration::from_micros(1))
    }

    /// Batch snapshot publication under sustained load.
    pub fn high_throughput(symbol: impl Into<String>) -> Self {
        Self::new(symbol)
            .with_publish_policy(PublishPolicy::EveryN(64))
            .with_idle_sleep(Duration::from_micros(200))
    }

    /// Small ring and no recovery; for tests and embedded use.
    pub fn ephemeral(symbol: impl Into<String>) -> Self {
        Self::new(symbol)
            .with_ring_capacity(1024)
            .with_recovery(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::new("BTC-USD");
        assert_eq!(config.ring_capacity, 1 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::high_throughput("AAPL")
            .with_snapshot_depth(10)
            .with_iceberg_refill(IcebergRefill::RetainTimePriority);

        assert_eq!(config.snapshot_depth, 10);
        assert_eq!(config.publish_policy, PublishPolicy::EveryN(64));
        assert_eq!(config.iceberg_refill, IcebergRefill::RetainTimePriority);
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            EngineConfig::new(" ").validate(),
            Err(ConfigError::EmptySymbol)
        );
        assert_eq!(
            EngineConfig::new("X").with_ring_capacity(1000).validate(),
            Err(ConfigError::CapacityNotPowerOfTwo(1000))
        );
        assert_eq!(
            EngineConfig::new("X").with_ring_capacity(1).validate(),
            Err(ConfigError::CapacityTooSmall(1))
        );
        assert!(EngineConfig::new("X").with_ring_capacity(2).validate().is_ok());
        assert_eq!(
            EngineConfig::new("X")
                .with_publish_policy(PublishPolicy::EveryN(0))
                .validate(),
            Err(ConfigError::ZeroPublishInterval)
        );
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        let retry = RetryPolicy {
            max_attempts: Some(3),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(10));
        assert_eq!(retry.backoff(2), Duration::from_millis(40));
        assert_eq!(retry.backoff(10), Duration::from_millis(50));
        assert!(retry.allows(2));
        assert!(!retry.allows(3));
    }
}
