// ============================================================================
// Engine Module
// Contains the core matching engine business logic
// ============================================================================

mod builder;
mod emitter;
mod errors;
mod matching_core;
mod matching_engine;
mod publisher;
mod recovery;

pub use builder::{create_from_config, MatchingEngineBuilder};
pub use errors::{EngineError, SubmitRejection};
pub use matching_core::{CommandOutcome, MatchingCore, TradeBatch};
pub use matching_engine::{Lifecycle, MatchingEngine, SubmitAck};
pub use publisher::{EngineStats, OrderReport};
pub use recovery::{RecoveryError, RecoveryLoader, RecoveryReport};
