// ============================================================================
// Engine Errors
// ============================================================================

use crate::domain::{ConfigError, OrderId, RejectReason};
use crate::engine::recovery::RecoveryError;
use crate::engine::Lifecycle;
use crate::sequencer::SequencerError;

/// Synchronous refusal of a submit or cancel. Nothing was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("order {order_id} rejected: {reason}")]
pub struct SubmitRejection {
    pub order_id: OrderId,
    pub reason: RejectReason,
}

impl SubmitRejection {
    pub fn new(order_id: OrderId, reason: RejectReason) -> Self {
        Self { order_id, reason }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("engine is {found:?}, expected {expected:?}")]
    InvalidLifecycle { expected: Lifecycle, found: Lifecycle },

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}
