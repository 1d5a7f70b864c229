// ============================================================================
// Sequenced Commands
// The only inputs that may mutate a running order book
// ============================================================================

use super::{Order, OrderId};

/// A book-mutating request as offered by a producer.
#[derive(Debug, Clone)]
pub enum Command {
    Submit(Order),
    Cancel(OrderId),
}

impl Command {
    pub fn order_id(&self) -> OrderId {
        match self {
            Command::Submit(order) => order.id,
            Command::Cancel(order_id) => *order_id,
        }
    }
}

/// A command stamped with its position in the per-symbol total order.
#[derive(Debug, Clone)]
pub struct SequencedCommand {
    pub sequence: u64,
    pub command: Command,
}
