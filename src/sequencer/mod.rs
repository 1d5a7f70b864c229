// ============================================================================
// Sequencer
// Imposes one total order on commands offered by many threads
// ============================================================================

mod ring_buffer;

use crate::domain::{Command, SequencedCommand};
use ring_buffer::RingBuffer;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    #[error("sequencer capacity must be a power of two of at least 2, got {0}")]
    InvalidCapacity(usize),
}

/// Constructor for the producer/consumer pair sharing one ring.
pub struct Sequencer;

impl Sequencer {
    /// Ring whose first sequence is 1.
    pub fn new(capacity: usize) -> Result<(SequencerProducer, SequencerConsumer), SequencerError> {
        Self::with_base(capacity, 0)
    }

    /// Ring whose first sequence is `last_sequence + 1`; used after recovery.
    pub fn with_base(
        capacity: usize,
        last_sequence: u64,
    ) -> Result<(SequencerProducer, SequencerConsumer), SequencerError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(SequencerError::InvalidCapacity(capacity));
        }
        let ring = Arc::new(RingBuffer::with_base(capacity, last_sequence));
        Ok((
            SequencerProducer {
                ring: Arc::clone(&ring),
            },
            SequencerConsumer { ring },
        ))
    }
}

/// Write side. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct SequencerProducer {
    ring: Arc<RingBuffer<Command>>,
}

impl SequencerProducer {
    /// Non-blocking enqueue. On success returns the assigned sequence; a full
    /// ring hands the command back.
    pub fn offer(&self, command: Command) -> Result<u64, Command> {
        self.ring.push(command).map(|pos| pos + 1)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read side. Not `Clone`: there is exactly one consumer per ring.
pub struct SequencerConsumer {
    ring: Arc<RingBuffer<Command>>,
}

impl SequencerConsumer {
    pub fn poll(&mut self) -> Option<SequencedCommand> {
        self.ring.pop().map(|(pos, command)| SequencedCommand {
            sequence: pos + 1,
            command,
        })
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
