// ============================================================================
// Bounded MPSC Ring Buffer
// Many producers claim slots by CAS; exactly one consumer drains in order
// ============================================================================
//
// Each slot carries a stamp that encodes its publication state:
//
//   stamp == pos             slot is free for the producer claiming `pos`
//   stamp == pos + 1         payload for `pos` is published
//   stamp == pos + capacity  consumed; free for `pos + capacity`
//
// Producers race on `tail` with compare_exchange, write the payload, then
// publish with a Release store of the stamp. The consumer owns `head` and
// never contends with anyone.

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity ring shared by producer and consumer handles.
pub(crate) struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,
    /// Next position a producer will claim
    tail: CachePadded<AtomicU64>,
    /// Next position the consumer will read
    head: CachePadded<AtomicU64>,
}

// Payloads are moved in by one producer and out by the single consumer;
// the stamp protocol orders the two accesses.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// `capacity` must be a power of two, at least 2. Positions start at `base`.
    pub(crate) fn with_base(capacity: usize, base: u64) -> Self {
        debug_assert!(capacity >= 2 && capacity.is_power_of_two());
        let capacity = capacity as u64;
        let slots = (0..capacity)
            .map(|i| {
                // Stamp every slot as free for the first lap starting at `base`
                let pos = base + ((i.wrapping_sub(base)) & (capacity - 1));
                Slot {
                    stamp: AtomicU64::new(pos),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                }
            })
            .collect();

        Self {
            slots,
            mask: capacity - 1,
            capacity,
            tail: CachePadded::new(AtomicU64::new(base)),
            head: CachePadded::new(AtomicU64::new(base)),
        }
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos & self.mask) as usize]
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Claim the next position and publish `value` there.
    /// Returns the claimed position, or the value back when the ring is full.
    pub(crate) fn push(&self, value: T) -> Result<u64, T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == pos {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS on `pos` grants exclusive
                        // write access to this slot until the stamp is bumped.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.stamp.store(pos + 1, Ordering::Release);
                        return Ok(pos);
                    },
                    Err(current) => pos = current,
                }
            } else if stamp < pos {
                // Previous lap not yet consumed: full
                return Err(value);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the next published value. Must only be called from one thread.
    pub(crate) fn pop(&self) -> Option<(u64, T)> {
        let pos = self.head.load(Ordering::Relaxed);
        let slot = self.slot(pos);

        if slot.stamp.load(Ordering::Acquire) != pos + 1 {
            return None;
        }

        // SAFETY: stamp == pos + 1 means a producer finished writing `pos`
        // and nobody else reads it; we are the only consumer.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.stamp.store(pos + self.capacity, Ordering::Release);
        self.head.store(pos + 1, Ordering::Release);
        Some((pos, value))
    }

    /// Approximate number of claimed but unconsumed positions.
    pub(crate) fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Every publish happened-before the last Arc handle was released
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_and_full() {
        let ring = RingBuffer::with_base(4, 0);
        for i in 0..4 {
            assert_eq!(ring.push(i), Ok(i as u64));
        }
        assert_eq!(ring.push(99), Err(99));
        assert_eq!(ring.len(), 4);

        assert_eq!(ring.pop(), Some((0, 0)));
        assert_eq!(ring.push(4), Ok(4));
        for expected in 1..5 {
            assert_eq!(ring.pop(), Some((expected as u64, expected)));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_non_zero_base() {
        let ring = RingBuffer::with_base(8, 13);
        for i in 0..8u64 {
            assert_eq!(ring.push(i), Ok(13 + i));
        }
        assert!(ring.push(8).is_err());
        for i in 0..8u64 {
            assert_eq!(ring.pop(), Some((13 + i, i)));
        }
        assert_eq!(ring.push(100), Ok(21));
    }

    #[test]
    fn test_drop_releases_unconsumed() {
        let marker = Arc::new(());
        {
            let ring = RingBuffer::with_base(8, 0);
            for _ in 0..5 {
                ring.push(Arc::clone(&marker)).unwrap();
            }
            ring.pop();
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }
}
