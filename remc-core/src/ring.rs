//! Lock-free single-producer/single-consumer ring of sample records.
//!
//! The ring mirrors the shared-memory block the two cores exchange on the
//! target: a power-of-two slot array plus free-running 32-bit `head` and
//! `tail` counters. The counters are never masked in storage; masking happens
//! only on indexing, and occupancy is computed with wrapping subtraction so
//! counter wrap is harmless. When the producer catches the consumer it drops
//! the oldest record and counts an overrun rather than blocking.
//!
//! The SPSC contract is enforced by construction: [`SharedRing::with_capacity`]
//! returns exactly one [`RingProducer`] and one [`RingConsumer`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::sample::Sample;

/// Default slot count of the cross-thread ring.
pub const DEFAULT_RING_CAPACITY: u32 = 1024;

/// Upper bound on records moved per drain call.
pub const MAX_FETCH: usize = 1024;

struct RingShared {
    capacity: u32,
    mask: u32,
    head: AtomicU32,
    tail: AtomicU32,
    overruns: AtomicU32,
    slots: Box<[UnsafeCell<Sample>]>,
}

// SAFETY: slot access is coordinated through the head/tail publication
// protocol below; only the single producer writes a slot before publishing
// `head`, and only the single consumer reads slots up to the published head.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

/// Producer half of the ring. Owned by the sampling thread.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

/// Consumer half of the ring. Owned by the supervisor thread.
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

/// Shared ring constructor namespace.
pub struct SharedRing;

impl SharedRing {
    /// Allocate a ring with `capacity` slots and split it into its two
    /// endpoints.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn with_capacity(capacity: u32) -> (RingProducer, RingConsumer) {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "ring capacity must be a nonzero power of two, got {capacity}"
        );
        let slots: Box<[UnsafeCell<Sample>]> = (0..capacity)
            .map(|_| UnsafeCell::new(Sample::new(0, 0, 0, 0, 0, 0, 0)))
            .collect();
        let shared = Arc::new(RingShared {
            capacity,
            mask: capacity - 1,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            slots,
        });
        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

impl RingProducer {
    /// Append one record. When the ring is full the oldest record is dropped
    /// by advancing `tail`, and the overrun counter is incremented.
    pub fn push(&mut self, sample: Sample) {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let tail = shared.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= shared.capacity {
            // Full: drop the oldest so the producer never blocks.
            shared.tail.store(tail.wrapping_add(1), Ordering::Release);
            shared.overruns.fetch_add(1, Ordering::Relaxed);
        }

        let idx = (head & shared.mask) as usize;
        // SAFETY: this slot is at or past the published head, so the consumer
        // will not read it until the head store below makes it visible.
        unsafe {
            *shared.slots[idx].get() = sample;
        }

        // Release pairs with the consumer's acquire of head: the slot write
        // above is visible before the new head is.
        shared.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Records dropped because the consumer fell behind.
    pub fn overruns(&self) -> u32 {
        self.shared.overruns.load(Ordering::Relaxed)
    }
}

impl RingConsumer {
    /// Copy out up to `out.len()` records in FIFO order. Returns the number
    /// of records copied.
    pub fn drain(&mut self, out: &mut [Sample]) -> usize {
        let shared = &*self.shared;
        // Acquire pairs with the producer's release store of head.
        let head = shared.head.load(Ordering::Acquire);
        let tail = shared.tail.load(Ordering::Relaxed);

        let available = head.wrapping_sub(tail);
        let take = (available as usize).min(out.len());
        if take == 0 {
            return 0;
        }

        // At most one wrap split across the end of the slot array.
        let start = (tail & shared.mask) as usize;
        let first = take.min(shared.capacity as usize - start);
        for i in 0..first {
            // SAFETY: indices in [tail, head) were published by the producer.
            out[i] = unsafe { *shared.slots[start + i].get() };
        }
        for i in first..take {
            out[i] = unsafe { *shared.slots[i - first].get() };
        }

        shared
            .tail
            .store(tail.wrapping_add(take as u32), Ordering::Release);
        take
    }

    /// Records currently buffered.
    pub fn occupancy(&self) -> u32 {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }

    /// Records dropped because the consumer fell behind.
    pub fn overruns(&self) -> u32 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Slot count.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    #[cfg(test)]
    fn preset_counters(&mut self, head: u32, tail: u32) {
        self.shared.head.store(head, Ordering::Release);
        self.shared.tail.store(tail, Ordering::Release);
    }
}
