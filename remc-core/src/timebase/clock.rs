//! Monotonic microsecond time sources.
//!
//! Every timing decision in the controller is derived from one free-running
//! 64-bit microsecond counter readable from both threads without locks. On
//! the target this is a 1 MHz 32-bit hardware counter chained into a second
//! counter that increments on each overflow; [`ChainedMicros`] models that
//! pair, including the high/low/high read sequence that makes a composed read
//! safe across a low-word wrap. [`SystemClock`] is the hosted equivalent used
//! by the daemon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic 64-bit microsecond counter shared by both threads.
pub trait MicrosClock: Send + Sync {
    /// Current counter value in microseconds. Never goes backward.
    fn now_us(&self) -> u64;

    /// Lower 32 bits only, for callers that explicitly tolerate wrap.
    fn now_us_32(&self) -> u32 {
        self.now_us() as u32
    }

    /// Milliseconds derived from the same counter.
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}

/// The chained counter pair: a 1 MHz low word whose overflow clocks a high
/// word, the two advancing as one value.
///
/// Reads compose the words with the high/low/high sequence: read the high
/// word, then the low word, then the high word again; if the two high reads
/// disagree, the low word wrapped in between and is re-read under the new
/// high word. Either thread may read concurrently with `advance`.
pub struct ChainedMicros {
    ticks: AtomicU64,
}

impl ChainedMicros {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Start the counter at an arbitrary value (useful to begin close to a
    /// low-word wrap).
    pub fn starting_at(us: u64) -> Self {
        Self {
            ticks: AtomicU64::new(us),
        }
    }

    /// Advance the counter by `us` microseconds. Single-writer.
    pub fn advance(&self, us: u64) {
        self.ticks.fetch_add(us, Ordering::Release);
    }

    /// Zero both words. Init-time only.
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Release);
    }

    /// Low counter word, as a register read.
    pub fn low_word(&self) -> u32 {
        self.ticks.load(Ordering::Acquire) as u32
    }

    /// High counter word, as a register read.
    pub fn high_word(&self) -> u32 {
        (self.ticks.load(Ordering::Acquire) >> 32) as u32
    }
}

impl Default for ChainedMicros {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosClock for ChainedMicros {
    fn now_us(&self) -> u64 {
        let hi1 = self.high_word();
        let mut lo = self.low_word();
        let hi2 = self.high_word();
        if hi1 != hi2 {
            // The low word wrapped between the reads; re-sample it under the
            // new high word.
            lo = self.low_word();
        }
        crate::sample::compose_micros(hi2, lo)
    }

    fn now_us_32(&self) -> u32 {
        self.low_word()
    }
}

/// Hosted clock backed by [`Instant`], anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosClock for SystemClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}
