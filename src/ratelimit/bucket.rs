//! Token bucket counter for a single caller.

use std::time::{Duration, Instant};

/// A refillable counter holding up to `capacity` tokens.
///
/// The bucket starts full and regains one token per `refill_interval`, up to
/// its capacity. Refill is computed lazily from elapsed time on access, so
/// the bucket owns no timer or background task; dropping it releases
/// everything it holds.
///
/// All methods take `&mut self`; callers serialize access through the store
/// that owns the bucket.
#[derive(Debug)]
pub struct TokenBucket {
    /// Quota ceiling for this bucket
    capacity: u64,
    /// Tokens currently available for debit
    available: u64,
    /// Time to regain a single token
    refill_interval: Duration,
    /// Instant the refill arithmetic last caught up to
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket. `refill_interval` must be non-zero.
    pub fn new(refill_interval: Duration, capacity: u64) -> Self {
        debug_assert!(!refill_interval.is_zero());
        Self {
            capacity,
            available: capacity,
            refill_interval,
            last_refill: Instant::now(),
        }
    }

    /// Attempt to debit one token.
    ///
    /// Returns `true` and decrements availability by exactly one if a token
    /// is available at evaluation time, `false` otherwise.
    pub fn try_debit(&mut self) -> bool {
        self.refill();
        if self.available == 0 {
            return false;
        }
        self.available -= 1;
        true
    }

    /// Tokens currently available, after catching up on refill.
    pub fn available(&mut self) -> u64 {
        self.refill();
        self.available
    }

    /// The quota ceiling for this bucket.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Credit tokens for the time elapsed since the last refill.
    ///
    /// Progress toward the next token is preserved across calls: the refill
    /// origin advances by whole intervals only, except when the bucket
    /// saturates, where pending progress is meaningless and is discarded.
    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        if elapsed < self.refill_interval {
            return;
        }

        let ticks = (elapsed.as_nanos() / self.refill_interval.as_nanos()) as u64;
        let gained = ticks.min(self.capacity - self.available);
        self.available += gained;

        if self.available == self.capacity {
            self.last_refill = Instant::now();
        } else {
            let advanced = self.refill_interval.as_nanos().saturating_mul(u128::from(ticks));
            self.last_refill += Duration::from_nanos(advanced.min(u128::from(u64::MAX)) as u64);
        }
    }
}
