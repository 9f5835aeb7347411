//! Saturating demand accounting for backpressured producers.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

/// The demand value representing an unbounded request
pub const UNBOUNDED: i64 = i64::MAX;

// any positive value can mark the absence of a violation, as only
// non-positive requests are recorded
const NO_VIOLATION: i64 = 1;

/// A signed credit counter shared between a subscriber and its producer.
///
/// Requests add to the counter, saturating at [`UNBOUNDED`]. Once saturated
/// the counter stays saturated and deliveries no longer decrement it. A
/// non-positive request is a protocol violation: the first one is recorded
/// and a single unit of demand is injected so that a producer waiting on the
/// counter can observe it.
#[derive(Debug)]
pub struct DemandCounter {
    value: AtomicI64,
    violation: AtomicI64,
}

impl DemandCounter {
    /// Create a new counter with no outstanding demand
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
            violation: AtomicI64::new(NO_VIOLATION),
        }
    }

    /// Get the outstanding demand
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Check whether the counter has saturated
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }

    /// Add `n` to the outstanding demand. Returns `true` if the counter
    /// transitioned from zero, in which case a waiting producer must be
    /// woken.
    pub fn request(&self, n: i64) -> bool {
        if n <= 0 {
            if self
                .violation
                .compare_exchange(NO_VIOLATION, n, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                debug!("non-positive request: {}", n);
            }
            return self.add(1);
        }
        self.add(n)
    }

    /// Inject a single unit of demand without recording a violation. Used
    /// to release a waiting producer on cancellation.
    #[inline]
    pub fn inject(&self) -> bool {
        self.add(1)
    }

    /// Record the delivery of a single item
    pub fn consume_one(&self) {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED || current == 0 {
                return;
            }
            match self.value.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(found) => current = found,
            }
        }
    }

    /// Get the first recorded non-positive request, if any
    #[inline]
    pub fn violation(&self) -> Option<i64> {
        match self.violation.load(Ordering::Acquire) {
            NO_VIOLATION => None,
            n => Some(n),
        }
    }

    fn add(&self, n: i64) -> bool {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return false;
            }
            let next = current.checked_add(n).unwrap_or(UNBOUNDED);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current == 0,
                Err(found) => current = found,
            }
        }
    }
}

impl Default for DemandCounter {
    fn default() -> Self {
        Self::new()
    }
}
