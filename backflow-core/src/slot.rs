//! A single-waiter handshake primitive with a stored signal.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Condvar, Mutex, MutexGuard,
    },
    time::Instant,
};

use crate::error::LockError;
use crate::types::{Expiry, ParkResult};

const STATE_HELD: usize = 0b001;
const STATE_PARK: usize = 0b010;
const STATE_SIGNAL: usize = 0b100;

/// A semaphore of one with at most one waiter.
///
/// [`SuspensionSlot::resume`] stores a signal and wakes the waiter, if any.
/// [`SuspensionSlot::wait`] consumes a stored signal immediately, otherwise
/// it parks the current thread until the next signal. Signals do not
/// accumulate: any number of `resume` calls between two waits release a
/// single wait.
///
/// Only one thread may wait on a slot at a time. A second concurrent waiter
/// receives [`LockError::Contended`] rather than parking.
pub struct SuspensionSlot {
    state: AtomicUsize,
    mutex: Mutex<()>,
    cond: Condvar,
}

impl SuspensionSlot {
    /// Create a new slot with no pending signal
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            mutex: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Check for a pending signal without consuming it
    #[inline]
    pub fn is_signalled(&self) -> bool {
        self.state.load(Ordering::Acquire) & STATE_SIGNAL != 0
    }

    /// Block until the slot is signalled, consuming the signal
    #[inline]
    pub fn wait(&self) -> Result<ParkResult, LockError> {
        self.wait_timeout(Expiry::NEVER)
    }

    /// Block until the slot is signalled or the expiry is reached. The
    /// result indicates whether a stored signal was consumed immediately,
    /// the thread was woken by a signal, or the wait timed out.
    pub fn wait_timeout(&self, timeout: impl Into<Expiry>) -> Result<ParkResult, LockError> {
        self.acquire()?;
        let result = self.park(timeout.into());
        self.release();
        result
    }

    /// Signal the slot, waking a parked waiter. Returns `true` if the slot
    /// was not already signalled.
    pub fn resume(&self) -> bool {
        let found = self.state.fetch_or(STATE_SIGNAL, Ordering::AcqRel);
        if found & STATE_SIGNAL == 0 {
            if found & STATE_PARK != 0 {
                // acquire the mutex because the waiting thread could be interrupted
                // between setting the state and waiting on the condvar
                drop(self.mutex.lock());
                self.cond.notify_one();
            }
            true
        } else {
            false
        }
    }

    #[inline]
    fn acquire(&self) -> Result<(), LockError> {
        if self.state.fetch_or(STATE_HELD, Ordering::Acquire) & STATE_HELD == 0 {
            Ok(())
        } else {
            Err(LockError::Contended)
        }
    }

    #[inline]
    fn release(&self) {
        let found = self.state.fetch_and(!STATE_HELD, Ordering::Release);
        debug_assert!(found & STATE_HELD != 0);
    }

    fn park(&self, timeout: Expiry) -> Result<ParkResult, LockError> {
        if self.consume_signal() {
            return Ok(ParkResult::Skipped);
        }

        let mut guard = self.mutex.lock()?;

        let state = self.state.fetch_or(STATE_PARK, Ordering::AcqRel);
        if state & STATE_SIGNAL != 0 {
            drop(guard);
            self.state
                .fetch_and(!(STATE_PARK | STATE_SIGNAL), Ordering::Acquire);
            return Ok(ParkResult::Skipped);
        }

        let expire = timeout.into_opt_instant();
        loop {
            let (g, timed_out) = self.cond_wait(guard, expire).map_err(|err| {
                self.state.fetch_and(!STATE_PARK, Ordering::Relaxed);
                err
            })?;
            guard = g;

            let state = self.state.load(Ordering::Acquire);
            if state & STATE_SIGNAL != 0 {
                self.state
                    .fetch_and(!(STATE_PARK | STATE_SIGNAL), Ordering::Acquire);
                drop(guard);
                return Ok(ParkResult::Unparked);
            }
            if timed_out {
                self.state.fetch_and(!STATE_PARK, Ordering::Relaxed);
                drop(guard);
                return Ok(ParkResult::TimedOut);
            }
            // spurious wakeup, wait again
        }
    }

    #[inline]
    fn consume_signal(&self) -> bool {
        // relaxed ordering is sufficient, the swap below synchronizes
        let state = self.state.load(Ordering::Relaxed);
        state & STATE_SIGNAL != 0
            && self.state.fetch_and(!STATE_SIGNAL, Ordering::Acquire) & STATE_SIGNAL != 0
    }

    fn cond_wait<'g>(
        &self,
        guard: MutexGuard<'g, ()>,
        expire: Option<Instant>,
    ) -> Result<(MutexGuard<'g, ()>, bool), LockError> {
        if let Some(exp) = expire {
            if let Some(dur) = exp.checked_duration_since(Instant::now()) {
                let (guard, timeout_result) = self.cond.wait_timeout(guard, dur)?;
                Ok((guard, timeout_result.timed_out()))
            } else {
                Ok((guard, true))
            }
        } else {
            Ok((self.cond.wait(guard)?, false))
        }
    }
}

impl Default for SuspensionSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for SuspensionSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspensionSlot")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}
