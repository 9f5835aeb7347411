//! A cancellation cell for handles which may not exist yet.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};

use once_cell::sync::OnceCell;

const STATE_EMPTY: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_DONE: u8 = 2;

/// Holds nothing, a cancellable handle, or a done marker.
///
/// One context installs the handle with [`TaskCell::set`] while another
/// may call [`TaskCell::cancel`] at any time, including before the handle
/// exists. Exactly one of the two calls observes the handle as needing
/// cancellation.
pub struct TaskCell<H> {
    state: AtomicU8,
    handle: OnceCell<H>,
}

impl<H> TaskCell<H> {
    /// Create an empty cell
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_EMPTY),
            handle: OnceCell::new(),
        }
    }

    /// Install the handle. If the cell was already cancelled or finished,
    /// the installed handle is returned as an error and the caller is
    /// responsible for cancelling it.
    ///
    /// # Panics
    /// Panics if a handle has already been installed.
    pub fn set(&self, handle: H) -> Result<&H, &H> {
        if self.handle.set(handle).is_err() {
            panic!("Task handle already installed");
        }
        // the handle was just stored, it cannot be missing
        let handle = match self.handle.get() {
            Some(handle) => handle,
            None => unreachable!(),
        };
        match self.state.compare_exchange(
            STATE_EMPTY,
            STATE_READY,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(handle),
            Err(_) => Err(handle),
        }
    }

    /// Access the handle while the cell is live
    #[inline]
    pub fn get(&self) -> Option<&H> {
        if self.state.load(Ordering::Acquire) == STATE_READY {
            self.handle.get()
        } else {
            None
        }
    }

    /// Mark the cell done. Returns the handle if it was installed and must
    /// now be cancelled by the caller; this happens at most once.
    pub fn cancel(&self) -> Option<&H> {
        match self.state.swap(STATE_DONE, Ordering::AcqRel) {
            STATE_READY => self.handle.get(),
            _ => None,
        }
    }

    /// Mark the cell done without cancelling the handle
    #[inline]
    pub fn finish(&self) {
        self.state.store(STATE_DONE, Ordering::Release);
    }

    /// Check whether the cell has been cancelled or finished
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_DONE
    }
}

impl<H> Default for TaskCell<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Debug for TaskCell<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            STATE_EMPTY => "empty",
            STATE_READY => "ready",
            _ => "done",
        };
        f.debug_struct("TaskCell").field("state", &state).finish()
    }
}
