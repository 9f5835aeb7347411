use std::time::{Duration, Instant};

/// A compatibility wrapper around an optional expiry time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Expiry(Option<Instant>);

impl Expiry {
    /// An expiry which never elapses
    pub const NEVER: Expiry = Expiry(None);

    /// Determine if there is a defined expiry
    pub const fn is_some(self) -> bool {
        self.0.is_some()
    }

    /// Convert the expiry into a duration from now. A zero duration is
    /// returned if the expiry has already passed
    #[inline]
    pub fn remaining(self) -> Option<Duration> {
        self.0
            .map(|inst| inst.saturating_duration_since(Instant::now()))
    }

    /// Unwrap the expiry as an instant
    pub(crate) const fn into_opt_instant(self) -> Option<Instant> {
        self.0
    }
}

impl From<Duration> for Expiry {
    #[inline]
    fn from(dur: Duration) -> Expiry {
        Self(Some(Instant::now() + dur))
    }
}

impl From<Instant> for Expiry {
    #[inline]
    fn from(inst: Instant) -> Expiry {
        Self(Some(inst))
    }
}

impl From<Option<Duration>> for Expiry {
    #[inline]
    fn from(dur: Option<Duration>) -> Expiry {
        Self(dur.map(|d| Instant::now() + d))
    }
}

impl From<Option<Instant>> for Expiry {
    #[inline]
    fn from(inst: Option<Instant>) -> Expiry {
        Self(inst)
    }
}

/// The result of a slot `wait` operation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParkResult {
    /// The wait was skipped because a pending signal was consumed
    Skipped,
    /// The wait timed out
    TimedOut,
    /// The thread was parked and subsequently signalled
    Unparked,
}

impl ParkResult {
    /// Determine if the wait operation timed out
    pub const fn timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Determine if the wait was skipped due to a pending signal
    pub const fn skipped(self) -> bool {
        matches!(self, Self::Skipped)
    }
}
