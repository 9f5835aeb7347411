use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::PoisonError;

/// Potential errors raised by suspension slot operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockError {
    /// Another execution context is already waiting on the slot
    Contended,
    /// The slot instance is in an unexpected state
    InvalidState,
    /// The internal lock was poisoned by another thread
    Poisoned,
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contended => "Slot already has a waiter",
            Self::InvalidState => "Invalid slot state",
            Self::Poisoned => "Slot lock poisoned",
        })
    }
}

impl Error for LockError {}

impl<T> From<PoisonError<T>> for LockError {
    fn from(_: PoisonError<T>) -> Self {
        LockError::Poisoned
    }
}

/// A boxed error raised by a generator or transform function
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// The terminal failure modes of a stream
#[derive(Debug)]
pub enum FlowError {
    /// The downstream cancelled the stream. This is a control-flow signal:
    /// it unwinds a generator through `?` and is never delivered to
    /// `on_error`.
    Cancelled,
    /// A non-positive amount was passed to `request`
    ProtocolViolation {
        /// The offending request amount
        requested: i64,
    },
    /// A suspension wait could not be completed
    Interrupted(LockError),
    /// A generator or transform function failed
    Failed(BoxError),
    /// A generator or transform function panicked
    Panicked(String),
}

impl FlowError {
    /// Wrap an arbitrary error as an upstream failure
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }

    /// Convert a caught panic payload into an error
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Self::Panicked(message)
    }

    /// Check for the cancellation signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check for a request protocol violation
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

impl Display for FlowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("Cancelled by downstream"),
            Self::ProtocolViolation { requested } => write!(
                f,
                "Positive request amount required but it was {}",
                requested
            ),
            Self::Interrupted(err) => write!(f, "Wait interrupted: {}", err),
            Self::Failed(err) => write!(f, "Upstream failure: {}", err),
            Self::Panicked(msg) => write!(f, "Upstream panicked: {}", msg),
        }
    }
}

impl Error for FlowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Interrupted(err) => Some(err),
            Self::Failed(err) => Some(&**err),
            _ => None,
        }
    }
}

impl From<LockError> for FlowError {
    fn from(err: LockError) -> Self {
        Self::Interrupted(err)
    }
}
