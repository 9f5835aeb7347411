use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// An error returned when taking from a [`ChannelSelector`](crate::ChannelSelector)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectError {
    /// Every source is exhausted and the output has been drained
    Disconnected,
    /// No item arrived before the timeout
    Timeout,
    /// No item is ready
    Empty,
}

impl Display for SelectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Selector disconnected"),
            Self::Timeout => f.write_str("Selector timed out"),
            Self::Empty => f.write_str("Selector empty"),
        }
    }
}

impl Error for SelectError {}
