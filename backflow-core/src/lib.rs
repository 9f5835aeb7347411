//! Core primitives for suspending a producer until its consumer signals demand.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use self::cell::TaskCell;
pub use self::demand::{DemandCounter, UNBOUNDED};
pub use self::error::{BoxError, FlowError, LockError};
pub use self::sched::{SchedulerPool, Task, Worker, WorkerGuard};
pub use self::slot::SuspensionSlot;
pub use self::types::{Expiry, ParkResult};

mod cell;

pub mod demand;

mod error;

pub mod sched;

pub mod slot;

mod types;
