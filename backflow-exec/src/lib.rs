//! Thread pools supplying workers to backflow stream stages.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use backflow_core::{SchedulerPool, Task, Worker};

pub use self::pool::{shared_pool, ParallelPool, SinglePool};
pub use self::threadpool::{ThreadPool, ThreadPoolConfig};

mod pool;

mod threadpool;
