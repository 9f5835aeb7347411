//! The boundary to the pools which supply execution contexts.

use std::fmt::Debug;
use std::sync::Arc;

/// A unit of work scheduled on a [`Worker`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A handle to an execution context borrowed from a [`SchedulerPool`].
pub trait Worker: Debug + Send + Sync {
    /// Schedule a task and return immediately. Tasks scheduled on the same
    /// worker after it has been closed are dropped without running.
    fn execute(&self, task: Task);

    /// Release the worker back to its pool. This may be called from within
    /// a task running on the worker; any teardown is deferred until that
    /// task returns.
    fn close(&self);
}

/// A source of [`Worker`] handles.
pub trait SchedulerPool: Debug + Send + Sync {
    /// Borrow a worker from the pool
    fn worker(&self) -> Arc<dyn Worker>;
}

impl<P: SchedulerPool + ?Sized> SchedulerPool for Arc<P> {
    #[inline]
    fn worker(&self) -> Arc<dyn Worker> {
        (**self).worker()
    }
}

/// Releases a worker exactly once when dropped.
#[derive(Debug)]
pub struct WorkerGuard(Option<Arc<dyn Worker>>);

impl WorkerGuard {
    /// Take responsibility for closing the worker
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self(Some(worker))
    }

    /// Access the guarded worker
    pub fn worker(&self) -> Option<&Arc<dyn Worker>> {
        self.0.as_ref()
    }

    /// Close the worker now rather than on drop
    pub fn release(&mut self) {
        if let Some(worker) = self.0.take() {
            worker.close();
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.release();
    }
}
