use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use backflow_core::{SchedulerPool, Worker};
use once_cell::sync::Lazy;
use tracing::debug;

use super::threadpool::{ThreadPool, ThreadPoolConfig};

static SHARED_POOL: Lazy<Arc<ThreadPool>> = Lazy::new(|| {
    debug!("starting shared pool");
    Arc::new(
        ThreadPoolConfig::default()
            .thread_name("backflow-shared".to_string())
            .build(),
    )
});

/// Get the process-wide pool, starting it on first use. Its workers place
/// their tasks on one common queue.
pub fn shared_pool() -> Arc<ThreadPool> {
    SHARED_POOL.clone()
}

/// A pool backed by a single thread: every task from every worker runs
/// in submission order.
#[derive(Debug)]
pub struct SinglePool {
    pool: ThreadPool,
}

impl SinglePool {
    /// Start a single-thread pool
    pub fn new() -> Self {
        Self::with_name("single")
    }

    /// Start a single-thread pool with a custom thread name
    pub fn with_name(name: impl Into<String>) -> Self {
        let pool = ThreadPoolConfig::default()
            .min_count(1)
            .max_count(1)
            .idle_timeout(None)
            .thread_name(name.into())
            .build();
        Self { pool }
    }

    /// Get the number of workers handed out and not yet closed
    pub fn active_workers(&self) -> usize {
        self.pool.active_workers()
    }
}

impl Default for SinglePool {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerPool for SinglePool {
    fn worker(&self) -> Arc<dyn Worker> {
        self.pool.worker()
    }
}

/// A fixed set of single-thread pools. Workers are handed out round-robin,
/// so tasks on one worker stay ordered while separate workers run in
/// parallel.
#[derive(Debug)]
pub struct ParallelPool {
    pools: Vec<SinglePool>,
    next: AtomicUsize,
}

impl ParallelPool {
    /// Start `parallelism` threads.
    ///
    /// # Panics
    /// Panics if `parallelism` is zero.
    pub fn new(parallelism: usize) -> Self {
        assert!(parallelism > 0, "Parallelism must be positive");
        let pools = (0..parallelism)
            .map(|idx| SinglePool::with_name(format!("parallel{}", idx)))
            .collect();
        Self {
            pools,
            next: AtomicUsize::new(0),
        }
    }

    /// Get the number of threads in the pool
    pub fn parallelism(&self) -> usize {
        self.pools.len()
    }

    /// Get the number of workers handed out and not yet closed
    pub fn active_workers(&self) -> usize {
        self.pools.iter().map(SinglePool::active_workers).sum()
    }
}

impl SchedulerPool for ParallelPool {
    fn worker(&self) -> Arc<dyn Worker> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.pools.len();
        self.pools[idx].worker()
    }
}
