use std::{
    any::Any,
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    panic,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use backflow_core::{SchedulerPool, Task, Worker};
use tracing::{debug, info, trace, warn};

static DEFAULT_THREAD_NAME: &str = "threadpool";

/// Builder for a [`ThreadPool`]
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    idle_timeout: Option<Duration>,
    min_count: usize,
    max_count: Option<usize>,
    thread_name: Option<String>,
}

impl ThreadPoolConfig {
    /// Set how long a thread above the minimum count may stay idle
    pub fn idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    /// Set the maximum number of threads, or `None` for no limit
    pub fn max_count(mut self, count: impl Into<Option<usize>>) -> Self {
        self.max_count = count.into();
        self
    }

    /// Set the number of threads started eagerly and kept alive
    pub fn min_count(mut self, count: usize) -> Self {
        self.min_count = count;
        self
    }

    /// Set the base name for pool threads
    pub fn thread_name(mut self, name: impl Into<Option<String>>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Start the pool
    pub fn build(self) -> ThreadPool {
        ThreadPool::new(self)
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_millis(500)),
            min_count: num_cpus::get(),
            max_count: None,
            thread_name: None,
        }
    }
}

/// A pool of threads running queued tasks in submission order.
///
/// Threads are started on demand up to the configured maximum. A panic
/// raised by a task shuts the pool down and is re-raised by the next call
/// to [`ThreadPool::run`] or when the pool is dropped. Dropping the pool
/// waits for running tasks to return; queued tasks which have not started
/// are dropped.
pub struct ThreadPool {
    inner: Arc<ThreadPoolInner>,
}

impl ThreadPool {
    /// Create a new pool from a configuration
    pub fn new(config: ThreadPoolConfig) -> Self {
        let slf = Self {
            inner: Arc::new(ThreadPoolInner {
                state: Mutex::new(ThreadPoolState {
                    counter: 0,
                    queue: VecDeque::new(),
                    idle_count: 0,
                    thread_count: 0,
                    panic: None,
                    shutdown: false,
                }),
                cvar: Condvar::new(),
                idle_timeout: config.idle_timeout,
                thread_min_count: config.min_count,
                thread_max_count: config.max_count,
                thread_name: config.thread_name,
                active_workers: AtomicUsize::new(0),
            }),
        };
        if config.min_count > 0 {
            let mut state = slf.inner.lock_state();
            for _ in 0..(config.min_count) {
                trace!("pre-start");
                ThreadPoolInner::spawn_thread(&slf.inner, &mut state);
            }
        }
        slf
    }

    /// Queue a task for execution on the pool
    pub fn run<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        ThreadPoolInner::run_boxed(&self.inner, Box::new(f));
    }

    /// Block until the queue is empty and every thread is idle, or the
    /// pool has shut down
    pub fn drain(&self) {
        let mut state = self.inner.lock_state();
        while !state.shutdown
            && (!state.queue.is_empty() || state.idle_count < state.thread_count)
        {
            state = self
                .inner
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Get the number of running threads
    pub fn thread_count(&self) -> usize {
        self.inner.lock_state().thread_count
    }

    /// Get the number of workers handed out by the pool and not yet closed
    pub fn active_workers(&self) -> usize {
        self.inner.active_workers.load(Ordering::Acquire)
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        ThreadPoolConfig::default().into()
    }
}

impl Debug for ThreadPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("thread_name", &self.inner.thread_name)
            .field("active_workers", &self.active_workers())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        self.inner.shutdown();
        debug!("dropped pool");
    }
}

impl From<ThreadPoolConfig> for ThreadPool {
    fn from(config: ThreadPoolConfig) -> Self {
        ThreadPool::new(config)
    }
}

impl SchedulerPool for ThreadPool {
    fn worker(&self) -> Arc<dyn Worker> {
        self.inner.active_workers.fetch_add(1, Ordering::AcqRel);
        Arc::new(PoolWorker {
            pool: self.inner.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// A worker handle which runs its tasks on the shared queue of a
/// [`ThreadPool`].
struct PoolWorker {
    pool: Arc<ThreadPoolInner>,
    closed: AtomicBool,
}

impl Worker for PoolWorker {
    fn execute(&self, task: Task) {
        if self.closed.load(Ordering::Acquire) {
            warn!("task dropped: worker already closed");
            return;
        }
        ThreadPoolInner::run_boxed(&self.pool, task);
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.active_workers.fetch_sub(1, Ordering::AcqRel);
            trace!("worker released");
        }
    }
}

impl Debug for PoolWorker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolWorker")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

struct ThreadPoolInner {
    state: Mutex<ThreadPoolState>,
    cvar: Condvar,
    idle_timeout: Option<Duration>,
    thread_min_count: usize,
    thread_max_count: Option<usize>,
    thread_name: Option<String>,
    active_workers: AtomicUsize,
}

impl ThreadPoolInner {
    #[inline]
    fn lock_state(&self) -> MutexGuard<'_, ThreadPoolState> {
        // tasks run outside of the lock, so a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_boxed(inner: &Arc<Self>, task: Task) {
        let mut state = inner.lock_state();
        if let Some(panic) = state.panic.take() {
            drop(state);
            panic::resume_unwind(panic);
        }
        if state.shutdown {
            drop(state);
            warn!("task dropped: pool has shut down");
            // dropped outside of the lock, as the task may close its worker
            drop(task);
            return;
        }
        state.queue.push_back(task);
        if !Self::maybe_spawn(inner, state) {
            inner.cvar.notify_one();
        }
    }

    fn run_thread(self: Arc<Self>) {
        debug!("start worker thread");
        let mut state = self.lock_state();
        let mut tasks = 0usize;

        loop {
            if state.shutdown {
                break;
            }

            if let Some(task) = state.queue.pop_front() {
                state.idle_count -= 1;
                tasks += 1;
                Self::maybe_spawn(&self, state);
                trace!("run task");
                let panic_result = panic::catch_unwind(panic::AssertUnwindSafe(task));
                state = self.lock_state();
                state.idle_count += 1;
                if let Err(panic) = panic_result {
                    warn!("worker thread panicked");
                    if state.panic.is_none() {
                        state.panic.replace(panic);
                        state.shutdown = true;
                    }
                    break;
                }
                if state.queue.is_empty() && state.idle_count == state.thread_count {
                    // wake any thread waiting in drain()
                    self.cvar.notify_all();
                }
            } else if let Some(timeout) = self.idle_timeout {
                let (guard, wait_result) = self
                    .cvar
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
                if wait_result.timed_out() && state.thread_count > self.thread_min_count {
                    debug!("worker thread timed out");
                    break;
                }
            } else {
                state = self.cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        }

        state.idle_count -= 1;
        state.thread_count -= 1;
        // notify the dropping thread in case it is waiting for shutdown
        self.cvar.notify_all();
        drop(state);
        debug!(
            "worker thread shut down after {} tasks, {}",
            tasks,
            thread::current().name().unwrap_or(DEFAULT_THREAD_NAME)
        );
    }

    fn maybe_spawn(inner: &Arc<Self>, mut state: MutexGuard<'_, ThreadPoolState>) -> bool {
        if state.shutdown {
            return false;
        }
        if state.idle_count == 0 || state.idle_count * 5 < state.queue.len() {
            if state.thread_count == 0
                || inner
                    .thread_max_count
                    .map(|max| max > state.thread_count)
                    .unwrap_or(true)
            {
                let spawned = Self::spawn_thread(inner, &mut state);
                drop(state); // in case another thread becomes idle first
                inner.cvar.notify_one();
                return spawned;
            }
        }
        false
    }

    fn spawn_thread(inner: &Arc<Self>, state: &mut ThreadPoolState) -> bool {
        let base_name = inner
            .thread_name
            .as_ref()
            .map(String::as_str)
            .unwrap_or(DEFAULT_THREAD_NAME);
        state.counter += 1;
        let name = format!("{}-{}", base_name, state.counter);
        let result = thread::Builder::new().name(name).spawn({
            let inner = inner.clone();
            move || inner.run_thread()
        });
        match result {
            Ok(_) => {
                state.idle_count += 1;
                state.thread_count += 1;
                true
            }
            Err(err) => {
                warn!("failed to start worker thread: {}", err);
                false
            }
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock_state();
        state.shutdown = true;
        self.cvar.notify_all();
        loop {
            if let Some(panic) = state.panic.take() {
                drop(state); // no need to poison the mutex as well
                info!("re-raising task panic");
                panic::resume_unwind(panic);
            }
            if state.thread_count == 0 {
                break;
            }
            state = self.cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        // drop tasks which never started so that their resources are released
        let queued: Vec<Task> = state.queue.drain(..).collect();
        drop(state);
        if !queued.is_empty() {
            debug!("dropping {} queued tasks", queued.len());
        }
        drop(queued);
    }
}

struct ThreadPoolState {
    counter: usize,
    queue: VecDeque<Task>,
    idle_count: usize,
    thread_count: usize,
    panic: Option<Box<dyn Any + Send>>,
    shutdown: bool,
}
