use std::convert::TryFrom;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use backflow_core::{FlowError, SchedulerPool, SuspensionSlot, TaskCell, WorkerGuard, UNBOUNDED};
use crossbeam_queue::SegQueue;
use tracing::{debug, trace};

use super::flow::{Publisher, Subscriber, Subscription};
use super::subscription::{Emitter, StreamSubscription};

/// The default number of items requested from upstream in advance
pub const DEFAULT_PREFETCH: usize = 256;

/// A one-to-one transforming stage which moves delivery onto a pooled
/// worker.
///
/// The upstream pushes items into an unbounded queue from its own thread.
/// A consumer loop on the worker pops them in order and passes each one to
/// the mapper, which may emit any number of output items subject to the
/// downstream demand. At most `prefetch` items are requested ahead; once
/// three quarters of a window has been consumed the same amount is
/// requested again.
pub struct AsyncStage<T, R, P, F> {
    source: Arc<P>,
    mapper: Arc<F>,
    pool: Arc<dyn SchedulerPool>,
    prefetch: usize,
    _pd: PhantomData<fn(T) -> R>,
}

impl<T, R, P, F> AsyncStage<T, R, P, F>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Publisher<T> + Send + Sync + 'static,
    F: Fn(T, &mut Emitter<'_, R>) -> Result<(), FlowError> + Send + Sync + 'static,
{
    /// Create a new stage.
    ///
    /// # Panics
    /// Panics if `prefetch` is zero.
    pub fn new(source: Arc<P>, mapper: F, pool: Arc<dyn SchedulerPool>, prefetch: usize) -> Self {
        assert!(prefetch > 0, "Prefetch must be positive");
        Self {
            source,
            mapper: Arc::new(mapper),
            pool,
            prefetch,
            _pd: PhantomData,
        }
    }

    /// Get the prefetch window
    pub fn prefetch(&self) -> usize {
        self.prefetch
    }
}

impl<T, R, P, F> Debug for AsyncStage<T, R, P, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncStage")
            .field("pool", &self.pool)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}

impl<T, R, P, F> Publisher<R> for AsyncStage<T, R, P, F>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Publisher<T> + Send + Sync + 'static,
    F: Fn(T, &mut Emitter<'_, R>) -> Result<(), FlowError> + Send + Sync + 'static,
{
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<R>>) {
        let guard = WorkerGuard::new(self.pool.worker());
        let inner = Arc::new(StageInner {
            queue: SegQueue::new(),
            wip: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: Mutex::new(None),
            upstream: TaskCell::new(),
            producer_ready: SuspensionSlot::new(),
            output: StreamSubscription::new(),
        });
        subscriber.on_subscribe(inner.clone());

        let worker = match guard.worker() {
            Some(worker) => worker.clone(),
            None => return,
        };
        let consumer = StageLoop {
            inner: inner.clone(),
            downstream: subscriber,
            mapper: self.mapper.clone(),
            limit: self.prefetch - (self.prefetch >> 2),
        };
        worker.execute(Box::new(move || {
            let _guard = guard;
            consumer.run();
        }));

        self.source.subscribe(Box::new(StageUpstream {
            inner,
            prefetch: self.prefetch,
        }));
    }
}

struct StageInner<T> {
    queue: SegQueue<T>,
    wip: AtomicUsize,
    done: AtomicBool,
    error: Mutex<Option<FlowError>>,
    upstream: TaskCell<Arc<dyn Subscription>>,
    producer_ready: SuspensionSlot,
    output: StreamSubscription,
}

impl<T> StageInner<T> {
    #[inline]
    fn signal(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.producer_ready.resume();
        }
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.cancel() {
            trace!("cancelling stage upstream");
            upstream.cancel();
        }
    }
}

impl<T: Send> Subscription for StageInner<T> {
    fn request(&self, n: i64) {
        self.output.request(n);
        if n <= 0 {
            // the loop may be waiting for input rather than demand
            self.producer_ready.resume();
        }
    }

    fn cancel(&self) {
        self.output.cancel();
        self.cancel_upstream();
        self.producer_ready.resume();
    }
}

struct StageUpstream<T> {
    inner: Arc<StageInner<T>>,
    prefetch: usize,
}

impl<T: Send> Subscriber<T> for StageUpstream<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        match self.inner.upstream.set(subscription) {
            Ok(upstream) => {
                upstream.request(i64::try_from(self.prefetch).unwrap_or(UNBOUNDED));
            }
            Err(upstream) => upstream.cancel(),
        }
    }

    fn on_next(&mut self, item: T) {
        if self.inner.output.is_cancelled() {
            return;
        }
        self.inner.queue.push(item);
        self.inner.signal();
    }

    fn on_error(&mut self, error: FlowError) {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(error);
        self.on_complete();
    }

    fn on_complete(&mut self) {
        self.inner.upstream.finish();
        self.inner.done.store(true, Ordering::Release);
        self.inner.signal();
    }
}

struct StageLoop<T, R, F> {
    inner: Arc<StageInner<T>>,
    downstream: Box<dyn Subscriber<R>>,
    mapper: Arc<F>,
    limit: usize,
}

impl<T, R, F> StageLoop<T, R, F>
where
    F: Fn(T, &mut Emitter<'_, R>) -> Result<(), FlowError>,
{
    fn run(mut self) {
        debug!("stage loop started");
        let mut consumed = 0usize;
        let mut missed = self.inner.wip.load(Ordering::Acquire);
        loop {
            if !self.drain(&mut consumed) {
                break;
            }
            missed = self.inner.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                if let Err(err) = self.inner.producer_ready.wait() {
                    self.inner.cancel_upstream();
                    if self.inner.output.terminate() {
                        self.downstream.on_error(err.into());
                    }
                    break;
                }
                missed = self.inner.wip.load(Ordering::Acquire);
            }
        }
        debug!("stage loop stopped");
    }

    /// Process queued items until the queue is empty. Returns `false` once
    /// the loop must stop.
    fn drain(&mut self, consumed: &mut usize) -> bool {
        let inner = &*self.inner;
        loop {
            match inner.output.stop_reason() {
                Some(FlowError::Cancelled) => return false,
                Some(violation) => {
                    inner.cancel_upstream();
                    if inner.output.terminate() {
                        self.downstream.on_error(violation);
                    }
                    return false;
                }
                None => (),
            }

            let done = inner.done.load(Ordering::Acquire);
            let item = match inner.queue.pop() {
                Some(item) => item,
                None if done => {
                    let error = inner
                        .error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if inner.output.terminate() {
                        match error {
                            Some(err) => self.downstream.on_error(err),
                            None => self.downstream.on_complete(),
                        }
                    }
                    return false;
                }
                None => return true,
            };

            *consumed += 1;
            if *consumed == self.limit {
                *consumed = 0;
                if let Some(upstream) = inner.upstream.get() {
                    trace!("replenishing {}", self.limit);
                    upstream.request(i64::try_from(self.limit).unwrap_or(UNBOUNDED));
                }
            }

            let result = {
                let mapper = &*self.mapper;
                let mut emitter = Emitter::new(&mut *self.downstream, &inner.output);
                panic::catch_unwind(AssertUnwindSafe(|| mapper(item, &mut emitter)))
                    .unwrap_or_else(|payload| Err(FlowError::from_panic(payload)))
            };
            if let Err(err) = result {
                match inner.output.stop_reason() {
                    Some(FlowError::Cancelled) => return false,
                    Some(violation) => {
                        inner.cancel_upstream();
                        if inner.output.terminate() {
                            self.downstream.on_error(violation);
                        }
                    }
                    None => {
                        inner.cancel_upstream();
                        if inner.output.terminate() {
                            match err {
                                // a cancellation raised by a nested stream ends this one normally
                                FlowError::Cancelled => {
                                    debug!("stage transform stopped");
                                    self.downstream.on_complete();
                                }
                                err => {
                                    debug!("stage transform failed: {}", err);
                                    self.downstream.on_error(err);
                                }
                            }
                        }
                    }
                }
                return false;
            }
        }
    }
}
