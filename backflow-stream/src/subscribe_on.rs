use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use backflow_core::{FlowError, SchedulerPool, TaskCell, WorkerGuard};
use tracing::{debug, trace};

use super::flow::{Publisher, Subscriber, Subscription};

/// Subscribes to an upstream publisher from a pooled worker.
///
/// The downstream receives `on_subscribe` immediately on the calling
/// thread. Requests made before the upstream subscription exists are held
/// and forwarded once it does, and a cancellation made before then stops
/// the upstream from being subscribed at all. The worker is released when
/// the upstream `subscribe` call returns.
pub struct SubscribeOn<T, P> {
    source: Arc<P>,
    pool: Arc<dyn SchedulerPool>,
    _pd: PhantomData<fn() -> T>,
}

impl<T, P> SubscribeOn<T, P>
where
    T: Send + 'static,
    P: Publisher<T> + Send + Sync + 'static,
{
    /// Wrap a publisher
    pub fn new(source: Arc<P>, pool: Arc<dyn SchedulerPool>) -> Self {
        Self {
            source,
            pool,
            _pd: PhantomData,
        }
    }
}

impl<T, P> Debug for SubscribeOn<T, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOn")
            .field("pool", &self.pool)
            .finish()
    }
}

impl<T, P> Publisher<T> for SubscribeOn<T, P>
where
    T: Send + 'static,
    P: Publisher<T> + Send + Sync + 'static,
{
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let state = Arc::new(DeferredSubscription {
            upstream: TaskCell::new(),
            pending: Mutex::new(Vec::new()),
        });
        subscriber.on_subscribe(state.clone());

        let guard = WorkerGuard::new(self.pool.worker());
        let worker = match guard.worker() {
            Some(worker) => worker.clone(),
            None => return,
        };
        let source = self.source.clone();
        worker.execute(Box::new(move || {
            let _guard = guard;
            if state.upstream.is_done() {
                debug!("cancelled before subscribe");
                return;
            }
            trace!("subscribing upstream on worker");
            source.subscribe(Box::new(ForwardUpstream {
                downstream: subscriber,
                state,
            }));
        }));
    }
}

struct DeferredSubscription {
    upstream: TaskCell<Arc<dyn Subscription>>,
    pending: Mutex<Vec<i64>>,
}

impl DeferredSubscription {
    fn attach(&self, upstream: Arc<dyn Subscription>) {
        match self.upstream.set(upstream) {
            Ok(upstream) => {
                let pending = {
                    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                    mem::replace(&mut *pending, Vec::new())
                };
                for n in pending {
                    upstream.request(n);
                }
            }
            Err(upstream) => {
                trace!("cancelling late upstream");
                upstream.cancel();
            }
        }
    }
}

impl Subscription for DeferredSubscription {
    fn request(&self, n: i64) {
        let upstream = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match self.upstream.get() {
                Some(upstream) => upstream.clone(),
                None => {
                    if !self.upstream.is_done() {
                        pending.push(n);
                    }
                    return;
                }
            }
        };
        upstream.request(n);
    }

    fn cancel(&self) {
        if let Some(upstream) = self.upstream.cancel() {
            upstream.cancel();
        }
    }
}

struct ForwardUpstream<T> {
    downstream: Box<dyn Subscriber<T>>,
    state: Arc<DeferredSubscription>,
}

impl<T: Send> Subscriber<T> for ForwardUpstream<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.state.attach(subscription);
    }

    fn on_next(&mut self, item: T) {
        self.downstream.on_next(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.state.upstream.finish();
        self.downstream.on_error(error);
    }

    fn on_complete(&mut self) {
        self.state.upstream.finish();
        self.downstream.on_complete();
    }
}
