use std::fmt::{self, Debug, Formatter};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use backflow_core::{FlowError, SuspensionSlot, TaskCell};
use tracing::{debug, trace};

use super::flow::{Publisher, Subscriber, Subscription};

/// A blocking iterator over the items of a stream.
///
/// One item is requested at a time. The producer hands each item over only
/// once the consumer is ready for it, so at most one item is ever held
/// between the two sides. The publisher must deliver items on a thread
/// other than the one iterating, for instance by wrapping it in a
/// [`SubscribeOn`](crate::SubscribeOn). Dropping the iterator cancels the
/// stream.
pub struct BlockingIter<T> {
    inner: Arc<BridgeInner<T>>,
    current: Option<T>,
    finished: bool,
}

impl<T: Send + 'static> BlockingIter<T> {
    /// Subscribe to a publisher
    pub fn subscribe<P>(publisher: &P) -> Self
    where
        P: Publisher<T> + ?Sized,
    {
        let inner = Arc::new(BridgeInner {
            value: Mutex::new(None),
            error: Mutex::new(None),
            done: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            consumer_ready: SuspensionSlot::new(),
            producer_ready: SuspensionSlot::new(),
            upstream: TaskCell::new(),
        });
        publisher.subscribe(Box::new(BridgeSubscriber {
            inner: inner.clone(),
        }));
        Self {
            inner,
            current: None,
            finished: false,
        }
    }
}

impl<T> BlockingIter<T> {
    /// Wait until the next item or the end of the stream is available.
    /// A stream failure is returned once, after which the iterator is
    /// exhausted.
    pub fn has_next(&mut self) -> Result<bool, FlowError> {
        if self.current.is_some() {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }
        self.inner.consumer_ready.resume();
        loop {
            if let Some(value) = self.inner.take_value() {
                self.current.replace(value);
                return Ok(true);
            }
            if self.inner.done.load(Ordering::Acquire) {
                // a value stored before completion takes priority
                if let Some(value) = self.inner.take_value() {
                    self.current.replace(value);
                    return Ok(true);
                }
                self.finished = true;
                let error = self
                    .inner
                    .error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                return match error {
                    Some(err) => Err(err),
                    None => Ok(false),
                };
            }
            if let Err(err) = self.inner.producer_ready.wait() {
                self.finished = true;
                self.close();
                return Err(err.into());
            }
        }
    }

    /// Wait for the next item
    pub fn next_item(&mut self) -> Result<Option<T>, FlowError> {
        if self.has_next()? {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }

    /// Cancel the stream and release a producer waiting to hand over an
    /// item. Calling this more than once has no further effect.
    pub fn close(&mut self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            trace!("closing blocking iterator");
            if let Some(upstream) = self.inner.upstream.cancel() {
                upstream.cancel();
            }
            self.inner.consumer_ready.resume();
        }
    }
}

impl<T> Iterator for BlockingIter<T> {
    type Item = Result<T, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T> Debug for BlockingIter<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingIter")
            .field("has_value", &self.current.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

impl<T> Drop for BlockingIter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

struct BridgeInner<T> {
    value: Mutex<Option<T>>,
    error: Mutex<Option<FlowError>>,
    done: AtomicBool,
    closed: AtomicBool,
    consumer_ready: SuspensionSlot,
    producer_ready: SuspensionSlot,
    upstream: TaskCell<Arc<dyn Subscription>>,
}

impl<T> BridgeInner<T> {
    #[inline]
    fn take_value(&self) -> Option<T> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn finish(&self, error: Option<FlowError>) {
        if let Some(err) = error {
            self.error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(err);
        }
        self.done.store(true, Ordering::Release);
        self.producer_ready.resume();
    }
}

struct BridgeSubscriber<T> {
    inner: Arc<BridgeInner<T>>,
}

impl<T: Send> Subscriber<T> for BridgeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        match self.inner.upstream.set(subscription) {
            Ok(upstream) => upstream.request(1),
            Err(upstream) => upstream.cancel(),
        }
    }

    fn on_next(&mut self, item: T) {
        if let Err(err) = self.inner.consumer_ready.wait() {
            if let Some(upstream) = self.inner.upstream.cancel() {
                upstream.cancel();
            }
            self.inner.finish(Some(err.into()));
            return;
        }
        if self.inner.closed.load(Ordering::Acquire) {
            trace!("dropping item for closed iterator");
            return;
        }
        self.inner
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(item);
        self.inner.producer_ready.resume();
        if let Some(upstream) = self.inner.upstream.get() {
            upstream.request(1);
        }
    }

    fn on_error(&mut self, error: FlowError) {
        debug!("blocking iterator source failed: {}", error);
        self.inner.upstream.finish();
        self.inner.finish(Some(error));
    }

    fn on_complete(&mut self) {
        self.inner.upstream.finish();
        self.inner.finish(None);
    }
}
