use std::sync::Arc;

use backflow_core::FlowError;

/// A source of items which are pushed to a subscriber as demand allows.
pub trait Publisher<T> {
    /// Attach a subscriber. `on_subscribe` is delivered before any other
    /// signal.
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);
}

impl<T, P: Publisher<T> + ?Sized> Publisher<T> for Arc<P> {
    #[inline]
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber)
    }
}

/// The receiving end of a stream.
///
/// A subscriber sees `on_subscribe`, then any number of `on_next` calls
/// bounded by the demand it has requested, then at most one of `on_error`
/// or `on_complete`. After cancelling it may see neither.
pub trait Subscriber<T>: Send {
    /// Receive the subscription used to signal demand
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>);

    /// Receive the next item
    fn on_next(&mut self, item: T);

    /// Receive a terminal failure
    fn on_error(&mut self, error: FlowError);

    /// Receive the end of the stream
    fn on_complete(&mut self);
}

impl<T, S: Subscriber<T> + ?Sized> Subscriber<T> for Box<S> {
    #[inline]
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        (**self).on_subscribe(subscription)
    }

    #[inline]
    fn on_next(&mut self, item: T) {
        (**self).on_next(item)
    }

    #[inline]
    fn on_error(&mut self, error: FlowError) {
        (**self).on_error(error)
    }

    #[inline]
    fn on_complete(&mut self) {
        (**self).on_complete()
    }
}

/// The demand channel from a subscriber back to its publisher.
pub trait Subscription: Send + Sync {
    /// Signal demand for `n` more items. A non-positive `n` is a protocol
    /// violation which terminates the stream with an error.
    fn request(&self, n: i64);

    /// Stop the stream. Calling this more than once has no further effect.
    fn cancel(&self);
}
