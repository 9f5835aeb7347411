use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use backflow_core::FlowError;
use tracing::{debug, trace};

use super::flow::{Publisher, Subscriber};
use super::subscription::{Emitter, StreamSubscription};

/// A cold publisher driven by a generator function.
///
/// Each subscription runs the generator afresh on the subscribing thread.
/// The generator pushes items through the [`Emitter`], which suspends it
/// while the subscriber has no outstanding demand. Returning `Ok(())` ends
/// the stream, and an error other than the cancellation returned by
/// [`Emitter::emit`] is delivered to `on_error`.
pub struct StreamSource<T, G> {
    generator: G,
    _pd: PhantomData<fn() -> T>,
}

impl<T, G> StreamSource<T, G>
where
    G: Fn(&mut Emitter<'_, T>) -> Result<(), FlowError> + Send + Sync,
{
    /// Create a new source from a generator
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            _pd: PhantomData,
        }
    }
}

impl<T, G> Debug for StreamSource<T, G> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").finish()
    }
}

impl<T, G> Publisher<T> for StreamSource<T, G>
where
    T: Send + 'static,
    G: Fn(&mut Emitter<'_, T>) -> Result<(), FlowError> + Send + Sync,
{
    fn subscribe(&self, mut subscriber: Box<dyn Subscriber<T>>) {
        let subscription = Arc::new(StreamSubscription::new());
        subscriber.on_subscribe(subscription.clone());
        debug!("stream source started");
        let result = {
            let mut emitter = Emitter::new(&mut *subscriber, &subscription);
            panic::catch_unwind(AssertUnwindSafe(|| (self.generator)(&mut emitter)))
                .unwrap_or_else(|payload| Err(FlowError::from_panic(payload)))
        };
        deliver_terminal(&mut *subscriber, &subscription, result);
    }
}

/// Deliver the terminal signal for a finished generator, or nothing if the
/// subscriber cancelled first.
pub(crate) fn deliver_terminal<T>(
    downstream: &mut dyn Subscriber<T>,
    subscription: &StreamSubscription,
    result: Result<(), FlowError>,
) {
    match subscription.stop_reason() {
        Some(FlowError::Cancelled) => {
            trace!("stream source cancelled");
        }
        Some(violation) => {
            if subscription.terminate() {
                debug!("stream source failed: {}", violation);
                downstream.on_error(violation);
            }
        }
        None => match result {
            // a cancellation raised by a nested stream ends this one normally
            Ok(()) | Err(FlowError::Cancelled) => {
                if subscription.terminate() {
                    debug!("stream source completed");
                    downstream.on_complete();
                }
            }
            Err(err) => {
                if subscription.terminate() {
                    debug!("stream source failed: {}", err);
                    downstream.on_error(err);
                }
            }
        },
    }
}
