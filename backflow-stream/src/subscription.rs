use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};

use backflow_core::{DemandCounter, FlowError, SuspensionSlot};
use tracing::trace;

use super::flow::{Subscriber, Subscription};

const STATE_ACTIVE: u8 = 0;
const STATE_CANCELLED: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// The demand and stop state of a single stream, shared by the producer
/// and the subscriber.
///
/// The producer is the only context which ever waits on the subscription.
/// `request` wakes it when demand rises from zero, while `cancel` and any
/// protocol violation inject a unit of demand so that a parked producer
/// always wakes to observe the stop.
pub struct StreamSubscription {
    demand: DemandCounter,
    slot: SuspensionSlot,
    state: AtomicU8,
}

impl StreamSubscription {
    /// Create an active subscription with no demand
    pub fn new() -> Self {
        Self {
            demand: DemandCounter::new(),
            slot: SuspensionSlot::new(),
            state: AtomicU8::new(STATE_ACTIVE),
        }
    }

    /// Access the demand counter
    #[inline]
    pub fn demand(&self) -> &DemandCounter {
        &self.demand
    }

    /// Check whether the subscriber has cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CANCELLED
    }

    /// Check whether a terminal signal has been delivered
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_TERMINATED
    }

    /// Get the reason the producer must stop, if any. A protocol violation
    /// takes priority over cancellation, but is only delivered to the
    /// subscriber if [`StreamSubscription::terminate`] succeeds.
    pub fn stop_reason(&self) -> Option<FlowError> {
        if let Some(requested) = self.demand.violation() {
            Some(FlowError::ProtocolViolation { requested })
        } else if self.is_cancelled() {
            Some(FlowError::Cancelled)
        } else {
            None
        }
    }

    /// Wait until a unit of demand is available, or fail with the stop
    /// reason. Wakeups which do not change either condition are retried.
    pub fn acquire(&self) -> Result<(), FlowError> {
        loop {
            if let Some(stop) = self.stop_reason() {
                return Err(stop);
            }
            if self.demand.get() > 0 {
                return Ok(());
            }
            trace!("waiting for demand");
            self.slot.wait()?;
        }
    }

    /// Record the delivery of one item
    #[inline]
    pub fn produced(&self) {
        self.demand.consume_one();
    }

    /// Mark the stream as terminated. Returns `false` if it was already
    /// cancelled or terminated.
    pub fn terminate(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_ACTIVE,
                STATE_TERMINATED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for StreamSubscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for StreamSubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("demand", &self.demand.get())
            .field("cancelled", &self.is_cancelled())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl Subscription for StreamSubscription {
    fn request(&self, n: i64) {
        if n <= 0 {
            if self.state.load(Ordering::Acquire) == STATE_ACTIVE {
                self.demand.request(n);
            } else {
                trace!("ignoring request on stopped subscription");
                self.demand.inject();
            }
            self.slot.resume();
        } else if self.demand.request(n) {
            self.slot.resume();
        }
    }

    fn cancel(&self) {
        if self
            .state
            .compare_exchange(
                STATE_ACTIVE,
                STATE_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            trace!("subscription cancelled");
        }
        self.demand.inject();
        self.slot.resume();
    }
}

/// The emission callback handed to generators and stage transforms.
///
/// Each call to [`Emitter::emit`] delivers one item, first waiting for
/// demand if none is outstanding. Once the stream is stopped it returns
/// the stop reason, which the caller should propagate with `?`.
pub struct Emitter<'e, T> {
    downstream: &'e mut dyn Subscriber<T>,
    subscription: &'e StreamSubscription,
}

impl<'e, T> Emitter<'e, T> {
    pub(crate) fn new(
        downstream: &'e mut dyn Subscriber<T>,
        subscription: &'e StreamSubscription,
    ) -> Self {
        Self {
            downstream,
            subscription,
        }
    }

    /// Deliver an item once demand allows
    pub fn emit(&mut self, item: T) -> Result<(), FlowError> {
        self.subscription.acquire()?;
        self.downstream.on_next(item);
        self.subscription.produced();
        Ok(())
    }

    /// Check whether the stream has been stopped without waiting
    pub fn is_stopped(&self) -> bool {
        self.subscription.stop_reason().is_some()
    }
}

impl<T> Debug for Emitter<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscription", self.subscription)
            .finish()
    }
}
