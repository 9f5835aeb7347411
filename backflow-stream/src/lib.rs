//! Backpressured streams built on thread suspension.
//!
//! A [`StreamSource`] runs a generator which blocks whenever its subscriber
//! has no outstanding demand. [`SubscribeOn`] and [`AsyncStage`] move work
//! onto pooled workers, [`BlockingIter`] turns a stream back into a plain
//! iterator, and [`ChannelSelector`] merges a set of channels into one.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use backflow_core::{FlowError, UNBOUNDED};

pub use self::{
    bridge::BlockingIter,
    error::SelectError,
    flow::{Publisher, Subscriber, Subscription},
    selector::ChannelSelector,
    source::StreamSource,
    stage::{AsyncStage, DEFAULT_PREFETCH},
    subscribe_on::SubscribeOn,
    subscription::{Emitter, StreamSubscription},
};

mod bridge;
mod error;
mod flow;
mod selector;
mod source;
mod stage;
mod subscribe_on;
mod subscription;
