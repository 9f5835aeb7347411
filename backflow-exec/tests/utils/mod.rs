#![allow(dead_code)]

use std::ops::Deref;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default, Debug)]
pub struct State {
    calls: AtomicUsize,
    drops: AtomicUsize,
}

impl State {
    #[inline]
    pub fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn drop_count(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// Counts calls and drops of the clones moved into pool tasks
#[derive(Debug)]
pub struct Track(Arc<State>);

impl Track {
    pub fn new() -> Self {
        Self(Arc::new(State::default()))
    }
}

impl Clone for Track {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Deref for Track {
    type Target = State;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.0.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll a condition until it holds or the timeout elapses
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let expire = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= expire {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
