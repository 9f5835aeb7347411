#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use backflow_stream::{FlowError, Subscriber, Subscription, UNBOUNDED};
use crossbeam_channel::{unbounded, Receiver, Sender};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn run_test<T>(test: impl FnOnce() -> T) -> T {
    tracing_subscriber::fmt::try_init().ok();
    test()
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

/// Counts how many times a generator ran its cleanup
#[derive(Debug, Default)]
pub struct Cleanup(AtomicUsize);

impl Cleanup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn guard(self: &Arc<Self>) -> CleanupGuard {
        CleanupGuard(self.clone())
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CleanupGuard(Arc<Cleanup>);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_add(1, Ordering::SeqCst);
    }
}

type NextHook = Box<dyn FnMut(usize, &dyn Subscription) + Send>;

/// The signals observed by a [`Recorder`]
pub struct Recording<T> {
    items: Mutex<Vec<T>>,
    errors: Mutex<Vec<FlowError>>,
    completions: AtomicUsize,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    latch: (Sender<()>, Receiver<()>),
}

impl<T> Recording<T> {
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.lock().unwrap().clone()
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn terminal_count(&self) -> usize {
        self.completions() + self.error_count()
    }

    pub fn take_error(&self) -> Option<FlowError> {
        self.errors.lock().unwrap().pop()
    }

    /// Wait for a terminal signal
    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        self.latch.1.recv_timeout(timeout).is_ok()
    }

    pub fn wait_items(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.item_count() >= count)
    }

    pub fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.lock().unwrap().clone()
    }

    pub fn request(&self, n: i64) {
        self.subscription()
            .expect("Not subscribed")
            .request(n);
    }

    pub fn cancel(&self) {
        self.subscription().expect("Not subscribed").cancel();
    }
}

/// A subscriber which records every signal it receives
pub struct Recorder<T> {
    record: Arc<Recording<T>>,
    initial: i64,
    hook: Option<NextHook>,
}

impl<T: Send + 'static> Recorder<T> {
    pub fn with_hook(
        initial: i64,
        hook: impl FnMut(usize, &dyn Subscription) + Send + 'static,
    ) -> (Box<dyn Subscriber<T>>, Arc<Recording<T>>) {
        Self::build(initial, Some(Box::new(hook)))
    }

    /// Request nothing until told to
    pub fn manual() -> (Box<dyn Subscriber<T>>, Arc<Recording<T>>) {
        Self::build(0, None)
    }

    /// Request one item, then one more after each item received
    pub fn one_by_one() -> (Box<dyn Subscriber<T>>, Arc<Recording<T>>) {
        Self::with_hook(1, |_, sub| sub.request(1))
    }

    pub fn unbounded() -> (Box<dyn Subscriber<T>>, Arc<Recording<T>>) {
        Self::build(UNBOUNDED, None)
    }

    fn build(
        initial: i64,
        hook: Option<NextHook>,
    ) -> (Box<dyn Subscriber<T>>, Arc<Recording<T>>) {
        let record = Arc::new(Recording {
            items: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            subscription: Mutex::new(None),
            latch: unbounded(),
        });
        let recorder = Self {
            record: record.clone(),
            initial,
            hook,
        };
        (Box::new(recorder), record)
    }
}

impl<T: Send> Subscriber<T> for Recorder<T> {
    fn on_subscribe(&mut self, subscription: Arc<dyn Subscription>) {
        self.record
            .subscription
            .lock()
            .unwrap()
            .replace(subscription.clone());
        if self.initial != 0 {
            subscription.request(self.initial);
        }
    }

    fn on_next(&mut self, item: T) {
        let count = {
            let mut items = self.record.items.lock().unwrap();
            items.push(item);
            items.len()
        };
        if let Some(hook) = self.hook.as_mut() {
            let sub = self.record.subscription().expect("Not subscribed");
            hook(count, &*sub);
        }
    }

    fn on_error(&mut self, error: FlowError) {
        self.record.errors.lock().unwrap().push(error);
        self.record.latch.0.send(()).ok();
    }

    fn on_complete(&mut self) {
        self.record.completions.fetch_add(1, Ordering::SeqCst);
        self.record.latch.0.send(()).ok();
    }
}
