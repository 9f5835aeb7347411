use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use backflow_core::{SchedulerPool, WorkerGuard};
use crossbeam_channel::{
    bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};
use tracing::{debug, trace};

use super::error::SelectError;

/// Merges several channels into one.
///
/// The first take starts one forwarding task per source channel, each on
/// its own worker. Every item sent to a source is received exactly once
/// from the selector, with no ordering between sources. The selector
/// disconnects once every source has disconnected and the merged items
/// have been taken.
pub struct ChannelSelector<T> {
    pool: Arc<dyn SchedulerPool>,
    sources: Mutex<Vec<Receiver<T>>>,
    sink: Mutex<Option<Sender<T>>>,
    output: Receiver<T>,
    shutdown: Mutex<Option<Sender<()>>>,
    shutdown_recv: Receiver<()>,
    started: AtomicBool,
}

impl<T: Send + 'static> ChannelSelector<T> {
    /// Create a selector over a set of channels. The merged output buffers
    /// up to `capacity` items, or any number when `None`.
    pub fn new(
        sources: Vec<Receiver<T>>,
        pool: Arc<dyn SchedulerPool>,
        capacity: Option<usize>,
    ) -> Self {
        let (sink, output) = match capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };
        let (shutdown, shutdown_recv) = bounded(0);
        Self {
            pool,
            sources: Mutex::new(sources),
            sink: Mutex::new(Some(sink)),
            output,
            shutdown: Mutex::new(Some(shutdown)),
            shutdown_recv,
            started: AtomicBool::new(false),
        }
    }

    /// Wait for the next item from any source
    pub fn take(&self) -> Result<T, SelectError> {
        self.start();
        self.output.recv().map_err(|_| SelectError::Disconnected)
    }

    /// Wait for the next item from any source, up to a timeout
    pub fn take_timeout(&self, timeout: Duration) -> Result<T, SelectError> {
        self.start();
        self.output.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SelectError::Timeout,
            RecvTimeoutError::Disconnected => SelectError::Disconnected,
        })
    }

    /// Take an item if one is ready
    pub fn try_take(&self) -> Result<T, SelectError> {
        self.start();
        self.output.try_recv().map_err(|err| match err {
            TryRecvError::Empty => SelectError::Empty,
            TryRecvError::Disconnected => SelectError::Disconnected,
        })
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let sources = mem::replace(&mut *lock(&self.sources), Vec::new());
        let sink = match lock(&self.sink).take() {
            Some(sink) => sink,
            None => return,
        };
        debug!("starting {} forwarders", sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            let guard = WorkerGuard::new(self.pool.worker());
            let worker = match guard.worker() {
                Some(worker) => worker.clone(),
                None => continue,
            };
            let sink = sink.clone();
            let shutdown = self.shutdown_recv.clone();
            worker.execute(Box::new(move || {
                let _guard = guard;
                forward(index, source, sink, shutdown);
            }));
        }
        // the output disconnects once every forwarder has dropped its sender
    }
}

impl<T> ChannelSelector<T> {
    /// Stop the forwarders. Items already merged may still be taken.
    pub fn close(&self) {
        self.started.store(true, Ordering::Release);
        if lock(&self.shutdown).take().is_some() {
            trace!("closing selector");
        }
        lock(&self.sink).take();
        lock(&self.sources).clear();
    }
}

impl<T> Debug for ChannelSelector<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSelector")
            .field("pool", &self.pool)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("pending", &self.output.len())
            .finish()
    }
}

impl<T> Drop for ChannelSelector<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[inline]
fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forward<T>(index: usize, source: Receiver<T>, sink: Sender<T>, shutdown: Receiver<()>) {
    trace!("forwarder {} started", index);
    let mut count = 0usize;
    'forward: loop {
        select! {
            recv(source) -> msg => match msg {
                Ok(item) => select! {
                    send(sink, item) -> res => {
                        if res.is_err() {
                            break 'forward;
                        }
                        count += 1;
                    }
                    recv(shutdown) -> _ => break 'forward,
                },
                Err(_) => break 'forward,
            },
            recv(shutdown) -> _ => break 'forward,
        }
    }
    trace!("forwarder {} stopped after {} items", index, count);
}
