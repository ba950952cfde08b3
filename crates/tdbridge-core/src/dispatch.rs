//! Update dispatch: handler bindings, the bounded job queue and its worker threads.
//!
//! The delivery thread only ever enqueues; handlers run on worker threads so a
//! slow or panicking handler cannot stall the engine's event stream.

use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::ClientError;

const FULL_QUEUE_POLL: Duration = Duration::from_millis(1);

type HandlerFn = dyn Fn(&Value) + Send + Sync + 'static;

/// Callback invoked with an unsolicited engine event.
///
/// Equality is identity: clones of one handler compare equal, two handlers
/// built from identical closures do not. Keep a clone to unregister later.
#[derive(Clone)]
pub struct UpdateHandler {
    callback: Arc<HandlerFn>,
}

impl UpdateHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn call(&self, update: &Value) {
        (self.callback)(update)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.callback) as *const ()
    }
}

impl PartialEq for UpdateHandler {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for UpdateHandler {}

impl fmt::Debug for UpdateHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateHandler({:p})", self.addr())
    }
}

/// Per-client map from event type to an ordered, duplicate-free handler list.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<UpdateHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for `event_type`; returns `false` if it was already bound.
    pub fn register(&self, event_type: &str, handler: UpdateHandler) -> bool {
        let mut handlers = self.handlers.write();
        let bound = handlers.entry(event_type.to_owned()).or_default();
        if bound.contains(&handler) {
            return false;
        }
        bound.push(handler);
        true
    }

    /// Remove `handler` from `event_type`; unknown types and handlers are ignored.
    pub fn unregister(&self, event_type: &str, handler: &UpdateHandler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(bound) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = bound.len();
        bound.retain(|existing| existing != handler);
        let removed = bound.len() != before;
        if bound.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    /// Snapshot of the handlers bound to `event_type`, in registration order.
    pub fn handlers_for(&self, event_type: &str) -> Vec<UpdateHandler> {
        self.handlers
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }
}

/// One unit of work: a handler and the event it receives.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub handler: UpdateHandler,
    pub event_type: String,
    pub update: Arc<Value>,
}

/// Bounded FIFO between the delivery thread and the workers.
///
/// Backed by a tokio mpsc channel used from plain threads: the delivery thread
/// polls `try_send` until its deadline, workers take turns in `blocking_recv`.
/// Closing drops the sender, so workers drain what is buffered and then stop.
#[derive(Debug)]
pub struct DispatchQueue {
    capacity: usize,
    tx: RwLock<Option<mpsc::Sender<DispatchJob>>>,
    rx: Mutex<mpsc::Receiver<DispatchJob>>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs buffered and not yet taken by a worker; zero once closed.
    pub fn len(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `job`, blocking up to `timeout` while the queue is full.
    ///
    /// Fails with `QueueSaturated` once the timeout passes; the job is dropped.
    /// A closed queue drops the job the same way. A timeout too large to
    /// represent as a deadline waits until space frees or the queue closes.
    pub fn enqueue(&self, job: DispatchJob, timeout: Duration) -> Result<(), ClientError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut job = job;

        loop {
            let attempt = match self.tx.read().as_ref() {
                Some(tx) => tx.try_send(job),
                None => Err(TrySendError::Closed(job)),
            };

            job = match attempt {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(job)) => {
                    return Err(ClientError::queue_saturated(
                        &job.event_type,
                        self.capacity,
                        Duration::ZERO,
                    ));
                }
                Err(TrySendError::Full(job)) => job,
            };

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(ClientError::queue_saturated(
                        &job.event_type,
                        self.capacity,
                        timeout,
                    ));
                }
                Some(deadline) => FULL_QUEUE_POLL.min(deadline - now),
                None => FULL_QUEUE_POLL,
            };
            thread::sleep(pause);
        }
    }

    /// Take the oldest job, blocking while empty; `None` once closed and drained.
    ///
    /// Must be called from a plain thread, never from inside an async runtime.
    pub fn dequeue(&self) -> Option<DispatchJob> {
        self.rx.lock().blocking_recv()
    }

    /// Stop accepting jobs and release blocked workers once drained.
    pub fn close(&self) {
        self.tx.write().take();
    }
}

/// Routes unsolicited events to every bound handler through the queue.
#[derive(Debug)]
pub struct Dispatcher {
    handlers: HandlerRegistry,
    queue: Arc<DispatchQueue>,
    put_timeout: Duration,
}

impl Dispatcher {
    pub fn new(queue_capacity: usize, put_timeout: Duration) -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            queue: Arc::new(DispatchQueue::new(queue_capacity)),
            put_timeout,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn queue(&self) -> Arc<DispatchQueue> {
        Arc::clone(&self.queue)
    }

    /// Enqueue one job per handler bound to `event_type`.
    ///
    /// A saturated queue drops that single job and logs it; the remaining
    /// handlers are still attempted. Returns the number of jobs enqueued.
    pub fn dispatch(&self, event_type: &str, update: Value) -> usize {
        let handlers = self.handlers.handlers_for(event_type);
        if handlers.is_empty() {
            tracing::trace!(event_type, "no handlers bound");
            return 0;
        }

        let update = Arc::new(update);
        let mut enqueued = 0;
        for handler in handlers {
            let job = DispatchJob {
                handler,
                event_type: event_type.to_owned(),
                update: Arc::clone(&update),
            };
            match self.queue.enqueue(job, self.put_timeout) {
                Ok(()) => enqueued += 1,
                Err(err) => {
                    tracing::error!(event_type, error = %err, "dropping update for handler");
                }
            }
        }
        enqueued
    }
}

/// Worker threads draining a [`DispatchQueue`].
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<DispatchQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` (at least one) named worker threads.
    pub fn spawn(queue: Arc<DispatchQueue>, count: usize) -> Result<Self, ClientError> {
        let mut workers = Vec::with_capacity(count.max(1));
        for index in 0..count.max(1) {
            let queue = Arc::clone(&queue);
            let handle = thread::Builder::new()
                .name(format!("tdbridge-worker-{index}"))
                .spawn(move || run_worker(index, &queue))
                .map_err(|err| {
                    ClientError::internal("worker_spawn_failed", format!("worker {index}: {err}"))
                })?;
            workers.push(handle);
        }
        tracing::info!(workers = workers.len(), "dispatch workers started");
        Ok(Self { queue, workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Close the queue, let workers drain it, and join them.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.queue.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("dispatch worker terminated abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run_worker(index: usize, queue: &DispatchQueue) {
    tracing::debug!(worker = index, "dispatch worker running");
    while let Some(job) = queue.dequeue() {
        let DispatchJob {
            handler,
            event_type,
            update,
        } = job;
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.call(&update)));
        if let Err(cause) = result {
            tracing::error!(
                worker = index,
                event_type = %event_type,
                panic = %panic_message(cause.as_ref()),
                "update handler panicked"
            );
        }
    }
    tracing::debug!(worker = index, "dispatch worker stopped");
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
