use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use crate::error::ClientError;

/// Terminal outcome of a correlated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The engine replied with a result (or a bare acknowledgement).
    Resolved(Value),
    /// The engine replied with an error payload.
    Failed(Value),
}

impl Outcome {
    /// Turn a failed outcome into a `Backend` error.
    pub fn into_result(self) -> Result<Value, ClientError> {
        match self {
            Self::Resolved(payload) => Ok(payload),
            Self::Failed(payload) => Err(ClientError::from_backend_payload(&payload)),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    ack_received: bool,
    outcome: Option<Outcome>,
}

struct Inner {
    id: String,
    request: Value,
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// Single-assignment future for one correlated request.
///
/// Clones share the same slot; any number of threads may wait on it.
#[derive(Clone)]
pub struct PendingResult {
    inner: Arc<Inner>,
}

impl PendingResult {
    pub fn new(id: impl Into<String>, request: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                request,
                slot: Mutex::new(Slot::default()),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The wire object that was sent, kept for diagnostics.
    pub fn request(&self) -> &Value {
        &self.inner.request
    }

    /// Non-blocking peek at the outcome.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.slot.lock().outcome.clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.slot.lock().outcome.is_some()
    }

    /// Whether an intermediate acknowledgement was absorbed for this id.
    pub fn ack_received(&self) -> bool {
        self.inner.slot.lock().ack_received
    }

    /// Block until a terminal outcome or until `timeout` elapses.
    ///
    /// `None` waits forever. Fails only with a `Timeout` error; a failed outcome
    /// is returned as [`Outcome::Failed`].
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Outcome, ClientError> {
        // A timeout too large for the clock waits without a deadline.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut slot = self.inner.slot.lock();

        loop {
            if let Some(outcome) = &slot.outcome {
                return Ok(outcome.clone());
            }

            match deadline {
                Some(deadline) => {
                    if self.inner.ready.wait_until(&mut slot, deadline).timed_out()
                        && slot.outcome.is_none()
                    {
                        return Err(ClientError::timeout(
                            &self.inner.id,
                            timeout.unwrap_or_default(),
                        ));
                    }
                }
                None => self.inner.ready.wait(&mut slot),
            }
        }
    }

    /// Like [`PendingResult::wait`] but surfaces a failed outcome as a `Backend` error.
    pub fn wait_ok(&self, timeout: Option<Duration>) -> Result<Value, ClientError> {
        self.wait(timeout)?.into_result()
    }

    /// Record an intermediate acknowledgement without completing.
    pub fn mark_ack(&self) {
        self.inner.slot.lock().ack_received = true;
    }

    /// Assign the terminal outcome and wake every waiter.
    ///
    /// Returns `false` when an outcome was already assigned; the first one wins.
    pub fn complete(&self, outcome: Outcome) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.outcome.is_some() {
            return false;
        }
        slot.outcome = Some(outcome);
        drop(slot);
        self.inner.ready.notify_all();
        true
    }

    pub fn resolve(&self, payload: Value) -> bool {
        self.complete(Outcome::Resolved(payload))
    }

    pub fn fail(&self, payload: Value) -> bool {
        self.complete(Outcome::Failed(payload))
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.inner.id)
            .field("done", &self.is_done())
            .finish()
    }
}

impl fmt::Display for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendingResult <{}>", self.inner.id)
    }
}
