use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tdbridge_core::ClientError;

/// Boundary to the native engine binding.
///
/// The binding owns library loading, engine lifecycle and log verbosity; the
/// client only needs these two primitives. `send` must not block on the
/// engine's reply, and `receive` is called repeatedly from a single thread.
pub trait Engine: Send + Sync + 'static {
    /// Hand one request object to the engine; fire-and-forget.
    fn send(&self, request: &Value) -> Result<(), ClientError>;

    /// Wait up to `timeout` for the next engine object; `Ok(None)` on an idle poll.
    fn receive(&self, timeout: Duration) -> Result<Option<Value>, ClientError>;
}

impl<E: Engine + ?Sized> Engine for Arc<E> {
    fn send(&self, request: &Value) -> Result<(), ClientError> {
        (**self).send(request)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Value>, ClientError> {
        (**self).receive(timeout)
    }
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn send(&self, request: &Value) -> Result<(), ClientError> {
        (**self).send(request)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Value>, ClientError> {
        (**self).receive(timeout)
    }
}
