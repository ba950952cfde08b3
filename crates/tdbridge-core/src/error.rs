use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::AuthorizationState;

/// Broad error category used for caller-side handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientErrorCategory {
    /// No terminal event arrived before the caller's deadline.
    Timeout,
    /// The engine answered with an explicit error payload.
    Backend,
    /// A handshake operation was invoked out of sequence.
    InvalidState,
    /// The dispatch queue stayed full past its put timeout.
    QueueSaturated,
    /// Missing or invalid client configuration.
    Config,
    /// The engine binding failed to send or receive.
    Transport,
    /// The secret prompt collaborator failed.
    Prompt,
    /// Protocol invariant break (unknown or regressing state, malformed reply).
    Internal,
}

/// Stable client error carried across every fallible operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ClientError {
    /// High-level error category.
    pub category: ClientErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Verbatim engine payload for `Backend` errors.
    pub payload: Option<Value>,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ClientError {
    /// Construct a new client error.
    pub fn new(
        category: ClientErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            payload: None,
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Deadline elapsed while waiting for `request_id`.
    pub fn timeout(request_id: &str, waited: Duration) -> Self {
        Self::new(
            ClientErrorCategory::Timeout,
            "timeout",
            format!(
                "no result for request '{request_id}' within {}ms",
                waited.as_millis()
            ),
        )
    }

    /// Build a standard out-of-sequence handshake error.
    pub fn invalid_state(current: AuthorizationState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ClientErrorCategory::InvalidState,
            "invalid_state_transition",
            format!("cannot run '{action}' while authorization state is {current:?}"),
        )
    }

    /// Dispatch backpressure exceeded for one event.
    pub fn queue_saturated(event_type: &str, capacity: usize, waited: Duration) -> Self {
        Self::new(
            ClientErrorCategory::QueueSaturated,
            "queue_saturated",
            format!(
                "dispatch queue (capacity {capacity}) stayed full for {}ms; dropped '{event_type}'",
                waited.as_millis()
            ),
        )
    }

    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ClientErrorCategory::Config, code, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ClientErrorCategory::Transport, "transport_error", message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ClientErrorCategory::Internal, code, message)
    }

    /// Map an engine `error` object to a `Backend` error, keeping the payload verbatim.
    pub fn from_backend_payload(payload: &Value) -> Self {
        let numeric = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("engine returned an error without message")
            .to_owned();

        let retry_after = (numeric == 429)
            .then(|| parse_retry_after_secs(&message))
            .flatten();

        let mut err = Self::new(
            ClientErrorCategory::Backend,
            format!("backend_{numeric}"),
            message,
        );
        err.payload = Some(payload.clone());
        if let Some(secs) = retry_after {
            err = err.with_retry_after(Duration::from_secs(secs));
        }
        err
    }

    /// Whether this error signals caller misuse rather than an expected outcome.
    pub fn is_programming_error(&self) -> bool {
        self.category == ClientErrorCategory::InvalidState
    }

    pub fn is_timeout(&self) -> bool {
        self.category == ClientErrorCategory::Timeout
    }
}

fn parse_retry_after_secs(message: &str) -> Option<u64> {
    let (_, tail) = message.rsplit_once("retry after ")?;
    tail.split(|ch: char| !ch.is_ascii_digit())
        .next()
        .and_then(|digits| digits.parse().ok())
}
