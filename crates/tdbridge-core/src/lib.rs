//! Core client contract shared by the runtime and its callers.
//!
//! This crate defines the command/event envelope, the authorization state
//! model, request correlation, update dispatch and the common error type.

/// Authorization-state broadcast channel.
pub mod channel;
/// Update handlers, bounded dispatch queue and worker pool.
pub mod dispatch;
/// Wire envelope decoding into routing shapes.
pub mod envelope;
/// Stable client error type and categories.
pub mod error;
/// Single-assignment future for correlated requests.
pub mod pending;
/// Correlation-id registry.
pub mod registry;
/// Backoff policy used by the delivery loop.
pub mod retry;
/// Authorization transition table.
pub mod state_machine;
/// Commands, authorization states and reserved ids.
pub mod types;

pub use channel::{AuthStateChannel, AuthStateStream};
pub use dispatch::{DispatchJob, DispatchQueue, Dispatcher, HandlerRegistry, UpdateHandler, WorkerPool};
pub use envelope::{IncomingEvent, authorization_state_of, request_id_of};
pub use error::{ClientError, ClientErrorCategory};
pub use pending::{Outcome, PendingResult};
pub use registry::{ResultRegistry, generate_request_id};
pub use retry::RetryPolicy;
pub use state_machine::{AuthAction, AuthorizationStateMachine};
pub use types::{
    AUTH_STATE_QUERY_ID, AuthorizationState, Command, EXTRA_FIELD, HANDSHAKE_REQUEST_ID,
    NEW_MESSAGE_UPDATE, PROXY_REQUEST_ID, REQUEST_ID_FIELD, TYPE_FIELD,
};
