use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field carrying the object type name on every engine object.
pub const TYPE_FIELD: &str = "@type";
/// Envelope field echoed back by the engine on correlated replies.
pub const EXTRA_FIELD: &str = "@extra";
/// Correlation id key inside [`EXTRA_FIELD`].
pub const REQUEST_ID_FIELD: &str = "request_id";

/// Reserved id shared by every handshake step.
///
/// Authorization-state notifications never carry the request id of the command
/// that caused them, so the registry keys them by their own type name.
pub const HANDSHAKE_REQUEST_ID: &str = "updateAuthorizationState";
/// Reserved id for `getAuthorizationState` queries.
pub const AUTH_STATE_QUERY_ID: &str = "getAuthorizationState";
/// Reserved id for the proxy registration command.
pub const PROXY_REQUEST_ID: &str = "setProxy";

/// Update type delivered for incoming chat messages.
pub const NEW_MESSAGE_UPDATE: &str = "updateNewMessage";

/// Authorization handshake state as reported by the engine.
///
/// Variants are declared in handshake order; see [`AuthorizationState::rank`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuthorizationState {
    /// No state has been observed yet.
    Uninitialized,
    /// Engine waits for its initial parameters.
    WaitTdlibParameters,
    /// Engine waits for the local database encryption key.
    WaitEncryptionKey,
    /// Engine waits for a phone number or bot token.
    WaitPhoneNumber,
    /// Engine waits for the login code sent to the user.
    WaitCode,
    /// Engine waits for sign-up details of a new account.
    WaitRegistration,
    /// Engine waits for the two-step verification password.
    WaitPassword,
    /// Authorized; arbitrary requests are meaningful.
    Ready,
    /// Engine is logging the session out.
    LoggingOut,
    /// Engine is shutting down.
    Closing,
    /// Engine has shut down; no further requests are accepted.
    Closed,
}

impl AuthorizationState {
    /// Map an engine object type name to a state.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let state = match name {
            "authorizationStateWaitTdlibParameters" => Self::WaitTdlibParameters,
            "authorizationStateWaitEncryptionKey" => Self::WaitEncryptionKey,
            "authorizationStateWaitPhoneNumber" => Self::WaitPhoneNumber,
            "authorizationStateWaitCode" => Self::WaitCode,
            "authorizationStateWaitRegistration" => Self::WaitRegistration,
            "authorizationStateWaitPassword" => Self::WaitPassword,
            "authorizationStateReady" => Self::Ready,
            "authorizationStateLoggingOut" => Self::LoggingOut,
            "authorizationStateClosing" => Self::Closing,
            "authorizationStateClosed" => Self::Closed,
            _ => return None,
        };
        Some(state)
    }

    /// Engine object type name, `None` for [`AuthorizationState::Uninitialized`].
    pub fn type_name(self) -> Option<&'static str> {
        let name = match self {
            Self::Uninitialized => return None,
            Self::WaitTdlibParameters => "authorizationStateWaitTdlibParameters",
            Self::WaitEncryptionKey => "authorizationStateWaitEncryptionKey",
            Self::WaitPhoneNumber => "authorizationStateWaitPhoneNumber",
            Self::WaitCode => "authorizationStateWaitCode",
            Self::WaitRegistration => "authorizationStateWaitRegistration",
            Self::WaitPassword => "authorizationStateWaitPassword",
            Self::Ready => "authorizationStateReady",
            Self::LoggingOut => "authorizationStateLoggingOut",
            Self::Closing => "authorizationStateClosing",
            Self::Closed => "authorizationStateClosed",
        };
        Some(name)
    }

    /// Position in the forward-only progression.
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// States that cannot advance without a caller-supplied secret.
    pub fn requires_input(self) -> bool {
        matches!(
            self,
            Self::WaitCode | Self::WaitRegistration | Self::WaitPassword
        )
    }

    /// States past which the handshake performs no further I/O.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::LoggingOut | Self::Closing | Self::Closed
        )
    }
}

/// Outbound request: an engine method name plus its parameters.
///
/// The correlation envelope is injected by the result registry right before
/// transmission; the command itself never carries a generated id.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    method: String,
    params: Map<String, Value>,
}

impl Command {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Map::new(),
        }
    }

    /// Build from a method name and an object of parameters; non-object values are ignored.
    pub fn with_params(method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Request id the caller placed in `@extra.request_id`, if any.
    pub fn requested_id(&self) -> Option<&str> {
        self.params
            .get(EXTRA_FIELD)
            .and_then(|extra| extra.get(REQUEST_ID_FIELD))
            .and_then(Value::as_str)
    }

    /// Serialize into the wire object tagged with `request_id`.
    pub fn into_payload(self, request_id: &str) -> Value {
        let mut object = self.params;
        object.insert(TYPE_FIELD.to_owned(), Value::String(self.method));

        let extra = object
            .entry(EXTRA_FIELD.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !extra.is_object() {
            *extra = Value::Object(Map::new());
        }
        if let Value::Object(extra) = extra {
            extra.insert(
                REQUEST_ID_FIELD.to_owned(),
                Value::String(request_id.to_owned()),
            );
        }

        Value::Object(object)
    }
}
