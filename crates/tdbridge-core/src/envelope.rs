use serde_json::Value;

use crate::{
    error::ClientError,
    types::{AuthorizationState, EXTRA_FIELD, HANDSHAKE_REQUEST_ID, REQUEST_ID_FIELD, TYPE_FIELD},
};

/// An engine object decoded into the closed set of routing shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    /// Bare `ok` acknowledgement of a correlated request.
    Ack { request_id: String, payload: Value },
    /// Explicit `error` reply to a correlated request.
    ErrorResult { request_id: String, payload: Value },
    /// `updateAuthorizationState` notification; never carries a request id.
    AuthStateChange { payload: Value },
    /// Any other object echoing a request id.
    CorrelatedResult { request_id: String, payload: Value },
    /// Everything without a correlation id.
    UnsolicitedEvent { event_type: String, payload: Value },
}

impl IncomingEvent {
    /// Decode a raw engine object.
    ///
    /// Fails only for non-object input; objects without `@type` decode as
    /// unsolicited events of type `unknown`.
    pub fn decode(payload: Value) -> Result<Self, ClientError> {
        if !payload.is_object() {
            return Err(ClientError::internal(
                "malformed_event",
                format!("engine event is not an object: {payload}"),
            ));
        }

        let event_type = payload
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();

        if event_type == HANDSHAKE_REQUEST_ID {
            return Ok(Self::AuthStateChange { payload });
        }

        let Some(request_id) = request_id_of(&payload) else {
            return Ok(Self::UnsolicitedEvent {
                event_type,
                payload,
            });
        };

        let decoded = match event_type.as_str() {
            "ok" => Self::Ack {
                request_id,
                payload,
            },
            "error" => Self::ErrorResult {
                request_id,
                payload,
            },
            _ => Self::CorrelatedResult {
                request_id,
                payload,
            },
        };
        Ok(decoded)
    }

    /// Registry key this event resolves, if it is correlated at all.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Ack { request_id, .. }
            | Self::ErrorResult { request_id, .. }
            | Self::CorrelatedResult { request_id, .. } => Some(request_id),
            Self::AuthStateChange { .. } => Some(HANDSHAKE_REQUEST_ID),
            Self::UnsolicitedEvent { .. } => None,
        }
    }

    /// Engine type name used for handler lookup.
    pub fn event_type(&self) -> &str {
        match self {
            Self::UnsolicitedEvent { event_type, .. } => event_type,
            Self::AuthStateChange { .. } => HANDSHAKE_REQUEST_ID,
            other => other
                .payload()
                .get(TYPE_FIELD)
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::Ack { payload, .. }
            | Self::ErrorResult { payload, .. }
            | Self::AuthStateChange { payload }
            | Self::CorrelatedResult { payload, .. }
            | Self::UnsolicitedEvent { payload, .. } => payload,
        }
    }

    pub fn into_payload(self) -> Value {
        match self {
            Self::Ack { payload, .. }
            | Self::ErrorResult { payload, .. }
            | Self::AuthStateChange { payload }
            | Self::CorrelatedResult { payload, .. }
            | Self::UnsolicitedEvent { payload, .. } => payload,
        }
    }
}

/// Read `@extra.request_id` from a raw engine object.
pub fn request_id_of(payload: &Value) -> Option<String> {
    payload
        .get(EXTRA_FIELD)
        .and_then(|extra| extra.get(REQUEST_ID_FIELD))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

/// Extract the authorization state a handshake reply reports.
///
/// `updateAuthorizationState` nests the state under `authorization_state`;
/// a `getAuthorizationState` reply is the state object itself.
pub fn authorization_state_of(payload: &Value) -> Result<AuthorizationState, ClientError> {
    let type_name = payload.get(TYPE_FIELD).and_then(Value::as_str);
    let state_name = if type_name == Some(HANDSHAKE_REQUEST_ID) {
        payload
            .get("authorization_state")
            .and_then(|state| state.get(TYPE_FIELD))
            .and_then(Value::as_str)
    } else {
        type_name
    };

    state_name
        .and_then(AuthorizationState::from_type_name)
        .ok_or_else(|| {
            ClientError::internal(
                "unknown_authorization_state",
                format!("reply does not describe an authorization state: {payload}"),
            )
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_ack_error_and_result() {
        let ack = IncomingEvent::decode(json!({"@type": "ok", "@extra": {"request_id": "a"}}))
            .expect("ack decodes");
        assert!(matches!(ack, IncomingEvent::Ack { ref request_id, .. } if request_id == "a"));

        let err = IncomingEvent::decode(
            json!({"@type": "error", "code": 400, "@extra": {"request_id": "b"}}),
        )
        .expect("error decodes");
        assert!(matches!(err, IncomingEvent::ErrorResult { .. }));
        assert_eq!(err.correlation_id(), Some("b"));

        let result = IncomingEvent::decode(json!({"@type": "user", "@extra": {"request_id": "c"}}))
            .expect("result decodes");
        assert!(matches!(result, IncomingEvent::CorrelatedResult { .. }));
        assert_eq!(result.event_type(), "user");
    }

    #[test]
    fn auth_updates_use_reserved_correlation_id() {
        let event = IncomingEvent::decode(json!({
            "@type": "updateAuthorizationState",
            "authorization_state": {"@type": "authorizationStateWaitCode"}
        }))
        .expect("auth update decodes");

        assert_eq!(event.correlation_id(), Some(HANDSHAKE_REQUEST_ID));
        assert_eq!(
            authorization_state_of(event.payload()).expect("state"),
            AuthorizationState::WaitCode
        );
    }

    #[test]
    fn uncorrelated_objects_are_unsolicited() {
        let event = IncomingEvent::decode(json!({"@type": "updateNewMessage", "message": {}}))
            .expect("update decodes");
        assert_eq!(event.correlation_id(), None);
        assert_eq!(event.event_type(), "updateNewMessage");

        let bare_ok = IncomingEvent::decode(json!({"@type": "ok"})).expect("ok decodes");
        assert!(matches!(bare_ok, IncomingEvent::UnsolicitedEvent { .. }));
    }

    #[test]
    fn rejects_non_object_events() {
        let err = IncomingEvent::decode(json!([1, 2])).expect_err("arrays are malformed");
        assert_eq!(err.code, "malformed_event");
    }

    #[test]
    fn query_reply_is_the_state_object() {
        let state = authorization_state_of(&json!({
            "@type": "authorizationStateReady",
            "@extra": {"request_id": "getAuthorizationState"}
        }))
        .expect("state");
        assert_eq!(state, AuthorizationState::Ready);

        let err = authorization_state_of(&json!({"@type": "ok"})).expect_err("ok is no state");
        assert_eq!(err.code, "unknown_authorization_state");
    }
}
