use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    envelope::IncomingEvent,
    pending::PendingResult,
    types::{Command, HANDSHAKE_REQUEST_ID},
};

/// Correlation-id to pending-result map shared by callers and the delivery thread.
#[derive(Debug, Default)]
pub struct ResultRegistry {
    pending: Mutex<HashMap<String, PendingResult>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under a fresh id (or the id the caller put in `@extra`).
    ///
    /// Returns the future and the tagged wire object. Callers must register
    /// before transmitting so a fast reply always finds its entry.
    pub fn register(&self, command: Command) -> (PendingResult, Value) {
        let id = command
            .requested_id()
            .map(str::to_owned)
            .unwrap_or_else(generate_request_id);
        self.insert(id, command)
    }

    /// Register `command` under a caller-chosen id, used for the reserved handshake ids.
    pub fn register_with_id(&self, command: Command, id: &str) -> (PendingResult, Value) {
        self.insert(id.to_owned(), command)
    }

    fn insert(&self, id: String, command: Command) -> (PendingResult, Value) {
        let method = command.method().to_owned();
        let payload = command.into_payload(&id);
        let pending = PendingResult::new(id.clone(), payload.clone());

        let mut map = self.pending.lock();
        if let Some(previous) = map.insert(id.clone(), pending.clone())
            && !previous.is_done()
        {
            tracing::warn!(
                request_id = %id,
                method = %method,
                "replaced an unresolved pending result"
            );
        }
        tracing::debug!(
            request_id = %id,
            method = %method,
            pending_len = map.len(),
            "registered pending result"
        );

        (pending, payload)
    }

    /// Feed one decoded event to its pending result.
    ///
    /// Returns `true` when the event was consumed and must not be dispatched.
    /// An acknowledgement for the reserved handshake id is absorbed but keeps
    /// the entry alive for the state-bearing notification that follows.
    pub fn route(&self, event: &IncomingEvent) -> bool {
        let Some(request_id) = event.correlation_id() else {
            return false;
        };

        let mut map = self.pending.lock();
        let Some(pending) = map.get(request_id) else {
            tracing::debug!(request_id, "no pending result for correlated event");
            return false;
        };

        match event {
            IncomingEvent::Ack { .. } if request_id == HANDSHAKE_REQUEST_ID => {
                pending.mark_ack();
                tracing::debug!(request_id, "absorbed handshake acknowledgement");
                return true;
            }
            IncomingEvent::ErrorResult { payload, .. } => {
                pending.fail(payload.clone());
            }
            other => {
                pending.resolve(other.payload().clone());
            }
        }

        map.remove(request_id);
        tracing::debug!(request_id, pending_len = map.len(), "resolved pending result");
        true
    }

    /// Drop an entry whose caller gave up waiting; a late reply then falls through.
    pub fn purge(&self, request_id: &str) -> Option<PendingResult> {
        self.pending.lock().remove(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Sorted ids still waiting for a reply (for diagnostics).
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

/// 32-char lowercase hex correlation id.
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::pending::Outcome;

    fn decode(value: Value) -> IncomingEvent {
        IncomingEvent::decode(value).expect("test event decodes")
    }

    #[test]
    fn generated_ids_are_hex_and_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn register_tags_payload_with_id() {
        let registry = ResultRegistry::new();
        let (pending, payload) = registry.register(Command::new("getMe"));

        assert_eq!(payload["@extra"]["request_id"], pending.id());
        assert_eq!(pending.request(), &payload);
        assert!(registry.contains(pending.id()));
    }

    #[test]
    fn honours_caller_supplied_id() {
        let registry = ResultRegistry::new();
        let command = Command::with_params("getMe", json!({"@extra": {"request_id": "mine"}}));
        let (pending, _) = registry.register(command);
        assert_eq!(pending.id(), "mine");
    }

    #[test]
    fn first_message_resolves_ordinary_ids() {
        let registry = ResultRegistry::new();
        let (pending, _) = registry.register_with_id(Command::new("getMe"), "X");

        let ack = decode(json!({"@type": "ok", "@extra": {"request_id": "X"}}));
        let real = decode(json!({"@type": "user", "id": 1, "@extra": {"request_id": "X"}}));

        assert!(registry.route(&ack));
        assert!(!registry.contains("X"));
        assert_eq!(
            pending.outcome(),
            Some(Outcome::Resolved(ack.payload().clone()))
        );

        assert!(!registry.route(&real), "second message falls through");
        assert_eq!(
            pending.outcome(),
            Some(Outcome::Resolved(ack.payload().clone()))
        );
    }

    #[test]
    fn handshake_id_waits_for_the_state_notification() {
        let registry = ResultRegistry::new();
        let (pending, _) =
            registry.register_with_id(Command::new("setTdlibParameters"), HANDSHAKE_REQUEST_ID);

        let ack = decode(json!({"@type": "ok", "@extra": {"request_id": HANDSHAKE_REQUEST_ID}}));
        assert!(registry.route(&ack));
        assert!(pending.ack_received());
        assert!(!pending.is_done());
        assert!(registry.contains(HANDSHAKE_REQUEST_ID));

        let update = decode(json!({
            "@type": "updateAuthorizationState",
            "authorization_state": {"@type": "authorizationStateWaitEncryptionKey"}
        }));
        assert!(registry.route(&update));
        assert!(registry.is_empty());

        let value = pending.wait_ok(Some(Duration::ZERO)).expect("resolved");
        assert_eq!(
            value["authorization_state"]["@type"],
            "authorizationStateWaitEncryptionKey"
        );
    }

    #[test]
    fn handshake_error_fails_the_step() {
        let registry = ResultRegistry::new();
        let (pending, _) = registry
            .register_with_id(Command::new("checkAuthenticationCode"), HANDSHAKE_REQUEST_ID);

        let err = decode(json!({
            "@type": "error",
            "code": 400,
            "message": "PHONE_CODE_INVALID",
            "@extra": {"request_id": HANDSHAKE_REQUEST_ID}
        }));
        assert!(registry.route(&err));
        assert!(registry.is_empty());
        assert!(matches!(pending.outcome(), Some(Outcome::Failed(_))));
    }

    #[test]
    fn unsolicited_and_unknown_events_fall_through() {
        let registry = ResultRegistry::new();
        registry.register_with_id(Command::new("getMe"), "known");

        assert!(!registry.route(&decode(json!({"@type": "updateNewMessage"}))));
        assert!(!registry.route(&decode(
            json!({"@type": "user", "@extra": {"request_id": "other"}})
        )));
        assert!(!registry.route(&decode(json!({
            "@type": "updateAuthorizationState",
            "authorization_state": {"@type": "authorizationStateReady"}
        }))));
        assert_eq!(registry.pending_ids(), vec!["known".to_owned()]);
    }

    #[test]
    fn purge_removes_abandoned_entry() {
        let registry = ResultRegistry::new();
        let (pending, _) = registry.register(Command::new("getChats"));
        let id = pending.id().to_owned();

        assert!(registry.purge(&id).is_some());
        let late = decode(json!({"@type": "chats", "@extra": {"request_id": id}}));
        assert!(!registry.route(&late));
        assert!(!pending.is_done());
    }
}
