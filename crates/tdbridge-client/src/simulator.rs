//! In-process engine that plays the backend side of the login handshake.
//!
//! Replies are queued in the order a real engine emits them: a bare `ok`
//! acknowledgement first, then the `updateAuthorizationState` notification.

use std::{collections::VecDeque, time::Duration};

use parking_lot::{Condvar, Mutex};
use serde_json::{Value, json};
use tdbridge_core::{
    AuthorizationState, ClientError, EXTRA_FIELD, HANDSHAKE_REQUEST_ID, TYPE_FIELD, request_id_of,
};

use crate::engine::Engine;

/// Account the simulated engine authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedAccount {
    pub code: String,
    /// Two-step verification password, if enabled.
    pub password: Option<String>,
    /// New phone numbers must register before the password step.
    pub requires_registration: bool,
}

impl SimulatedAccount {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            password: None,
            requires_registration: false,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn requiring_registration(mut self) -> Self {
        self.requires_registration = true;
        self
    }
}

impl Default for SimulatedAccount {
    fn default() -> Self {
        Self::new("12345")
    }
}

#[derive(Debug)]
struct SimState {
    account: SimulatedAccount,
    auth: AuthorizationState,
    outbox: VecDeque<Value>,
    sent: Vec<Value>,
    fail_receive: usize,
    muted: Vec<String>,
}

/// Scripted engine used by tests and the smoke binary.
#[derive(Debug)]
pub struct SimulatedEngine {
    state: Mutex<SimState>,
    ready: Condvar,
}

impl SimulatedEngine {
    /// Start at `authorizationStateWaitTdlibParameters`, announced unsolicited.
    pub fn new(account: SimulatedAccount) -> Self {
        let mut outbox = VecDeque::new();
        outbox.push_back(auth_update(AuthorizationState::WaitTdlibParameters));
        Self {
            state: Mutex::new(SimState {
                account,
                auth: AuthorizationState::WaitTdlibParameters,
                outbox,
                sent: Vec::new(),
                fail_receive: 0,
                muted: Vec::new(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Every request received so far, verbatim.
    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().sent.clone()
    }

    /// `@type` of every request received so far.
    pub fn sent_methods(&self) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|request| request.get(TYPE_FIELD).and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    }

    /// Queue an arbitrary engine object for delivery.
    pub fn inject(&self, event: Value) {
        self.state.lock().outbox.push_back(event);
        self.ready.notify_all();
    }

    /// Make the next `count` receive calls fail with a transport error.
    pub fn fail_next_receives(&self, count: usize) {
        self.state.lock().fail_receive = count;
    }

    /// Swallow requests of `method` without replying.
    pub fn mute(&self, method: impl Into<String>) {
        self.state.lock().muted.push(method.into());
    }

    pub fn state(&self) -> AuthorizationState {
        self.state.lock().auth
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(SimulatedAccount::default())
    }
}

impl Engine for SimulatedEngine {
    fn send(&self, request: &Value) -> Result<(), ClientError> {
        let method = request
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::transport("request without @type"))?
            .to_owned();

        let mut state = self.state.lock();
        state.sent.push(request.clone());
        if state.muted.iter().any(|muted| *muted == method) {
            tracing::debug!(method = %method, "simulated engine swallowed request");
            return Ok(());
        }

        let replies = respond(&mut state, &method, request);
        state.outbox.extend(replies);
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Value>, ClientError> {
        let mut state = self.state.lock();
        if state.fail_receive > 0 {
            state.fail_receive -= 1;
            return Err(ClientError::transport("simulated receive failure"));
        }
        if state.outbox.is_empty() {
            self.ready.wait_for(&mut state, timeout);
        }
        Ok(state.outbox.pop_front())
    }
}

fn respond(state: &mut SimState, method: &str, request: &Value) -> Vec<Value> {
    use AuthorizationState::*;

    let id = request_id_of(request);
    let reply = |mut body: Value| {
        if let (Some(id), Some(object)) = (id.as_deref(), body.as_object_mut()) {
            object.insert(EXTRA_FIELD.to_owned(), json!({ "request_id": id }));
        }
        body
    };
    let ok = || reply(json!({"@type": "ok"}));
    let error = |code: i64, message: &str| {
        reply(json!({"@type": "error", "code": code, "message": message}))
    };
    let advance = |state: &mut SimState, next: AuthorizationState| {
        state.auth = next;
        vec![ok(), auth_update(next)]
    };
    let after_code = |account: &SimulatedAccount| {
        if account.requires_registration {
            WaitRegistration
        } else if account.password.is_some() {
            WaitPassword
        } else {
            Ready
        }
    };
    let out_of_order = |state: &SimState| {
        vec![error(
            400,
            &format!("request {method} is unexpected in {:?}", state.auth),
        )]
    };

    match method {
        "getAuthorizationState" => {
            let name = state.auth.type_name().unwrap_or("authorizationStateClosed");
            vec![reply(json!({ "@type": name }))]
        }
        "setTdlibParameters" if state.auth == WaitTdlibParameters => {
            advance(state, WaitEncryptionKey)
        }
        "checkDatabaseEncryptionKey" if state.auth == WaitEncryptionKey => {
            advance(state, WaitPhoneNumber)
        }
        "setAuthenticationPhoneNumber" if state.auth == WaitPhoneNumber => {
            advance(state, WaitCode)
        }
        "checkAuthenticationBotToken" if state.auth == WaitPhoneNumber => advance(state, Ready),
        "checkAuthenticationCode" if state.auth == WaitCode => {
            if request.get("code").and_then(Value::as_str) != Some(state.account.code.as_str()) {
                return vec![error(400, "PHONE_CODE_INVALID")];
            }
            let next = after_code(&state.account);
            advance(state, next)
        }
        "registerUser" if state.auth == WaitRegistration => {
            let next = if state.account.password.is_some() {
                WaitPassword
            } else {
                Ready
            };
            advance(state, next)
        }
        "checkAuthenticationPassword" if state.auth == WaitPassword => {
            let given = request.get("password").and_then(Value::as_str);
            if given != state.account.password.as_deref() {
                return vec![error(400, "PASSWORD_HASH_INVALID")];
            }
            advance(state, Ready)
        }
        "setTdlibParameters"
        | "checkDatabaseEncryptionKey"
        | "setAuthenticationPhoneNumber"
        | "checkAuthenticationBotToken"
        | "checkAuthenticationCode"
        | "registerUser"
        | "checkAuthenticationPassword" => out_of_order(state),
        "close" => {
            state.auth = Closed;
            vec![ok(), auth_update(Closing), auth_update(Closed)]
        }
        "addProxy" => vec![reply(json!({
            "@type": "proxy",
            "id": 1,
            "server": request.get("server").cloned().unwrap_or(Value::Null),
            "port": request.get("port").cloned().unwrap_or(Value::Null),
            "is_enabled": true,
            "type": request.get("type").cloned().unwrap_or(Value::Null),
        }))],
        "getMe" if state.auth == Ready => vec![reply(json!({
            "@type": "user",
            "id": 777_000,
            "first_name": "Simulated",
            "usernames": {"@type": "usernames", "active_usernames": ["simulated"]},
        }))],
        "getMe" => vec![error(401, "Unauthorized")],
        _ if id.as_deref() == Some(HANDSHAKE_REQUEST_ID) => out_of_order(state),
        _ => vec![ok()],
    }
}

fn auth_update(state: AuthorizationState) -> Value {
    json!({
        "@type": HANDSHAKE_REQUEST_ID,
        "authorization_state": {
            "@type": state.type_name().unwrap_or("authorizationStateClosed"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(engine: &SimulatedEngine) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(event) = engine.receive(Duration::ZERO).expect("receive") {
            events.push(event);
        }
        events
    }

    #[test]
    fn announces_initial_state_unsolicited() {
        let engine = SimulatedEngine::default();
        let events = drain(&engine);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0]["authorization_state"]["@type"],
            "authorizationStateWaitTdlibParameters"
        );
        assert!(request_id_of(&events[0]).is_none());
    }

    #[test]
    fn handshake_step_emits_ack_then_update() {
        let engine = SimulatedEngine::default();
        drain(&engine);

        engine
            .send(&json!({"@type": "setTdlibParameters", "@extra": {"request_id": HANDSHAKE_REQUEST_ID}}))
            .expect("send");
        let events = drain(&engine);

        assert_eq!(events[0]["@type"], "ok");
        assert_eq!(events[0]["@extra"]["request_id"], HANDSHAKE_REQUEST_ID);
        assert_eq!(
            events[1]["authorization_state"]["@type"],
            "authorizationStateWaitEncryptionKey"
        );
        assert_eq!(engine.state(), AuthorizationState::WaitEncryptionKey);
    }

    #[test]
    fn rejects_wrong_code_without_advancing() {
        let engine = SimulatedEngine::default();
        for method in [
            "setTdlibParameters",
            "checkDatabaseEncryptionKey",
            "setAuthenticationPhoneNumber",
        ] {
            engine.send(&json!({"@type": method})).expect("send");
        }
        drain(&engine);

        engine
            .send(&json!({"@type": "checkAuthenticationCode", "code": "00000", "@extra": {"request_id": "c"}}))
            .expect("send");
        let events = drain(&engine);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["message"], "PHONE_CODE_INVALID");
        assert_eq!(engine.state(), AuthorizationState::WaitCode);
    }

    #[test]
    fn muted_methods_get_no_reply_but_are_recorded() {
        let engine = SimulatedEngine::default();
        drain(&engine);
        engine.mute("getChats");
        engine.send(&json!({"@type": "getChats"})).expect("send");

        assert!(drain(&engine).is_empty());
        assert_eq!(engine.sent_methods(), vec!["getChats".to_owned()]);
    }

    #[test]
    fn scripted_receive_failures() {
        let engine = SimulatedEngine::default();
        engine.fail_next_receives(2);
        assert!(engine.receive(Duration::ZERO).is_err());
        assert!(engine.receive(Duration::ZERO).is_err());
        assert!(engine.receive(Duration::ZERO).expect("recovered").is_some());
    }
}
