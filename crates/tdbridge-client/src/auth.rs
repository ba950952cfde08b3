//! Login handshake driver.
//!
//! Every step sends one command under a reserved id and waits for the
//! engine-confirmed state before the next command is chosen.

use std::{sync::atomic::Ordering, thread};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::json;
use tdbridge_core::{
    AUTH_STATE_QUERY_ID, AuthAction, AuthorizationState, ClientError, ClientErrorCategory, Command,
    HANDSHAKE_REQUEST_ID, PROXY_REQUEST_ID, authorization_state_of,
};
use tdbridge_platform::{PromptError, SecretKind};

use crate::{client::Client, config::Identity};

impl Client {
    /// Run the handshake until the engine reports `Ready`.
    ///
    /// With `blocking`, secrets are read from the prompt. Without it the call
    /// returns as soon as a state needs a code, password or registration;
    /// supply it with [`Client::send_code`], [`Client::send_password`] or
    /// [`Client::register_user`] and call `login` again.
    pub fn login(&self, blocking: bool) -> Result<AuthorizationState, ClientError> {
        let _handshake = self.handshake.lock();
        self.ensure_running()?;
        self.register_proxy_once();
        tracing::info!(identity = self.identity.kind(), blocking, "login started");

        loop {
            let state = self.authorization_state();
            if state == AuthorizationState::Ready {
                tracing::info!("login complete");
                return Ok(state);
            }
            if state.is_terminal() {
                return Err(ClientError::invalid_state(state, "login"));
            }
            if state.requires_input() && !blocking {
                tracing::info!(state = ?state, "login waiting for caller input");
                return Ok(state);
            }
            self.advance_locked(blocking)?;
        }
    }

    /// Perform exactly one handshake step.
    ///
    /// Returns the current state unchanged when it needs caller input or the
    /// handshake is already finished.
    pub fn advance(&self) -> Result<AuthorizationState, ClientError> {
        let _handshake = self.handshake.lock();
        self.ensure_running()?;
        self.register_proxy_once();
        self.advance_locked(false)
    }

    /// Submit the login code; valid only in `WaitCode`.
    ///
    /// A rejected code leaves the state unchanged so the caller may retry.
    pub fn send_code(&self, code: &str) -> Result<AuthorizationState, ClientError> {
        let _handshake = self.handshake.lock();
        self.ensure_running()?;
        self.auth
            .lock()
            .require(AuthorizationState::WaitCode, "send_code")?;
        self.exchange(code_command(code), HANDSHAKE_REQUEST_ID)
    }

    /// Submit the two-step verification password; valid only in `WaitPassword`.
    pub fn send_password(&self, password: &str) -> Result<AuthorizationState, ClientError> {
        let _handshake = self.handshake.lock();
        self.ensure_running()?;
        self.auth
            .lock()
            .require(AuthorizationState::WaitPassword, "send_password")?;
        self.exchange(password_command(password), HANDSHAKE_REQUEST_ID)
    }

    /// Sign up a new account; valid only in `WaitRegistration`.
    pub fn register_user(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<AuthorizationState, ClientError> {
        let _handshake = self.handshake.lock();
        self.ensure_running()?;
        self.auth
            .lock()
            .require(AuthorizationState::WaitRegistration, "register_user")?;
        self.exchange(
            register_command(first_name, last_name),
            HANDSHAKE_REQUEST_ID,
        )
    }

    /// Send `close` and poll until the engine reports `Closed`.
    ///
    /// Best effort: failures are logged and the poll gives up after the
    /// configured number of attempts.
    pub(crate) fn close_session(&self) {
        let _handshake = self.handshake.lock();
        let timeout = Some(self.config.auth_step_timeout);

        match self.send(Command::new("close")) {
            Ok(close) => {
                if let Err(err) = close.wait_ok(timeout) {
                    tracing::warn!(error = %err, "close request failed");
                    self.abandon(&close);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not send close request");
                return;
            }
        }

        for attempt in 1..=self.config.close_poll_attempts {
            match self.exchange(Command::new("getAuthorizationState"), AUTH_STATE_QUERY_ID) {
                Ok(AuthorizationState::Closed) => {
                    tracing::info!(attempt, "engine session closed");
                    return;
                }
                Ok(state) => tracing::debug!(attempt, state = ?state, "waiting for engine to close"),
                Err(err) => tracing::debug!(attempt, error = %err, "close poll failed"),
            }
            thread::sleep(self.config.close_poll_interval);
        }

        tracing::warn!(
            attempts = self.config.close_poll_attempts,
            "engine never reported a closed authorization state"
        );
    }

    fn advance_locked(&self, interactive: bool) -> Result<AuthorizationState, ClientError> {
        let (state, action) = {
            let machine = self.auth.lock();
            (machine.state(), machine.action())
        };
        if action == AuthAction::Done || (action.needs_input() && !interactive) {
            return Ok(state);
        }

        let (command, request_id) = self.command_for(action)?;
        tracing::info!(state = ?state, method = command.method(), "advancing authorization");
        self.exchange(command, request_id)
    }

    /// Send one handshake command and commit the state its reply reports.
    fn exchange(
        &self,
        command: Command,
        request_id: &str,
    ) -> Result<AuthorizationState, ClientError> {
        let method = command.method().to_owned();
        let pending = self.send_with_id(command, request_id)?;

        let reply = match pending.wait_ok(Some(self.config.auth_step_timeout)) {
            Ok(reply) => reply,
            Err(err) => {
                if err.is_timeout() {
                    self.abandon(&pending);
                }
                tracing::warn!(method = %method, error = %err, "authorization step failed");
                return Err(err);
            }
        };

        let next = authorization_state_of(&reply)?;
        self.commit(next)
    }

    fn commit(&self, next: AuthorizationState) -> Result<AuthorizationState, ClientError> {
        let changed = self.auth.lock().apply(next)?;
        if changed {
            tracing::info!(state = ?next, "authorization state changed");
            self.auth_channel.emit(next);
        }
        Ok(next)
    }

    fn command_for(&self, action: AuthAction) -> Result<(Command, &'static str), ClientError> {
        let command = match action {
            AuthAction::QueryState => {
                return Ok((Command::new("getAuthorizationState"), AUTH_STATE_QUERY_ID));
            }
            AuthAction::SendParameters => self.parameters_command(),
            AuthAction::SendEncryptionKey => Command::new("checkDatabaseEncryptionKey").param(
                "encryption_key",
                STANDARD.encode(self.config.database_encryption_key.as_bytes()),
            ),
            AuthAction::SendIdentity => match &self.identity {
                Identity::Phone(phone) => Command::new("setAuthenticationPhoneNumber")
                    .param("phone_number", phone.as_str())
                    .param("allow_flash_call", false)
                    .param("is_current_phone_number", true),
                Identity::BotToken(token) => {
                    Command::new("checkAuthenticationBotToken").param("token", token.as_str())
                }
            },
            AuthAction::AwaitCode => code_command(&self.ask(SecretKind::Code)?),
            AuthAction::AwaitRegistration => {
                let first_name = self.ask(SecretKind::FirstName)?;
                let last_name = match self.prompt.prompt(SecretKind::LastName) {
                    Ok(name) => name,
                    Err(PromptError::NoAnswer(_)) => String::new(),
                    Err(err) => return Err(prompt_error(err)),
                };
                register_command(&first_name, &last_name)
            }
            AuthAction::AwaitPassword => password_command(&self.ask(SecretKind::Password)?),
            AuthAction::Done => {
                return Err(ClientError::internal(
                    "no_authorization_action",
                    "handshake is already finished",
                ));
            }
        };
        Ok((command, HANDSHAKE_REQUEST_ID))
    }

    fn parameters_command(&self) -> Command {
        let config = &self.config;
        let root = config.files_directory_for(&self.identity);
        tracing::info!(
            files_directory = %root.display(),
            use_test_dc = config.use_test_dc,
            "sending engine parameters"
        );

        Command::with_params(
            "setTdlibParameters",
            json!({
                "parameters": {
                    "use_test_dc": config.use_test_dc,
                    "api_id": config.api_id,
                    "api_hash": config.api_hash,
                    "device_model": config.device_model,
                    "system_version": config.system_version,
                    "application_version": config.application_version,
                    "system_language_code": config.system_language_code,
                    "database_directory": root.join("database").to_string_lossy(),
                    "files_directory": root.join("files").to_string_lossy(),
                    "use_message_database": config.use_message_database,
                    "use_secret_chats": config.use_secret_chats,
                }
            }),
        )
    }

    fn ask(&self, kind: SecretKind) -> Result<String, ClientError> {
        self.prompt.prompt(kind).map_err(prompt_error)
    }

    /// Fire-and-forget proxy registration, at most once per client.
    fn register_proxy_once(&self) {
        let Some(proxy) = &self.config.proxy else {
            return;
        };
        if self.proxy_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.send_with_id(proxy.add_proxy_command(), PROXY_REQUEST_ID) {
            Ok(_) => tracing::info!(server = %proxy.server, port = proxy.port, "proxy registration sent"),
            Err(err) => tracing::warn!(error = %err, "proxy registration failed"),
        }
    }
}

fn code_command(code: &str) -> Command {
    Command::new("checkAuthenticationCode").param("code", code)
}

fn password_command(password: &str) -> Command {
    Command::new("checkAuthenticationPassword").param("password", password)
}

fn register_command(first_name: &str, last_name: &str) -> Command {
    Command::new("registerUser")
        .param("first_name", first_name)
        .param("last_name", last_name)
}

fn prompt_error(err: PromptError) -> ClientError {
    ClientError::new(ClientErrorCategory::Prompt, "prompt_failed", err.to_string())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tdbridge_core::ClientErrorCategory;
    use tdbridge_platform::ScriptedPrompt;

    use super::*;
    use crate::{
        config::ClientConfig,
        proxy::{ProxyConfig, ProxyKind},
        simulator::{SimulatedAccount, SimulatedEngine},
        testing::test_config,
    };

    const HANDSHAKE_METHODS: [&str; 6] = [
        "getAuthorizationState",
        "setTdlibParameters",
        "checkDatabaseEncryptionKey",
        "setAuthenticationPhoneNumber",
        "checkAuthenticationCode",
        "checkAuthenticationPassword",
    ];

    fn client_with(
        config: ClientConfig,
        account: SimulatedAccount,
        prompt: ScriptedPrompt,
    ) -> (Client, Arc<SimulatedEngine>) {
        let engine = Arc::new(SimulatedEngine::new(account));
        let client = Client::with_prompt(config, Arc::clone(&engine), prompt).expect("client");
        (client, engine)
    }

    fn two_step_account() -> SimulatedAccount {
        SimulatedAccount::new("12345").with_password("hunter2")
    }

    #[test]
    fn blocking_login_prompts_for_secrets() {
        let prompt = ScriptedPrompt::new()
            .with_answer(SecretKind::Code, "12345")
            .with_answer(SecretKind::Password, "hunter2");
        let (client, engine) = client_with(test_config(), two_step_account(), prompt.clone());

        let state = client.login(true).expect("login");

        assert_eq!(state, AuthorizationState::Ready);
        assert_eq!(engine.sent_methods(), HANDSHAKE_METHODS);
        assert_eq!(prompt.remaining(SecretKind::Code), 0);
        assert_eq!(prompt.remaining(SecretKind::Password), 0);
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn step_wise_login_matches_blocking_login() {
        let (client, engine) =
            client_with(test_config(), two_step_account(), ScriptedPrompt::new());

        assert_eq!(client.login(false).expect("first leg"), AuthorizationState::WaitCode);
        assert_eq!(
            client.login(false).expect("still waiting"),
            AuthorizationState::WaitCode
        );
        assert_eq!(
            client.send_code("12345").expect("code"),
            AuthorizationState::WaitPassword
        );
        assert_eq!(client.advance().expect("no-op"), AuthorizationState::WaitPassword);
        assert_eq!(
            client.send_password("hunter2").expect("password"),
            AuthorizationState::Ready
        );
        assert_eq!(client.login(false).expect("done"), AuthorizationState::Ready);

        assert_eq!(engine.sent_methods(), HANDSHAKE_METHODS);
    }

    #[test]
    fn advance_performs_one_step_at_a_time() {
        let (client, engine) =
            client_with(test_config(), SimulatedAccount::default(), ScriptedPrompt::new());

        let mut seen = Vec::new();
        loop {
            let state = client.advance().expect("advance");
            if seen.last() == Some(&state) {
                break;
            }
            seen.push(state);
        }

        assert_eq!(
            seen,
            vec![
                AuthorizationState::WaitTdlibParameters,
                AuthorizationState::WaitEncryptionKey,
                AuthorizationState::WaitPhoneNumber,
                AuthorizationState::WaitCode,
            ]
        );
        assert_eq!(engine.sent_methods(), HANDSHAKE_METHODS[..4]);
    }

    #[test]
    fn bot_login_sends_token() {
        let config = ClientConfig {
            phone: None,
            ..test_config()
        }
        .with_bot_token("123:abc");
        let (client, engine) =
            client_with(config, SimulatedAccount::default(), ScriptedPrompt::new());

        assert_eq!(client.login(false).expect("login"), AuthorizationState::Ready);

        let sent = engine.sent();
        let token = sent
            .iter()
            .find(|request| request["@type"] == "checkAuthenticationBotToken")
            .expect("bot token sent");
        assert_eq!(token["token"], "123:abc");
        assert_eq!(token["@extra"]["request_id"], HANDSHAKE_REQUEST_ID);
        assert!(!engine.sent_methods().contains(&"setAuthenticationPhoneNumber".to_owned()));
    }

    #[test]
    fn parameters_and_key_are_encoded() {
        let (client, engine) =
            client_with(test_config(), SimulatedAccount::default(), ScriptedPrompt::new());
        client.login(false).expect("login");

        let sent = engine.sent();
        let params = &sent[1]["parameters"];
        assert_eq!(sent[1]["@type"], "setTdlibParameters");
        assert_eq!(params["api_id"], 94575);
        assert_eq!(params["database_directory"], "/tmp/tdbridge-test/database");
        assert_eq!(params["files_directory"], "/tmp/tdbridge-test/files");
        assert_eq!(params["use_message_database"], true);

        assert_eq!(sent[2]["encryption_key"], "dGVzdC1rZXk=");
        assert_eq!(sent[0]["@extra"]["request_id"], AUTH_STATE_QUERY_ID);
    }

    #[test]
    fn secret_operations_out_of_order_are_invalid_state() {
        let (client, engine) =
            client_with(test_config(), SimulatedAccount::default(), ScriptedPrompt::new());

        let err = client.send_code("12345").expect_err("not waiting for a code");
        assert_eq!(err.category, ClientErrorCategory::InvalidState);
        assert!(err.is_programming_error());

        client.login(false).expect("reach WaitCode");
        let err = client
            .send_password("hunter2")
            .expect_err("not waiting for a password");
        assert_eq!(err.category, ClientErrorCategory::InvalidState);
        assert!(client.register_user("Ada", "").is_err());

        assert!(!engine.sent_methods().contains(&"checkAuthenticationPassword".to_owned()));
    }

    #[test]
    fn rejected_code_keeps_state_for_retry() {
        let (client, _engine) =
            client_with(test_config(), SimulatedAccount::default(), ScriptedPrompt::new());
        client.login(false).expect("reach WaitCode");

        let err = client.send_code("00000").expect_err("wrong code");
        assert_eq!(err.category, ClientErrorCategory::Backend);
        assert_eq!(err.message, "PHONE_CODE_INVALID");
        assert_eq!(client.authorization_state(), AuthorizationState::WaitCode);

        assert_eq!(
            client.send_code("12345").expect("retry"),
            AuthorizationState::Ready
        );
    }

    #[test]
    fn registration_flow() {
        let account = SimulatedAccount::default().requiring_registration();
        let (client, engine) = client_with(test_config(), account, ScriptedPrompt::new());

        client.login(false).expect("reach WaitCode");
        assert_eq!(
            client.send_code("12345").expect("code"),
            AuthorizationState::WaitRegistration
        );
        assert_eq!(
            client.register_user("Ada", "Lovelace").expect("register"),
            AuthorizationState::Ready
        );

        let sent = engine.sent();
        let register = sent.last().expect("registerUser sent");
        assert_eq!(register["@type"], "registerUser");
        assert_eq!(register["first_name"], "Ada");
        assert_eq!(register["last_name"], "Lovelace");
    }

    #[test]
    fn blocking_registration_tolerates_missing_last_name() {
        let account = SimulatedAccount::default().requiring_registration();
        let prompt = ScriptedPrompt::new()
            .with_answer(SecretKind::Code, "12345")
            .with_answer(SecretKind::FirstName, "Ada");
        let (client, engine) = client_with(test_config(), account, prompt);

        assert_eq!(client.login(true).expect("login"), AuthorizationState::Ready);
        let sent = engine.sent();
        assert_eq!(sent.last().expect("registerUser")["last_name"], "");
    }

    #[test]
    fn failing_prompt_surfaces_prompt_error() {
        let (client, _engine) =
            client_with(test_config(), SimulatedAccount::default(), ScriptedPrompt::new());

        let err = client.login(true).expect_err("no code available");
        assert_eq!(err.category, ClientErrorCategory::Prompt);
        assert_eq!(client.authorization_state(), AuthorizationState::WaitCode);
    }

    #[test]
    fn proxy_is_registered_once() {
        let config = test_config().with_proxy(ProxyConfig::new(
            "127.0.0.1",
            9050,
            ProxyKind::Socks5 {
                username: String::new(),
                password: String::new(),
            },
        ));
        let (client, engine) =
            client_with(config, SimulatedAccount::default(), ScriptedPrompt::new());

        client.login(false).expect("first leg");
        client.login(false).expect("second call");

        let methods = engine.sent_methods();
        assert_eq!(methods[0], "addProxy");
        assert_eq!(methods.iter().filter(|m| *m == "addProxy").count(), 1);
        assert_eq!(engine.sent()[0]["@extra"]["request_id"], PROXY_REQUEST_ID);
    }

    #[test]
    fn subscribers_observe_committed_states() {
        let config = ClientConfig {
            phone: None,
            ..test_config()
        }
        .with_bot_token("123:abc");
        let (client, _engine) =
            client_with(config, SimulatedAccount::default(), ScriptedPrompt::new());
        let mut states = client.subscribe_auth_state();

        client.login(false).expect("login");

        let mut observed = Vec::new();
        while let Ok(state) = states.try_recv() {
            observed.push(state);
        }
        assert_eq!(
            observed,
            vec![
                AuthorizationState::WaitTdlibParameters,
                AuthorizationState::WaitEncryptionKey,
                AuthorizationState::WaitPhoneNumber,
                AuthorizationState::Ready,
            ]
        );
    }

    #[test]
    fn step_timeout_abandons_handshake_entry() {
        let config = ClientConfig {
            auth_step_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let (client, engine) =
            client_with(config, SimulatedAccount::default(), ScriptedPrompt::new());
        engine.mute("setTdlibParameters");

        let err = client.login(false).expect_err("engine never answers");
        assert!(err.is_timeout());
        assert_eq!(client.pending_count(), 0);
        assert_eq!(
            client.authorization_state(),
            AuthorizationState::WaitTdlibParameters
        );
    }

    #[test]
    fn login_after_stop_is_rejected() {
        let (client, _engine) =
            client_with(test_config(), SimulatedAccount::default(), ScriptedPrompt::new());
        client.stop();

        let err = client.login(false).expect_err("stopped");
        assert_eq!(err.code, "client_stopped");
    }
}
