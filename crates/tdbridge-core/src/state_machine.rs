use crate::{error::ClientError, types::AuthorizationState};

/// What the login driver must do to leave the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Ask the engine which state it is in.
    QueryState,
    /// Send the engine's initial parameters.
    SendParameters,
    /// Send the database encryption key.
    SendEncryptionKey,
    /// Send the phone number or bot token.
    SendIdentity,
    /// Needs the login code from the user.
    AwaitCode,
    /// Needs first/last name for a new account.
    AwaitRegistration,
    /// Needs the two-step verification password.
    AwaitPassword,
    /// Nothing left to send.
    Done,
}

impl AuthAction {
    /// Whether the action needs a caller-supplied secret.
    pub fn needs_input(self) -> bool {
        matches!(
            self,
            Self::AwaitCode | Self::AwaitRegistration | Self::AwaitPassword
        )
    }
}

/// Forward-only authorization state holder with the state-to-action table.
///
/// Performs no I/O; the client drives it with engine replies.
#[derive(Debug, Clone)]
pub struct AuthorizationStateMachine {
    state: AuthorizationState,
}

impl Default for AuthorizationStateMachine {
    fn default() -> Self {
        Self {
            state: AuthorizationState::Uninitialized,
        }
    }
}

impl AuthorizationStateMachine {
    pub fn state(&self) -> AuthorizationState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == AuthorizationState::Ready
    }

    /// Action bound to the current state.
    pub fn action(&self) -> AuthAction {
        use AuthorizationState::*;

        match self.state {
            Uninitialized => AuthAction::QueryState,
            WaitTdlibParameters => AuthAction::SendParameters,
            WaitEncryptionKey => AuthAction::SendEncryptionKey,
            WaitPhoneNumber => AuthAction::SendIdentity,
            WaitCode => AuthAction::AwaitCode,
            WaitRegistration => AuthAction::AwaitRegistration,
            WaitPassword => AuthAction::AwaitPassword,
            Ready | LoggingOut | Closing | Closed => AuthAction::Done,
        }
    }

    /// Fail with `InvalidState` unless the machine sits at `expected`.
    pub fn require(&self, expected: AuthorizationState, action: &str) -> Result<(), ClientError> {
        if self.state != expected {
            return Err(ClientError::invalid_state(self.state, action));
        }
        Ok(())
    }

    /// Commit the state reported by the engine.
    ///
    /// Repeating the current state is accepted; moving backwards is an
    /// invariant break. Returns whether the state changed.
    pub fn apply(&mut self, next: AuthorizationState) -> Result<bool, ClientError> {
        if next.rank() < self.state.rank() {
            return Err(ClientError::internal(
                "authorization_state_regressed",
                format!(
                    "engine reported {next:?} after {current:?}",
                    current = self.state
                ),
            ));
        }
        let changed = next != self.state;
        self.state = next;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorCategory;

    #[test]
    fn maps_every_state_to_an_action() {
        let mut sm = AuthorizationStateMachine::default();
        assert_eq!(sm.action(), AuthAction::QueryState);

        let expected = [
            (AuthorizationState::WaitTdlibParameters, AuthAction::SendParameters),
            (AuthorizationState::WaitEncryptionKey, AuthAction::SendEncryptionKey),
            (AuthorizationState::WaitPhoneNumber, AuthAction::SendIdentity),
            (AuthorizationState::WaitCode, AuthAction::AwaitCode),
            (AuthorizationState::WaitRegistration, AuthAction::AwaitRegistration),
            (AuthorizationState::WaitPassword, AuthAction::AwaitPassword),
            (AuthorizationState::Ready, AuthAction::Done),
        ];
        for (state, action) in expected {
            sm.apply(state).expect("forward transition");
            assert_eq!(sm.action(), action, "action for {state:?}");
        }
        assert!(sm.is_ready());
    }

    #[test]
    fn bot_flow_may_skip_secret_states() {
        let mut sm = AuthorizationStateMachine::default();
        sm.apply(AuthorizationState::WaitPhoneNumber)
            .expect("skip ahead");
        assert!(sm.apply(AuthorizationState::Ready).expect("to ready"));
    }

    #[test]
    fn rejects_backward_transitions() {
        let mut sm = AuthorizationStateMachine::default();
        sm.apply(AuthorizationState::WaitPassword).expect("forward");

        let err = sm
            .apply(AuthorizationState::WaitCode)
            .expect_err("backwards must fail");
        assert_eq!(err.code, "authorization_state_regressed");
        assert_eq!(sm.state(), AuthorizationState::WaitPassword);
    }

    #[test]
    fn repeating_a_state_is_not_a_change() {
        let mut sm = AuthorizationStateMachine::default();
        sm.apply(AuthorizationState::WaitCode).expect("forward");
        assert!(!sm.apply(AuthorizationState::WaitCode).expect("same state"));
    }

    #[test]
    fn require_rejects_out_of_sequence_secrets() {
        let sm = AuthorizationStateMachine::default();
        let err = sm
            .require(AuthorizationState::WaitCode, "send_code")
            .expect_err("not at wait_code");
        assert_eq!(err.category, ClientErrorCategory::InvalidState);
    }

    #[test]
    fn only_secret_states_need_input() {
        assert!(AuthAction::AwaitPassword.needs_input());
        assert!(!AuthAction::SendIdentity.needs_input());
        assert!(!AuthAction::Done.needs_input());
    }
}
