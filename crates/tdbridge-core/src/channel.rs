use tokio::sync::broadcast;

use crate::types::AuthorizationState;

/// Broadcast stream of authorization-state transitions.
pub type AuthStateStream = broadcast::Receiver<AuthorizationState>;

/// Fan-out of committed authorization states to any number of observers.
///
/// Observers may consume asynchronously (`recv().await`) or from a plain
/// thread (`blocking_recv()`).
#[derive(Clone, Debug)]
pub struct AuthStateChannel {
    tx: broadcast::Sender<AuthorizationState>,
}

impl AuthStateChannel {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Subscribe to transitions committed after this call.
    pub fn subscribe(&self) -> AuthStateStream {
        self.tx.subscribe()
    }

    /// Publish a committed state.
    ///
    /// Emission is best-effort; having no subscribers is not an error.
    pub fn emit(&self, state: AuthorizationState) {
        let _ = self.tx.send(state);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AuthStateChannel {
    fn default() -> Self {
        Self::new(32)
    }
}
