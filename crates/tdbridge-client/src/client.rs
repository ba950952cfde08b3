use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use signal_hook::{consts::signal, flag, low_level};
use tdbridge_core::{
    AuthStateChannel, AuthStateStream, AuthorizationState, AuthorizationStateMachine, ClientError,
    Command, NEW_MESSAGE_UPDATE, PendingResult, UpdateHandler, WorkerPool,
};
use tdbridge_platform::{SecretPrompt, StdinPrompt};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ClientConfig, Identity},
    delivery::{DeliveryLoop, Router},
    engine::Engine,
};

const IDLE_POLL: Duration = Duration::from_millis(100);

#[cfg(unix)]
const STOP_SIGNALS: &[i32] = &[signal::SIGINT, signal::SIGTERM, signal::SIGQUIT];
#[cfg(not(unix))]
const STOP_SIGNALS: &[i32] = &[signal::SIGINT, signal::SIGTERM];

struct Runtime {
    delivery: JoinHandle<()>,
    workers: WorkerPool,
}

/// Synchronous facade over an event-driven engine.
///
/// Owns one delivery thread and a dispatch worker pool for its whole life.
/// Every method may be called from any thread; handshake operations are
/// serialized so only one authorization command is in flight at a time.
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) identity: Identity,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) router: Arc<Router>,
    pub(crate) handshake: Mutex<()>,
    pub(crate) auth: Mutex<AuthorizationStateMachine>,
    pub(crate) auth_channel: AuthStateChannel,
    pub(crate) prompt: Arc<dyn SecretPrompt>,
    pub(crate) proxy_sent: AtomicBool,
    stopped: AtomicBool,
    stop_token: CancellationToken,
    runtime: Mutex<Option<Runtime>>,
}

impl Client {
    /// Build a client that prompts on stdin during a blocking login.
    pub fn new<E: Engine>(config: ClientConfig, engine: E) -> Result<Self, ClientError> {
        Self::with_prompt(config, engine, StdinPrompt)
    }

    /// Build a client with an explicit secret prompt.
    ///
    /// Fails with a `Config` error before any thread starts or command is
    /// sent when neither a phone number nor a bot token is configured.
    pub fn with_prompt<E, P>(config: ClientConfig, engine: E, prompt: P) -> Result<Self, ClientError>
    where
        E: Engine,
        P: SecretPrompt + 'static,
    {
        let identity = config.identity()?;
        let engine: Arc<dyn Engine> = Arc::new(engine);
        let router = Arc::new(Router::new(config.queue_capacity, config.queue_put_timeout));
        let stop_token = CancellationToken::new();

        let workers = WorkerPool::spawn(router.dispatcher().queue(), config.workers)?;
        let delivery = DeliveryLoop::new(
            Arc::clone(&engine),
            Arc::clone(&router),
            stop_token.clone(),
            config.receive_timeout,
        )
        .spawn()?;

        tracing::info!(
            identity = identity.kind(),
            workers = workers.len(),
            queue_capacity = config.queue_capacity,
            "client started"
        );

        Ok(Self {
            config,
            identity,
            engine,
            router,
            handshake: Mutex::new(()),
            auth: Mutex::new(AuthorizationStateMachine::default()),
            auth_channel: AuthStateChannel::default(),
            prompt: Arc::new(prompt),
            proxy_sent: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_token,
            runtime: Mutex::new(Some(Runtime { delivery, workers })),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Last authorization state the engine confirmed.
    pub fn authorization_state(&self) -> AuthorizationState {
        self.auth.lock().state()
    }

    /// Receive every authorization state committed from now on.
    pub fn subscribe_auth_state(&self) -> AuthStateStream {
        self.auth_channel.subscribe()
    }

    /// Send `command` under a generated id (or the id given in its `@extra`).
    pub fn send(&self, command: Command) -> Result<PendingResult, ClientError> {
        self.ensure_running()?;
        let (pending, payload) = self.router.registry().register(command);
        self.transmit(&pending, &payload)?;
        Ok(pending)
    }

    /// Send `command` under a caller-chosen correlation id.
    pub fn send_with_id(&self, command: Command, request_id: &str) -> Result<PendingResult, ClientError> {
        self.ensure_running()?;
        let (pending, payload) = self.router.registry().register_with_id(command, request_id);
        self.transmit(&pending, &payload)?;
        Ok(pending)
    }

    /// Call an arbitrary engine method; `params` must be an object or null.
    pub fn call_method(&self, method: &str, params: Value) -> Result<PendingResult, ClientError> {
        self.send(Command::with_params(method, params))
    }

    /// Call a method and wait for its result; `None` waits without a deadline.
    ///
    /// A timed-out request stays registered; the late reply is absorbed.
    pub fn call_method_blocking(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        self.call_method(method, params)?.wait_ok(timeout)
    }

    /// Forget a request the caller stopped waiting for.
    ///
    /// A reply arriving afterwards falls through to update dispatch.
    pub fn abandon(&self, pending: &PendingResult) -> bool {
        let removed = self.router.registry().purge(pending.id()).is_some();
        if removed {
            tracing::debug!(request_id = pending.id(), "abandoned pending result");
        }
        removed
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.router.registry().len()
    }

    /// Bind `handler` to unsolicited events of `event_type`; `false` if already bound.
    pub fn add_update_handler(&self, event_type: &str, handler: UpdateHandler) -> bool {
        self.router.dispatcher().handlers().register(event_type, handler)
    }

    /// Unbind `handler`; unknown types and handlers are ignored.
    pub fn remove_update_handler(&self, event_type: &str, handler: &UpdateHandler) -> bool {
        self.router.dispatcher().handlers().unregister(event_type, handler)
    }

    /// Bind `handler` to `updateNewMessage`.
    pub fn add_message_handler(&self, handler: UpdateHandler) -> bool {
        self.add_update_handler(NEW_MESSAGE_UPDATE, handler)
    }

    /// Close the engine session and stop every thread.
    ///
    /// Runs the best-effort close sequence, then joins the delivery thread and
    /// lets the workers drain the queue. Later calls are no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping client");
        self.close_session();
        self.shutdown_threads();
        tracing::info!("client stopped");
    }

    /// Block until the client is stopped or a termination signal arrives.
    ///
    /// A received signal stops the client before returning. Handlers are
    /// unregistered on return, so the default signal behavior comes back.
    pub fn idle(&self) -> Result<(), ClientError> {
        let received = Arc::new(AtomicBool::new(false));
        let mut ids = Vec::with_capacity(STOP_SIGNALS.len());
        for &sig in STOP_SIGNALS {
            match flag::register(sig, Arc::clone(&received)) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    for id in ids {
                        low_level::unregister(id);
                    }
                    return Err(ClientError::internal(
                        "signal_registration_failed",
                        format!("cannot watch signal {sig}: {err}"),
                    ));
                }
            }
        }

        tracing::debug!("idling until stop or signal");
        while !self.is_stopped() && !received.load(Ordering::SeqCst) {
            thread::sleep(IDLE_POLL);
        }
        for id in ids {
            low_level::unregister(id);
        }

        if received.load(Ordering::SeqCst) {
            tracing::info!("termination signal received");
            self.stop();
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    pub(crate) fn ensure_running(&self) -> Result<(), ClientError> {
        if self.stop_token.is_cancelled() {
            return Err(ClientError::internal(
                "client_stopped",
                "client has been stopped; no further requests are accepted",
            ));
        }
        Ok(())
    }

    fn transmit(&self, pending: &PendingResult, payload: &Value) -> Result<(), ClientError> {
        if let Err(err) = self.engine.send(payload) {
            self.router.registry().purge(pending.id());
            tracing::warn!(request_id = pending.id(), error = %err, "engine send failed");
            return Err(err);
        }
        Ok(())
    }

    fn shutdown_threads(&self) {
        self.stop_token.cancel();
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        if runtime.delivery.join().is_err() {
            tracing::error!("delivery thread terminated abnormally");
        }
        runtime.workers.shutdown();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown_threads();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("identity", &self.identity)
            .field("authorization_state", &self.authorization_state())
            .field("pending", &self.pending_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
