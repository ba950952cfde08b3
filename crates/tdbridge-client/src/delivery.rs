//! The single thread that observes engine output.
//!
//! Each received object is decoded once and handed to exactly one of the
//! result registry or the dispatcher.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde_json::Value;
use tdbridge_core::{ClientError, Dispatcher, IncomingEvent, ResultRegistry, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;

const DELIVERY_THREAD_NAME: &str = "tdbridge-delivery";
const BACKOFF_SLICE: Duration = Duration::from_millis(25);

/// Where a received object ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Consumed by a pending result.
    Correlated,
    /// Queued for this many handler jobs (possibly zero).
    Dispatched(usize),
    /// Not a JSON object; logged and discarded.
    Dropped,
}

/// Correlation map plus handler dispatch, shared by the client and the delivery thread.
#[derive(Debug)]
pub(crate) struct Router {
    registry: ResultRegistry,
    dispatcher: Dispatcher,
}

impl Router {
    pub(crate) fn new(queue_capacity: usize, put_timeout: Duration) -> Self {
        Self {
            registry: ResultRegistry::new(),
            dispatcher: Dispatcher::new(queue_capacity, put_timeout),
        }
    }

    pub(crate) fn registry(&self) -> &ResultRegistry {
        &self.registry
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Route one raw engine object.
    pub(crate) fn route(&self, raw: Value) -> Routed {
        let event = match IncomingEvent::decode(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed engine event");
                return Routed::Dropped;
            }
        };

        if self.registry.route(&event) {
            return Routed::Correlated;
        }

        let event_type = event.event_type().to_owned();
        tracing::debug!(event_type = %event_type, "dispatching unsolicited event");
        Routed::Dispatched(self.dispatcher.dispatch(&event_type, event.into_payload()))
    }
}

/// Polls the engine until cancelled, backing off after receive failures.
pub(crate) struct DeliveryLoop {
    engine: Arc<dyn Engine>,
    router: Arc<Router>,
    stop: CancellationToken,
    poll: Duration,
    retry: RetryPolicy,
}

impl DeliveryLoop {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        router: Arc<Router>,
        stop: CancellationToken,
        poll: Duration,
    ) -> Self {
        Self {
            engine,
            router,
            stop,
            poll,
            retry: RetryPolicy::default(),
        }
    }

    pub(crate) fn spawn(self) -> Result<JoinHandle<()>, ClientError> {
        thread::Builder::new()
            .name(DELIVERY_THREAD_NAME.to_owned())
            .spawn(move || self.run())
            .map_err(|err| ClientError::internal("delivery_spawn_failed", err.to_string()))
    }

    fn run(self) {
        tracing::info!(poll_ms = self.poll.as_millis() as u64, "delivery loop started");
        let mut attempt: u32 = 0;

        while !self.stop.is_cancelled() {
            match self.engine.receive(self.poll) {
                Ok(Some(raw)) => {
                    attempt = 0;
                    if let Routed::Dispatched(jobs) = self.router.route(raw) {
                        tracing::trace!(jobs, "unsolicited event queued");
                    }
                }
                Ok(None) => attempt = 0,
                Err(err) => {
                    let hint = err.retry_after_ms.map(Duration::from_millis);
                    let delay = self.retry.delay_for_attempt(attempt, hint);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "engine receive failed; backing off"
                    );
                    self.sleep_unless_cancelled(delay);
                }
            }
        }

        tracing::info!("delivery loop stopped");
    }

    fn sleep_unless_cancelled(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.stop.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(BACKOFF_SLICE.min(deadline - now));
        }
    }
}
