//! Broker connection driver.
//!
//! Polls the engine's event source for the lifetime of the process, hands
//! inbound publishes to the [`TopicRouter`] one at a time and reports
//! connection changes through [`ConnectionHooks`].
//!
//! ```text
//! CONNACK ──► hooks.on_connection_established(router)   (re-subscribe)
//!         ├─► ok: hooks.on_connection_state_changed(true)
//!         │       first connect? signal the orchestrator
//!         └─► failed: retry later, keep polling; fatal on the first connect
//!                     unless the request queue was merely full
//! PUBLISH ──► router.dispatch(message)
//! error   ──► first connect? fatal, stop
//!         ──► hooks.on_connection_state_changed(false), wait, poll again
//! cancel  ──► DISCONNECT, drop the event loop
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{EngineError, EngineEvent, EventSource, MqttEngine};
use super::router::{RouterError, TopicRouter};

const SHUTDOWN_FLUSH: Duration = Duration::from_secs(1);
/// Wait before re-issuing subscriptions that did not fit the request queue.
const SUBSCRIBE_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Broker connection failed: {0}")]
    Connect(#[from] EngineError),

    #[error("Subscriptions could not be issued: {0}")]
    Subscribe(#[from] RouterError),
}

/// Callbacks of the connection lifecycle.
#[async_trait]
pub trait ConnectionHooks: Send + Sync {
    /// Runs once per successful connect, before the device counts as connected.
    async fn on_connection_established(&self, router: &mut TopicRouter) -> Result<(), RouterError>;

    async fn on_connection_state_changed(&self, connected: bool);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MqttStatus {
    pub connects: usize,
    pub messages_received: usize,
    pub messages_unrouted: usize,
    pub handler_failures: usize,
    pub transport_errors: usize,
    pub subscribe_retries: usize,
}

enum Establish {
    Online,
    RetryAfter(Duration),
    Fatal,
}

pub struct MqttHandler<E: EventSource> {
    events: E,
    engine: Arc<dyn MqttEngine>,
    router: TopicRouter,
    hooks: Arc<dyn ConnectionHooks>,
    reconnect_delay: Duration,
    status: MqttStatus,
}

impl<E: EventSource + 'static> MqttHandler<E> {
    pub fn new(
        events: E,
        engine: Arc<dyn MqttEngine>,
        router: TopicRouter,
        hooks: Arc<dyn ConnectionHooks>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            events,
            engine,
            router,
            hooks,
            reconnect_delay,
            status: MqttStatus::default(),
        }
    }

    /// Drives the connection until cancelled or until the first connect fails.
    ///
    /// The outcome of the first connect is sent on `first_connect`.
    pub async fn run(
        mut self,
        token: CancellationToken,
        first_connect: oneshot::Sender<Result<(), SessionError>>,
    ) -> MqttStatus {
        let mut first_connect = Some(first_connect);
        let mut online = false;
        // Set while a CONNACK has not been followed by working subscriptions.
        let mut establish_at: Option<Instant> = None;

        loop {
            let deadline = establish_at;
            let retry = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let event = tokio::select! {
                _ = token.cancelled() => break,
                _ = retry => None,
                event = self.events.next_event() => Some(event),
            };

            let Some(event) = event else {
                establish_at = None;
                self.status.subscribe_retries += 1;
                debug!("Retrying subscriptions");
                match self.establish(&mut first_connect).await {
                    Establish::Online => online = true,
                    Establish::RetryAfter(delay) => establish_at = Some(Instant::now() + delay),
                    Establish::Fatal => break,
                }
                continue;
            };

            match event {
                Ok(EngineEvent::Connected) => {
                    self.status.connects += 1;
                    info!("Connected to MQTT broker (connect #{})", self.status.connects);
                    establish_at = None;
                    match self.establish(&mut first_connect).await {
                        Establish::Online => online = true,
                        Establish::RetryAfter(delay) => establish_at = Some(Instant::now() + delay),
                        Establish::Fatal => break,
                    }
                }
                Ok(EngineEvent::Message(message)) => {
                    self.status.messages_received += 1;
                    debug!("Received {}", message);
                    let report = self.router.dispatch(&message).await;
                    if report.is_unrouted() {
                        self.status.messages_unrouted += 1;
                    } else {
                        self.status.handler_failures += report.failures.len();
                    }
                }
                Ok(EngineEvent::Disconnected) => {
                    warn!("Broker closed the connection");
                    establish_at = None;
                    if online {
                        online = false;
                        self.hooks.on_connection_state_changed(false).await;
                    }
                }
                Ok(EngineEvent::Other) => {}
                Err(e) => {
                    if let Some(tx) = first_connect.take() {
                        error!("Initial connection to MQTT broker failed: {}", e);
                        let _ = tx.send(Err(e.into()));
                        break;
                    }

                    self.status.transport_errors += 1;
                    warn!("MQTT connection error: {}", e);
                    establish_at = None;
                    if online {
                        online = false;
                        self.hooks.on_connection_state_changed(false).await;
                    }

                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {
                            debug!("Reconnecting to MQTT broker");
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        self.status
    }

    /// Issues the subscriptions of a fresh connection and reports it as up.
    ///
    /// The device only counts as connected once every subscription went out.
    async fn establish(
        &mut self,
        first_connect: &mut Option<oneshot::Sender<Result<(), SessionError>>>,
    ) -> Establish {
        match self.hooks.on_connection_established(&mut self.router).await {
            Ok(()) => {
                self.hooks.on_connection_state_changed(true).await;
                if let Some(tx) = first_connect.take() {
                    let _ = tx.send(Ok(()));
                }
                Establish::Online
            }
            Err(e) if e.is_retryable() => {
                warn!("Subscriptions deferred: {}", e);
                Establish::RetryAfter(SUBSCRIBE_RETRY)
            }
            Err(e) => {
                error!("Connection-established handler failed: {}", e);
                if let Some(tx) = first_connect.take() {
                    let _ = tx.send(Err(e.into()));
                    return Establish::Fatal;
                }
                Establish::RetryAfter(self.reconnect_delay)
            }
        }
    }

    async fn shutdown(&mut self) {
        if !self.engine.is_connected() {
            debug!("MQTT driver stopped without an open connection");
            return;
        }

        info!("Disconnecting from MQTT broker");
        if let Err(e) = self.engine.disconnect().await {
            warn!("Failed to queue DISCONNECT: {}", e);
            return;
        }
        // Poll until the DISCONNECT went out and the engine closed the socket.
        let flush = async {
            while let Ok(event) = self.events.next_event().await {
                debug!("Flushing MQTT event {:?}", event);
            }
        };
        if tokio::time::timeout(SHUTDOWN_FLUSH, flush).await.is_err() {
            warn!("MQTT disconnect did not complete in time");
        }
        info!(
            "MQTT driver stopped: {} messages, {} unrouted, {} handler failures",
            self.status.messages_received, self.status.messages_unrouted, self.status.handler_failures
        );
    }
}
