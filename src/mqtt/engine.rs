//! Adapter around the `rumqttc` protocol engine.
//!
//! The engine is split the way rumqttc splits it: [`MqttEngine`] is the
//! request side (subscribe, publish, disconnect), [`EventSource`] is the event
//! loop that must be polled to make progress and to (re)connect.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

use super::config::MqttConfig;
use super::message_manager::InboundMessage;

const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("MQTT request queue is full")]
    QueueFull,

    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Failed to read TLS file '{path}': {source}")]
    TlsFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Failures that go away once the event loop has drained its queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::QueueFull)
    }
}

/// Request side of the protocol engine.
///
/// `subscribe`, `unsubscribe` and `disconnect` are called from the task that
/// polls the event loop and therefore never wait for queue space.
#[async_trait]
pub trait MqttEngine: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), EngineError>;
    async fn unsubscribe(&self, filter: &str) -> Result<(), EngineError>;
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError>;
    async fn disconnect(&self) -> Result<(), EngineError>;
    fn is_connected(&self) -> bool;
}

/// What the connection driver needs to know about one engine poll.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Connected,
    Message(InboundMessage),
    Disconnected,
    Other,
}

/// Event side of the protocol engine.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<EngineEvent, EngineError>;
}

pub struct RumqttEngine {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

pub struct RumqttEvents {
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
}

/// Builds the client pair. Nothing connects until the event side is polled.
pub fn create(config: &MqttConfig) -> Result<(RumqttEngine, RumqttEvents), EngineError> {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options
        .set_keep_alive(std::time::Duration::from_secs(config.keep_alive_secs))
        .set_clean_session(config.use_clean_session);

    if !config.username.is_empty() {
        options.set_credentials(config.username.clone(), config.password.clone());
    }
    if config.use_ssl {
        options.set_transport(tls_transport(config)?);
    }

    info!(
        "Creating MQTT client '{}' for {}:{} (tls: {})",
        config.client_id, config.host, config.port, config.use_ssl
    );
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
    let connected = Arc::new(AtomicBool::new(false));

    Ok((
        RumqttEngine {
            client,
            connected: connected.clone(),
        },
        RumqttEvents {
            eventloop,
            connected,
        },
    ))
}

fn read_tls_file(path: &str) -> Result<Vec<u8>, EngineError> {
    std::fs::read(path).map_err(|source| EngineError::TlsFile {
        path: path.to_string(),
        source,
    })
}

fn tls_transport(config: &MqttConfig) -> Result<Transport, EngineError> {
    if config.ca_file_path.is_empty() {
        return Ok(Transport::tls_with_default_config());
    }

    let ca = read_tls_file(&config.ca_file_path)?;
    let client_auth =
        if config.client_cert_file_path.is_empty() || config.private_key_file_path.is_empty() {
            None
        } else {
            Some((
                read_tls_file(&config.client_cert_file_path)?,
                read_tls_file(&config.private_key_file_path)?,
            ))
        };

    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

fn queue_error(e: rumqttc::ClientError) -> EngineError {
    match e {
        rumqttc::ClientError::TryRequest(_) => EngineError::QueueFull,
        other => EngineError::Client(other),
    }
}

#[async_trait]
impl MqttEngine for RumqttEngine {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        self.client.try_subscribe(filter, qos).map_err(queue_error)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::NotConnected);
        }
        self.client.try_unsubscribe(filter).map_err(queue_error)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EngineError> {
        // Queued by the event loop and delivered once connected.
        self.client.publish(topic, qos, retain, payload).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        self.client.try_disconnect().map_err(queue_error)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for RumqttEvents {
    async fn next_event(&mut self) -> Result<EngineEvent, EngineError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("CONNACK received: {:?}", ack.code);
                self.connected.store(true, Ordering::SeqCst);
                Ok(EngineEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(EngineEvent::Message(
                InboundMessage::new(publish.topic, publish.payload.to_vec(), publish.retain),
            )),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                self.connected.store(false, Ordering::SeqCst);
                Ok(EngineEvent::Disconnected)
            }
            Ok(event) => {
                trace!("MQTT event: {:?}", event);
                Ok(EngineEvent::Other)
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(EngineError::Connection(e))
            }
        }
    }
}
