//! # Topic Router
//!
//! Maps broker topics to local handlers. Every subscription owns a compiled
//! [`TopicPattern`]; an inbound message is offered to every pattern and each
//! matching handler runs to completion before the next message is taken.
//!
//! ```text
//! subscribe("inputs/#", h)
//!     ├─ pattern known? ──► unsubscribe at the broker
//!     ├─ compile + store
//!     └─ subscribe at the broker ──► SubscribeFailure when rejected
//!
//! dispatch(topic, payload, retained)
//!     ├─ no match  ──► UnroutedMessage (logged)
//!     └─ per match ──► handler, errors logged, dispatch continues
//! ```

use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::engine::{EngineError, MqttEngine};
use super::message_manager::InboundMessage;
use super::topic_pattern::{PatternError, TopicPattern};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("Subscribe to '{pattern}' failed: {source}")]
    SubscribeFailure {
        pattern: String,
        #[source]
        source: EngineError,
    },

    #[error("No subscription matches topic '{topic}'")]
    UnroutedMessage { topic: String },

    #[error("Handler for '{pattern}' failed on topic '{topic}': {reason}")]
    HandlerFailed {
        pattern: String,
        topic: String,
        reason: String,
    },
}

impl RouterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouterError::SubscribeFailure { source, .. } if source.is_retryable())
    }
}

/// Local consumer of routed messages.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> color_eyre::Result<()>;
}

#[async_trait]
impl<F> TopicHandler for F
where
    F: Fn(&InboundMessage) -> color_eyre::Result<()> + Send + Sync,
{
    async fn handle(&self, message: &InboundMessage) -> color_eyre::Result<()> {
        self(message)
    }
}

struct TopicSubscription {
    pattern: TopicPattern,
    handler: Arc<dyn TopicHandler>,
}

/// Outcome of one dispatch, for callers that care.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub matched: usize,
    pub failures: Vec<RouterError>,
}

impl DispatchReport {
    pub fn is_unrouted(&self) -> bool {
        self.matched == 0
    }
}

pub struct TopicRouter {
    engine: Arc<dyn MqttEngine>,
    subscriptions: BTreeMap<String, TopicSubscription>,
    qos: QoS,
}

impl TopicRouter {
    pub fn new(engine: Arc<dyn MqttEngine>, qos: QoS) -> Self {
        Self {
            engine,
            subscriptions: BTreeMap::new(),
            qos,
        }
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    /// Registers `handler` for `pattern` and subscribes at the broker.
    ///
    /// An existing registration for the same pattern is unsubscribed at the
    /// broker and replaced. The registration is kept even when the broker
    /// rejects the subscribe.
    pub async fn subscribe(
        &mut self,
        pattern: &str,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), RouterError> {
        let compiled = TopicPattern::compile(pattern)?;

        if self.subscriptions.contains_key(pattern) {
            debug!("Replacing subscription for '{}'", pattern);
            if let Err(e) = self.engine.unsubscribe(pattern).await {
                warn!("Unsubscribe of '{}' before re-subscribe failed: {}", pattern, e);
            }
        }

        self.subscriptions.insert(
            pattern.to_string(),
            TopicSubscription {
                pattern: compiled,
                handler,
            },
        );
        self.issue(pattern).await
    }

    async fn issue(&self, pattern: &str) -> Result<(), RouterError> {
        self.engine
            .subscribe(pattern, self.qos)
            .await
            .map_err(|source| {
                error!("Subscribe to '{}' failed: {}", pattern, source);
                RouterError::SubscribeFailure {
                    pattern: pattern.to_string(),
                    source,
                }
            })?;
        info!("Subscribed to '{}'", pattern);
        Ok(())
    }

    /// Offers `message` to every matching handler in turn.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let mut report = DispatchReport::default();

        for subscription in self.subscriptions.values() {
            if !subscription.pattern.matches(&message.topic) {
                continue;
            }
            report.matched += 1;
            debug!("'{}' matched by '{}'", message.topic, subscription.pattern);

            if let Err(e) = subscription.handler.handle(message).await {
                let failure = RouterError::HandlerFailed {
                    pattern: subscription.pattern.to_string(),
                    topic: message.topic.clone(),
                    reason: format!("{:#}", e),
                };
                error!("{}", failure);
                report.failures.push(failure);
            }
        }

        if report.is_unrouted() {
            let unrouted = RouterError::UnroutedMessage {
                topic: message.topic.clone(),
            };
            warn!("{}", unrouted);
            report.failures.push(unrouted);
        }
        report
    }
}
