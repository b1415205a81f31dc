use rumqttc::QoS;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::debounce::InputChange;
use crate::mqtt::engine::{EngineError, MqttEngine};
use crate::mqtt::message_manager::OutboundMessage;
use crate::time_sync::rtc::format_iso8601;

pub const TOPIC_ROOT: &str = "inputs";
pub const ATTRIBUTE_IS_PRESSED: &str = "isPressed";
pub const ATTRIBUTE_LAST_CHANGED_AT: &str = "lastChangedAt";

/// The two publishes describing one change, in publish order.
pub fn change_messages(change: &InputChange) -> [OutboundMessage; 2] {
    let pressed = if change.is_pressed() { "True" } else { "False" };
    [
        OutboundMessage::from_topic(
            format!("{}/{}/{}", TOPIC_ROOT, change.topic_id, ATTRIBUTE_IS_PRESSED),
            pressed,
        ),
        OutboundMessage::from_topic(
            format!("{}/{}/{}", TOPIC_ROOT, change.topic_id, ATTRIBUTE_LAST_CHANGED_AT),
            format_iso8601(change.changed_at),
        ),
    ]
}

/// Publishes accepted input changes.
pub struct ChangePublisher {
    engine: Arc<dyn MqttEngine>,
    qos: QoS,
}

impl ChangePublisher {
    pub fn new(engine: Arc<dyn MqttEngine>, qos: QoS) -> Self {
        Self { engine, qos }
    }

    pub async fn publish_change(&self, change: &InputChange) -> Result<(), EngineError> {
        for message in change_messages(change) {
            info!("Publishing topic={}, value={} ...", message.topic, message.payload);
            self.engine
                .publish(&message.topic, message.payload.into_bytes(), self.qos, false)
                .await?;
        }
        Ok(())
    }

    pub async fn run(self, mut changes: mpsc::Receiver<InputChange>, token: CancellationToken) {
        loop {
            let change = tokio::select! {
                _ = token.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => change,
                    None => break,
                },
            };
            if let Err(e) = self.publish_change(&change).await {
                error!("Failed to publish change of '{}': {}", change.name, e);
            }
        }
        debug!("Change publisher stopped");
    }
}
