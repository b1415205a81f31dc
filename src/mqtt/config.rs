use rumqttc::QoS;
use serde::Serialize;
use std::time::Duration;

use crate::config::reader::SectionReader;
use crate::config::{ConfigError, ConfigSection};

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub use_clean_session: bool,
    pub keep_alive_secs: u64,
    pub use_ssl: bool,
    pub username: String,
    pub password: String,
    pub ca_file_path: String,
    pub client_cert_file_path: String,
    pub private_key_file_path: String,
    /// Upper bound for the first CONNACK.
    pub connect_timeout_secs: u64,
    /// Pause between a dropped transport and the next reconnect attempt.
    pub reconnect_delay_ms: u64,
    pub subscribe_qos: u8,
    pub publish_qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            client_id: "panel-bridge".to_string(),
            use_clean_session: true,
            keep_alive_secs: 60,
            use_ssl: false,
            username: String::new(),
            password: String::new(),
            ca_file_path: String::new(),
            client_cert_file_path: String::new(),
            private_key_file_path: String::new(),
            connect_timeout_secs: 30,
            reconnect_delay_ms: 5000,
            subscribe_qos: 0,
            publish_qos: 1,
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn subscribe_qos(&self) -> QoS {
        qos_from_level(self.subscribe_qos)
    }

    pub fn publish_qos(&self) -> QoS {
        qos_from_level(self.publish_qos)
    }
}

impl ConfigSection for MqttConfig {
    const NAME: &'static str = "mqtt";

    fn read(&mut self, reader: &mut SectionReader<'_>) -> Result<(), ConfigError> {
        reader.string("host", &mut self.host)?;
        reader.unsigned("port", &mut self.port)?;
        reader.string("client_id", &mut self.client_id)?;
        reader.boolean("use_clean_session", &mut self.use_clean_session)?;
        reader.unsigned("keep_alive_secs", &mut self.keep_alive_secs)?;
        reader.boolean("use_ssl", &mut self.use_ssl)?;
        reader.string("username", &mut self.username)?;
        reader.string("password", &mut self.password)?;
        reader.string("ca_file_path", &mut self.ca_file_path)?;
        reader.string("client_cert_file_path", &mut self.client_cert_file_path)?;
        reader.string("private_key_file_path", &mut self.private_key_file_path)?;
        reader.unsigned("connect_timeout_secs", &mut self.connect_timeout_secs)?;
        reader.unsigned("reconnect_delay_ms", &mut self.reconnect_delay_ms)?;
        reader.unsigned("subscribe_qos", &mut self.subscribe_qos)?;
        reader.unsigned("publish_qos", &mut self.publish_qos)?;

        for (key, level) in [
            ("subscribe_qos", self.subscribe_qos),
            ("publish_qos", self.publish_qos),
        ] {
            if level > 2 {
                return Err(ConfigError::InvalidValue {
                    section: reader.section().to_string(),
                    key: key.to_string(),
                    reason: format!("QoS level {level} does not exist"),
                });
            }
        }
        Ok(())
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn qos_levels_map_onto_rumqttc() {
        let config = MqttConfig::default();
        assert_eq!(config.subscribe_qos(), QoS::AtMostOnce);
        assert_eq!(config.publish_qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn unknown_qos_level_is_rejected() {
        let fields = match json!({ "publish_qos": 3 }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut reader = SectionReader::new("mqtt", &fields);
        let mut config = MqttConfig::default();

        assert!(matches!(
            config.read(&mut reader),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
