//! # MQTT Integration Module
//!
//! Connects the panel to exactly one broker. The wire protocol, keep-alive and
//! reconnect mechanics belong to `rumqttc`; this module decides what to
//! subscribe, where inbound messages go and what happens when the transport
//! drops.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and defaults
//! ├── engine.rs           - rumqttc adapter (request side + event side)
//! ├── message_manager.rs  - Inbound and outbound message representation
//! ├── mqtt_handler.rs     - Connection driver and lifecycle hooks
//! ├── router.rs           - Topic router with per-pattern handlers
//! └── topic_pattern.rs    - `+` / `#` segment matcher
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! EventLoop ─► MqttHandler ─► TopicRouter ─► TopicHandler (e.g. LED mirror)
//!
//! Debouncer ─► ChangePublisher ─► MqttEngine::publish (QoS 1)
//! ```
//!
//! Subscriptions are re-issued from the connection-established hook on every
//! CONNACK, before the device reports itself as connected. A clean session
//! forgets subscriptions, so there is no window where the device is connected
//! but deaf.

pub mod config;
pub mod engine;
pub mod message_manager;
pub mod mqtt_handler;
pub mod router;
pub mod topic_pattern;
