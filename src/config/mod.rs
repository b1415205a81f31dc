//! # Configuration
//!
//! Loads the device configuration from one or more JSON files, merges them
//! (later files win, key by key) and maps every section onto a typed struct.
//!
//! ```text
//! config/app_settings.json ─┐
//!                           ├─► merged JSON ─► SectionReader per section ─► AppConfig
//! secret/app_secrets.json ──┘                        │
//!                                                    └─► ConfigWarning (unknown keys)
//! ```
//!
//! Missing sections fall back to the built-in defaults. Unknown keys are
//! collected as warnings and logged once logging is up, they never abort the
//! boot. Secrets (anything named like a password) are masked whenever the
//! configuration is rendered for diagnostics.

pub mod reader;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::mqtt::config::MqttConfig;
use reader::SectionReader;

/// Default settings file, relative to the working directory.
pub const APP_SETTINGS_FILE: &str = "config/app_settings.json";
/// Default secrets file (Wi-Fi and broker credentials).
pub const APP_SECRETS_FILE: &str = "secret/app_secrets.json";
/// Colon separated list of configuration files overriding the defaults.
pub const CONFIG_PATH_ENV: &str = "PANEL_BRIDGE_CONFIG";

/// Field name fragments whose values are never rendered.
const SENSITIVE_MARKERS: [&str; 2] = ["password", "pwd"];
/// Fixed-length placeholder for redacted values.
pub const REDACTED: &str = "********";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration root is not a JSON object")]
    NotAnObject,

    #[error("Invalid type for '{section}.{key}': expected {expected}")]
    InvalidType {
        section: String,
        key: String,
        expected: &'static str,
    },

    #[error("Invalid value for '{section}.{key}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },
}

/// Non-fatal findings while loading the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    UnknownSection { section: String },
    UnknownKey { section: String, key: String },
    MissingFile { path: PathBuf },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::UnknownSection { section } => {
                write!(f, "Unknown configuration section '{}'", section)
            }
            ConfigWarning::UnknownKey { section, key } => {
                write!(f, "Unknown setting in section '{}': '{}'", section, key)
            }
            ConfigWarning::MissingFile { path } => {
                write!(f, "Configuration file {} not found, skipping", path.display())
            }
        }
    }
}

/// A configuration section with an explicit reader.
pub trait ConfigSection: Default {
    const NAME: &'static str;

    /// Reads known keys into `self`; anything left over is reported by the caller.
    fn read(&mut self, reader: &mut SectionReader<'_>) -> Result<(), ConfigError>;
}

/// Wireless link settings.
#[derive(Debug, Clone, Serialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
    /// Network interface handed to the link driver.
    pub interface: String,
    /// One-second polls before giving up on association.
    pub max_connect_polls: u32,
    pub check_stability: bool,
    pub stability_checks: u32,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            interface: "wlan0".to_string(),
            max_connect_polls: 60,
            check_stability: false,
            stability_checks: 5,
        }
    }
}

impl ConfigSection for WifiConfig {
    const NAME: &'static str = "wifi";

    fn read(&mut self, reader: &mut SectionReader<'_>) -> Result<(), ConfigError> {
        reader.string("ssid", &mut self.ssid)?;
        reader.string("password", &mut self.password)?;
        reader.string("interface", &mut self.interface)?;
        reader.unsigned("max_connect_polls", &mut self.max_connect_polls)?;
        reader.boolean("check_stability", &mut self.check_stability)?;
        reader.unsigned("stability_checks", &mut self.stability_checks)?;
        Ok(())
    }
}

/// Time server settings and retry budget of the datagram exchange.
#[derive(Debug, Clone, Serialize)]
pub struct NtpConfig {
    pub host: String,
    pub interval_seconds: u64,
    pub send_retries: u32,
    pub receive_retries: u32,
    pub receive_poll_ms: u64,
    pub send_backoff_ms: u64,
}

impl Default for NtpConfig {
    fn default() -> Self {
        Self {
            host: "time.google.com".to_string(),
            interval_seconds: 6 * 3600,
            send_retries: 5,
            receive_retries: 10,
            receive_poll_ms: 10,
            send_backoff_ms: 1000,
        }
    }
}

impl NtpConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl ConfigSection for NtpConfig {
    const NAME: &'static str = "ntp";

    fn read(&mut self, reader: &mut SectionReader<'_>) -> Result<(), ConfigError> {
        reader.string("host", &mut self.host)?;
        reader.unsigned("interval_seconds", &mut self.interval_seconds)?;
        reader.unsigned("send_retries", &mut self.send_retries)?;
        reader.unsigned("receive_retries", &mut self.receive_retries)?;
        reader.unsigned("receive_poll_ms", &mut self.receive_poll_ms)?;
        reader.unsigned("send_backoff_ms", &mut self.send_backoff_ms)?;
        Ok(())
    }
}

/// One physical line of the panel and the topic id it is published under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub name: String,
    pub pin: u8,
    pub topic_id: String,
}

impl LineConfig {
    fn new(name: &str, pin: u8, topic_id: &str) -> Self {
        Self {
            name: name.to_string(),
            pin,
            topic_id: topic_id.to_string(),
        }
    }
}

/// Button and LED wiring.
#[derive(Debug, Clone, Serialize)]
pub struct PanelConfig {
    pub debounce_ms: u64,
    pub inputs: Vec<LineConfig>,
    pub outputs: Vec<LineConfig>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 20,
            inputs: vec![
                LineConfig::new("button_red", 19, "button0"),
                LineConfig::new("button_yellow", 20, "button1"),
                LineConfig::new("button_green", 21, "button2"),
            ],
            outputs: vec![
                LineConfig::new("led_red", 16, "button0"),
                LineConfig::new("led_yellow", 17, "button1"),
                LineConfig::new("led_green", 18, "button2"),
            ],
        }
    }
}

impl PanelConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl ConfigSection for PanelConfig {
    const NAME: &'static str = "panel";

    fn read(&mut self, reader: &mut SectionReader<'_>) -> Result<(), ConfigError> {
        reader.unsigned("debounce_ms", &mut self.debounce_ms)?;
        reader.list("inputs", &mut self.inputs)?;
        reader.list("outputs", &mut self.outputs)?;
        Ok(())
    }
}

/// Status LED backend and refresh interval.
#[derive(Debug, Clone, Serialize)]
pub struct StatusConfig {
    pub poll_interval_ms: u64,
    pub led_sysfs_path: String,
    /// A GPIO pin takes precedence over the sysfs LED.
    pub led_pin: Option<u8>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            led_sysfs_path: "/sys/class/leds/ACT".to_string(),
            led_pin: None,
        }
    }
}

impl ConfigSection for StatusConfig {
    const NAME: &'static str = "status";

    fn read(&mut self, reader: &mut SectionReader<'_>) -> Result<(), ConfigError> {
        reader.unsigned("poll_interval_ms", &mut self.poll_interval_ms)?;
        reader.string("led_sysfs_path", &mut self.led_sysfs_path)?;
        reader.optional_unsigned("led_pin", &mut self.led_pin)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleLoggerConfig {
    pub enabled: bool,
    pub default_log_level: String,
    pub log_levels_for_modules: BTreeMap<String, String>,
}

impl Default for ConsoleLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_log_level: "INFO".to_string(),
            log_levels_for_modules: BTreeMap::new(),
        }
    }
}

/// Accepted for compatibility with existing settings files. Rotation is not
/// supported, an enabled file logger only produces a warning.
#[derive(Debug, Clone, Serialize)]
pub struct FileLoggerConfig {
    pub enabled: bool,
    pub dirname: String,
    pub max_bytes: u64,
    pub backup_count: u32,
    pub default_log_level: String,
    pub log_levels_for_modules: BTreeMap<String, String>,
}

impl Default for FileLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dirname: "log".to_string(),
            max_bytes: 10_000,
            backup_count: 2,
            default_log_level: "WARNING".to_string(),
            log_levels_for_modules: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoggingConfig {
    pub console_logger: ConsoleLoggerConfig,
    pub file_logger: FileLoggerConfig,
}

impl LoggingConfig {
    // Read by `read_logging`, the nested loggers report their own unknown keys.
    pub const NAME: &'static str = "logging";
}

/// The complete, typed device configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AppConfig {
    pub wifi: WifiConfig,
    pub mqtt: MqttConfig,
    pub ntp: NtpConfig,
    pub panel: PanelConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

/// Result of a successful load: the configuration plus everything worth a warning.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub warnings: Vec<ConfigWarning>,
}

const KNOWN_SECTIONS: [&str; 6] = [
    WifiConfig::NAME,
    MqttConfig::NAME,
    NtpConfig::NAME,
    PanelConfig::NAME,
    StatusConfig::NAME,
    LoggingConfig::NAME,
];

impl AppConfig {
    /// Resolves the list of files to load.
    ///
    /// `PANEL_BRIDGE_CONFIG` wins when set. Otherwise the two default files are
    /// used, skipping any that do not exist.
    pub fn resolve_paths() -> (Vec<PathBuf>, Vec<ConfigWarning>) {
        if let Ok(list) = std::env::var(CONFIG_PATH_ENV) {
            let paths = list
                .split(':')
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .collect();
            return (paths, Vec::new());
        }

        let mut paths = Vec::new();
        let mut warnings = Vec::new();
        for candidate in [APP_SETTINGS_FILE, APP_SECRETS_FILE] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                paths.push(path);
            } else {
                warnings.push(ConfigWarning::MissingFile { path });
            }
        }
        (paths, warnings)
    }

    /// Loads and merges the given files in order.
    pub fn load(paths: &[PathBuf]) -> Result<LoadedConfig, ConfigError> {
        let mut merged = Value::Object(serde_json::Map::new());
        for path in paths {
            let document = read_document(path)?;
            merge(&mut merged, document);
        }
        Self::from_value(&merged)
    }

    /// Maps an already parsed JSON document onto the typed configuration.
    pub fn from_value(root: &Value) -> Result<LoadedConfig, ConfigError> {
        let root = root.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut warnings = Vec::new();

        for name in root.keys() {
            if !KNOWN_SECTIONS.contains(&name.as_str()) {
                warnings.push(ConfigWarning::UnknownSection {
                    section: name.clone(),
                });
            }
        }

        let config = AppConfig {
            wifi: read_section(root, &mut warnings)?,
            mqtt: read_section(root, &mut warnings)?,
            ntp: read_section(root, &mut warnings)?,
            panel: read_section(root, &mut warnings)?,
            status: read_section(root, &mut warnings)?,
            logging: read_logging(root, &mut warnings)?,
        };

        Ok(LoadedConfig { config, warnings })
    }

    /// Renders every setting as `section.key = value`, masking secrets.
    pub fn render_redacted(&self) -> String {
        let value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(e) => return format!("<configuration not renderable: {}>", e),
        };
        let mut lines = vec!["Configuration:".to_string()];
        render_value("", &value, &mut lines);
        lines.join("\n")
    }
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                merge(base_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

fn read_section<T: ConfigSection>(
    root: &serde_json::Map<String, Value>,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<T, ConfigError> {
    let mut section = T::default();
    match root.get(T::NAME) {
        None | Some(Value::Null) => {}
        Some(Value::Object(fields)) => {
            let mut reader = SectionReader::new(T::NAME, fields);
            section.read(&mut reader)?;
            reader.finish(warnings);
        }
        Some(_) => {
            return Err(ConfigError::InvalidType {
                section: T::NAME.to_string(),
                key: String::new(),
                expected: "object",
            })
        }
    }
    Ok(section)
}

fn read_logging(
    root: &serde_json::Map<String, Value>,
    warnings: &mut Vec<ConfigWarning>,
) -> Result<LoggingConfig, ConfigError> {
    let mut logging = LoggingConfig::default();
    let fields = match root.get(LoggingConfig::NAME) {
        None | Some(Value::Null) => return Ok(logging),
        Some(Value::Object(fields)) => fields,
        Some(_) => {
            return Err(ConfigError::InvalidType {
                section: LoggingConfig::NAME.to_string(),
                key: String::new(),
                expected: "object",
            })
        }
    };

    let mut reader = SectionReader::new(LoggingConfig::NAME, fields);
    if let Some(mut console) = reader.nested("console_logger")? {
        let target = &mut logging.console_logger;
        console.boolean("enabled", &mut target.enabled)?;
        console.string("default_log_level", &mut target.default_log_level)?;
        console.string_map("log_levels_for_modules", &mut target.log_levels_for_modules)?;
        console.finish(warnings);
    }
    if let Some(mut file) = reader.nested("file_logger")? {
        let target = &mut logging.file_logger;
        file.boolean("enabled", &mut target.enabled)?;
        file.string("dirname", &mut target.dirname)?;
        file.unsigned("max_bytes", &mut target.max_bytes)?;
        file.unsigned("backup_count", &mut target.backup_count)?;
        file.string("default_log_level", &mut target.default_log_level)?;
        file.string_map("log_levels_for_modules", &mut target.log_levels_for_modules)?;
        file.finish(warnings);
    }
    reader.finish(warnings);
    Ok(logging)
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

fn render_value(path: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                if is_sensitive(key) && !entry.is_object() {
                    lines.push(format!("  {} = {}", child, REDACTED));
                } else {
                    render_value(&child, entry, lines);
                }
            }
        }
        Value::String(s) => lines.push(format!("  {} = {}", path, s)),
        other => lines.push(format!("  {} = {}", path, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let loaded = AppConfig::from_value(&json!({})).unwrap();
        let config = loaded.config;

        assert!(loaded.warnings.is_empty());
        assert_eq!(config.wifi.max_connect_polls, 60);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.ntp.host, "time.google.com");
        assert_eq!(config.ntp.interval_seconds, 21_600);
        assert_eq!(config.panel.debounce_ms, 20);
        assert_eq!(config.panel.inputs[0].name, "button_red");
        assert_eq!(config.panel.inputs[0].topic_id, "button0");
        assert_eq!(config.status.poll_interval_ms, 10);
        assert_eq!(config.logging.console_logger.default_log_level, "INFO");
    }

    #[test]
    fn sections_are_read_and_unknowns_reported() {
        let document = json!({
            "wifi": { "ssid": "workshop", "password": "hunter2", "channel": 6 },
            "mqtt": { "host": "broker.local", "port": 8883, "use_ssl": true },
            "ntp": { "interval_seconds": 60 },
            "panel": {
                "debounce_ms": 35,
                "inputs": [{ "name": "button_blue", "pin": 22, "topic_id": "button3" }]
            },
            "telemetry": {}
        });

        let loaded = AppConfig::from_value(&document).unwrap();
        let config = loaded.config;

        assert_eq!(config.wifi.ssid, "workshop");
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert!(config.mqtt.use_ssl);
        assert_eq!(config.ntp.interval_seconds, 60);
        assert_eq!(config.ntp.send_retries, 5);
        assert_eq!(config.panel.debounce_ms, 35);
        assert_eq!(config.panel.inputs.len(), 1);
        assert_eq!(config.panel.outputs.len(), 3);

        assert!(loaded.warnings.contains(&ConfigWarning::UnknownSection {
            section: "telemetry".into()
        }));
        assert!(loaded.warnings.contains(&ConfigWarning::UnknownKey {
            section: "wifi".into(),
            key: "channel".into()
        }));
    }

    #[test]
    fn logging_section_builds_nested_settings() {
        let document = json!({
            "logging": {
                "console_logger": {
                    "default_log_level": "DEBUG",
                    "log_levels_for_modules": { "panel_bridge::mqtt": "WARNING" }
                },
                "file_logger": { "enabled": true, "max_bytes": 20000 }
            }
        });

        let config = AppConfig::from_value(&document).unwrap().config;

        assert_eq!(config.logging.console_logger.default_log_level, "DEBUG");
        assert_eq!(
            config.logging.console_logger.log_levels_for_modules["panel_bridge::mqtt"],
            "WARNING"
        );
        assert!(config.logging.file_logger.enabled);
        assert_eq!(config.logging.file_logger.max_bytes, 20_000);
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let dir = std::env::temp_dir().join(format!("panel-bridge-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let settings = dir.join("app_settings.json");
        let secrets = dir.join("app_secrets.json");

        let mut f = std::fs::File::create(&settings).unwrap();
        write!(f, r#"{{ "mqtt": {{ "host": "broker.local", "username": "" }} }}"#).unwrap();
        let mut f = std::fs::File::create(&secrets).unwrap();
        write!(
            f,
            r#"{{ "mqtt": {{ "username": "panel", "password": "s3cret" }}, "wifi": {{ "password": null }} }}"#
        )
        .unwrap();

        let config = AppConfig::load(&[settings, secrets]).unwrap().config;
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.username, "panel");
        assert_eq!(config.mqtt.password, "s3cret");
        assert_eq!(config.wifi.password, "");
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = AppConfig::load(&[PathBuf::from("/nonexistent/panel-bridge.json")]);
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn rendering_masks_secrets() {
        let mut config = AppConfig::default();
        config.wifi.password = "hunter2".into();
        config.mqtt.password = "s3cret".into();
        config.mqtt.username = "panel".into();

        let text = config.render_redacted();

        assert!(!text.contains("hunter2"));
        assert!(!text.contains("s3cret"));
        assert!(text.contains("  wifi.password = ********"));
        assert!(text.contains("  mqtt.password = ********"));
        assert!(text.contains("  mqtt.username = panel"));
    }
}
