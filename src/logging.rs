//! Console logging setup from the `logging` configuration section.

use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LoggingConfig;

/// Maps the level names used in the settings files onto `tracing` levels.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "NOTSET" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" | "WARNING" => Some(Level::WARN),
        "ERROR" | "CRITICAL" => Some(Level::ERROR),
        _ => None,
    }
}

/// Builds the filter directive string, e.g. `info,panel_bridge::mqtt=warn`.
///
/// Unknown level names are collected as problems and replaced by `info`
/// (default) or skipped (module override).
pub fn filter_directives(config: &LoggingConfig) -> (String, Vec<String>) {
    let console = &config.console_logger;
    let mut problems = Vec::new();

    let default_level = parse_level(&console.default_log_level).unwrap_or_else(|| {
        problems.push(format!(
            "Unknown log level '{}', falling back to INFO",
            console.default_log_level
        ));
        Level::INFO
    });

    let mut directives = vec![default_level.as_str().to_ascii_lowercase()];
    for (module, level_name) in &console.log_levels_for_modules {
        match parse_level(level_name) {
            Some(level) => {
                directives.push(format!("{}={}", module, level.as_str().to_ascii_lowercase()))
            }
            None => problems.push(format!(
                "Unknown log level '{}' for module '{}', ignoring",
                level_name, module
            )),
        }
    }

    (directives.join(","), problems)
}

/// Installs the global console subscriber. `RUST_LOG` overrides the configured filter.
pub fn init(config: &LoggingConfig) {
    let (directives, problems) = filter_directives(config);

    let filter = match std::env::var("RUST_LOG") {
        Ok(from_env) => EnvFilter::try_new(from_env).unwrap_or_else(|_| EnvFilter::new(&directives)),
        Err(_) if config.console_logger.enabled => EnvFilter::new(&directives),
        Err(_) => EnvFilter::new("off"),
    };

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    for problem in problems {
        warn!("{}", problem);
    }
    if config.file_logger.enabled {
        warn!(
            "File logging to '{}' is not supported on this device, using console only",
            config.file_logger.dirname
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_levels_are_translated() {
        assert_eq!(parse_level("WARNING"), Some(Level::WARN));
        assert_eq!(parse_level("critical"), Some(Level::ERROR));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn directives_include_module_overrides() {
        let mut config = LoggingConfig::default();
        config.console_logger.default_log_level = "DEBUG".into();
        config
            .console_logger
            .log_levels_for_modules
            .insert("panel_bridge::status".into(), "WARNING".into());

        let (directives, problems) = filter_directives(&config);

        assert_eq!(directives, "debug,panel_bridge::status=warn");
        assert!(problems.is_empty());
    }

    #[test]
    fn unknown_default_level_falls_back_to_info() {
        let mut config = LoggingConfig::default();
        config.console_logger.default_log_level = "LOUD".into();

        let (directives, problems) = filter_directives(&config);

        assert_eq!(directives, "info");
        assert_eq!(problems.len(), 1);
    }
}
