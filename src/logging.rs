//! Tracing setup
//!
//! Structured, async-aware logging built on `tracing` and `tracing-subscriber`:
//! - Environment-based filtering (`RUST_LOG` wins over the configured level)
//! - Multiple output formats (pretty, compact, JSON)
//! - Idempotent initialization, safe to call from tests
//!
//! # Example
//! ```no_run
//! use wildlife_console::{config::ConsoleConfig, logging};
//! use tracing::{info, warn};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConsoleConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!("Console started");
//! warn!(component = "watcher", "Backend unreachable");
//! # Ok(())
//! # }
//! ```

use crate::config::ConsoleConfig;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for development)
    #[default]
    Pretty,
    /// Compact single-line format without colors
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level used when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include the event target
    pub with_target: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_file_and_line: false,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Create tracing config from the console configuration
    pub fn from_console_config(config: &ConsoleConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.logging.level)?,
            format: config.logging.format,
            ..Default::default()
        })
    }

    /// Create tracing config with custom settings
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the console configuration.
pub fn init_from_config(config: &ConsoleConfig) -> Result<(), String> {
    init(TracingConfig::from_console_config(config)?)
}

/// Initialize tracing with custom configuration
///
/// If a global subscriber is already installed this returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let result = match config.format {
        OutputFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_target(config.with_target)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        OutputFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_target(config.with_target)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        OutputFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_target(config.with_target)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };

    result.or_else(|e| {
        // Expected in tests and when an embedding application installed its own subscriber
        if e.to_string()
            .contains("a global default trace dispatcher has already been set")
        {
            Ok(())
        } else {
            Err(format!("Failed to initialize tracing: {e}"))
        }
    })
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("info"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));

        // Case insensitive
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));

        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_tracing_config_from_console_config() {
        let mut config = ConsoleConfig::default();
        config.logging.level = "debug".into();
        config.logging.format = OutputFormat::Compact;

        let tracing_config = TracingConfig::from_console_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Compact);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(!config.with_ansi);
    }
}
