//! Console configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`ConsoleConfig::default()`)
//! 2. A TOML file (`config/console.toml` unless another path is given)
//! 3. Environment variables prefixed with `WILDLIFE_CONSOLE_`, nested keys split on `__`
//!
//! Durations are written in humantime form (`"10s"`, `"1500ms"`).
//!
//! # Example
//! ```no_run
//! use wildlife_console::config::ConsoleConfig;
//!
//! // WILDLIFE_CONSOLE_POLL__SENSOR=15s overrides poll.sensor
//! let config = ConsoleConfig::load()?;
//! println!("API base: {}", config.endpoints.api_base);
//! # Ok::<(), wildlife_console::ConsoleError>(())
//! ```

use crate::connection::{Endpoints, DEFAULT_API_BASE, DEFAULT_SENSOR_ADDRESS, DEFAULT_STREAM_ADDRESS};
use crate::error::{ConsoleError, Result};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/console.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "WILDLIFE_CONSOLE_";

/// Top-level console configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Backend addresses
    pub endpoints: EndpointConfig,
    /// Background loop periods
    pub poll: PollIntervals,
    /// Stream probe budget
    pub retry: RetryBudget,
    /// Mode toggle settlement polling
    pub settlement: SettlementPolicy,
    /// Capture trigger settings
    pub capture: CaptureConfig,
    /// HTTP client settings
    pub http: HttpConfig,
    /// Sensor chart settings
    pub history: HistoryConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

/// Backend addresses. The stream and sensor addresses may be on other origins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base for `/mode`, `/set-mode/{target}`, `/capture` and `/latest-image`.
    pub api_base: String,
    /// HLS playlist that is probed and attached in STREAM mode.
    pub stream_address: String,
    /// Sensor snapshot returning `{temperature, humidity, pressure}`.
    pub sensor_address: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            stream_address: DEFAULT_STREAM_ADDRESS.to_string(),
            sensor_address: DEFAULT_SENSOR_ADDRESS.to_string(),
        }
    }
}

/// Periods of the independent background loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    /// Telemetry poll period.
    #[serde(with = "humantime_serde")]
    pub sensor: Duration,
    /// Still image refresh period.
    #[serde(with = "humantime_serde")]
    pub image: Duration,
    /// Mode watcher period.
    #[serde(with = "humantime_serde")]
    pub mode: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            sensor: Duration::from_secs(10),
            image: Duration::from_secs(30),
            mode: Duration::from_secs(5),
        }
    }
}

/// Fixed-interval retry budget for stream acquisition.
///
/// Probes are spaced `interval` apart; the delay never grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    /// Total probes per acquisition, including the first.
    pub max_attempts: u32,
    /// Delay between probes.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval: Duration::from_secs(2),
        }
    }
}

impl RetryBudget {
    /// Check if another probe should follow `attempt` (1-based).
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// How long a toggle waits for the backend to report a settled mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementPolicy {
    /// Mode polls issued after a successful set-mode request.
    pub max_polls: u32,
    /// Delay between settlement polls.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            max_polls: 10,
            interval: Duration::from_secs(1),
        }
    }
}

/// Capture trigger settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Delay between a successful capture and the image refresh.
    #[serde(with = "humantime_serde")]
    pub refresh_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            refresh_delay: Duration::from_secs(3),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Sensor chart settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Chart points retained, oldest evicted first.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: crate::telemetry::DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: OutputFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
        }
    }
}

impl ConsoleConfig {
    /// Load configuration from `config/console.toml` and environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConsoleError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let periods = [
            ("poll.sensor", self.poll.sensor),
            ("poll.image", self.poll.image),
            ("poll.mode", self.poll.mode),
            ("retry.interval", self.retry.interval),
            ("settlement.interval", self.settlement.interval),
            ("http.timeout", self.http.timeout),
        ];
        for (key, period) in periods {
            if period.is_zero() {
                return Err(ConsoleError::Configuration(format!(
                    "{key} must be greater than zero"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConsoleError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.settlement.max_polls == 0 {
            return Err(ConsoleError::Configuration(
                "settlement.max_polls must be at least 1".into(),
            ));
        }
        if self.history.capacity == 0 {
            return Err(ConsoleError::Configuration(
                "history.capacity must be at least 1".into(),
            ));
        }

        self.endpoints()?;
        Ok(())
    }

    /// Validated endpoints derived from `self.endpoints`.
    pub fn endpoints(&self) -> Result<Endpoints> {
        Ok(Endpoints::from_config(&self.endpoints)?)
    }
}
