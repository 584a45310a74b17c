//! Backend endpoint configuration and URL normalization.
//!
//! The console talks to three origins:
//! - the camera API (`/mode`, `/set-mode/{target}`, `/capture`, `/latest-image`)
//! - the sensor endpoint, which may live on a different host
//! - the HLS stream playlist, usually served by a separate media server
//!
//! [`Endpoints`] validates all three once at construction and builds every request
//! URL from them, so no component formats addresses on its own.
//!
//! # URL Normalization
//!
//! The [`normalize_url`] function handles common input formats:
//! - Bare host:port (e.g., `192.168.1.40:5001` → `http://192.168.1.40:5001/`)
//! - IPv6 addresses (e.g., `[::1]:5001` → `http://[::1]:5001/`)
//! - Surrounding whitespace is trimmed
//!
//! # Example
//!
//! ```
//! use wildlife_console::connection::normalize_url;
//!
//! let url = normalize_url("pi5.local:5001")?;
//! assert_eq!(url.as_str(), "http://pi5.local:5001/");
//! # Ok::<(), wildlife_console::connection::AddressError>(())
//! ```

use crate::config::EndpointConfig;
use crate::mode::Mode;
use std::fmt;
use url::Url;

/// Default camera API address when no configuration is provided.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:5001";

/// Default HLS playlist address.
pub const DEFAULT_STREAM_ADDRESS: &str = "http://127.0.0.1:8888/stream/index.m3u8";

/// Default sensor snapshot address.
pub const DEFAULT_SENSOR_ADDRESS: &str = "http://127.0.0.1:5001/sensor/latest";

/// URL validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was empty or whitespace-only
    EmptyInput,
    /// URL parsing failed
    InvalidUrl(String),
    /// No host was found in the URL
    MissingHost,
    /// Unsupported URL scheme (only http/https allowed)
    UnsupportedScheme(String),
}

impl std::error::Error for AddressError {}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Address cannot be empty"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::MissingHost => write!(f, "URL must include a host"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported scheme '{s}' (use http or https)"),
        }
    }
}

/// Normalize an endpoint URL string.
///
/// - Adds `http://` scheme if missing
/// - Trims whitespace
/// - Rejects anything but http/https
///
/// Unlike a bare `Url::parse`, a missing scheme is not an error: operators tend to
/// type `pi5.local:5001` into config files.
pub fn normalize_url(input: &str) -> Result<Url, AddressError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(AddressError::EmptyInput);
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{input}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| AddressError::InvalidUrl(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(AddressError::UnsupportedScheme(scheme));
    }

    if url.host().is_none() {
        return Err(AddressError::MissingHost);
    }

    Ok(url)
}

/// Validated backend addresses and the request URLs derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// API base without trailing slash, e.g. `http://pi5.local:5001`
    api_base: String,
    stream_address: String,
    sensor_address: String,
}

impl Endpoints {
    /// Validate and normalize every configured address.
    pub fn from_config(config: &EndpointConfig) -> Result<Self, AddressError> {
        let api_base = normalize_url(&config.api_base)?;
        let stream = normalize_url(&config.stream_address)?;
        let sensor = normalize_url(&config.sensor_address)?;

        Ok(Self {
            api_base: api_base.as_str().trim_end_matches('/').to_string(),
            stream_address: stream.to_string(),
            sensor_address: sensor.to_string(),
        })
    }

    /// API base without trailing slash.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// HLS playlist address used for probing and attachment.
    #[must_use]
    pub fn stream_address(&self) -> &str {
        &self.stream_address
    }

    /// Sensor snapshot address.
    #[must_use]
    pub fn sensor_address(&self) -> &str {
        &self.sensor_address
    }

    /// `GET {base}/mode`
    #[must_use]
    pub fn mode_url(&self) -> String {
        format!("{}/mode", self.api_base)
    }

    /// `POST {base}/set-mode/{target}`
    #[must_use]
    pub fn set_mode_url(&self, target: Mode) -> String {
        format!("{}/set-mode/{}", self.api_base, target.as_str())
    }

    /// `POST {base}/capture`
    #[must_use]
    pub fn capture_url(&self) -> String {
        format!("{}/capture", self.api_base)
    }

    /// `GET {base}/latest-image?t={token}`
    #[must_use]
    pub fn latest_image_url(&self, token: i64) -> String {
        format!("{}/latest-image?t={token}", self.api_base)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            stream_address: DEFAULT_STREAM_ADDRESS.to_string(),
            sensor_address: DEFAULT_SENSOR_ADDRESS.to_string(),
        }
    }
}
