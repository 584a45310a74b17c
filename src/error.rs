//! Custom error types for the console core.
//!
//! This module defines `ConsoleError`, the single error type shared by every component.
//! Using the `thiserror` crate, it gives one consistent place for everything that can go
//! wrong while talking to the camera backend or driving the display sink.
//!
//! ## Error Taxonomy
//!
//! - **`NetworkUnavailable`**: the request never produced a response (connect refused,
//!   timeout, DNS, reset).
//! - **`BadResponse`**: the backend answered with a non-success status.
//! - **`Decode`**: the backend answered 2xx but the body was not what we expected.
//! - **`SettlementTimeout`**: a mode toggle never converged to a settled mode.
//! - **`PlaybackUnsupported`**: the display sink has no adaptive or native playback path.
//! - **`StreamExhausted`**: the stream probe budget ran out.
//! - **`TransportFatal`**: the media transport reported a fault that stops playback.
//!
//! None of these terminate the process. Each component recovers locally and maps the
//! failure to one user-visible [`ErrorNotice`](crate::state::ErrorNotice); connectivity
//! loss is reported through the separate `online` flag instead.

use crate::connection::AddressError;
use crate::mode::Mode;
use crate::state::ErrorNotice;
use thiserror::Error;

/// Convenience alias for results using the console error type.
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Errors produced by the console core.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Transport-level failure: no HTTP response was received.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The backend returned a non-success status.
    #[error("Bad response from {url}: HTTP {status}")]
    BadResponse {
        /// Request URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("Could not decode response: {0}")]
    Decode(String),

    /// The backend never reported a settled mode.
    #[error("Mode did not settle after {polls} polls")]
    SettlementTimeout {
        /// Number of settlement polls issued
        polls: u32,
    },

    /// No viable media attachment path for the display sink.
    #[error("Display sink supports neither adaptive nor native HLS playback")]
    PlaybackUnsupported,

    /// The stream probe retry budget was exceeded.
    #[error("Stream unavailable after {attempts} attempts")]
    StreamExhausted {
        /// Number of probes issued
        attempts: u32,
    },

    /// The media transport reported a fault that prevents further playback.
    #[error("Fatal transport fault: {0}")]
    TransportFatal(String),

    /// A mode that cannot be requested from the backend.
    #[error("Cannot request mode '{0}'")]
    InvalidTarget(Mode),

    /// An endpoint address failed validation.
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds unusable values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl ConsoleError {
    /// Returns true if the failure came from the network rather than the payload.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    /// The user-visible notice for failures that mean the same thing wherever they occur.
    ///
    /// Request failures return `None`: whether a refused connection reads as
    /// "Sensor offline" or "Failed to toggle mode" depends on the caller.
    #[must_use]
    pub fn notice(&self) -> Option<ErrorNotice> {
        match self {
            Self::SettlementTimeout { .. } => Some(ErrorNotice::ModeDidNotSettle),
            Self::PlaybackUnsupported => Some(ErrorNotice::PlaybackUnsupported),
            Self::StreamExhausted { .. } => Some(ErrorNotice::StreamUnavailable),
            Self::TransportFatal(_) => Some(ErrorNotice::PlaybackFailed),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConsoleError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::BadResponse {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            };
        }
        Self::NetworkUnavailable(err.to_string())
    }
}
