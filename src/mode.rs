//! Camera operating mode as reported by the backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend-reported operating state.
///
/// The authoritative value lives on the backend; the console only caches it.
/// Any wire value other than `"stream"` or `"motion"` decodes to [`Mode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live HLS video stream is running.
    Stream,
    /// Motion-triggered still capture is running.
    Motion,
    /// Backend is switching, or reported nothing usable.
    #[default]
    #[serde(other)]
    Unknown,
}

impl Mode {
    /// Wire representation, also used as the `/set-mode/{target}` path segment.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Motion => "motion",
            Self::Unknown => "unknown",
        }
    }

    /// True for every mode except [`Mode::Unknown`].
    #[must_use]
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Target of a user toggle: the complement, with UNKNOWN defaulting to STREAM.
    #[must_use]
    pub fn toggle_target(self) -> Self {
        match self {
            Self::Motion | Self::Unknown => Self::Stream,
            Self::Stream => Self::Motion,
        }
    }

    /// Short label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Stream => "Streaming Active",
            Self::Motion => "Motion Detection Active",
            Self::Unknown => "Mode Unknown",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which component last wrote the cached mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeOrigin {
    /// Nothing has been observed yet.
    #[default]
    Initial,
    /// Written by a periodic mode-watcher poll.
    Watcher,
    /// Written by a settled user toggle.
    Transition,
}

/// Body of `GET {base}/mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeResponse {
    /// Reported mode, absent or `null` when the backend has nothing to say.
    #[serde(default)]
    pub mode: Option<Mode>,
}

impl ModeResponse {
    /// Response carrying `mode`.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self { mode: Some(mode) }
    }

    /// The reported mode, only if it is defined and not UNKNOWN.
    #[must_use]
    pub fn settled_mode(&self) -> Option<Mode> {
        self.mode.filter(|m| m.is_settled())
    }
}
