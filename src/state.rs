//! View-facing console state.
//!
//! All state the renderer needs lives in one [`ConsoleState`] value held by a
//! `tokio::sync::watch` channel. Each field has exactly one producing component
//! (the mode watcher and transition controller share `mode`, but only ever replace it
//! whole). Readers subscribe and get notified on change; writers go through
//! [`StateStore`], which only wakes subscribers when a value actually changed.
//!
//! ```rust,ignore
//! let mut rx = store.subscribe();
//! while rx.changed().await.is_ok() {
//!     let state = rx.borrow_and_update().clone();
//!     render(&state);
//! }
//! ```

use crate::image::ImageReference;
use crate::media::MediaStatus;
use crate::mode::{Mode, ModeOrigin};
use crate::telemetry::{SensorHistory, SensorReading};
use crate::transition::TransitionPhase;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// The single live user-visible error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorNotice {
    /// Sensor fetch failed or returned garbage.
    SensorOffline,
    /// The set-mode request itself failed.
    ToggleFailed,
    /// The backend never reported a settled mode after a toggle.
    ModeDidNotSettle,
    /// Stream probes exhausted their budget.
    StreamUnavailable,
    /// The display sink cannot play HLS at all.
    PlaybackUnsupported,
    /// The media transport hit a fatal fault.
    PlaybackFailed,
    /// The capture request failed.
    CaptureFailed,
}

impl ErrorNotice {
    /// Message shown to the user.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::SensorOffline => "Sensor offline",
            Self::ToggleFailed => "Failed to toggle mode",
            Self::ModeDidNotSettle => "Mode did not settle",
            Self::StreamUnavailable => "Stream unavailable after retries.",
            Self::PlaybackUnsupported => "HLS is not supported by this display.",
            Self::PlaybackFailed => "Stream playback failed",
            Self::CaptureFailed => "Failed to capture image",
        }
    }

    /// Raised by stream acquisition or playback.
    #[must_use]
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Self::StreamUnavailable | Self::PlaybackUnsupported | Self::PlaybackFailed
        )
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Snapshot of everything the view renderer draws.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleState {
    /// Last known backend mode.
    pub mode: Mode,
    /// Which component last changed `mode`.
    pub mode_origin: ModeOrigin,
    /// Incremented on every change of `mode`. Subscribers that wake after several
    /// changes were coalesced can still tell that the mode moved.
    pub mode_epoch: u64,
    /// True while a mode toggle is in flight; the toggle control should be disabled.
    pub loading: bool,
    /// Backend reachable, as seen by the mode watcher.
    pub online: bool,
    /// Latest sensor reading, if any poll has succeeded.
    pub sensor: Option<SensorReading>,
    /// Rolling chart history.
    pub history: SensorHistory,
    /// Latest cache-busted still image locator.
    pub image: Option<ImageReference>,
    /// Current error notice.
    pub error: Option<ErrorNotice>,
    /// Whether video is attached to the display sink.
    pub media: MediaStatus,
    /// Mode transition controller phase.
    pub transition: TransitionPhase,
}

impl ConsoleState {
    /// Initial state with an empty history of `history_capacity` points.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        Self {
            mode: Mode::Unknown,
            mode_origin: ModeOrigin::Initial,
            mode_epoch: 0,
            loading: false,
            online: true,
            sensor: None,
            history: SensorHistory::new(history_capacity),
            image: None,
            error: None,
            media: MediaStatus::Detached,
            transition: TransitionPhase::Idle,
        }
    }

    /// Write `mode` on behalf of `origin`. Returns false, leaving the state untouched,
    /// if `mode` is already the cached value.
    pub fn record_mode(&mut self, mode: Mode, origin: ModeOrigin) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        self.mode_origin = origin;
        self.mode_epoch += 1;
        true
    }
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new(crate::telemetry::DEFAULT_HISTORY_CAPACITY)
    }
}

/// Shared handle to the console state channel.
///
/// Cloning is cheap; all clones write to the same channel.
#[derive(Debug, Clone)]
pub struct StateStore {
    sender: Arc<watch::Sender<ConsoleState>>,
}

impl StateStore {
    /// Create a store holding `ConsoleState::new(history_capacity)`.
    pub fn new(history_capacity: usize) -> Self {
        let (sender, _) = watch::channel(ConsoleState::new(history_capacity));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Get the current state (clone).
    #[must_use]
    pub fn snapshot(&self) -> ConsoleState {
        self.sender.borrow().clone()
    }

    /// Current cached mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.sender.borrow().mode
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConsoleState> {
        self.sender.subscribe()
    }

    /// Apply `f`, notifying subscribers unconditionally.
    pub(crate) fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ConsoleState),
    {
        self.sender.send_modify(f);
    }

    /// Apply `f`, notifying subscribers only if it returns true.
    pub(crate) fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut ConsoleState) -> bool,
    {
        self.sender.send_if_modified(f)
    }

    /// Replace the error notice. Later errors overwrite earlier ones.
    pub fn set_error(&self, notice: ErrorNotice) {
        self.modify(|s| {
            let changed = s.error != Some(notice);
            s.error = Some(notice);
            changed
        });
    }

    /// Clear the error notice.
    pub fn clear_error(&self) {
        self.modify(|s| s.error.take().is_some());
    }

    /// Clear the error notice only if `pred` matches it.
    pub fn clear_error_if<P>(&self, pred: P) -> bool
    where
        P: FnOnce(ErrorNotice) -> bool,
    {
        self.modify(|s| {
            let clear = s.error.is_some_and(pred);
            if clear {
                s.error = None;
            }
            clear
        })
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(crate::telemetry::DEFAULT_HISTORY_CAPACITY)
    }
}
