//! Headless display sink and state logging for the CLI.
//!
//! Without a video surface the console still runs the full reconciliation loop;
//! the sink only records the source it would be playing, and state changes are
//! written to the log instead of rendered.

use crate::lifecycle::Teardown;
use crate::media::{DisplaySink, HLS_MIME_TYPE};
use crate::state::ConsoleState;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Sink that accepts native HLS and logs what it is asked to do.
#[derive(Debug, Default)]
pub struct HeadlessSink {
    source: Mutex<Option<String>>,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address currently assigned, if any.
    pub fn source(&self) -> Option<String> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, source: Option<String>) {
        *self.source.lock().unwrap_or_else(PoisonError::into_inner) = source;
    }
}

impl DisplaySink for HeadlessSink {
    fn supports_adaptive_streaming(&self) -> bool {
        false
    }

    fn can_play_type(&self, mime: &str) -> bool {
        mime == HLS_MIME_TYPE
    }

    fn set_source(&self, address: &str) {
        info!(%address, "Display source set");
        self.set(Some(address.to_string()));
    }

    fn play(&self) {
        debug!("Display play");
    }

    fn pause(&self) {
        debug!("Display pause");
    }

    fn clear_source(&self) {
        info!("Display source cleared");
        self.set(None);
    }

    fn reset(&self) {
        debug!("Display reset");
    }
}

/// Log the fields that changed between `prev` and `next`.
pub fn log_changes(prev: &ConsoleState, next: &ConsoleState) {
    if prev.mode != next.mode {
        info!(mode = %next.mode, origin = ?next.mode_origin, "{}", next.mode.label());
    }
    if prev.online != next.online {
        if next.online {
            info!("Backend online");
        } else {
            warn!("Backend offline");
        }
    }
    if prev.transition != next.transition {
        debug!(phase = ?next.transition, loading = next.loading, "Transition");
    }
    if prev.sensor != next.sensor {
        if let Some(reading) = &next.sensor {
            info!(
                temperature = reading.temperature,
                humidity = reading.humidity,
                pressure_kpa = next.history.latest().map(|p| p.pressure_kpa),
                at = %reading.updated_at,
                "Sensor reading"
            );
        }
    }
    if prev.image != next.image {
        if let Some(image) = &next.image {
            debug!(url = %image.url, "Still image refreshed");
        }
    }
    if prev.media != next.media {
        info!(media = ?next.media, "Media status");
    }
    if prev.error != next.error {
        match next.error {
            Some(notice) => warn!(%notice, "Error notice"),
            None => debug!("Error notice cleared"),
        }
    }
}

/// Log every state change until teardown.
pub async fn log_state(mut rx: watch::Receiver<ConsoleState>, teardown: Teardown) {
    let mut prev = rx.borrow_and_update().clone();
    loop {
        tokio::select! {
            biased;
            () = teardown.cancelled() => break,
            changed = rx.changed() => if changed.is_err() { break },
        }
        let next = rx.borrow_and_update().clone();
        log_changes(&prev, &next);
        prev = next;
    }
}
