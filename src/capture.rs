//! One-shot still capture.

use crate::backend::Backend;
use crate::image::ImageRefresher;
use crate::lifecycle::{PollOutcome, Teardown};
use crate::state::{ErrorNotice, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

/// Result of [`CaptureTrigger::trigger`].
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Capture accepted; the image refresh fires after the configured delay.
    Scheduled(JoinHandle<PollOutcome>),
    /// Capture request failed. Not retried.
    Failed,
}

/// Fires `POST {base}/capture` and refreshes the still once the device had time to
/// write the new image.
#[derive(Clone)]
pub struct CaptureTrigger {
    backend: Arc<dyn Backend>,
    store: StateStore,
    refresher: ImageRefresher,
    delay: Duration,
    teardown: Teardown,
}

impl CaptureTrigger {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: StateStore,
        refresher: ImageRefresher,
        delay: Duration,
        teardown: Teardown,
    ) -> Self {
        Self {
            backend,
            store,
            refresher,
            delay,
            teardown,
        }
    }

    pub async fn trigger(&self) -> CaptureOutcome {
        self.store.clear_error();

        match self.backend.trigger_capture().await {
            Ok(()) => {
                info!(delay = ?self.delay, "Capture triggered, image refresh scheduled");
                let refresher = self.refresher.clone();
                let teardown = self.teardown.clone();
                let delay = self.delay;
                CaptureOutcome::Scheduled(tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = teardown.cancelled() => PollOutcome::Discarded,
                        () = sleep(delay) => refresher.refresh(&teardown),
                    }
                }))
            }
            Err(e) => {
                warn!(error = %e, "Capture failed");
                if !self.teardown.is_cancelled() {
                    self.store.set_error(ErrorNotice::CaptureFailed);
                }
                CaptureOutcome::Failed
            }
        }
    }
}
