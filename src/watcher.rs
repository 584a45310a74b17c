//! Periodic mode watcher.
//!
//! Drives the displayed mode from the backend's authoritative value and owns the
//! `online` flag. A response without a settled mode still counts as the backend
//! being reachable but never overwrites the cached mode.

use crate::backend::Backend;
use crate::lifecycle::{run_every, PollOutcome, Teardown};
use crate::mode::ModeOrigin;
use crate::state::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Polls `GET {base}/mode` on a fixed period.
#[derive(Clone)]
pub struct ModeWatcher {
    backend: Arc<dyn Backend>,
    store: StateStore,
    period: Duration,
}

impl ModeWatcher {
    pub fn new(backend: Arc<dyn Backend>, store: StateStore, period: Duration) -> Self {
        Self {
            backend,
            store,
            period,
        }
    }

    /// Fetch the mode once and publish it unless teardown fired meanwhile.
    pub async fn poll_once(&self, teardown: &Teardown) -> PollOutcome {
        let result = self.backend.fetch_mode().await;

        if teardown.is_cancelled() {
            debug!("Discarding mode response received after teardown");
            return PollOutcome::Discarded;
        }

        match result {
            Ok(response) => {
                let settled = response.settled_mode();
                self.store.modify(|s| {
                    let mut changed = !s.online;
                    s.online = true;
                    if let Some(mode) = settled {
                        let from = s.mode;
                        if s.record_mode(mode, ModeOrigin::Watcher) {
                            info!(%from, to = %mode, "Backend mode changed");
                            changed = true;
                        }
                    }
                    changed
                });
                PollOutcome::Applied
            }
            Err(e) => {
                let went_offline = self.store.modify(|s| {
                    let changed = s.online;
                    s.online = false;
                    changed
                });
                if went_offline {
                    warn!(error = %e, "Backend unreachable");
                } else {
                    debug!(error = %e, "Backend still unreachable");
                }
                PollOutcome::Failed
            }
        }
    }

    /// Poll every period until teardown.
    pub fn spawn(self, teardown: Teardown) -> JoinHandle<()> {
        let period = self.period;
        let watcher = Arc::new(self);
        let latch = teardown.clone();
        run_every("mode-watcher", period, teardown, move || {
            let watcher = watcher.clone();
            let latch = latch.clone();
            async move { watcher.poll_once(&latch).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::mock::MockBackend;
    use crate::mode::{Mode, ModeResponse};
    use crate::ConsoleError;

    fn watcher(backend: &Arc<MockBackend>, store: &StateStore) -> ModeWatcher {
        ModeWatcher::new(backend.clone(), store.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_defined_mode_is_published() {
        let backend = Arc::new(MockBackend::new());
        backend.push_mode(Ok(ModeResponse::new(Mode::Stream)));
        let store = StateStore::default();
        let shutdown = Shutdown::new();

        watcher(&backend, &store).poll_once(&shutdown.teardown()).await;

        let state = store.snapshot();
        assert_eq!(state.mode, Mode::Stream);
        assert_eq!(state.mode_origin, ModeOrigin::Watcher);
        assert!(state.online);
    }

    #[tokio::test]
    async fn test_unknown_or_missing_mode_never_overwrites() {
        let backend = Arc::new(MockBackend::new());
        backend.push_mode(Ok(ModeResponse::new(Mode::Motion)));
        backend.push_mode(Ok(ModeResponse::new(Mode::Unknown)));
        backend.push_mode(Ok(ModeResponse::default()));
        let store = StateStore::default();
        let shutdown = Shutdown::new();
        let watcher = watcher(&backend, &store);

        for _ in 0..3 {
            assert_eq!(watcher.poll_once(&shutdown.teardown()).await, PollOutcome::Applied);
        }
        assert_eq!(store.mode(), Mode::Motion);
    }

    #[tokio::test]
    async fn test_failure_marks_offline_and_keeps_mode() {
        let backend = Arc::new(MockBackend::new());
        backend.push_mode(Ok(ModeResponse::new(Mode::Motion)));
        backend.push_mode(Err(ConsoleError::NetworkUnavailable("refused".into())));
        backend.push_mode(Ok(ModeResponse::default()));
        let store = StateStore::default();
        let shutdown = Shutdown::new();
        let watcher = watcher(&backend, &store);

        watcher.poll_once(&shutdown.teardown()).await;
        assert_eq!(watcher.poll_once(&shutdown.teardown()).await, PollOutcome::Failed);
        let state = store.snapshot();
        assert!(!state.online);
        assert_eq!(state.mode, Mode::Motion);

        watcher.poll_once(&shutdown.teardown()).await;
        assert!(store.snapshot().online);
    }
}
