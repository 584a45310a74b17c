//! Mode Transition Controller
//!
//! Drives one user toggle through
//! `Idle → Requesting → AwaitingSettlement → Settled(success | failure)`.
//!
//! The backend reports UNKNOWN while it switches, so after the set-mode request the
//! controller polls the mode until a settled value appears or the poll budget runs
//! out. A settled STREAM starts stream acquisition in the background; the join
//! handle is returned to the caller.
//!
//! Only one toggle runs at a time. A toggle issued while another is in flight
//! returns [`ToggleOutcome::Busy`] and touches nothing.

use crate::backend::Backend;
use crate::config::SettlementPolicy;
use crate::error::{ConsoleError, Result};
use crate::lifecycle::Teardown;
use crate::mode::{Mode, ModeOrigin};
use crate::state::{ErrorNotice, StateStore};
use crate::stream::{AcquireOutcome, StreamAcquisitionRetrier};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Why a toggle did not settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SettlementFailure {
    /// The set-mode request failed.
    RequestFailed,
    /// The poll budget ran out without a settled mode.
    DidNotSettle,
}

/// Terminal result of a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SettlementResult {
    Success(Mode),
    Failure(SettlementFailure),
}

/// Controller phase, published in [`ConsoleState`](crate::state::ConsoleState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransitionPhase {
    #[default]
    Idle,
    Requesting {
        target: Mode,
    },
    AwaitingSettlement {
        target: Mode,
        /// Settlement polls issued so far.
        polls: u32,
    },
    Settled(SettlementResult),
}

impl TransitionPhase {
    /// True while a toggle is in flight.
    pub fn is_loading(self) -> bool {
        matches!(self, Self::Requesting { .. } | Self::AwaitingSettlement { .. })
    }
}

/// What [`ModeTransitionController::toggle`] did.
#[derive(Debug)]
pub enum ToggleOutcome {
    /// The backend settled on `mode` after `polls` settlement polls.
    Settled {
        mode: Mode,
        polls: u32,
        /// Running stream acquisition, present when `mode` is STREAM.
        acquisition: Option<JoinHandle<Result<AcquireOutcome>>>,
    },
    /// The set-mode request failed.
    RequestFailed,
    /// No settled mode within the poll budget.
    DidNotSettle { polls: u32 },
    /// Another toggle is in flight.
    Busy,
    /// Teardown fired mid-toggle; nothing further was written.
    Cancelled,
}

/// Clears the in-flight flag when the toggle ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs user-initiated mode toggles.
#[derive(Clone)]
pub struct ModeTransitionController {
    backend: Arc<dyn Backend>,
    store: StateStore,
    retrier: StreamAcquisitionRetrier,
    stream_address: String,
    policy: SettlementPolicy,
    teardown: Teardown,
    in_flight: Arc<AtomicBool>,
}

impl ModeTransitionController {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: StateStore,
        retrier: StreamAcquisitionRetrier,
        stream_address: impl Into<String>,
        policy: SettlementPolicy,
        teardown: Teardown,
    ) -> Self {
        Self {
            backend,
            store,
            retrier,
            stream_address: stream_address.into(),
            policy,
            teardown,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a toggle is currently running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Toggle to the complement of the cached mode and wait for the backend to settle.
    pub async fn toggle(&self) -> ToggleOutcome {
        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight) else {
            info!("Toggle ignored: another toggle is in flight");
            return ToggleOutcome::Busy;
        };

        let current = self.store.mode();
        let target = current.toggle_target();
        info!(from = %current, to = %target, "Toggling mode");
        self.store.update(|s| {
            s.transition = TransitionPhase::Requesting { target };
            s.loading = true;
            s.error = None;
        });

        let request = self.backend.set_mode(target).await;
        if self.teardown.is_cancelled() {
            return ToggleOutcome::Cancelled;
        }
        if let Err(e) = request {
            warn!(%target, error = %e, "Set-mode request failed");
            self.finish(
                SettlementResult::Failure(SettlementFailure::RequestFailed),
                Some(ErrorNotice::ToggleFailed),
            );
            return ToggleOutcome::RequestFailed;
        }

        let mut polls = 0;
        while polls < self.policy.max_polls {
            if polls > 0 {
                tokio::select! {
                    biased;
                    () = self.teardown.cancelled() => return ToggleOutcome::Cancelled,
                    () = sleep(self.policy.interval) => {}
                }
            }
            polls += 1;
            self.store.update(|s| {
                s.transition = TransitionPhase::AwaitingSettlement { target, polls };
            });

            let response = self.backend.fetch_mode().await;
            if self.teardown.is_cancelled() {
                return ToggleOutcome::Cancelled;
            }
            match response {
                Ok(response) => {
                    if let Some(mode) = response.settled_mode() {
                        return self.settle(mode, polls);
                    }
                    debug!(poll = polls, "Mode not settled yet");
                }
                // Counts as an unsettled poll.
                Err(e) => debug!(poll = polls, error = %e, "Settlement poll failed"),
            }
        }

        let err = ConsoleError::SettlementTimeout { polls };
        warn!(%target, "{err}");
        self.finish(
            SettlementResult::Failure(SettlementFailure::DidNotSettle),
            err.notice(),
        );
        ToggleOutcome::DidNotSettle { polls }
    }

    fn settle(&self, mode: Mode, polls: u32) -> ToggleOutcome {
        info!(%mode, polls, "Mode settled");
        self.store.modify(|s| s.record_mode(mode, ModeOrigin::Transition));

        let acquisition = (mode == Mode::Stream).then(|| {
            let retrier = self.retrier.clone();
            let address = self.stream_address.clone();
            tokio::spawn(async move {
                let outcome = retrier.acquire(&address).await;
                if let Err(e) = &outcome {
                    warn!(error = %e, "Stream acquisition after toggle failed");
                }
                outcome
            })
        });

        self.finish(SettlementResult::Success(mode), None);
        ToggleOutcome::Settled {
            mode,
            polls,
            acquisition,
        }
    }

    fn finish(&self, result: SettlementResult, notice: Option<ErrorNotice>) {
        self.store.update(|s| {
            s.transition = TransitionPhase::Settled(result);
            s.loading = false;
            if notice.is_some() {
                s.error = notice;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryBudget;
    use crate::lifecycle::Shutdown;
    use crate::media::MediaAttachmentManager;
    use crate::mock::{MockBackend, MockSink};
    use crate::mode::ModeResponse;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<MockBackend>,
        store: StateStore,
        controller: ModeTransitionController,
        _shutdown: Shutdown,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MockBackend::new());
        let store = StateStore::default();
        let shutdown = Shutdown::new();
        let media = MediaAttachmentManager::new(Arc::new(MockSink::native()), None, store.clone());
        let retrier =
            StreamAcquisitionRetrier::new(backend.clone(), media, store.clone(), RetryBudget::default());
        let controller = ModeTransitionController::new(
            backend.clone(),
            store.clone(),
            retrier,
            "http://cam/s.m3u8",
            SettlementPolicy::default(),
            shutdown.teardown(),
        );
        Fixture {
            backend,
            store,
            controller,
            _shutdown: shutdown,
        }
    }

    #[test]
    fn test_loading_phases() {
        assert!(!TransitionPhase::Idle.is_loading());
        assert!(TransitionPhase::Requesting { target: Mode::Stream }.is_loading());
        assert!(TransitionPhase::AwaitingSettlement {
            target: Mode::Stream,
            polls: 1
        }
        .is_loading());
        assert!(!TransitionPhase::Settled(SettlementResult::Success(Mode::Motion)).is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_failure() {
        let f = fixture();
        f.backend
            .push_set_mode(Err(ConsoleError::NetworkUnavailable("refused".into())));

        let outcome = f.controller.toggle().await;
        assert!(matches!(outcome, ToggleOutcome::RequestFailed));
        assert_eq!(f.backend.mode_calls(), 0);

        let state = f.store.snapshot();
        assert!(!state.loading);
        assert_eq!(state.error, Some(ErrorNotice::ToggleFailed));
        assert_eq!(
            state.transition,
            TransitionPhase::Settled(SettlementResult::Failure(SettlementFailure::RequestFailed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_count_toward_budget() {
        let f = fixture();
        f.backend
            .push_mode(Err(ConsoleError::NetworkUnavailable("reset".into())));
        f.backend.push_mode(Ok(ModeResponse::new(Mode::Stream)));
        f.backend.set_probe_default(true);

        let outcome = f.controller.toggle().await;
        let ToggleOutcome::Settled {
            mode,
            polls,
            acquisition,
        } = outcome
        else {
            panic!("expected settlement");
        };
        assert_eq!(mode, Mode::Stream);
        assert_eq!(polls, 2);
        assert_eq!(f.backend.set_mode_targets(), vec![Mode::Stream]);

        let acquired = acquisition.unwrap().await.unwrap().unwrap();
        assert!(acquired.is_attached());
        assert!(f.store.snapshot().media.is_attached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_toggle_is_rejected() {
        let f = fixture();
        f.backend.set_latency(Duration::from_millis(500));
        f.backend.push_mode(Ok(ModeResponse::new(Mode::Stream)));
        f.backend.set_probe_default(true);

        let first = {
            let controller = f.controller.clone();
            tokio::spawn(async move { controller.toggle().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.controller.is_busy());
        assert!(matches!(f.controller.toggle().await, ToggleOutcome::Busy));

        assert!(matches!(first.await.unwrap(), ToggleOutcome::Settled { .. }));
        assert!(!f.controller.is_busy());
        assert_eq!(f.backend.set_mode_targets().len(), 1);
    }
}
