//! Stream acquisition with bounded retries.
//!
//! The HLS playlist usually appears a few seconds after the backend switches to
//! STREAM, so acquisition probes the address with `HEAD` at a fixed interval until it
//! answers or the attempt budget runs out, then hands off to the
//! [`MediaAttachmentManager`].
//!
//! Every call to [`StreamAcquisitionRetrier::acquire`] takes a new generation. A loop
//! stops as soon as a newer generation exists, and an attach it already made is
//! discarded, so two overlapping acquisitions never leave two live attachments.

use crate::backend::Backend;
use crate::config::RetryBudget;
use crate::error::{ConsoleError, Result};
use crate::media::{MediaAttachmentManager, ReleaseHandle};
use crate::state::{ErrorNotice, StateStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Per-acquisition attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub generation: u64,
    /// Probes issued so far.
    pub attempt: u32,
}

/// Result of an acquisition that did not fail.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// The stream is attached.
    Attached(ReleaseHandle),
    /// A newer acquisition or a cancel took over.
    Superseded {
        generation: u64,
        attempts: u32,
    },
}

impl AcquireOutcome {
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached(_))
    }
}

/// Probes the stream and attaches it once available.
#[derive(Clone)]
pub struct StreamAcquisitionRetrier {
    backend: Arc<dyn Backend>,
    media: MediaAttachmentManager,
    store: StateStore,
    budget: RetryBudget,
    generation: Arc<watch::Sender<u64>>,
}

impl StreamAcquisitionRetrier {
    pub fn new(
        backend: Arc<dyn Backend>,
        media: MediaAttachmentManager,
        store: StateStore,
        budget: RetryBudget,
    ) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            backend,
            media,
            store,
            budget,
            generation: Arc::new(generation),
        }
    }

    pub fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Stop any running acquisition without starting a new one.
    pub fn cancel(&self) {
        self.generation.send_modify(|g| *g += 1);
        debug!(generation = self.current_generation(), "Stream acquisition cancelled");
    }

    fn next_generation(&self) -> u64 {
        let mut next = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            next = *g;
        });
        next
    }

    fn is_superseded(&self, generation: u64) -> bool {
        *self.generation.borrow() > generation
    }

    /// Probe `address` until it answers, then attach it.
    ///
    /// Fails with [`ConsoleError::StreamExhausted`] after `max_attempts` failed probes.
    /// Attachment errors are returned as-is and never retried.
    pub async fn acquire(&self, address: &str) -> Result<AcquireOutcome> {
        let mut state = RetryState {
            generation: self.next_generation(),
            attempt: 0,
        };
        if self.store.clear_error_if(ErrorNotice::is_stream) {
            debug!("Cleared stale stream notice");
        }
        let mut bumps = self.generation.subscribe();
        let superseded = |state: RetryState| AcquireOutcome::Superseded {
            generation: state.generation,
            attempts: state.attempt,
        };

        info!(generation = state.generation, %address, "Acquiring stream");

        loop {
            if self.is_superseded(state.generation) {
                return Ok(superseded(state));
            }

            state.attempt += 1;
            let probe = self.backend.probe_stream(address).await;

            if self.is_superseded(state.generation) {
                debug!(generation = state.generation, "Discarding probe result of superseded acquisition");
                return Ok(superseded(state));
            }

            match probe {
                Ok(()) => {
                    info!(attempt = state.attempt, "Stream available");
                    let handle = self.media.attach(address)?;
                    if self.is_superseded(state.generation) {
                        self.media.discard(&handle);
                        return Ok(superseded(state));
                    }
                    return Ok(AcquireOutcome::Attached(handle));
                }
                Err(e) => {
                    debug!(
                        attempt = state.attempt,
                        max_attempts = self.budget.max_attempts,
                        error = %e,
                        "Stream probe failed"
                    );
                    if !self.budget.should_retry(state.attempt) {
                        break;
                    }
                }
            }

            let generation = state.generation;
            tokio::select! {
                () = sleep(self.budget.interval) => {}
                _ = bumps.wait_for(|g| *g > generation) => return Ok(superseded(state)),
            }
        }

        let err = ConsoleError::StreamExhausted {
            attempts: state.attempt,
        };
        warn!(generation = state.generation, "{err}");
        self.store
            .set_error(err.notice().unwrap_or(ErrorNotice::StreamUnavailable));
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockSink};
    use std::time::Duration;

    fn retrier(backend: &Arc<MockBackend>, store: &StateStore) -> StreamAcquisitionRetrier {
        let media = MediaAttachmentManager::new(Arc::new(MockSink::native()), None, store.clone());
        StreamAcquisitionRetrier::new(
            backend.clone(),
            media,
            store.clone(),
            RetryBudget {
                max_attempts: 20,
                interval: Duration::from_secs(2),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_attaches_on_first_successful_probe() {
        let backend = Arc::new(MockBackend::new());
        backend.push_probe_failures(3);
        backend.set_probe_default(true);
        let store = StateStore::default();

        let outcome = retrier(&backend, &store).acquire("http://cam/s.m3u8").await.unwrap();
        assert!(outcome.is_attached());
        assert_eq!(backend.probe_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retrying() {
        let backend = Arc::new(MockBackend::new());
        let store = StateStore::default();
        let retrier = retrier(&backend, &store);

        let task = {
            let retrier = retrier.clone();
            tokio::spawn(async move { retrier.acquire("http://cam/s.m3u8").await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        retrier.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, AcquireOutcome::Superseded { attempts: 3, .. }));
        assert!(store.snapshot().error.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.probe_calls(), 3);
    }
}
