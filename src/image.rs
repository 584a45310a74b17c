//! Cache-busted still image references.
//!
//! The refresher makes no network call. It only hands the renderer a new URL whose
//! `t` query token differs from every earlier one, which forces a reload.

use crate::connection::Endpoints;
use crate::lifecycle::{run_every, PollOutcome, Teardown};
use crate::state::StateStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Locator of the latest still image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageReference {
    pub url: String,
    pub token: i64,
}

/// Strictly increasing epoch-millisecond tokens.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: AtomicI64,
}

impl CacheBuster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch milliseconds, bumped past the previous token if the clock has not
    /// moved on.
    pub fn next_token(&self) -> i64 {
        self.next_token_at(Utc::now().timestamp_millis())
    }

    fn next_token_at(&self, now_ms: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Publishes a fresh [`ImageReference`] periodically and on demand.
#[derive(Clone)]
pub struct ImageRefresher {
    endpoints: Arc<Endpoints>,
    store: StateStore,
    buster: Arc<CacheBuster>,
    period: Duration,
}

impl ImageRefresher {
    pub fn new(endpoints: Arc<Endpoints>, store: StateStore, period: Duration) -> Self {
        Self {
            endpoints,
            store,
            buster: Arc::new(CacheBuster::new()),
            period,
        }
    }

    /// Build a new reference without publishing it.
    pub fn reference(&self) -> ImageReference {
        let token = self.buster.next_token();
        ImageReference {
            url: self.endpoints.latest_image_url(token),
            token,
        }
    }

    /// Publish a new reference unless teardown fired.
    pub fn refresh(&self, teardown: &Teardown) -> PollOutcome {
        if teardown.is_cancelled() {
            debug!("Skipping image refresh after teardown");
            return PollOutcome::Discarded;
        }
        let image = self.reference();
        trace!(url = %image.url, "Image reference refreshed");
        self.store.update(|s| s.image = Some(image));
        PollOutcome::Applied
    }

    /// Refresh every period until teardown.
    pub fn spawn(self, teardown: Teardown) -> JoinHandle<()> {
        let period = self.period;
        let latch = teardown.clone();
        run_every("image", period, teardown, move || {
            let outcome = self.refresh(&latch);
            async move { outcome }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[test]
    fn test_tokens_strictly_increase() {
        let buster = CacheBuster::new();
        assert_eq!(buster.next_token_at(1_000), 1_000);
        assert_eq!(buster.next_token_at(1_000), 1_001);
        assert_eq!(buster.next_token_at(999), 1_002);
        assert_eq!(buster.next_token_at(5_000), 5_000);
    }

    #[test]
    fn test_refresh_publishes_distinct_urls() {
        let store = StateStore::default();
        let shutdown = Shutdown::new();
        let refresher = ImageRefresher::new(
            Arc::new(Endpoints::default()),
            store.clone(),
            Duration::from_secs(30),
        );

        refresher.refresh(&shutdown.teardown());
        let first = store.snapshot().image.unwrap();
        refresher.refresh(&shutdown.teardown());
        let second = store.snapshot().image.unwrap();

        assert!(first.url.starts_with("http://127.0.0.1:5001/latest-image?t="));
        assert_ne!(first.url, second.url);
        assert!(second.token > first.token);
    }

    #[test]
    fn test_refresh_after_teardown_is_discarded() {
        let store = StateStore::default();
        let shutdown = Shutdown::new();
        let refresher = ImageRefresher::new(
            Arc::new(Endpoints::default()),
            store.clone(),
            Duration::from_secs(30),
        );
        shutdown.trigger();
        assert_eq!(refresher.refresh(&shutdown.teardown()), PollOutcome::Discarded);
        assert!(store.snapshot().image.is_none());
    }
}
