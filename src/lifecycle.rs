//! Teardown latch and periodic task runner.
//!
//! Every background loop in the console holds a [`Teardown`] handle. Once the
//! owning [`Shutdown`] is triggered (or dropped) no loop may start another tick,
//! and a tick whose request is still in flight must discard its result instead
//! of writing to the state store.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Owner side of the teardown latch.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// New, untriggered latch.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Observer handle for a background task.
    pub fn teardown(&self) -> Teardown {
        Teardown {
            rx: self.tx.subscribe(),
        }
    }

    /// Latch teardown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|fired| {
            let was = *fired;
            *fired = true;
            !was
        });
    }

    /// Whether [`Shutdown::trigger`] has been called.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the teardown latch.
#[derive(Debug, Clone)]
pub struct Teardown {
    rx: watch::Receiver<bool>,
}

impl Teardown {
    /// True once teardown fired or the owning [`Shutdown`] was dropped.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve when teardown fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone, which also counts as teardown.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// What a single poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The result was written to state.
    Applied,
    /// The request failed; the failure was recorded.
    Failed,
    /// Teardown fired while the request was in flight; nothing was written.
    Discarded,
}

/// Run `tick` once immediately and then every `period` until teardown.
///
/// Ticks never overlap: a slow tick delays the next one rather than bursting.
/// A tick already running when teardown fires is allowed to finish; its own
/// latch check decides whether to write anything.
pub fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    teardown: Teardown,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = PollOutcome> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = teardown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if teardown.is_cancelled() {
                break;
            }
            let outcome = tick().await;
            trace!(task = name, ?outcome, "Poll tick");
        }

        debug!(task = name, "Poll loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        let teardown = shutdown.teardown();
        assert!(!teardown.is_cancelled());

        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(teardown.is_cancelled());
    }

    #[test]
    fn test_dropped_owner_counts_as_teardown() {
        let shutdown = Shutdown::new();
        let teardown = shutdown.teardown();
        drop(shutdown);
        assert!(teardown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_every_ticks_immediately_then_periodically() {
        let shutdown = Shutdown::new();
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();

        let handle = run_every("test", Duration::from_secs(10), shutdown.teardown(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                PollOutcome::Applied
            }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
