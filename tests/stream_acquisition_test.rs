//! Integration tests for stream acquisition retries and supersession.

use std::sync::Arc;
use std::time::Duration;
use wildlife_console::config::RetryBudget;
use wildlife_console::media::{MediaAttachmentManager, TransportFactory};
use wildlife_console::mock::{MockBackend, MockSink, MockTransportFactory};
use wildlife_console::stream::{AcquireOutcome, StreamAcquisitionRetrier};
use wildlife_console::{ConsoleError, ErrorNotice, StateStore};

const STREAM: &str = "http://127.0.0.1:8888/stream/index.m3u8";

struct Harness {
    backend: Arc<MockBackend>,
    transports: Arc<MockTransportFactory>,
    store: StateStore,
    retrier: StreamAcquisitionRetrier,
}

fn harness() -> Harness {
    let backend = Arc::new(MockBackend::new());
    let transports = Arc::new(MockTransportFactory::new());
    let store = StateStore::default();
    let media = MediaAttachmentManager::new(
        Arc::new(MockSink::adaptive()),
        Some(transports.clone() as Arc<dyn TransportFactory>),
        store.clone(),
    );
    let retrier = StreamAcquisitionRetrier::new(
        backend.clone(),
        media,
        store.clone(),
        RetryBudget::default(),
    );
    Harness {
        backend,
        transports,
        store,
        retrier,
    }
}

#[tokio::test(start_paused = true)]
async fn test_nineteen_failures_then_success_attaches_once() {
    let h = harness();
    h.backend.push_probe_failures(19);
    h.backend.set_probe_default(true);

    let start = tokio::time::Instant::now();
    let outcome = h.retrier.acquire(STREAM).await.unwrap();

    assert!(outcome.is_attached());
    assert_eq!(h.backend.probe_calls(), 20);
    assert_eq!(h.transports.created(), 1);
    // 19 fixed 2s gaps, no backoff growth
    assert_eq!(start.elapsed(), Duration::from_secs(38));
    assert!(h.store.snapshot().media.is_attached());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_never_attaches() {
    let h = harness();

    let err = h.retrier.acquire(STREAM).await.unwrap_err();

    assert!(matches!(err, ConsoleError::StreamExhausted { attempts: 20 }));
    assert_eq!(h.backend.probe_calls(), 20);
    assert_eq!(h.transports.created(), 0);
    assert_eq!(h.store.snapshot().error, Some(ErrorNotice::StreamUnavailable));

    // Not restarted on its own
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.backend.probe_calls(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_newer_acquisition_supersedes_older() {
    let h = harness();
    let retrier = h.retrier.clone();
    let first = tokio::spawn(async move { retrier.acquire(STREAM).await });

    // First loop probes at 0s and 2s, then waits for its 4s probe
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.backend.set_probe_default(true);
    let second = h.retrier.acquire(STREAM).await.unwrap();

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, AcquireOutcome::Superseded { attempts: 2, .. }));
    assert!(second.is_attached());
    assert_eq!(h.backend.probe_calls(), 3);
    assert_eq!(h.transports.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_successful_probe_does_not_attach() {
    let h = harness();
    h.backend.set_probe_default(true);
    h.backend.set_latency(Duration::from_secs(1));

    let retrier = h.retrier.clone();
    let stale = tokio::spawn(async move { retrier.acquire(STREAM).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    let fresh = h.retrier.acquire(STREAM).await.unwrap();

    let stale = stale.await.unwrap().unwrap();
    assert!(matches!(stale, AcquireOutcome::Superseded { attempts: 1, .. }));
    let AcquireOutcome::Attached(handle) = fresh else {
        panic!("fresh acquisition should attach");
    };
    assert_eq!(h.transports.created(), 1);
    assert!(!handle.is_released());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_success_leaves_no_error() {
    let h = harness();
    let retrier = h.retrier.clone();
    let task = tokio::spawn(async move { retrier.acquire(STREAM).await });

    tokio::time::sleep(Duration::from_secs(9)).await;
    h.retrier.cancel();

    let outcome = task.await.unwrap().unwrap();
    assert!(!outcome.is_attached());
    assert!(h.store.snapshot().error.is_none());
    assert_eq!(h.transports.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_acquisition_clears_exhaustion_notice() {
    let h = harness();
    h.retrier.acquire(STREAM).await.unwrap_err();
    assert_eq!(h.store.snapshot().error, Some(ErrorNotice::StreamUnavailable));

    h.backend.set_probe_default(true);
    let outcome = h.retrier.acquire(STREAM).await.unwrap();

    assert!(outcome.is_attached());
    let state = h.store.snapshot();
    assert!(state.media.is_attached());
    assert!(state.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_new_acquisition_keeps_unrelated_notice() {
    let h = harness();
    h.store.set_error(ErrorNotice::SensorOffline);
    h.backend.set_probe_default(true);

    assert!(h.retrier.acquire(STREAM).await.unwrap().is_attached());
    assert_eq!(h.store.snapshot().error, Some(ErrorNotice::SensorOffline));
}
