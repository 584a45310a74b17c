//! Mock backend, display sink and transport
//!
//! In-memory implementations of the console's seams for testing without a camera.
//! All waits use `tokio::time`, so tests under `start_paused = true` stay
//! deterministic.
//!
//! # Available Mocks
//!
//! - `MockBackend` - scripted responses per operation, call counters, optional
//!   latency and a gate that holds every response until released
//! - `MockSink` - records the calls made on the display surface
//! - `MockTransportFactory` - counts created and destroyed transports and lets a
//!   test inject transport events
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = Arc::new(MockBackend::new());
//! backend.push_mode(Ok(ModeResponse::new(Mode::Motion)));
//! backend.push_probe_failures(19);
//! backend.set_probe_default(true);
//! ```

use crate::backend::Backend;
use crate::error::{ConsoleError, Result};
use crate::media::{AdaptiveTransport, DisplaySink, TransportEvent, TransportFactory, HLS_MIME_TYPE};
use crate::mode::{Mode, ModeResponse};
use crate::telemetry::SensorSample;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::time::sleep;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockBackend
// =============================================================================

/// Scripted [`Backend`].
///
/// Each operation pops its next scripted result. With an empty script:
/// - `fetch_mode` returns the default mode (none unless set)
/// - `fetch_sensors` fails with `NetworkUnavailable`
/// - `probe_stream` succeeds only if `set_probe_default(true)` was called
/// - `set_mode` and `trigger_capture` succeed
pub struct MockBackend {
    modes: Mutex<VecDeque<Result<ModeResponse>>>,
    sensors: Mutex<VecDeque<Result<SensorSample>>>,
    probes: Mutex<VecDeque<Result<()>>>,
    set_modes: Mutex<VecDeque<Result<()>>>,
    captures: Mutex<VecDeque<Result<()>>>,

    default_mode: Mutex<Option<Mode>>,
    probe_default: AtomicBool,
    latency: Mutex<Duration>,
    gate: watch::Sender<bool>,

    mode_calls: AtomicU32,
    sensor_calls: AtomicU32,
    probe_calls: AtomicU32,
    capture_calls: AtomicU32,
    set_mode_targets: Mutex<Vec<Mode>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            modes: Mutex::new(VecDeque::new()),
            sensors: Mutex::new(VecDeque::new()),
            probes: Mutex::new(VecDeque::new()),
            set_modes: Mutex::new(VecDeque::new()),
            captures: Mutex::new(VecDeque::new()),
            default_mode: Mutex::new(None),
            probe_default: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            gate,
            mode_calls: AtomicU32::new(0),
            sensor_calls: AtomicU32::new(0),
            probe_calls: AtomicU32::new(0),
            capture_calls: AtomicU32::new(0),
            set_mode_targets: Mutex::new(Vec::new()),
        }
    }

    pub fn push_mode(&self, result: Result<ModeResponse>) {
        lock(&self.modes).push_back(result);
    }

    /// Queue `count` UNKNOWN mode responses.
    pub fn push_unknown_modes(&self, count: usize) {
        for _ in 0..count {
            self.push_mode(Ok(ModeResponse::new(Mode::Unknown)));
        }
    }

    pub fn push_sensor(&self, result: Result<SensorSample>) {
        lock(&self.sensors).push_back(result);
    }

    pub fn push_probe(&self, result: Result<()>) {
        lock(&self.probes).push_back(result);
    }

    /// Queue `count` failing stream probes.
    pub fn push_probe_failures(&self, count: usize) {
        for _ in 0..count {
            self.push_probe(Err(ConsoleError::BadResponse {
                url: "mock://stream".into(),
                status: 404,
            }));
        }
    }

    pub fn push_set_mode(&self, result: Result<()>) {
        lock(&self.set_modes).push_back(result);
    }

    pub fn push_capture(&self, result: Result<()>) {
        lock(&self.captures).push_back(result);
    }

    /// Mode reported once the mode script is empty.
    pub fn set_default_mode(&self, mode: Option<Mode>) {
        *lock(&self.default_mode) = mode;
    }

    /// Outcome of probes once the probe script is empty.
    pub fn set_probe_default(&self, available: bool) {
        self.probe_default.store(available, Ordering::SeqCst);
    }

    /// Delay applied to every operation.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Hold every response until [`MockBackend::release_responses`].
    pub fn hold_responses(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_responses(&self) {
        self.gate.send_replace(true);
    }

    pub fn mode_calls(&self) -> u32 {
        self.mode_calls.load(Ordering::SeqCst)
    }

    pub fn sensor_calls(&self) -> u32 {
        self.sensor_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> u32 {
        self.capture_calls.load(Ordering::SeqCst)
    }

    /// Targets of every set-mode request, in order.
    pub fn set_mode_targets(&self) -> Vec<Mode> {
        lock(&self.set_mode_targets).clone()
    }

    async fn respond(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`.
        let _ = gate.wait_for(|open| *open).await;
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_mode(&self) -> Result<ModeResponse> {
        self.mode_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        let scripted = lock(&self.modes).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ModeResponse {
                mode: *lock(&self.default_mode),
            })
        })
    }

    async fn set_mode(&self, target: Mode) -> Result<()> {
        lock(&self.set_mode_targets).push(target);
        self.respond().await;
        let scripted = lock(&self.set_modes).pop_front();
        scripted.unwrap_or(Ok(()))
    }

    async fn fetch_sensors(&self) -> Result<SensorSample> {
        self.sensor_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        let scripted = lock(&self.sensors).pop_front();
        scripted.unwrap_or_else(|| Err(ConsoleError::NetworkUnavailable("no sensor scripted".into())))
    }

    async fn probe_stream(&self, _address: &str) -> Result<()> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        let scripted = lock(&self.probes).pop_front();
        scripted.unwrap_or_else(|| {
            if self.probe_default.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ConsoleError::BadResponse {
                    url: "mock://stream".into(),
                    status: 404,
                })
            }
        })
    }

    async fn trigger_capture(&self) -> Result<()> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.respond().await;
        let scripted = lock(&self.captures).pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

// =============================================================================
// MockSink
// =============================================================================

/// A call made on a [`MockSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    SetSource(String),
    Play,
    Pause,
    ClearSource,
    Reset,
}

/// Recording [`DisplaySink`] with fixed capabilities.
pub struct MockSink {
    adaptive: bool,
    native: bool,
    calls: Mutex<Vec<SinkCall>>,
}

impl MockSink {
    pub fn new(adaptive: bool, native: bool) -> Self {
        Self {
            adaptive,
            native,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sink driven by an adaptive transport (and not natively).
    pub fn adaptive() -> Self {
        Self::new(true, false)
    }

    /// Sink with built-in HLS playback.
    pub fn native() -> Self {
        Self::new(false, true)
    }

    pub fn unsupported() -> Self {
        Self::new(false, false)
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: SinkCall) {
        lock(&self.calls).push(call);
    }
}

impl DisplaySink for MockSink {
    fn supports_adaptive_streaming(&self) -> bool {
        self.adaptive
    }

    fn can_play_type(&self, mime: &str) -> bool {
        self.native && mime == HLS_MIME_TYPE
    }

    fn set_source(&self, address: &str) {
        self.record(SinkCall::SetSource(address.to_string()));
    }

    fn play(&self) {
        self.record(SinkCall::Play);
    }

    fn pause(&self) {
        self.record(SinkCall::Pause);
    }

    fn clear_source(&self) {
        self.record(SinkCall::ClearSource);
    }

    fn reset(&self) {
        self.record(SinkCall::Reset);
    }
}

// =============================================================================
// MockTransportFactory
// =============================================================================

struct MockTransport {
    destroyed: Arc<AtomicUsize>,
}

impl AdaptiveTransport for MockTransport {
    fn destroy(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`TransportFactory`] producing counting transports.
pub struct MockTransportFactory {
    created: AtomicUsize,
    destroyed: Arc<AtomicUsize>,
    events: Mutex<Option<UnboundedSender<TransportEvent>>>,
    fail_create: AtomicBool,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: Arc::new(AtomicUsize::new(0)),
            events: Mutex::new(None),
            fail_create: AtomicBool::new(false),
        }
    }

    /// Make every following `create` fail.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Total `destroy` calls across all transports.
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Send `event` from the most recently created transport. Returns false if its
    /// observer is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        lock(&self.events)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

impl Default for MockTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        address: &str,
        _sink: Arc<dyn DisplaySink>,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn AdaptiveTransport>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ConsoleError::TransportFatal(format!(
                "mock transport refused {address}"
            )));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        *lock(&self.events) = Some(events);
        Ok(Box::new(MockTransport {
            destroyed: self.destroyed.clone(),
        }))
    }
}
