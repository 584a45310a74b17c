//! Console facade
//!
//! Wires every component from one [`ConsoleConfig`] and owns their background tasks.
//!
//! # Tasks started by [`Console::start`]
//!
//! - telemetry poller, image refresher and mode watcher loops
//! - the stream reconciler, which follows the published mode:
//!   - leaving STREAM cancels pending acquisitions and runs the media detach sequence
//!   - entering STREAM because the watcher saw it starts an acquisition (a settled
//!     toggle starts its own)
//!
//! The reconciler compares `mode_epoch`, not just the mode, because a `watch`
//! subscriber only sees the latest value. A STREAM → MOTION → STREAM run published
//! between two wake-ups still counts as leaving and re-entering STREAM.
//!
//! # Example
//!
//! ```rust,ignore
//! let console = Console::with_http_backend(config, sink, None)?;
//! console.start();
//! let mut state = console.subscribe();
//! console.toggle_mode().await;
//! console.shutdown().await;
//! ```

use crate::backend::{Backend, HttpBackend};
use crate::capture::{CaptureOutcome, CaptureTrigger};
use crate::config::ConsoleConfig;
use crate::connection::Endpoints;
use crate::error::Result;
use crate::image::ImageRefresher;
use crate::lifecycle::{PollOutcome, Shutdown, Teardown};
use crate::media::{DisplaySink, MediaAttachmentManager, TransportFactory};
use crate::mode::{Mode, ModeOrigin};
use crate::state::{ConsoleState, StateStore};
use crate::stream::StreamAcquisitionRetrier;
use crate::telemetry::TelemetryPoller;
use crate::transition::{ModeTransitionController, ToggleOutcome};
use crate::watcher::ModeWatcher;
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The running console.
pub struct Console {
    config: ConsoleConfig,
    endpoints: Arc<Endpoints>,
    store: StateStore,
    shutdown: Shutdown,
    telemetry: TelemetryPoller,
    images: ImageRefresher,
    watcher: ModeWatcher,
    media: MediaAttachmentManager,
    retrier: StreamAcquisitionRetrier,
    controller: ModeTransitionController,
    capture: CaptureTrigger,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Console {
    /// Build a console over `backend`. `transports` enables adaptive playback.
    pub fn new(
        config: ConsoleConfig,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn DisplaySink>,
        transports: Option<Arc<dyn TransportFactory>>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoints = Arc::new(config.endpoints()?);
        let store = StateStore::new(config.history.capacity);
        let shutdown = Shutdown::new();

        let telemetry = TelemetryPoller::new(backend.clone(), store.clone(), config.poll.sensor);
        let images = ImageRefresher::new(endpoints.clone(), store.clone(), config.poll.image);
        let watcher = ModeWatcher::new(backend.clone(), store.clone(), config.poll.mode);
        let media = MediaAttachmentManager::new(sink, transports, store.clone());
        let retrier = StreamAcquisitionRetrier::new(
            backend.clone(),
            media.clone(),
            store.clone(),
            config.retry,
        );
        let controller = ModeTransitionController::new(
            backend.clone(),
            store.clone(),
            retrier.clone(),
            endpoints.stream_address(),
            config.settlement,
            shutdown.teardown(),
        );
        let capture = CaptureTrigger::new(
            backend,
            store.clone(),
            images.clone(),
            config.capture.refresh_delay,
            shutdown.teardown(),
        );

        Ok(Self {
            config,
            endpoints,
            store,
            shutdown,
            telemetry,
            images,
            watcher,
            media,
            retrier,
            controller,
            capture,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build a console talking HTTP to the configured endpoints.
    pub fn with_http_backend(
        config: ConsoleConfig,
        sink: Arc<dyn DisplaySink>,
        transports: Option<Arc<dyn TransportFactory>>,
    ) -> Result<Self> {
        let endpoints = Arc::new(config.endpoints()?);
        let backend = HttpBackend::new(endpoints, config.http.timeout)?;
        Self::new(config, Arc::new(backend), sink, transports)
    }

    /// Start the background loops. Calling it again has no effect.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() || self.shutdown.is_triggered() {
            warn!("Console already started or shut down");
            return;
        }

        info!(
            api_base = %self.endpoints.api_base(),
            stream = %self.endpoints.stream_address(),
            sensors = %self.endpoints.sensor_address(),
            "Starting console"
        );

        let teardown = self.shutdown.teardown();
        tasks.push(self.spawn_reconciler(teardown.clone()));
        tasks.push(self.telemetry.clone().spawn(teardown.clone()));
        tasks.push(self.images.clone().spawn(teardown.clone()));
        tasks.push(self.watcher.clone().spawn(teardown));
    }

    fn spawn_reconciler(&self, teardown: Teardown) -> JoinHandle<()> {
        let mut rx = self.store.subscribe();
        let (last, epoch) = {
            let state = rx.borrow_and_update();
            (state.mode, state.mode_epoch)
        };
        let reconciler = StreamReconciler {
            retrier: self.retrier.clone(),
            media: self.media.clone(),
            address: self.endpoints.stream_address().to_string(),
            last,
            epoch,
        };
        tokio::spawn(reconciler.run(rx, teardown))
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConsoleState {
        self.store.snapshot()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConsoleState> {
        self.store.subscribe()
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Toggle between STREAM and MOTION.
    pub async fn toggle_mode(&self) -> ToggleOutcome {
        self.controller.toggle().await
    }

    /// Fire a still capture.
    pub async fn trigger_capture(&self) -> CaptureOutcome {
        self.capture.trigger().await
    }

    /// Run one mode-watcher poll outside the loop.
    pub async fn sync_mode(&self) -> PollOutcome {
        self.watcher.poll_once(&self.shutdown.teardown()).await
    }

    /// Run one telemetry poll outside the loop.
    pub async fn sync_sensors(&self) -> PollOutcome {
        self.telemetry.poll_once(&self.shutdown.teardown()).await
    }

    /// Stop every loop, cancel acquisitions and detach media. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        self.retrier.cancel();
        if self.media.detach() {
            debug!("Media detached on shutdown");
        }

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Console shut down");
    }
}

/// Keeps media in line with the published mode.
struct StreamReconciler {
    retrier: StreamAcquisitionRetrier,
    media: MediaAttachmentManager,
    address: String,
    last: Mode,
    epoch: u64,
}

impl StreamReconciler {
    async fn run(mut self, mut rx: watch::Receiver<ConsoleState>, teardown: Teardown) {
        loop {
            tokio::select! {
                biased;
                () = teardown.cancelled() => break,
                changed = rx.changed() => if changed.is_err() { break },
            }

            let (mode, origin, epoch) = {
                let state = rx.borrow_and_update();
                (state.mode, state.mode_origin, state.mode_epoch)
            };
            self.on_mode(mode, origin, epoch);
        }
        debug!("Stream reconciler stopped");
    }

    fn on_mode(&mut self, mode: Mode, origin: ModeOrigin, epoch: u64) {
        if epoch == self.epoch {
            return;
        }
        let missed = epoch.saturating_sub(self.epoch) > 1;
        self.epoch = epoch;
        let previous = std::mem::replace(&mut self.last, mode);

        // Same mode with a newer epoch means STREAM was left and re-entered unseen.
        // A toggle that re-entered is already acquiring on its own.
        let left_stream = mode != Mode::Stream
            || (previous == Mode::Stream && origin == ModeOrigin::Watcher);
        if left_stream {
            self.retrier.cancel();
            if self.media.detach() {
                info!(to = %mode, missed, "Left STREAM, media detached");
            }
        }

        if mode == Mode::Stream && origin == ModeOrigin::Watcher {
            let retrier = self.retrier.clone();
            let address = self.address.clone();
            tokio::spawn(async move {
                if let Err(e) = retrier.acquire(&address).await {
                    warn!(error = %e, "Stream acquisition failed");
                }
            });
        }
    }
}
