//! Media attachment
//!
//! Binds the live HLS stream to the single display sink the console owns.
//!
//! # Playback paths
//!
//! Each attachment probes the sink once and picks a [`PlaybackCapability`]:
//! - `Adaptive` - a [`TransportFactory`] builds an adaptive-streaming transport bound to
//!   the sink. The transport reports [`TransportEvent`]s on a channel consumed by an
//!   observer task, which applies [`FaultAction::for_fault`].
//! - `Native` - the sink plays HLS itself; the address is set as its source.
//! - `Unsupported` - attachment fails with [`ConsoleError::PlaybackUnsupported`].
//!
//! # Detach sequence
//!
//! Before every re-attach, and whenever the mode leaves STREAM, the previous
//! attachment is torn down in a fixed order: pause sink, clear source, reset sink,
//! release the handle. At most one attachment is live at a time.

use crate::error::{ConsoleError, Result};
use crate::state::{ErrorNotice, StateStore};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// MIME type a sink must accept for native HLS playback.
pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

// =============================================================================
// Display sink and transport seams
// =============================================================================

/// The video surface the view renderer provides.
///
/// Methods are synchronous; implementations forward to whatever owns the surface.
pub trait DisplaySink: Send + Sync {
    /// Whether an adaptive-streaming transport can drive this sink.
    fn supports_adaptive_streaming(&self) -> bool;

    /// Whether the sink can play `mime` without a transport.
    fn can_play_type(&self, mime: &str) -> bool;

    /// Assign `address` as the sink's source.
    fn set_source(&self, address: &str);

    /// Start playback.
    fn play(&self);

    /// Pause playback.
    fn pause(&self);

    /// Remove the current source.
    fn clear_source(&self);

    /// Reset the sink to its empty state.
    fn reset(&self);
}

/// A live adaptive-streaming transport.
pub trait AdaptiveTransport: Send {
    /// Stop loading and dispose all resources. Called exactly once.
    fn destroy(&mut self);
}

/// Builds transports bound to a sink.
pub trait TransportFactory: Send + Sync {
    /// Start loading `address` into `sink`, reporting events on `events`.
    fn create(
        &self,
        address: &str,
        sink: Arc<dyn DisplaySink>,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn AdaptiveTransport>>;
}

// =============================================================================
// Capability probe
// =============================================================================

/// Playback path chosen for one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackCapability {
    Adaptive,
    Native,
    Unsupported,
}

impl PlaybackCapability {
    /// Adaptive wins when both the sink and a transport factory allow it, then native.
    pub fn probe(sink: &dyn DisplaySink, transport_available: bool) -> Self {
        if transport_available && sink.supports_adaptive_streaming() {
            Self::Adaptive
        } else if sink.can_play_type(HLS_MIME_TYPE) {
            Self::Native
        } else {
            Self::Unsupported
        }
    }
}

impl fmt::Display for PlaybackCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Adaptive => "adaptive",
            Self::Native => "native",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Whether video is attached to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MediaStatus {
    #[default]
    Detached,
    Attached {
        capability: PlaybackCapability,
        address: String,
    },
}

impl MediaStatus {
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached { .. })
    }
}

// =============================================================================
// Transport events and fault policy
// =============================================================================

/// Fault class reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    /// Playlist or segment download failure.
    Network,
    /// Decode or buffer failure.
    Media,
    /// Anything else.
    Other,
}

/// A transport fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    pub category: FaultCategory,
    /// The transport cannot recover on its own.
    pub fatal: bool,
    pub details: String,
}

/// Events emitted by an [`AdaptiveTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The playlist loaded; playback may start.
    ManifestParsed,
    Fault(TransportFault),
}

/// What the observer does with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Log and keep playing.
    Continue,
    /// Tear the attachment down and report playback failure.
    Abort,
}

impl FaultAction {
    /// Fault policy:
    ///
    /// | category | fatal | action |
    /// |---|---|---|
    /// | any | no | Continue |
    /// | Network | yes | Abort |
    /// | Media | yes | Abort |
    /// | Other | yes | Continue |
    pub fn for_fault(fault: &TransportFault) -> Self {
        match (fault.category, fault.fatal) {
            (_, false) => Self::Continue,
            (FaultCategory::Network | FaultCategory::Media, true) => Self::Abort,
            (FaultCategory::Other, true) => Self::Continue,
        }
    }
}

// =============================================================================
// Release handle
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct HandleInner {
    id: u64,
    capability: PlaybackCapability,
    released: AtomicBool,
    transport: Mutex<Option<Box<dyn AdaptiveTransport>>>,
    observer: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of one attachment's transport and observer task.
///
/// Clones share the same attachment. [`ReleaseHandle::release`] may be called any
/// number of times from any clone; only the first call does anything.
#[derive(Clone)]
pub struct ReleaseHandle {
    inner: Arc<HandleInner>,
}

impl ReleaseHandle {
    fn new(
        id: u64,
        capability: PlaybackCapability,
        transport: Option<Box<dyn AdaptiveTransport>>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                capability,
                released: AtomicBool::new(false),
                transport: Mutex::new(transport),
                observer: Mutex::new(None),
            }),
        }
    }

    fn set_observer(&self, observer: JoinHandle<()>) {
        *lock(&self.inner.observer) = Some(observer);
        // Released between spawn and store: nobody else will abort it.
        if self.is_released() {
            if let Some(observer) = lock(&self.inner.observer).take() {
                observer.abort();
            }
        }
    }

    /// Attachment id, unique per manager.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn capability(&self) -> PlaybackCapability {
        self.inner.capability
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Destroy the transport and stop the observer. Returns false if already released.
    pub fn release(&self) -> bool {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(mut transport) = lock(&self.inner.transport).take() {
            transport.destroy();
        }
        if let Some(observer) = lock(&self.inner.observer).take() {
            observer.abort();
        }
        debug!(attachment = self.inner.id, "Attachment released");
        true
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("id", &self.inner.id)
            .field("capability", &self.inner.capability)
            .field("released", &self.is_released())
            .finish()
    }
}

// =============================================================================
// Attachment manager
// =============================================================================

struct MediaShared {
    sink: Arc<dyn DisplaySink>,
    transports: Option<Arc<dyn TransportFactory>>,
    store: StateStore,
    current: Mutex<Option<ReleaseHandle>>,
    next_id: AtomicU64,
}

impl MediaShared {
    fn detach_locked(&self, current: &mut Option<ReleaseHandle>) -> bool {
        let Some(handle) = current.take() else {
            return false;
        };
        self.sink.pause();
        self.sink.clear_source();
        self.sink.reset();
        handle.release();
        self.store.modify(|s| {
            let changed = s.media.is_attached();
            s.media = MediaStatus::Detached;
            changed
        });
        true
    }

    fn abort_attachment(&self, id: u64, fault: &TransportFault) {
        let mut current = lock(&self.current);
        if current.as_ref().map(ReleaseHandle::id) != Some(id) {
            return;
        }
        error!(attachment = id, category = ?fault.category, details = %fault.details, "Fatal transport fault, detaching");
        self.detach_locked(&mut current);
        let err = ConsoleError::TransportFatal(fault.details.clone());
        self.store.set_error(err.notice().unwrap_or(ErrorNotice::PlaybackFailed));
    }
}

/// Attaches the stream to the display sink and owns the live [`ReleaseHandle`].
#[derive(Clone)]
pub struct MediaAttachmentManager {
    shared: Arc<MediaShared>,
}

impl MediaAttachmentManager {
    /// `transports` is `None` when no adaptive transport is available; only native
    /// playback is then attempted.
    pub fn new(
        sink: Arc<dyn DisplaySink>,
        transports: Option<Arc<dyn TransportFactory>>,
        store: StateStore,
    ) -> Self {
        Self {
            shared: Arc::new(MediaShared {
                sink,
                transports,
                store,
                current: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Detach whatever is live, then attach `address`.
    pub fn attach(&self, address: &str) -> Result<ReleaseHandle> {
        let shared = &self.shared;
        let mut current = lock(&shared.current);
        if shared.detach_locked(&mut current) {
            debug!("Previous attachment detached before re-attach");
        }

        let capability = PlaybackCapability::probe(shared.sink.as_ref(), shared.transports.is_some());
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let handle = match (capability, shared.transports.as_ref()) {
            (PlaybackCapability::Adaptive, Some(factory)) => {
                let (tx, rx) = unbounded_channel();
                let transport = factory
                    .create(address, shared.sink.clone(), tx)
                    .inspect_err(|e| {
                        warn!(error = %e, "Transport creation failed");
                        shared.store.set_error(ErrorNotice::PlaybackFailed);
                    })?;
                let handle = ReleaseHandle::new(id, capability, Some(transport));
                let observer = tokio::spawn(observe(Arc::downgrade(shared), id, rx));
                handle.set_observer(observer);
                handle
            }
            (PlaybackCapability::Native, _) => {
                shared.sink.set_source(address);
                shared.sink.play();
                ReleaseHandle::new(id, capability, None)
            }
            _ => {
                let err = ConsoleError::PlaybackUnsupported;
                warn!(%address, "{err}");
                shared
                    .store
                    .set_error(err.notice().unwrap_or(ErrorNotice::PlaybackUnsupported));
                return Err(err);
            }
        };

        info!(attachment = id, %capability, %address, "Stream attached");
        shared.store.update(|s| {
            s.media = MediaStatus::Attached {
                capability,
                address: address.to_string(),
            };
        });
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Run the detach sequence on the live attachment. Returns false if none was live.
    pub fn detach(&self) -> bool {
        let mut current = lock(&self.shared.current);
        self.shared.detach_locked(&mut current)
    }

    /// Drop an attachment that is no longer wanted. If it is the live one the full
    /// detach sequence runs; otherwise it is only released.
    pub fn discard(&self, handle: &ReleaseHandle) {
        let mut current = lock(&self.shared.current);
        if current.as_ref().map(ReleaseHandle::id) == Some(handle.id()) {
            self.shared.detach_locked(&mut current);
        } else {
            handle.release();
        }
    }

    /// Id of the live attachment, if any.
    pub fn current_id(&self) -> Option<u64> {
        lock(&self.shared.current).as_ref().map(ReleaseHandle::id)
    }
}

async fn observe(shared: Weak<MediaShared>, id: u64, mut events: UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            TransportEvent::ManifestParsed => {
                debug!(attachment = id, "Manifest parsed, starting playback");
                shared.sink.play();
            }
            TransportEvent::Fault(fault) => match FaultAction::for_fault(&fault) {
                FaultAction::Continue => {
                    warn!(
                        attachment = id,
                        category = ?fault.category,
                        fatal = fault.fatal,
                        details = %fault.details,
                        "Transport fault"
                    );
                }
                FaultAction::Abort => {
                    shared.abort_attachment(id, &fault);
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSink, MockTransportFactory, SinkCall};

    fn fault(category: FaultCategory, fatal: bool) -> TransportFault {
        TransportFault {
            category,
            fatal,
            details: "test".into(),
        }
    }

    #[test]
    fn test_fault_policy() {
        use FaultCategory::*;
        assert_eq!(FaultAction::for_fault(&fault(Network, false)), FaultAction::Continue);
        assert_eq!(FaultAction::for_fault(&fault(Media, false)), FaultAction::Continue);
        assert_eq!(FaultAction::for_fault(&fault(Network, true)), FaultAction::Abort);
        assert_eq!(FaultAction::for_fault(&fault(Media, true)), FaultAction::Abort);
        assert_eq!(FaultAction::for_fault(&fault(Other, true)), FaultAction::Continue);
    }

    #[test]
    fn test_capability_probe() {
        let sink = MockSink::adaptive();
        assert_eq!(PlaybackCapability::probe(&sink, true), PlaybackCapability::Adaptive);
        // Without a transport factory, an adaptive-only sink has nothing to play with.
        assert_eq!(PlaybackCapability::probe(&sink, false), PlaybackCapability::Unsupported);
        assert_eq!(
            PlaybackCapability::probe(&MockSink::native(), true),
            PlaybackCapability::Native
        );
        assert_eq!(
            PlaybackCapability::probe(&MockSink::unsupported(), true),
            PlaybackCapability::Unsupported
        );
    }

    #[tokio::test]
    async fn test_native_attach_sets_source() {
        let sink = Arc::new(MockSink::native());
        let store = StateStore::default();
        let media = MediaAttachmentManager::new(sink.clone(), None, store.clone());

        let handle = media.attach("http://cam/stream.m3u8").unwrap();
        assert_eq!(handle.capability(), PlaybackCapability::Native);
        assert_eq!(
            sink.calls(),
            vec![SinkCall::SetSource("http://cam/stream.m3u8".into()), SinkCall::Play]
        );
        assert!(store.snapshot().media.is_attached());
    }

    #[tokio::test]
    async fn test_unsupported_attach_fails() {
        let store = StateStore::default();
        let media = MediaAttachmentManager::new(Arc::new(MockSink::unsupported()), None, store.clone());

        let err = media.attach("http://cam/stream.m3u8").unwrap_err();
        assert!(matches!(err, ConsoleError::PlaybackUnsupported));
        assert_eq!(store.snapshot().error, Some(ErrorNotice::PlaybackUnsupported));
        assert_eq!(media.current_id(), None);
    }

    #[tokio::test]
    async fn test_release_twice_destroys_once() {
        let factory = Arc::new(MockTransportFactory::new());
        let media = MediaAttachmentManager::new(
            Arc::new(MockSink::adaptive()),
            Some(factory.clone() as Arc<dyn TransportFactory>),
            StateStore::default(),
        );

        let handle = media.attach("http://cam/stream.m3u8").unwrap();
        assert!(handle.release());
        assert!(!handle.release());
        assert!(handle.is_released());
        assert_eq!(factory.destroyed(), 1);
    }

    #[tokio::test]
    async fn test_reattach_runs_detach_sequence_first() {
        let sink = Arc::new(MockSink::adaptive());
        let factory = Arc::new(MockTransportFactory::new());
        let media = MediaAttachmentManager::new(
            sink.clone(),
            Some(factory.clone() as Arc<dyn TransportFactory>),
            StateStore::default(),
        );

        let first = media.attach("http://cam/a.m3u8").unwrap();
        sink.clear_calls();
        let second = media.attach("http://cam/b.m3u8").unwrap();

        assert_eq!(sink.calls(), vec![SinkCall::Pause, SinkCall::ClearSource, SinkCall::Reset]);
        assert!(first.is_released());
        assert!(!second.is_released());
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(media.current_id(), Some(second.id()));
    }

    #[tokio::test]
    async fn test_fatal_network_fault_detaches() {
        let sink = Arc::new(MockSink::adaptive());
        let factory = Arc::new(MockTransportFactory::new());
        let store = StateStore::default();
        let media = MediaAttachmentManager::new(
            sink.clone(),
            Some(factory.clone() as Arc<dyn TransportFactory>),
            store.clone(),
        );

        let handle = media.attach("http://cam/stream.m3u8").unwrap();
        factory.emit(TransportEvent::ManifestParsed);
        factory.emit(TransportEvent::Fault(fault(FaultCategory::Other, true)));
        factory.emit(TransportEvent::Fault(fault(FaultCategory::Network, true)));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(handle.is_released());
        assert_eq!(factory.destroyed(), 1);
        let state = store.snapshot();
        assert_eq!(state.error, Some(ErrorNotice::PlaybackFailed));
        assert_eq!(state.media, MediaStatus::Detached);
        assert!(sink.calls().contains(&SinkCall::Play));
    }

    #[tokio::test]
    async fn test_fatal_media_fault_detaches() {
        let factory = Arc::new(MockTransportFactory::new());
        let store = StateStore::default();
        let media = MediaAttachmentManager::new(
            Arc::new(MockSink::adaptive()),
            Some(factory.clone() as Arc<dyn TransportFactory>),
            store.clone(),
        );

        let handle = media.attach("http://cam/stream.m3u8").unwrap();
        // Recoverable media faults leave playback alone
        factory.emit(TransportEvent::Fault(fault(FaultCategory::Media, false)));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_released());

        factory.emit(TransportEvent::Fault(fault(FaultCategory::Media, true)));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(handle.is_released());
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(media.current_id(), None);
        let state = store.snapshot();
        assert_eq!(state.error, Some(ErrorNotice::PlaybackFailed));
        assert_eq!(state.media, MediaStatus::Detached);
    }

    #[tokio::test]
    async fn test_transport_creation_failure_leaves_nothing_attached() {
        let sink = Arc::new(MockSink::adaptive());
        let factory = Arc::new(MockTransportFactory::new());
        let store = StateStore::default();
        let media = MediaAttachmentManager::new(
            sink.clone(),
            Some(factory.clone() as Arc<dyn TransportFactory>),
            store.clone(),
        );

        let first = media.attach("http://cam/a.m3u8").unwrap();
        factory.fail_create(true);
        sink.clear_calls();

        let err = media.attach("http://cam/b.m3u8").unwrap_err();
        assert!(matches!(err, ConsoleError::TransportFatal(_)));

        // The previous attachment went through the full detach sequence
        assert_eq!(sink.calls(), vec![SinkCall::Pause, SinkCall::ClearSource, SinkCall::Reset]);
        assert!(first.is_released());
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(media.current_id(), None);

        let state = store.snapshot();
        assert_eq!(state.error, Some(ErrorNotice::PlaybackFailed));
        assert_eq!(state.media, MediaStatus::Detached);
    }

    #[tokio::test]
    async fn test_detach_without_attachment_is_noop() {
        let sink = Arc::new(MockSink::native());
        let media = MediaAttachmentManager::new(sink.clone(), None, StateStore::default());
        assert!(!media.detach());
        assert!(sink.calls().is_empty());
    }
}
