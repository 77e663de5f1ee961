use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::driver;
use super::stats::{whole_seconds, SessionState, SessionStats, UsageRecord};
use crate::audio::{AudioDevices, CaptureBackend, PlaybackPipeline};
use crate::error::SessionError;
use crate::transport::{Connector, FrameCounters, LinkState, OutboundSlot, WebSocketConnector};

/// Called once per completed session with its usage
pub type SessionEndCallback = dyn Fn(UsageRecord) + Send + Sync;

/// A realtime voice session with a Gemini Live endpoint.
///
/// `start` and `stop` never block and never fail: all work happens on a
/// driver task, and fatal errors end the session through the same teardown
/// as `stop`. `start` must be called from within a tokio runtime.
pub struct VoiceSession {
    shared: Arc<Shared>,
}

/// State shared between the controller and the driver task
pub(super) struct Shared {
    pub(super) config: SessionConfig,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) devices: Arc<dyn AudioDevices>,
    on_session_end: Box<SessionEndCallback>,
    inner: Mutex<Inner>,
}

pub(super) struct Inner {
    pub(super) state: SessionState,
    /// Bumped on every `start()`; stale driver callbacks compare against it
    pub(super) generation: u64,
    pub(super) session_id: Option<Uuid>,
    /// Set when `setupComplete` arrives, moved to `started_at` on activation
    pub(super) handshake_at: Option<(Instant, DateTime<Utc>)>,
    pub(super) started_at: Option<(Instant, DateTime<Utc>)>,
    pub(super) transport: Option<TransportHandle>,
    pub(super) capture: Option<Box<dyn CaptureBackend>>,
    pub(super) playback: Option<PlaybackPipeline>,
    pub(super) counters: Arc<FrameCounters>,
}

/// Controller's handle on the driver's socket
pub(super) struct TransportHandle {
    slot: Arc<OutboundSlot>,
    cancel: oneshot::Sender<()>,
}

/// Resolves when the session ends.
///
/// Dropping it does not affect the session.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: Uuid,
    task: JoinHandle<Result<(), SessionError>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// `Ok` when ended by `stop()`, otherwise the fatal error
    pub async fn wait(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Transport(format!("Session task failed: {}", e))),
        }
    }
}

impl VoiceSession {
    /// Session using the default cpal devices and a WebSocket connection
    pub fn new(
        config: SessionConfig,
        on_session_end: impl Fn(UsageRecord) + Send + Sync + 'static,
    ) -> Self {
        let devices = Arc::new(config.cpal_devices());
        Self::with_components(config, Arc::new(WebSocketConnector), devices, on_session_end)
    }

    pub fn with_components(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn AudioDevices>,
        on_session_end: impl Fn(UsageRecord) + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                devices,
                on_session_end: Box::new(on_session_end),
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    generation: 0,
                    session_id: None,
                    handshake_at: None,
                    started_at: None,
                    transport: None,
                    capture: None,
                    playback: None,
                    counters: Arc::new(FrameCounters::default()),
                }),
            }),
        }
    }

    /// Open a session with `credential`.
    ///
    /// No-op returning `None` unless the session is idle.
    pub fn start(&self, credential: &str) -> Option<SessionHandle> {
        let mut inner = self.shared.lock();
        if inner.state != SessionState::Idle {
            warn!("Voice session already running ({:?})", inner.state);
            return None;
        }

        inner.generation += 1;
        let generation = inner.generation;
        let session_id = Uuid::new_v4();

        let counters = Arc::new(FrameCounters::default());
        let slot = Arc::new(OutboundSlot::new(Arc::clone(&counters)));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        inner.state = SessionState::Connecting;
        inner.session_id = Some(session_id);
        inner.counters = counters;
        inner.transport = Some(TransportHandle {
            slot: Arc::clone(&slot),
            cancel: cancel_tx,
        });
        drop(inner);

        info!("Starting voice session {}", session_id);

        let url = self.shared.config.url(credential);
        let task = tokio::spawn(driver::run(
            Arc::clone(&self.shared),
            generation,
            url,
            slot,
            cancel_rx,
        ));

        Some(SessionHandle { session_id, task })
    }

    /// End the session. Safe to call in any state.
    pub fn stop(&self) {
        let record = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Idle {
                return;
            }
            info!("Stopping voice session");
            teardown(&mut inner)
        };

        self.shared.report(record);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Handshake complete and audio flowing
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Between `start()` and activation
    pub fn is_connecting(&self) -> bool {
        self.state() == SessionState::Connecting
    }

    pub fn stats(&self) -> SessionStats {
        let inner = self.shared.lock();
        let counters = &inner.counters;

        SessionStats {
            state: inner.state,
            session_id: inner.session_id,
            started_at: inner.started_at.map(|(_, wall)| wall),
            active_secs: inner
                .started_at
                .map(|(instant, _)| instant.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            frames_sent: counters.sent.load(Ordering::Relaxed),
            frames_dropped: counters.dropped.load(Ordering::Relaxed),
            frames_played: counters.played.load(Ordering::Relaxed),
            messages_discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Teardown requested by the driver for `generation`.
    ///
    /// Ignored if the caller already stopped that session or started a new one.
    pub(super) fn shutdown(&self, generation: u64) {
        let record = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state == SessionState::Idle {
                return;
            }
            teardown(&mut inner)
        };

        self.report(record);
    }

    fn report(&self, record: Option<UsageRecord>) {
        if let Some(record) = record {
            info!(
                "Voice session {} used {}s of audio",
                record.session_id, record.duration_secs
            );
            (self.on_session_end)(record);
        }
    }
}

/// Release everything the session owns: transport, then capture, then
/// playback. Returns the usage record if the session was active for at
/// least one whole second.
fn teardown(inner: &mut Inner) -> Option<UsageRecord> {
    inner.state = SessionState::Stopped;

    if let Some(transport) = inner.transport.take() {
        transport.slot.set_link_state(LinkState::Closing);
        let _ = transport.cancel.send(());
    }

    if let Some(mut capture) = inner.capture.take() {
        if capture.is_capturing() {
            capture.stop();
        }
    }

    if let Some(mut playback) = inner.playback.take() {
        playback.close();
    }

    inner.handshake_at = None;
    let session_id = inner.session_id.take();
    let record = match (inner.started_at.take(), session_id) {
        (Some((instant, started_at)), Some(session_id)) => {
            let elapsed = instant.elapsed();
            let duration_secs = whole_seconds(elapsed);
            let counters = &inner.counters;
            (duration_secs > 0).then(|| UsageRecord {
                session_id,
                started_at,
                ended_at: Utc::now(),
                duration_secs,
                active_ms: elapsed.as_millis() as u64,
                frames_sent: counters.sent.load(Ordering::Relaxed),
                frames_dropped: counters.dropped.load(Ordering::Relaxed),
                frames_played: counters.played.load(Ordering::Relaxed),
            })
        }
        _ => None,
    };

    // The driver keeps the old counters for its final flush
    inner.counters = Arc::new(FrameCounters::default());
    inner.state = SessionState::Idle;
    info!("Voice session torn down");
    record
}
