// Shared fakes for session tests: an in-memory socket pair, a connector
// that hands the server end to the test, and recording audio devices.

#![allow(dead_code)]

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{Sink, Stream, StreamExt};
use tokio::sync::Notify;
use live_voice::audio::{AudioDevices, CaptureBackend, PlaybackBuffer, PlaybackOutput};
use live_voice::transport::{AudioSender, BoxSocket, Connector, Offer};
use live_voice::{AudioError, SessionConfig, SessionError, UsageRecord, VoiceSession};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Client end of an in-memory socket
pub struct FakeSocket {
    incoming: UnboundedReceiver<Result<Message, WsError>>,
    outgoing: UnboundedSender<Message>,
}

impl Stream for FakeSocket {
    type Item = Result<Message, WsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.incoming).poll_next(cx)
    }
}

impl Sink<Message> for FakeSocket {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
        self.outgoing
            .unbounded_send(item)
            .map_err(|_| WsError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
        self.outgoing.close_channel();
        Poll::Ready(Ok(()))
    }
}

/// Server end of an in-memory socket, driven by the test
pub struct FakeServer {
    to_client: UnboundedSender<Result<Message, WsError>>,
    from_client: UnboundedReceiver<Message>,
}

impl FakeServer {
    pub fn send(&self, message: Message) {
        let _ = self.to_client.unbounded_send(Ok(message));
    }

    pub fn send_json(&self, json: &str) {
        self.send(Message::Text(json.to_string()));
    }

    pub fn complete_setup(&self) {
        self.send_json(r#"{"setupComplete":{}}"#);
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        })));
    }

    pub fn fail(&self) {
        let _ = self.to_client.unbounded_send(Err(WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ))));
    }

    /// Next message from the client; `None` once the client closed
    pub async fn next_message(&mut self) -> Option<Message> {
        self.from_client.next().await
    }

    /// Every message up to the client closing the socket
    pub async fn collect_until_closed(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.from_client.next().await {
            messages.push(message);
        }
        messages
    }
}

/// Connector that hands each new server end to the test
pub struct FakeConnector {
    servers: tokio::sync::mpsc::UnboundedSender<FakeServer>,
    pub connects: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    pub refuse: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<FakeServer>) {
        let (servers, rx) = tokio::sync::mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            connects: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        });
        (connector, rx)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<BoxSocket, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::Connect("connection refused".to_string()));
        }

        let (to_client, incoming) = unbounded();
        let (outgoing, from_client) = unbounded();
        let _ = self.servers.send(FakeServer {
            to_client,
            from_client,
        });

        Ok(Box::new(FakeSocket { incoming, outgoing }))
    }
}

/// Everything the fake devices were asked to do
#[derive(Default)]
pub struct DeviceLog {
    pub capture_starts: AtomicUsize,
    pub capture_stops: AtomicUsize,
    pub playback_opens: AtomicUsize,
    pub playback_closes: AtomicUsize,
    pub fail_capture: AtomicBool,
    /// (start_at, sample count, sample rate) per scheduled buffer
    pub scheduled: Mutex<Vec<(f64, usize, u32)>>,
    pub sender: Mutex<Option<AudioSender>>,
    pub clock: Mutex<f64>,
    /// While set, capture start waits for `release_capture`
    pub hold_capture: AtomicBool,
    capture_gate: Notify,
}

impl DeviceLog {
    /// Simulate one capture tick
    pub fn tick(&self, samples: &[f32]) -> Option<Offer> {
        let sender = self.sender.lock().unwrap().clone();
        sender.map(|s| s.send_samples(samples))
    }

    pub fn set_clock(&self, now: f64) {
        *self.clock.lock().unwrap() = now;
    }

    /// Whether the most recent capture sender would accept a frame
    pub fn sender_ready(&self) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |s| s.is_ready())
    }

    pub fn release_capture(&self) {
        self.hold_capture.store(false, Ordering::SeqCst);
        self.capture_gate.notify_one();
    }
}

pub struct FakeDevices {
    pub log: Arc<DeviceLog>,
}

impl AudioDevices for FakeDevices {
    fn capture(&self) -> Box<dyn CaptureBackend> {
        Box::new(FakeCapture {
            log: Arc::clone(&self.log),
            capturing: false,
        })
    }

    fn playback(&self) -> Box<dyn PlaybackOutput> {
        Box::new(FakePlayback {
            log: Arc::clone(&self.log),
            open: false,
        })
    }
}

struct FakeCapture {
    log: Arc<DeviceLog>,
    capturing: bool,
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    async fn start(&mut self, sender: AudioSender) -> Result<(), AudioError> {
        if self.log.hold_capture.load(Ordering::SeqCst) {
            self.log.capture_gate.notified().await;
        }
        if self.log.fail_capture.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound("fake microphone".to_string()));
        }
        self.log.capture_starts.fetch_add(1, Ordering::SeqCst);
        *self.log.sender.lock().unwrap() = Some(sender);
        self.capturing = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.capturing {
            self.capturing = false;
            self.log.capture_stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

struct FakePlayback {
    log: Arc<DeviceLog>,
    open: bool,
}

#[async_trait]
impl PlaybackOutput for FakePlayback {
    async fn open(&mut self) -> Result<(), AudioError> {
        self.log.playback_opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn now(&self) -> f64 {
        *self.log.clock.lock().unwrap()
    }

    fn schedule(&mut self, start_at: f64, buffer: PlaybackBuffer) {
        self.log
            .scheduled
            .lock()
            .unwrap()
            .push((start_at, buffer.samples.len(), buffer.sample_rate));
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.log.playback_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "fake speaker"
    }
}

/// A session wired to fakes
pub struct Harness {
    pub session: VoiceSession,
    pub connector: Arc<FakeConnector>,
    pub servers: tokio::sync::mpsc::UnboundedReceiver<FakeServer>,
    pub devices: Arc<DeviceLog>,
    pub usage: Arc<Mutex<Vec<UsageRecord>>>,
}

impl Harness {
    pub fn new() -> Self {
        let config = SessionConfig {
            endpoint: "wss://voice.test/ws".to_string(),
            model: "models/test-model".to_string(),
            ..SessionConfig::default()
        };

        let (connector, servers) = FakeConnector::new();
        let devices = Arc::new(DeviceLog::default());
        let usage = Arc::new(Mutex::new(Vec::new()));

        let session = {
            let usage = Arc::clone(&usage);
            VoiceSession::with_components(
                config,
                Arc::clone(&connector) as Arc<dyn Connector>,
                Arc::new(FakeDevices {
                    log: Arc::clone(&devices),
                }),
                move |record| usage.lock().unwrap().push(record),
            )
        };

        Self {
            session,
            connector,
            servers,
            devices,
            usage,
        }
    }

    /// Wait for the session to open its next socket
    pub async fn accept(&mut self) -> FakeServer {
        self.servers.recv().await.expect("connector dropped")
    }

    /// Accept the socket, check the setup message, and acknowledge it
    pub async fn accept_and_activate(&mut self) -> FakeServer {
        let mut server = self.accept().await;
        let setup = server.next_message().await.expect("no setup message");
        assert!(matches!(setup, Message::Text(ref t) if t.contains("\"setup\"")));
        server.complete_setup();
        wait_for(|| self.session.is_active()).await;
        server
    }

    pub fn usage(&self) -> Vec<UsageRecord> {
        self.usage.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connector.connects.load(Ordering::SeqCst)
    }
}

/// Yield to other tasks until `condition` holds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Let spawned tasks run without advancing time
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
