//! Per-session driver task
//!
//! Owns the socket. Sends the setup message, then multiplexes inbound
//! messages, outbound frames from the slot, and the stop signal until one of
//! them ends the session.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::session::Shared;
use super::stats::SessionState;
use crate::audio::PlaybackPipeline;
use crate::error::{ProtocolError, SessionError};
use crate::protocol::{self, Inbound, ServerEvent};
use crate::transport::{AudioSender, BoxSocket, LinkState, OutboundSlot};

type SocketSink = SplitSink<BoxSocket, Message>;
type SocketStream = SplitStream<BoxSocket>;

pub(super) async fn run(
    shared: Arc<Shared>,
    generation: u64,
    url: String,
    slot: Arc<OutboundSlot>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<(), SessionError> {
    let connected = tokio::select! {
        biased;
        _ = &mut cancel => {
            debug!("Stopped before the socket opened");
            slot.set_link_state(LinkState::Closed);
            return Ok(());
        }
        result = shared.connector.connect(&url) => result,
    };

    let result = match connected {
        Ok(socket) => {
            let (mut sink, mut stream) = socket.split();
            drive(&shared, generation, &slot, &mut sink, &mut stream, &mut cancel).await
        }
        Err(e) => Err(e),
    };

    slot.set_link_state(LinkState::Closed);

    if let Err(e) = &result {
        error!("Voice session ended: {}", e);
        shared.shutdown(generation);
    }

    result
}

async fn drive(
    shared: &Shared,
    generation: u64,
    slot: &Arc<OutboundSlot>,
    sink: &mut SocketSink,
    stream: &mut SocketStream,
    cancel: &mut oneshot::Receiver<()>,
) -> Result<(), SessionError> {
    let setup = protocol::setup_message(&shared.config.model)?;
    sink.send(Message::Text(setup))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    slot.set_link_state(LinkState::Open);

    info!("Setup sent (model={})", shared.config.model);

    loop {
        tokio::select! {
            biased;
            _ = &mut *cancel => {
                // Frames captured before stop() still go out
                if let Some(frame) = slot.take() {
                    if sink.send(Message::Text(frame)).await.is_ok() {
                        slot.counters().sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                if let Err(e) = sink.close().await {
                    debug!("Error closing socket: {}", e);
                }
                info!("Socket closed");
                return Ok(());
            }
            message = stream.next() => match message {
                Some(Ok(message)) => match protocol::normalize(message) {
                    Ok(Inbound::Payload(text)) => {
                        handle_payload(shared, generation, slot, &text).await?;
                    }
                    Ok(Inbound::Close { code, reason }) => {
                        return Err(SessionError::Closed { code, reason });
                    }
                    Ok(Inbound::Ignored) => {}
                    Err(e) => discard(slot, e),
                },
                Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
                None => {
                    return Err(SessionError::Closed {
                        code: 1006,
                        reason: "connection dropped".to_string(),
                    });
                }
            },
            frame = slot.next() => {
                sink.send(Message::Text(frame))
                    .await
                    .map_err(|e| SessionError::Transport(e.to_string()))?;
                slot.counters().sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Act on one inbound JSON payload. Malformed payloads are discarded.
async fn handle_payload(
    shared: &Shared,
    generation: u64,
    slot: &Arc<OutboundSlot>,
    text: &str,
) -> Result<(), SessionError> {
    let events = match protocol::parse_server_message(text) {
        Ok(events) => events,
        Err(e) => {
            discard(slot, e);
            return Ok(());
        }
    };

    for event in events {
        match event {
            ServerEvent::SetupComplete => activate(shared, generation, slot).await?,
            ServerEvent::Audio(data) => play_audio(shared, generation, slot, &data),
        }
    }

    Ok(())
}

fn discard(slot: &OutboundSlot, error: ProtocolError) {
    warn!("Discarding inbound message: {}", error);
    slot.counters().discarded.fetch_add(1, Ordering::Relaxed);
}

/// Handshake acknowledged: open playback, start capture, go active
async fn activate(
    shared: &Shared,
    generation: u64,
    slot: &Arc<OutboundSlot>,
) -> Result<(), SessionError> {
    let (mut playback, mut capture, handshake_at) = {
        let mut inner = shared.lock();
        if inner.generation != generation
            || inner.state != SessionState::Connecting
            || inner.handshake_at.is_some()
        {
            debug!("Ignoring setupComplete");
            return Ok(());
        }

        let handshake_at = (Instant::now(), Utc::now());
        inner.handshake_at = Some(handshake_at);

        let playback = PlaybackPipeline::new(
            shared.devices.playback(),
            shared.config.playback_sample_rate,
            Arc::clone(&inner.counters),
        );
        (playback, shared.devices.capture(), handshake_at)
    };

    info!("Setup complete, starting audio");

    playback.open().await?;

    let sender = AudioSender::new(Arc::clone(slot), &shared.config.capture_mime_type());
    if let Err(e) = capture.start(sender).await {
        playback.close();
        return Err(e.into());
    }

    let mut inner = shared.lock();
    if inner.generation != generation || inner.state != SessionState::Connecting {
        drop(inner);
        debug!("Session stopped while audio was starting");
        capture.stop();
        playback.close();
        return Ok(());
    }

    inner.handshake_at = None;
    inner.started_at = Some(handshake_at);
    inner.capture = Some(capture);
    inner.playback = Some(playback);
    inner.state = SessionState::Active;

    info!("Voice session active");
    Ok(())
}

fn play_audio(shared: &Shared, generation: u64, slot: &OutboundSlot, data: &str) {
    let mut inner = shared.lock();
    if inner.generation != generation {
        return;
    }

    match inner.playback.as_mut() {
        Some(playback) => {
            if let Err(e) = playback.play_encoded(data) {
                discard(slot, e);
            }
        }
        None => debug!("Audio arrived before playback opened, dropped"),
    }
}
