//! Gemini Live wire protocol
//!
//! JSON text frames in both directions. Outbound: one `setup` message, then
//! `realtimeInput` audio chunks. Inbound: `setupComplete` once, then
//! `serverContent` carrying synthesized audio.

pub mod messages;

pub use messages::{
    InlineData, MediaChunk, ModelTurn, Part, RealtimeInput, RealtimeInputMessage, ServerContent,
    ServerMessage, Setup, SetupMessage,
};

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ProtocolError;

/// What an inbound message asks the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Handshake acknowledged
    SetupComplete,
    /// One base64 audio chunk to play
    Audio(String),
}

/// Outcome of normalizing one socket message
#[derive(Debug)]
pub enum Inbound {
    /// JSON text to parse
    Payload(String),
    /// Remote closed the connection
    Close { code: u16, reason: String },
    /// Control frames with nothing for the session
    Ignored,
}

/// Normalize a socket message to text.
///
/// Binary frames carry the same JSON as text frames and are decoded as UTF-8.
pub fn normalize(message: Message) -> Result<Inbound, ProtocolError> {
    match message {
        Message::Text(text) => Ok(Inbound::Payload(text)),
        Message::Binary(bytes) => Ok(Inbound::Payload(String::from_utf8(bytes)?)),
        Message::Close(frame) => Ok(match frame {
            Some(frame) => Inbound::Close {
                code: frame.code.into(),
                reason: frame.reason.into_owned(),
            },
            None => Inbound::Close {
                code: 1005,
                reason: String::new(),
            },
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Inbound::Ignored),
    }
}

/// Parse an inbound JSON payload into the events it carries, in order.
///
/// Returns an empty list for messages the session does not act on.
pub fn parse_server_message(payload: &str) -> Result<Vec<ServerEvent>, ProtocolError> {
    let message: ServerMessage = serde_json::from_str(payload)?;
    let mut events = Vec::new();

    if message.setup_complete.as_ref().is_some_and(is_truthy) {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(turn) = message.server_content.and_then(|c| c.model_turn) {
        events.extend(
            turn.parts
                .into_iter()
                .filter_map(|part| part.inline_data)
                .map(|inline| ServerEvent::Audio(inline.data)),
        );
    }

    Ok(events)
}

/// JSON truthiness: everything except null, false, zero, and ""
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn setup_message(model: &str) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&SetupMessage {
        setup: Setup {
            model: model.to_string(),
        },
    })?)
}

/// Wrap one base64 audio chunk in a `realtimeInput` message
pub fn realtime_input_message(data: String, mime_type: &str) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                data,
                mime_type: mime_type.to_string(),
            }],
        },
    })?)
}
