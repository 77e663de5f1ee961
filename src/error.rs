//! Error types for live voice sessions
//!
//! Fatal errors end the session through the normal teardown path and are
//! reported through `SessionHandle::wait`. Nothing here is ever returned from
//! `VoiceSession::start` or `VoiceSession::stop`.

use thiserror::Error;

/// Reason a session ended without the caller asking it to
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to connect to voice endpoint: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed by remote (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("Audio device error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors related to microphone capture and speaker output
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device not found: '{0}'")]
    DeviceNotFound(String),

    #[error("Audio device configuration failed: {0}")]
    Config(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio thread exited before the stream started")]
    ThreadExited,
}

/// Errors in the wire format. Inbound ones are never fatal.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Audio data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
