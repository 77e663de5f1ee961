//! Voice session management
//!
//! This module provides the `VoiceSession` controller that manages:
//! - The connection and setup handshake with the voice endpoint
//! - Microphone capture feeding the socket
//! - Playback of synthesized audio from the socket
//! - Lifecycle state and usage accounting

mod config;
mod driver;
mod session;
mod stats;

pub use config::{SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use session::{SessionEndCallback, SessionHandle, VoiceSession};
pub use stats::{whole_seconds, SessionState, SessionStats, UsageRecord};
