use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    /// Socket opening or handshake in flight
    Connecting,
    /// Handshake complete, audio flowing both ways
    Active,
    /// Teardown in progress
    Stopped,
}

/// Usage reported once per completed session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub session_id: Uuid,

    /// When the handshake completed
    pub started_at: DateTime<Utc>,

    pub ended_at: DateTime<Utc>,

    /// Whole seconds of active audio, rounded down
    pub duration_secs: u64,

    /// Exact active time in milliseconds
    pub active_ms: u64,

    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_played: u64,
}

impl UsageRecord {
    pub fn active_duration(&self) -> Duration {
        Duration::from_millis(self.active_ms)
    }
}

/// Whole seconds in `elapsed`, rounded down
pub fn whole_seconds(elapsed: Duration) -> u64 {
    (elapsed.as_millis() / 1000) as u64
}

/// Snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub state: SessionState,

    /// Present from `start()` until teardown
    pub session_id: Option<Uuid>,

    /// When the handshake completed, once active
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds of active audio so far
    pub active_secs: f64,

    pub frames_sent: u64,

    /// Frames dropped while the link was not open or replaced before sending
    pub frames_dropped: u64,

    pub frames_played: u64,

    /// Inbound messages discarded as malformed
    pub messages_discarded: u64,
}
