pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AudioDevices, CaptureBackend, CaptureConfig, CpalDevices, PlaybackBuffer, PlaybackOutput,
    PlaybackPipeline, PlaybackScheduler,
};
pub use config::Config;
pub use error::{AudioError, ProtocolError, SessionError};
pub use protocol::{ServerEvent, ServerMessage};
pub use session::{SessionConfig, SessionHandle, SessionState, SessionStats, UsageRecord, VoiceSession};
pub use transport::{AudioSender, BoxSocket, Connector, Offer, WebSocketConnector};
