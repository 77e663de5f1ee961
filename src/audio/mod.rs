pub mod backend;
pub mod codec;
pub mod microphone;
pub mod playback;
pub mod speaker;

pub use backend::{
    AudioDevices, CaptureBackend, CaptureConfig, CpalDevices, PlaybackBuffer, PlaybackOutput,
};
pub use microphone::{FrameAssembler, MicrophoneCapture};
pub use playback::{PlaybackPipeline, PlaybackScheduler};
pub use speaker::{OutputQueue, SpeakerOutput};
