use serde::{Deserialize, Serialize};

use crate::audio::{CaptureConfig, CpalDevices};
use crate::transport::endpoint_url;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint, without the credential
    pub endpoint: String,

    /// Model named in the setup message
    pub model: String,

    /// Rate of outbound microphone audio
    /// Default: 16000 Hz
    pub capture_sample_rate: u32,

    /// Rate of inbound synthesized audio
    /// Default: 24000 Hz
    pub playback_sample_rate: u32,

    /// Samples per outbound frame (one capture tick)
    pub frame_samples: usize,

    /// Input device name, or "default"
    pub input_device: String,

    /// Output device name, or "default"
    pub output_device: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            frame_samples: 4096, // 256ms at 16kHz
            input_device: "default".to_string(),
            output_device: "default".to_string(),
        }
    }
}

impl SessionConfig {
    /// Connection URL carrying the credential
    pub fn url(&self, credential: &str) -> String {
        endpoint_url(&self.endpoint, credential)
    }

    /// Format descriptor attached to every outbound media chunk
    pub fn capture_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.capture_sample_rate)
    }

    /// cpal microphone and speaker for this configuration
    pub fn cpal_devices(&self) -> CpalDevices {
        CpalDevices {
            capture: CaptureConfig {
                device: self.input_device.clone(),
                sample_rate: self.capture_sample_rate,
                frame_samples: self.frame_samples,
            },
            output_device: self.output_device.clone(),
        }
    }
}
