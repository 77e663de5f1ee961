use crate::error::AudioError;
use crate::transport::AudioSender;

/// Mono float samples ready for the output device
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Samples in `[-1, 1)`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Configuration for the capture side
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name, or "default"
    pub device: String,
    /// Rate of outbound frames
    pub sample_rate: u32,
    /// Samples per capture tick
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 16000,
            frame_samples: 4096,
        }
    }
}

/// Microphone capture backend
///
/// Implementations deliver one fixed-size frame of mono samples per tick to
/// the `AudioSender`, from within the capture callback.
#[async_trait::async_trait]
pub trait CaptureBackend: Send {
    /// Acquire the input device and begin delivering frames
    async fn start(&mut self, sender: AudioSender) -> Result<(), AudioError>;

    /// Stop capturing. Safe to call at any point, including before `start`.
    fn stop(&mut self);

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Speaker output
#[async_trait::async_trait]
pub trait PlaybackOutput: Send {
    /// Acquire the output device
    async fn open(&mut self) -> Result<(), AudioError>;

    /// Current position of the output clock in seconds
    fn now(&self) -> f64;

    /// Queue `buffer` to begin at `start_at` on the output clock
    fn schedule(&mut self, start_at: f64, buffer: PlaybackBuffer);

    /// Release the output device. Safe to call more than once.
    fn close(&mut self);

    /// Get output name for logging
    fn name(&self) -> &str;
}

/// Produces fresh device handles for each session
pub trait AudioDevices: Send + Sync {
    fn capture(&self) -> Box<dyn CaptureBackend>;

    fn playback(&self) -> Box<dyn PlaybackOutput>;
}

/// Factory for the cpal microphone and speaker
#[derive(Debug, Clone)]
pub struct CpalDevices {
    pub capture: CaptureConfig,
    /// Output device name, or "default"
    pub output_device: String,
}

impl AudioDevices for CpalDevices {
    fn capture(&self) -> Box<dyn CaptureBackend> {
        Box::new(super::microphone::MicrophoneCapture::new(self.capture.clone()))
    }

    fn playback(&self) -> Box<dyn PlaybackOutput> {
        Box::new(super::speaker::SpeakerOutput::new(&self.output_device))
    }
}
