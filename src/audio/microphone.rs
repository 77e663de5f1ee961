//! cpal microphone capture
//!
//! cpal::Stream is not Send, so the stream lives on a dedicated thread and
//! is controlled over a channel. Device samples are mixed to mono,
//! resampled to the outbound rate, and cut into fixed-size frames; each
//! full frame is one capture tick.

use std::sync::mpsc as std_mpsc;
use std::thread;

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::backend::{CaptureBackend, CaptureConfig};
use crate::error::AudioError;
use crate::transport::AudioSender;

/// Accumulates device callbacks into fixed-size ticks
#[derive(Debug)]
pub struct FrameAssembler {
    pending: Vec<f32>,
    frame_samples: usize,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
        }
    }

    /// Append samples and call `emit` once per completed frame, in order
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_samples;
        if complete == 0 {
            return;
        }

        for frame in self.pending.chunks_exact(self.frame_samples).take(complete) {
            emit(frame);
        }
        self.pending.drain(..complete * self.frame_samples);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Linear interpolation resampling
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}

/// Microphone capture through the default cpal host
pub struct MicrophoneCapture {
    config: CaptureConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl MicrophoneCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread_handle: None,
        }
    }
}

/// Find an input device by exact name, then case-insensitive substring
fn find_input_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    if device_name == "default" {
        return host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()));
    }

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| AudioError::Config(e.to_string()))?
        .collect();

    let search_lower = device_name.to_lowercase();
    let mut fallback = None;

    for device in devices {
        let Ok(name) = device.name() else { continue };
        if name == device_name {
            return Ok(device);
        }
        if fallback.is_none() && name.to_lowercase().contains(&search_lower) {
            fallback = Some(device);
        }
    }

    fallback.ok_or_else(|| AudioError::DeviceNotFound(device_name.to_string()))
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneCapture {
    async fn start(&mut self, sender: AudioSender) -> Result<(), AudioError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        if self.thread_handle.is_some() {
            return Ok(());
        }

        // cpal host handles stay out of the await below
        let (device, stream_config, sample_format, params) = {
            let host = cpal::default_host();
            let device = find_input_device(&host, &self.config.device)?;

            let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
            info!("Using input device: {}", device_name);

            let supported = device
                .default_input_config()
                .map_err(|e| AudioError::Config(e.to_string()))?;

            let source_rate = supported.sample_rate().0;
            let source_channels = supported.channels() as usize;
            let sample_format = supported.sample_format();

            debug!(
                "Input config: {} Hz, {} channel(s), format: {:?}",
                source_rate, source_channels, sample_format
            );

            let params = InputParams {
                sender,
                source_rate,
                target_rate: self.config.sample_rate,
                source_channels,
                frame_samples: self.config.frame_samples,
            };
            (device, supported.config(), sample_format, params)
        };

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_handle = thread::Builder::new()
            .name("live-voice-capture".to_string())
            .spawn(move || {
                let err_fn = |err: cpal::StreamError| error!("Input stream error: {}", err);

                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_input_stream::<f32>(&device, &stream_config, params, err_fn)
                    }
                    cpal::SampleFormat::I16 => {
                        build_input_stream::<i16>(&device, &stream_config, params, err_fn)
                    }
                    cpal::SampleFormat::U16 => {
                        build_input_stream::<u16>(&device, &stream_config, params, err_fn)
                    }
                    format => Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
                };

                let stream = match stream.and_then(|s| {
                    s.play().map_err(|e| AudioError::Stream(e.to_string()))?;
                    Ok(s)
                }) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));
                debug!("Capture thread started");

                // Sender dropped also counts as stop
                let _ = stop_rx.recv();
                drop(stream);

                debug!("Capture thread stopped");
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        self.stop_tx = Some(stop_tx);
        self.thread_handle = Some(thread_handle);

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::ThreadExited)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
            info!("Microphone capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.thread_handle.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InputParams {
    sender: AudioSender,
    source_rate: u32,
    target_rate: u32,
    source_channels: usize,
    frame_samples: usize,
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    params: InputParams,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let InputParams {
        sender,
        source_rate,
        target_rate,
        source_channels,
        frame_samples,
    } = params;
    let channels = source_channels.max(1);
    let mut assembler = FrameAssembler::new(frame_samples);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        let sum: f32 = frame
                            .iter()
                            .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                            .sum();
                        sum / channels as f32
                    })
                    .collect();

                let resampled = resample(&mono, source_rate, target_rate);
                assembler.push(&resampled, |frame| {
                    sender.send_samples(frame);
                });
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}
