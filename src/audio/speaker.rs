//! cpal speaker output
//!
//! The output stream runs on its own thread and drains a shared sample
//! queue, writing silence when the queue is empty. The output clock is the
//! number of device frames written so far.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::backend::{PlaybackBuffer, PlaybackOutput};
use super::microphone::resample;
use crate::error::AudioError;

/// Samples waiting for the device plus the device clock
#[derive(Debug)]
pub struct OutputQueue {
    queue: VecDeque<f32>,
    frames_written: u64,
    device_rate: u32,
}

impl OutputQueue {
    pub fn new(device_rate: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            frames_written: 0,
            device_rate: device_rate.max(1),
        }
    }

    /// Seconds of audio handed to the device so far
    pub fn now(&self) -> f64 {
        self.frames_written as f64 / self.device_rate as f64
    }

    /// Place `buffer` so it starts at `start_at`, padding any gap with silence
    pub fn enqueue(&mut self, start_at: f64, buffer: &PlaybackBuffer) {
        let samples = resample(&buffer.samples, buffer.sample_rate, self.device_rate);

        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        let queued_end = self.frames_written + self.queue.len() as u64;
        if start_frame > queued_end {
            let gap = (start_frame - queued_end) as usize;
            self.queue.extend(std::iter::repeat(0.0).take(gap));
        }

        self.queue.extend(samples);
    }

    /// Next sample for the device, silence when nothing is queued
    pub fn next_sample(&mut self) -> f32 {
        self.frames_written += 1;
        self.queue.pop_front().unwrap_or(0.0)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Speaker output through the default cpal host
pub struct SpeakerOutput {
    device_name: String,
    queue: Option<Arc<Mutex<OutputQueue>>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SpeakerOutput {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            queue: None,
            stop_tx: None,
            thread_handle: None,
        }
    }
}

fn find_output_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    if device_name == "default" {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()));
    }

    let search_lower = device_name.to_lowercase();
    host.output_devices()
        .map_err(|e| AudioError::Config(e.to_string()))?
        .find(|d| {
            d.name()
                .map(|n| n == device_name || n.to_lowercase().contains(&search_lower))
                .unwrap_or(false)
        })
        .ok_or_else(|| AudioError::DeviceNotFound(device_name.to_string()))
}

#[async_trait::async_trait]
impl PlaybackOutput for SpeakerOutput {
    async fn open(&mut self) -> Result<(), AudioError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        if self.thread_handle.is_some() {
            return Ok(());
        }

        let (device, stream_config, sample_format) = {
            let host = cpal::default_host();
            let device = find_output_device(&host, &self.device_name)?;
            info!(
                "Using output device: {}",
                device.name().unwrap_or_else(|_| "unknown".to_string())
            );

            let supported = device
                .default_output_config()
                .map_err(|e| AudioError::Config(e.to_string()))?;
            let sample_format = supported.sample_format();
            (device, supported.config(), sample_format)
        };

        debug!(
            "Output config: {} Hz, {} channel(s), format: {:?}",
            stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        let queue = Arc::new(Mutex::new(OutputQueue::new(stream_config.sample_rate.0)));
        let stream_queue = Arc::clone(&queue);

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_handle = thread::Builder::new()
            .name("live-voice-playback".to_string())
            .spawn(move || {
                let err_fn = |err: cpal::StreamError| error!("Output stream error: {}", err);

                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_output_stream::<f32>(&device, &stream_config, stream_queue, err_fn)
                    }
                    cpal::SampleFormat::I16 => {
                        build_output_stream::<i16>(&device, &stream_config, stream_queue, err_fn)
                    }
                    cpal::SampleFormat::U16 => {
                        build_output_stream::<u16>(&device, &stream_config, stream_queue, err_fn)
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
                debug!("Playback thread started");

                let _ = stop_rx.recv();
                drop(stream);

                debug!("Playback thread stopped");
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        self.queue = Some(queue);
        self.stop_tx = Some(stop_tx);
        self.thread_handle = Some(thread_handle);

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.close();
                Err(e)
            }
            Err(_) => {
                self.close();
                Err(AudioError::ThreadExited)
            }
        }
    }

    fn now(&self) -> f64 {
        match &self.queue {
            Some(queue) => queue.lock().map(|q| q.now()).unwrap_or(0.0),
            None => 0.0,
        }
    }

    fn schedule(&mut self, start_at: f64, buffer: PlaybackBuffer) {
        if let Some(queue) = &self.queue {
            if let Ok(mut queue) = queue.lock() {
                queue.enqueue(start_at, &buffer);
            }
        }
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Playback thread panicked");
            }
            info!("Speaker output closed");
        }
        self.queue = None;
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<OutputQueue>>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    use cpal::traits::DeviceTrait;

    let channels = (config.channels as usize).max(1);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = match queue.lock() {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for frame in data.chunks_mut(channels) {
                    let value = <T as cpal::FromSample<f32>>::from_sample_(queue.next_sample());
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}
