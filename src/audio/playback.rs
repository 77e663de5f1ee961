use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use super::backend::{PlaybackBuffer, PlaybackOutput};
use super::codec;
use crate::error::{AudioError, ProtocolError};
use crate::transport::FrameCounters;

/// Running "next start" cursor on the output clock.
///
/// Each buffer starts at the later of now and the end of the previous
/// buffer, so bursty arrivals queue end-to-end instead of overlapping.
#[derive(Debug, Default, Clone)]
pub struct PlaybackScheduler {
    next_start: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `duration` seconds and return where the buffer starts
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.next_start.max(now);
        self.next_start = start + duration.max(0.0);
        start
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}

/// Decodes inbound audio chunks and hands them to the output device
pub struct PlaybackPipeline {
    output: Box<dyn PlaybackOutput>,
    scheduler: PlaybackScheduler,
    sample_rate: u32,
    counters: Arc<FrameCounters>,
    open: bool,
}

impl PlaybackPipeline {
    pub fn new(
        output: Box<dyn PlaybackOutput>,
        sample_rate: u32,
        counters: Arc<FrameCounters>,
    ) -> Self {
        Self {
            output,
            scheduler: PlaybackScheduler::new(),
            sample_rate,
            counters,
            open: false,
        }
    }

    pub async fn open(&mut self) -> Result<(), AudioError> {
        self.output.open().await?;
        self.open = true;
        info!(
            "Playback opened on {} ({}Hz inbound)",
            self.output.name(),
            self.sample_rate
        );
        Ok(())
    }

    /// Decode one base64 PCM16 chunk and schedule it.
    ///
    /// Returns the scheduled start time on the output clock.
    pub fn play_encoded(&mut self, data: &str) -> Result<f64, ProtocolError> {
        let samples = codec::decode_float_frame(data)?;
        Ok(self.play(PlaybackBuffer {
            samples,
            sample_rate: self.sample_rate,
        }))
    }

    pub fn play(&mut self, buffer: PlaybackBuffer) -> f64 {
        let start_at = self
            .scheduler
            .schedule(self.output.now(), buffer.duration_secs());

        debug!(
            "Scheduling {} samples at {:.3}s",
            buffer.samples.len(),
            start_at
        );

        self.output.schedule(start_at, buffer);
        self.counters.played.fetch_add(1, Ordering::Relaxed);
        start_at
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Release the output device. Idempotent.
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.output.close();
            info!("Playback closed");
        }
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
