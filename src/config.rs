use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::session::SessionConfig;

/// Default location of the config file, without extension
pub const DEFAULT_CONFIG_PATH: &str = "config/live-voice";

/// Prefix for environment overrides, e.g. `LIVE_VOICE__VOICE__MODEL`
pub const ENV_PREFIX: &str = "LIVE_VOICE";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub voice: VoiceConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct VoiceConfig {
    pub endpoint: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_samples: usize,
    pub input_device: String,
    pub output_device: String,
}

impl Config {
    /// Load defaults, then the config file, then environment overrides.
    ///
    /// With no `path`, `config/live-voice.*` is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = SessionConfig::default();

        let mut builder = config::Config::builder()
            .set_default("voice.endpoint", defaults.endpoint)?
            .set_default("voice.model", defaults.model)?
            .set_default("audio.capture_sample_rate", defaults.capture_sample_rate as i64)?
            .set_default("audio.playback_sample_rate", defaults.playback_sample_rate as i64)?
            .set_default("audio.frame_samples", defaults.frame_samples as i64)?
            .set_default("audio.input_device", defaults.input_device)?
            .set_default("audio.output_device", defaults.output_device)?;

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        Ok(settings.try_deserialize()?)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.voice.endpoint.clone(),
            model: self.voice.model.clone(),
            capture_sample_rate: self.audio.capture_sample_rate,
            playback_sample_rate: self.audio.playback_sample_rate,
            frame_samples: self.audio.frame_samples,
            input_device: self.audio.input_device.clone(),
            output_device: self.audio.output_device.clone(),
        }
    }
}
