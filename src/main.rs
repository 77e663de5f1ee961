use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use live_voice::{Config, VoiceSession};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Talk to a Gemini Live model through the default microphone and speaker
#[derive(Parser, Debug)]
#[command(name = "live-voice", version)]
struct Cli {
    /// Config file (defaults to config/live-voice.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// API key for the voice endpoint
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Model named in the setup message
    #[arg(long)]
    model: Option<String>,

    /// Input device name
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name
    #[arg(long)]
    output_device: Option<String>,

    /// End the session after this many seconds
    #[arg(long)]
    max_seconds: Option<u64>,
}

async fn deadline(max_seconds: Option<u64>) {
    match max_seconds {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut session_config = cfg.session_config();
    if let Some(model) = cli.model {
        session_config.model = model;
    }
    if let Some(device) = cli.input_device {
        session_config.input_device = device;
    }
    if let Some(device) = cli.output_device {
        session_config.output_device = device;
    }

    info!("live-voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Model: {}", session_config.model);

    let (usage_tx, mut usage_rx) = tokio::sync::mpsc::unbounded_channel();
    let session = VoiceSession::new(session_config, move |record| {
        let _ = usage_tx.send(record);
    });

    let handle = session
        .start(&cli.api_key)
        .context("Voice session already running")?;
    info!("Session {} started, press Ctrl-C to end it", handle.session_id());

    let wait = handle.wait();
    tokio::pin!(wait);

    let ended = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
        _ = deadline(cli.max_seconds) => {
            info!("Time limit reached");
            None
        }
        result = &mut wait => Some(result),
    };

    // The driver flushes the last frame and closes the socket after stop()
    let outcome = match ended {
        Some(result) => result,
        None => {
            session.stop();
            wait.await
        }
    };

    match usage_rx.try_recv() {
        Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        Err(_) => info!("No usage recorded"),
    }

    if let Err(e) = &outcome {
        error!("Voice session failed: {}", e);
    }

    Ok(outcome?)
}
