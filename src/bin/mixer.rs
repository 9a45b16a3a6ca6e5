//! Stream Mixer Application
//!
//! Receives trunk-recorder `simplestream` talkgroup audio over UDP and writes
//! one continuous spatialised PCM stream to stdout, e.g.
//!
//! ```text
//! mixer | ffmpeg -f s16le -ar 8000 -ac 4 -i - ...
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quad_stream_mixer::{
    app,
    audio::OutputLayout,
    config::{AppConfig, StatusFormat},
    output::FrameSink,
    shutdown::Shutdown,
};

/// Mix UDP talkgroup streams into one continuous multi-channel PCM stream
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML config file (defaults to the per-user config if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen_address: Option<String>,

    /// UDP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Input and output sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Mix tick in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Output layout: quad or stereo
    #[arg(long)]
    layout: Option<OutputLayout>,

    /// Milliseconds of silence before a talkgroup is dropped
    #[arg(long)]
    stale_timeout_ms: Option<u64>,

    /// Audio payloads below this many bytes are keep-alives
    #[arg(long)]
    keepalive_threshold: Option<usize>,

    /// Status file path
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Status file format: text or json
    #[arg(long, value_parser = parse_status_format)]
    status_format: Option<StatusFormat>,

    /// Do not write a status file
    #[arg(long)]
    no_status: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn parse_status_format(s: &str) -> std::result::Result<StatusFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "text" => Ok(StatusFormat::Text),
        "json" => Ok(StatusFormat::Json),
        other => Err(format!("unknown status format: {}", other)),
    }
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(address) = &self.listen_address {
            config.network.listen_address = address.clone();
        }
        if let Some(port) = self.port {
            config.network.udp_port = port;
        }
        if let Some(rate) = self.sample_rate {
            config.mixer.sample_rate = rate;
        }
        if let Some(tick) = self.tick_ms {
            config.mixer.tick_ms = tick;
        }
        if let Some(layout) = self.layout {
            config.mixer.layout = layout;
        }
        if let Some(timeout) = self.stale_timeout_ms {
            config.mixer.stale_timeout_ms = timeout;
        }
        if let Some(threshold) = self.keepalive_threshold {
            config.mixer.keepalive_threshold = threshold;
        }
        if let Some(path) = &self.status_file {
            config.status.path = path.clone();
        }
        if let Some(format) = self.status_format {
            config.status.format = format;
        }
        if self.no_status {
            config.status.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries audio
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("Starting stream mixer");

    let shutdown = Shutdown::new();

    // Ctrl-C
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received...");
                shutdown.trigger();
            }
        });
    }

    let result = app::run(&config, FrameSink::stdout(), shutdown).await;
    tracing::info!("Shutdown complete");

    Ok(result?)
}
