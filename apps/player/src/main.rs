//! Meander Player - headless client for the Meander exploration stream.
//!
//! Connects the core runtime to a real audio device and logs presentation
//! events instead of rendering them. Useful for listening sessions without
//! a UI and for soak-testing the recovery machinery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meander_core::{Config, EndpointContext, LoggingHooks, Session};
use tokio::signal;

/// Meander Player - headless streaming music exploration client.
#[derive(Parser, Debug)]
#[command(name = "meander-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the Meander server.
    #[arg(short, long, env = "MEANDER_SERVER_URL")]
    server: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MEANDER_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Initial volume in [0, 1].
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Run without an audio device (timing-accurate silent sink).
    #[arg(long)]
    no_device: bool,

    /// Seconds between diagnostics log lines (0 disables).
    #[arg(long, default_value_t = 30)]
    status_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Meander Player v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::default();
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let ctx = EndpointContext::new(args.server.clone());
    log::info!("Configuration: server={}, device={}", args.server, !args.no_device);

    let session = Session::new(ctx, config, Arc::new(LoggingHooks), !args.no_device);
    session.set_volume(args.volume);
    session.start();

    // Periodic diagnostics, mirroring what a UI health panel would show.
    if args.status_interval > 0 {
        let session = session.clone();
        let interval = Duration::from_secs(args.status_interval);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                log::info!("[Status] {}", session.diagnostics());
            }
        });
    }

    signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    log::info!("Interrupted; shutting down");
    session.shutdown().await;

    Ok(())
}
