use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradeflow::cli::{self, Cli};
use tradeflow::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load configuration first
    let config = Config::load()?;
    let cli = Cli::parse();

    // RUST_LOG wins, then --verbose, then LOGGING_LEVEL
    let default_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.logging.file)
        .with_context(|| format!("Cannot open log file {}", config.logging.file.display()))?;

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    // Structured JSON copy of every event for later inspection
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Tradeflow starting up");

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    cli::run(cli, config).await?;

    info!("Tradeflow completed successfully");
    Ok(())
}
