use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::backup::BackupKind;
use crate::config::Config;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "tradeflow",
    about = "Daily container orchestration and backup rotation for the trading stack",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestration loop forever
    Run,

    /// Evaluate the schedule gate once and run today's cycle if it passes
    Once {
        /// Run the cycle even outside the configured window
        #[arg(long)]
        ignore_window: bool,
    },

    /// Move one kind of backup to the remote share
    Transfer {
        #[arg(short, long, value_enum)]
        kind: BackupKind,
    },

    /// Display the status of every configured unit
    Status,

    /// Display the venue time and whether it falls inside the schedule window
    Window,
}

/// Execute CLI command with the loaded configuration
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Run => {
            info!("Running orchestration loop");
            commands::run_loop(config).await?;
        }
        Commands::Once { ignore_window } => {
            info!(ignore_window, "Running a single orchestration cycle");
            commands::once(config, ignore_window).await?;
        }
        Commands::Transfer { kind } => {
            info!(%kind, "Transferring backup");
            commands::transfer(config, kind).await?;
        }
        Commands::Status => {
            commands::status(config).await?;
        }
        Commands::Window => {
            commands::window(config)?;
        }
    }
    Ok(())
}
