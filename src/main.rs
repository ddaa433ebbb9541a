//! GoBox Daemon - sandboxed per-fingerprint container shell service
//!
//! Manages the lifecycle of browser-attached Linux containers: creation on
//! first connect, reuse across reconnects within a grace period, and idle
//! reaping past an absolute horizon.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "gobox-daemon")]
#[command(about = "GoBox sandboxed shell daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gobox_daemon={}", log_level).into()),
        )
        .init();

    info!("starting GoBox daemon v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Migrate) => {
            cmd::migrate::run(&cli.config).await?;
        }
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        Some(cmd::Commands::Serve) | None => {
            if let Err(e) = cmd::root::run(&cli.config).await {
                error!("daemon error: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
