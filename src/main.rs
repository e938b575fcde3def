//! Atrium BMS - Building Operational Control Engine
//!
//! # Usage
//!
//! ```bash
//! # Run against the built-in site definition
//! cargo run --release
//!
//! # Run one location with an explicit site config
//! cargo run --release -- --site-config site_config.toml --location heritage
//!
//! # Evaluate without writing commands
//! cargo run --release -- --dry-run
//! ```
//!
//! # Environment Variables
//!
//! - `TSDB_URL`: time-series store base URL (default `http://localhost:8181`)
//! - `TSDB_METRICS_DB` / `TSDB_UI_COMMANDS_DB` / `TSDB_AUDIT_DB`: database names
//! - `TSDB_TIMEOUT_SECS`, `TSDB_RETRIES`, `TSDB_RETRY_DELAY_SECS`: gateway policy
//! - `SITE_CONFIG`: path to the site TOML
//! - `STATE_DIR`: sled state snapshot directory (empty disables persistence)
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use atrium_bms::{EngineConfig, Runtime, SiteConfig, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "atrium-bms")]
#[command(about = "Atrium BMS Building Operational Control Engine")]
#[command(version)]
struct CliArgs {
    /// Path to the site configuration TOML
    /// (falls back to $SITE_CONFIG, then ./site_config.toml, then built-ins)
    #[arg(long, value_name = "PATH")]
    site_config: Option<PathBuf>,

    /// Run processors for a single location id only
    #[arg(long, value_name = "LOCATION_ID")]
    location: Option<String>,

    /// Evaluate control logic and log, but write no commands
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut engine = EngineConfig::from_env();
    engine.dry_run = args.dry_run;

    let site = SiteConfig::load(args.site_config.as_deref())
        .context("Failed to load site configuration")?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Atrium BMS - Building Operational Control Engine");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  TSDB:       {}", engine.tsdb_url);
    info!("  Locations:  {}", site.locations.len());
    info!("  Equipment:  {}", site.equipment.len());
    if engine.dry_run {
        info!("  Mode:       DRY RUN (no command writes)");
    }
    info!("");

    let cancel_token = CancellationToken::new();

    // Termination signals trigger graceful shutdown of every processor.
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!("Cannot install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    shutdown_token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received Ctrl+C, initiating shutdown");
        }
        shutdown_token.cancel();
    });

    let runtime = Runtime::new(engine, site);
    let supervisor = Supervisor::new(runtime, cancel_token, args.location);
    supervisor.run().await?;

    info!("Atrium BMS shutdown complete");
    Ok(())
}
