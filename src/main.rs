use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use questcast_lib::config::{load_config, load_game_assets, Config};
use questcast_lib::server::{run_server, AppState};
use tracing_subscriber::EnvFilter;

/// Questcast - streaming game-session relay for Venice text and image APIs
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "questcast.yaml")]
    config: PathBuf,

    /// Host to bind (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config);
    tracing::info!("[CONFIG] Loaded from {}", cli.config.display());

    let assets = load_game_assets(&config.game).await?;
    let state = AppState::new(config, assets).context("failed to build upstream clients")?;

    run_server(state, shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("[SERVER] Shutdown signal received"),
        Err(e) => {
            tracing::warn!("[SERVER] Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
