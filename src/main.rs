//! CLI entry point for the greenhouse gateway.
//!
//! ```bash
//! greenhouse-gateway run --config config/gateway.toml
//! greenhouse-gateway check-config --config config/gateway.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use greenhouse_gateway::config::{GatewayConfig, DEFAULT_CONFIG_PATH};
use greenhouse_gateway::{logging, Driver};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "greenhouse-gateway")]
#[command(about = "Greenhouse telemetry gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway until Ctrl-C or SIGTERM
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Load and validate the configuration, then print it
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config).await,
        Commands::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> Result<GatewayConfig> {
    let config = GatewayConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Configuration OK");
    Ok(())
}

async fn run(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    logging::init_from_config(&config)?;

    info!(name = %config.application.name, "Starting greenhouse gateway");
    let driver = Driver::from_config(&config)?;
    driver.run(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
