//! rentald - The rental timing and billing service
//!
//! This is the main entry point for the rentald service. The service
//! itself lives in the library so integration tests can drive it.

use anyhow::{Context, Result};
use clap::Parser;
use rental_config::load_config;
use rental_util::default_config_path;
use rentald::Service;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// rentald - Session timing and billing for rentable equipment
#[derive(Parser, Debug)]
#[command(name = "rentald")]
#[command(about = "Session timing and billing for rentable equipment", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/rentald/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set RENTAL_SOCKET env var)
    #[arg(short, long, env = "RENTAL_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set RENTAL_DATA_DIR env var)
    #[arg(short, long, env = "RENTAL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

/// Resolves on SIGTERM, SIGINT or SIGHUP
async fn shutdown_signal() -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "rentald starting");

    if rental_util::is_mock_time_active() {
        info!(now = %rental_util::now(), "Mock time is active");
    }

    let policy = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        resource_count = policy.resources.len(),
        "Configuration loaded"
    );

    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| policy.service.socket_path.clone());
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| policy.service.data_dir.clone());

    let service = Service::new(&policy, &socket_path, &data_dir).await?;
    service
        .run(async {
            if let Err(e) = shutdown_signal().await {
                tracing::error!(error = %e, "Signal handling failed, shutting down");
            }
        })
        .await
}
