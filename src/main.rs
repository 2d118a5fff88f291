//! # wampd
//!
//! WAMP server binary. Loads settings, wires the identity cache, router and
//! dispatchers, then serves WebSocket clients until a signal arrives.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use wamp_server::bootstrap::{build_application, build_periodics, open_storage};
use wamp_server::config::{load_settings, load_settings_from_path};
use wamp_server::server::start;
use wamp_server::{EventBus, ServerConfig, WampSettings};
use wamp_telemetry::{init_telemetry, TelemetryConfig};

/// WAMP v1 pub/sub and RPC server.
#[derive(Parser, Debug)]
#[command(name = "wampd", about = "WAMP pub/sub and RPC server")]
struct Cli {
    /// Settings file (defaults to `~/.wampd/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Report process memory periodically.
    #[arg(long)]
    profile: bool,

    /// Log level: trace, debug, info, warn or error.
    #[arg(long)]
    log_level: Option<String>,

    /// Human-readable logs instead of JSON lines.
    #[arg(long)]
    plain_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut WampSettings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.profile {
            settings.server.profile = true;
        }
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
    }
}

fn parse_level(raw: &str) -> Level {
    raw.parse().unwrap_or(Level::INFO)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    args.apply(&mut settings);

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: parse_level(&settings.log_level),
        json: !args.plain_logs,
        ..TelemetryConfig::default()
    });

    let storage = open_storage(&settings).context("Failed to open client storage")?;
    let periodics = build_periodics(&settings, storage.database.clone());
    let app = build_application(&settings, storage.driver, EventBus::default())
        .context("Failed to compile routes")?;

    let config = ServerConfig::from_settings(&settings);
    let mut handle = start(config, app, periodics)
        .await
        .context("Failed to bind server")?;

    tracing::info!(addr = %handle.local_addr(), "wampd listening");

    let outcome = tokio::select! {
        signal = shutdown_signal() => signal,
        failure = handle.periodic_failure() => {
            tracing::error!(error = %failure, "periodic task failed, shutting down");
            Err(anyhow::Error::new(failure))
        }
    };

    tracing::info!("Shutting down...");
    handle.shutdown().await;
    tracing::info!("Shutdown complete");
    outcome
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c"),
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}
