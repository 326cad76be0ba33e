//! Edge Gateway (v1)
//!
//! API gateway built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                     EDGE GATEWAY                     │
//!                     │                                                      │
//!   Client Request    │  ┌─────────┐   ┌─────────┐   ┌───────────────────┐   │
//!   ──────────────────┼─▶│  http   │──▶│ routing │──▶│ gateway pipeline  │   │
//!                     │  │ server  │   │registry │   │ mw/auth/limit/cb  │   │
//!                     │  └─────────┘   └─────────┘   └─────────┬─────────┘   │
//!                     │                                        ▼             │
//!                     │                ┌───────────┐   ┌───────────────┐     │
//!                     │                │ discovery │──▶│  dispatcher   │─────┼──▶ Upstream
//!                     │                └───────────┘   └───────────────┘     │
//!                     │                                                      │
//!                     │  config · observability · lifecycle · admin API      │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use edge_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use edge_gateway::lifecycle::signals::wait_for_signal;
use edge_gateway::observability::{logging::init_logging, metrics::init_metrics};
use edge_gateway::{Gateway, HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "API gateway routing and resilience core", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!("edge-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        discovery = %config.discovery.kind,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let gateway = Arc::new(Gateway::builder(config.clone()).build()?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, gateway);
    let serving = tokio::spawn(server.run(listener, config_updates, server_shutdown));

    wait_for_signal().await;
    shutdown.trigger();
    serving.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
