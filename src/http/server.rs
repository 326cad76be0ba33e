//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the data-plane Axum Router and hand every request to the gateway
//! - Wire up middleware (request ID, tracing, whole-request timeout)
//! - Serve the admin router on its own listener
//! - Run the rate-limit sweeper and the config reload task
//! - Shut everything down together

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub config: Arc<GatewayConfig>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, gateway: Arc<Gateway>) -> Self {
        Self {
            state: AppState {
                gateway,
                config: Arc::new(config),
            },
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Data-plane router: every path and method goes to the pipeline.
    #[allow(deprecated)]
    pub fn proxy_router(&self) -> Router {
        let timeout = Duration::from_secs(self.state.config.timeouts.request_secs);
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(self.state.clone())
            .layer(TimeoutLayer::new(timeout))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn admin_router(&self) -> Router {
        crate::admin::setup_admin_router(self.state.clone())
    }

    /// Serve until `shutdown` fires, applying config updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let tasks = Shutdown::new();
        let mut handles = Vec::new();

        let sweep_secs = self.state.config.rate_limit.sweep_interval_secs;
        if sweep_secs > 0 {
            let limiter = self.state.gateway.limiter().clone();
            let mut stop = tasks.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(sweep_secs));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let purged = limiter.purge_expired().await;
                            if purged > 0 {
                                tracing::debug!(purged, "Expired rate-limit counters evicted");
                            }
                        }
                        _ = stop.recv() => break,
                    }
                }
            }));
        }

        {
            let gateway = self.state.gateway.clone();
            let mut stop = tasks.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = config_updates.recv() => {
                            let Some(config) = update else { break };
                            match gateway.apply_routes(&config.routes) {
                                Ok(report) => tracing::info!(
                                    created = report.created,
                                    updated = report.updated,
                                    "Routes reloaded from config"
                                ),
                                Err(e) => tracing::error!(
                                    error = %e,
                                    "Config reload rejected. Keeping current routes."
                                ),
                            }
                        }
                        _ = stop.recv() => break,
                    }
                }
            }));
        }

        if self.state.config.admin.enabled {
            let admin_addr = &self.state.config.admin.bind_address;
            let admin_listener = TcpListener::bind(admin_addr).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let admin = self.admin_router();
            let mut stop = tasks.subscribe();
            handles.push(tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin server failed");
                }
            }));
        }

        let app = self
            .proxy_router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        tasks.trigger();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.state.gateway.close().await;

        tracing::info!("HTTP server stopped");
        served
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.gateway.handle(request).await
}
