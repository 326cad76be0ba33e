//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! RouteRule.target_service
//!     → DiscoveryBackend::healthy_instances(name)
//!         - static_list.rs (compiled from config, immutable)
//!         - registry.rs (Consul-style agent, health checks)
//!         - http_poll.rs (house discovery service, background refresh)
//!     → optional cache.rs decorator (short TTL per service)
//!     → Vec<ServiceInstance> snapshot handed to the dispatcher
//! ```
//!
//! # Design Decisions
//! - One capability trait with five operations; the variant is picked once
//!   from configuration in `build_backend`
//! - Zero instances is not an error; transport failures are
//! - Backends return owned snapshots, never references into their state

pub mod cache;
pub mod http_poll;
pub mod instance;
pub mod registry;
pub mod static_list;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DiscoveryConfig, DiscoveryKind};

pub use cache::CachedDiscovery;
pub use http_poll::HttpPollDiscovery;
pub use instance::{Health, ServiceInstance};
pub use registry::RegistryDiscovery;
pub use static_list::StaticDiscovery;

/// Errors produced by discovery backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("operation `{0}` is not supported by this discovery backend")]
    Unsupported(&'static str),

    #[error("discovery transport error: {0}")]
    Transport(String),

    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid discovery response: {0}")]
    InvalidResponse(String),
}

impl DiscoveryError {
    /// True for failures of the path to the backend (network, timeout, bad
    /// status, garbage payload) as opposed to caller mistakes.
    pub fn is_transport(&self) -> bool {
        matches!(self, DiscoveryError::Transport(_) | DiscoveryError::InvalidResponse(_))
    }
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DiscoveryError::InvalidResponse(e.to_string())
        } else {
            DiscoveryError::Transport(e.to_string())
        }
    }
}

/// Resolver of logical service names into network instances.
///
/// Implementations must be safe for concurrent use by every request task.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Register an instance with the backend.
    async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError>;

    /// Remove an instance by id.
    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError>;

    /// All known instances of `service`, whatever their health.
    async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError>;

    /// Instances of `service` whose health is `Passing`.
    async fn healthy_instances(
        &self,
        service: &str,
    ) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let all = self.discover(service).await?;
        Ok(all.into_iter().filter(ServiceInstance::is_passing).collect())
    }

    /// Release connections and stop background tasks.
    async fn close(&self) -> Result<(), DiscoveryError>;
}

/// Build the configured backend, wrapped in a cache when `cache_ttl_ms > 0`.
///
/// The HTTP polling variant spawns its refresh task here, so this must be
/// called from within a Tokio runtime when that variant is selected.
pub fn build_backend(
    config: &DiscoveryConfig,
) -> Result<Arc<dyn DiscoveryBackend>, DiscoveryError> {
    let backend: Arc<dyn DiscoveryBackend> = match config.kind {
        DiscoveryKind::Static => Arc::new(StaticDiscovery::from_config(&config.services)?),
        DiscoveryKind::Registry => Arc::new(RegistryDiscovery::new(config.registry.clone())?),
        DiscoveryKind::HttpPolling => {
            let poller = Arc::new(HttpPollDiscovery::new(config.http_polling.clone())?);
            poller.start();
            poller
        }
    };

    tracing::info!(
        kind = %config.kind,
        cache_ttl_ms = config.cache_ttl_ms,
        "Discovery backend initialized"
    );

    if config.cache_ttl_ms > 0 {
        Ok(Arc::new(CachedDiscovery::new(
            backend,
            std::time::Duration::from_millis(config.cache_ttl_ms),
        )))
    } else {
        Ok(backend)
    }
}
