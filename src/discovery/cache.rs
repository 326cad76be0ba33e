//! Short-lived per-service cache in front of any discovery backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::discovery::{DiscoveryBackend, DiscoveryError, ServiceInstance};

/// Caches successful `discover` results for `ttl`.
///
/// Transport errors are never cached, so a recovering backend is picked up
/// on the very next request.
pub struct CachedDiscovery {
    inner: Arc<dyn DiscoveryBackend>,
    ttl: Duration,
    entries: DashMap<String, (Instant, Vec<ServiceInstance>)>,
}

impl CachedDiscovery {
    pub fn new(inner: Arc<dyn DiscoveryBackend>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    fn fresh(&self, service: &str, now: Instant) -> Option<Vec<ServiceInstance>> {
        let entry = self.entries.get(service)?;
        let (stored_at, instances) = entry.value();
        if now.duration_since(*stored_at) < self.ttl {
            Some(instances.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl DiscoveryBackend for CachedDiscovery {
    async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError> {
        let service = instance.name.clone();
        self.inner.register(instance).await?;
        self.entries.remove(&service);
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError> {
        self.inner.deregister(id).await?;
        // The id alone does not say which service it belonged to.
        self.entries.clear();
        Ok(())
    }

    async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        if let Some(hit) = self.fresh(service, Instant::now()) {
            return Ok(hit);
        }

        let instances = self.inner.discover(service).await?;
        self.entries
            .insert(service.to_string(), (Instant::now(), instances.clone()));
        Ok(instances)
    }

    async fn close(&self) -> Result<(), DiscoveryError> {
        self.entries.clear();
        self.inner.close().await
    }
}
