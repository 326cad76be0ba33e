//! Static discovery compiled from configuration.
//!
//! # Responsibilities
//! - Parse `service -> "host:port,host:port"` lists once at startup
//! - Report every configured instance as passing
//!
//! # Design Decisions
//! - Topology is immutable at runtime; register/deregister are unsupported
//! - Malformed entries fail construction instead of being skipped

use std::collections::HashMap;

use async_trait::async_trait;

use crate::discovery::{DiscoveryBackend, DiscoveryError, ServiceInstance};

/// Discovery backend over a fixed instance list.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: HashMap<String, Vec<ServiceInstance>>,
}

impl StaticDiscovery {
    /// Build from the configured `service -> address list` map.
    pub fn from_config(services: &HashMap<String, String>) -> Result<Self, DiscoveryError> {
        let mut compiled = HashMap::with_capacity(services.len());

        for (name, list) in services {
            let mut instances = Vec::new();
            for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let (host, port) = parse_host_port(entry).ok_or_else(|| {
                    DiscoveryError::InvalidConfig(format!(
                        "service `{}`: `{}` is not a host:port pair",
                        name, entry
                    ))
                })?;
                instances.push(ServiceInstance::new(entry, name.clone(), host, port));
            }

            tracing::debug!(
                service = %name,
                instances = instances.len(),
                "Static service compiled"
            );
            compiled.insert(name.clone(), instances);
        }

        Ok(Self { services: compiled })
    }
}

fn parse_host_port(entry: &str) -> Option<(String, u16)> {
    let (host, port) = entry.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some((host.to_string(), port))
}

#[async_trait]
impl DiscoveryBackend for StaticDiscovery {
    async fn register(&self, _instance: ServiceInstance) -> Result<(), DiscoveryError> {
        Err(DiscoveryError::Unsupported("register"))
    }

    async fn deregister(&self, _id: &str) -> Result<(), DiscoveryError> {
        Err(DiscoveryError::Unsupported("deregister"))
    }

    async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        Ok(self.services.get(service).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }
}
