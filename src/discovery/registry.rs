//! Registry-backed discovery (Consul-style agent API).
//!
//! # Responsibilities
//! - Register instances together with an HTTP health-check descriptor
//! - Query the agent's health endpoint and translate check results
//! - Filter to passing instances for routing
//!
//! # Design Decisions
//! - One shared `reqwest::Client` with a request timeout; safe for
//!   concurrent use by every request task
//! - An entry's health is the worst of its checks
//! - Empty service address falls back to the node address (agent semantics)

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::RegistryConfig;
use crate::discovery::{DiscoveryBackend, DiscoveryError, Health, ServiceInstance};

/// Discovery through a registry agent's HTTP API.
#[derive(Debug)]
pub struct RegistryDiscovery {
    client: reqwest::Client,
    base: Url,
    config: RegistryConfig,
}

impl RegistryDiscovery {
    pub fn new(config: RegistryConfig) -> Result<Self, DiscoveryError> {
        let base = Url::parse(&format!("{}://{}/", config.scheme, config.address))
            .map_err(|e| DiscoveryError::InvalidConfig(format!("registry address: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| DiscoveryError::InvalidConfig(format!("registry client: {}", e)))?;

        Ok(Self { client, base, config })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DiscoveryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DiscoveryError::InvalidConfig("registry address cannot be a base URL".into())
            })?
            .pop_if_empty()
            .extend(segments);

        if let Some(dc) = &self.config.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.header("X-Consul-Token", token),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, DiscoveryError> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Transport(format!(
                "registry returned {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterPayload<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    tags: &'a BTreeSet<String>,
    meta: &'a BTreeMap<String, String>,
    check: CheckDescriptor,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckDescriptor {
    #[serde(rename = "HTTP")]
    http: String,
    interval: String,
    timeout: String,
    deregister_critical_service_after: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    #[serde(default)]
    node: NodeInfo,
    service: AgentService,
    #[serde(default)]
    checks: Vec<CheckResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckResult {
    status: String,
}

fn check_health(status: &str) -> Health {
    match status {
        "passing" => Health::Passing,
        "warning" => Health::Warning,
        _ => Health::Critical,
    }
}

impl HealthEntry {
    fn into_instance(self) -> ServiceInstance {
        let health = self
            .checks
            .iter()
            .map(|c| check_health(&c.status))
            .fold(Health::Passing, Health::worst);

        let address = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };

        ServiceInstance {
            id: self.service.id,
            name: self.service.service,
            address,
            port: self.service.port,
            tags: self.service.tags.unwrap_or_default().into_iter().collect(),
            metadata: self.service.meta.unwrap_or_default().into_iter().collect(),
            health,
        }
    }
}

#[async_trait]
impl DiscoveryBackend for RegistryDiscovery {
    async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError> {
        let hc = &self.config.health_check;
        let payload = RegisterPayload {
            id: &instance.id,
            name: &instance.name,
            address: &instance.address,
            port: instance.port,
            tags: &instance.tags,
            meta: &instance.metadata,
            check: CheckDescriptor {
                http: format!("{}{}", instance.base_url(), hc.path),
                interval: format!("{}s", hc.interval_secs),
                timeout: format!("{}s", hc.timeout_secs),
                deregister_critical_service_after: format!("{}s", hc.deregister_after_secs),
            },
        };

        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        self.send(self.client.put(url).json(&payload)).await?;

        tracing::info!(
            service = %instance.name,
            id = %instance.id,
            "Instance registered with registry"
        );
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", id])?;
        self.send(self.client.put(url)).await?;

        tracing::info!(id = %id, "Instance deregistered from registry");
        Ok(())
    }

    async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let url = self.endpoint(&["v1", "health", "service", service])?;
        let entries: Vec<HealthEntry> = self.send(self.client.get(url)).await?.json().await?;

        let instances: Vec<ServiceInstance> =
            entries.into_iter().map(HealthEntry::into_instance).collect();
        tracing::debug!(
            service = %service,
            instances = instances.len(),
            "Registry lookup complete"
        );
        Ok(instances)
    }

    async fn close(&self) -> Result<(), DiscoveryError> {
        // The client pool is released when the last handle drops.
        tracing::debug!(registry = %self.base, "Registry discovery closed");
        Ok(())
    }
}
