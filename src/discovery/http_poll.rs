//! HTTP-polling discovery against a lightweight "house" discovery service.
//!
//! # Responsibilities
//! - Fetch `{base_url}{services_path}`: a JSON map of service name to instances
//! - Refresh a shared snapshot from a background task
//! - Translate the service's health vocabulary into [`Health`]
//!
//! # Design Decisions
//! - The gateway never self-registers here: register/deregister are no-ops
//! - Snapshot swapped atomically via `arc-swap`; readers never block
//! - A failed refresh is surfaced as a transport error until the next good one
//! - `poll_interval_secs = 0` disables the task and fetches on demand

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::HttpPollingConfig;
use crate::discovery::{DiscoveryBackend, DiscoveryError, Health, ServiceInstance};
use crate::lifecycle::Shutdown;

type Catalog = HashMap<String, Vec<ServiceInstance>>;

#[derive(Debug, Default)]
struct PollState {
    catalog: Option<Arc<Catalog>>,
    last_error: Option<DiscoveryError>,
}

#[derive(Debug, Deserialize)]
struct HouseInstance {
    #[serde(default)]
    id: Option<String>,
    address: String,
    port: u16,
    #[serde(default)]
    status: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(HouseInstance),
    Many(Vec<HouseInstance>),
}

fn house_health(status: &str) -> Health {
    if status.eq_ignore_ascii_case("healthy") {
        Health::Passing
    } else if status.eq_ignore_ascii_case("warning") {
        Health::Warning
    } else {
        Health::Critical
    }
}

fn compile_catalog(raw: HashMap<String, OneOrMany>) -> Catalog {
    raw.into_iter()
        .map(|(name, entries)| {
            let entries = match entries {
                OneOrMany::One(one) => vec![one],
                OneOrMany::Many(many) => many,
            };
            let instances = entries
                .into_iter()
                .map(|e| ServiceInstance {
                    id: e.id.unwrap_or_else(|| format!("{}:{}", e.address, e.port)),
                    name: name.clone(),
                    address: e.address,
                    port: e.port,
                    tags: e.tags.into_iter().collect(),
                    metadata: e.metadata.into_iter().collect(),
                    health: house_health(&e.status),
                })
                .collect();
            (name, instances)
        })
        .collect()
}

/// Discovery backed by periodic polling of a discovery service.
pub struct HttpPollDiscovery {
    client: reqwest::Client,
    endpoint: Url,
    poll_interval: Duration,
    state: ArcSwap<PollState>,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpPollDiscovery {
    pub fn new(config: HttpPollingConfig) -> Result<Self, DiscoveryError> {
        let endpoint = Url::parse(&config.base_url)
            .and_then(|base| base.join(&config.services_path))
            .map_err(|e| DiscoveryError::InvalidConfig(format!("discovery base_url: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| DiscoveryError::InvalidConfig(format!("discovery client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            state: ArcSwap::from_pointee(PollState::default()),
            shutdown: Shutdown::new(),
            task: Mutex::new(None),
        })
    }

    /// Spawn the refresh task. No-op when polling is disabled.
    pub fn start(self: &Arc<Self>) {
        if self.poll_interval.is_zero() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(this) = weak.upgrade() else { break };
                        if let Err(e) = this.refresh().await {
                            tracing::warn!(
                                endpoint = %this.endpoint,
                                error = %e,
                                "Discovery poll failed"
                            );
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!("Discovery poller stopped");
        });

        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
        tracing::info!(
            endpoint = %self.endpoint,
            interval = ?self.poll_interval,
            "Discovery poller started"
        );
    }

    /// True while the background task is alive.
    pub fn is_polling(&self) -> bool {
        let slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|h| !h.is_finished())
    }

    async fn fetch(&self) -> Result<Catalog, DiscoveryError> {
        let response = self.client.get(self.endpoint.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Transport(format!(
                "discovery service returned {}",
                status
            )));
        }
        let raw: HashMap<String, OneOrMany> = response.json().await?;
        Ok(compile_catalog(raw))
    }

    /// Fetch once and publish the result (or the failure) to readers.
    pub async fn refresh(&self) -> Result<Arc<Catalog>, DiscoveryError> {
        match self.fetch().await {
            Ok(catalog) => {
                let catalog = Arc::new(catalog);
                self.state.store(Arc::new(PollState {
                    catalog: Some(catalog.clone()),
                    last_error: None,
                }));
                Ok(catalog)
            }
            Err(e) => {
                let previous = self.state.load().catalog.clone();
                self.state.store(Arc::new(PollState {
                    catalog: previous,
                    last_error: Some(e.clone()),
                }));
                Err(e)
            }
        }
    }
}

#[async_trait]
impl DiscoveryBackend for HttpPollDiscovery {
    async fn register(&self, instance: ServiceInstance) -> Result<(), DiscoveryError> {
        tracing::debug!(id = %instance.id, "Polling discovery ignores register");
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), DiscoveryError> {
        tracing::debug!(id = %id, "Polling discovery ignores deregister");
        Ok(())
    }

    async fn discover(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let catalog = if self.poll_interval.is_zero() {
            self.refresh().await?
        } else {
            let state = self.state.load();
            if let Some(e) = &state.last_error {
                return Err(e.clone());
            }
            match &state.catalog {
                Some(catalog) => catalog.clone(),
                // First request raced the first tick.
                None => self.refresh().await?,
            }
        };

        Ok(catalog.get(service).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<(), DiscoveryError> {
        self.shutdown.trigger();
        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Discovery poller ended abnormally");
            }
        }
        Ok(())
    }
}
