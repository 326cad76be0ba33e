//! Service instance model.
//!
//! # Responsibilities
//! - Describe one reachable backend endpoint
//! - Carry the health verdict of whichever backend produced it
//!
//! Instances are plain values. Backends hand out clones, so callers can keep
//! them for the duration of a request without holding any backend lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Health of an instance as reported by its discovery backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Passing,
    Warning,
    Critical,
}

impl Health {
    /// Combine two verdicts, keeping the worse one.
    pub fn worst(self, other: Health) -> Health {
        self.max(other)
    }
}

impl Default for Health {
    fn default() -> Self {
        Health::Passing
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Health::Passing => "passing",
            Health::Warning => "warning",
            Health::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One network endpoint of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique within `name`.
    pub id: String,
    /// Logical service name.
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub health: Health,
}

impl ServiceInstance {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            health: Health::Passing,
        }
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    /// `address:port`, suitable for a URI authority or `Host` header.
    pub fn authority(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Base URL for forwarding. The scheme comes from `metadata["scheme"]`.
    pub fn base_url(&self) -> String {
        let scheme = self
            .metadata
            .get("scheme")
            .map(String::as_str)
            .unwrap_or("http");
        format!("{}://{}", scheme, self.authority())
    }

    pub fn is_passing(&self) -> bool {
        self.health == Health::Passing
    }
}
