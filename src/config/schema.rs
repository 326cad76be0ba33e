//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::routing::RouteRule;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Data-plane listener.
    pub listener: ListenerConfig,

    /// Gateway-wide defaults applied to routes that leave fields at zero.
    pub defaults: RouteDefaults,

    /// Service discovery backend selection.
    pub discovery: DiscoveryConfig,

    /// Instance selection strategy.
    pub load_balancing: LoadBalancingStrategy,

    /// Admission control tiers.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker thresholds (shared by every target).
    pub circuit_breaker: CircuitBreakerConfig,

    /// Backoff between dispatch retries.
    pub retries: RetryConfig,

    /// Overall request deadline.
    pub timeouts: TimeoutConfig,

    pub security: SecurityConfig,

    /// Static bearer tokens for routes with `requires_auth`.
    pub auth: AuthConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,

    /// Routes loaded at boot (and merged again on config reload).
    pub routes: Vec<RouteRule>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Route defaults.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteDefaults {
    /// Per-attempt upstream timeout in milliseconds.
    pub timeout_ms: u64,

    /// Extra attempts after the first failure.
    pub retry_count: u32,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry_count: 1,
        }
    }
}

/// Which discovery backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    #[default]
    Static,
    Registry,
    HttpPolling,
}

impl DiscoveryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscoveryKind::Static => "static",
            DiscoveryKind::Registry => "registry",
            DiscoveryKind::HttpPolling => "http_polling",
        }
    }
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery configuration.
///
/// Only the section matching `type` is read.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    #[serde(rename = "type")]
    pub kind: DiscoveryKind,

    /// Static: service name -> "host:port,host:port".
    pub services: HashMap<String, String>,

    pub registry: RegistryConfig,

    pub http_polling: HttpPollingConfig,

    /// Cache discover() results this long (0 = no cache).
    pub cache_ttl_ms: u64,
}

/// Registry agent (Consul-style) settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Agent address (e.g., "127.0.0.1:8500").
    pub address: String,

    /// "http" or "https".
    pub scheme: String,

    pub datacenter: Option<String>,

    /// ACL token sent as X-Consul-Token.
    pub token: Option<String>,

    pub request_timeout_ms: u64,

    /// Check descriptor submitted with every registration.
    pub health_check: RegistryHealthCheckConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            scheme: "http".to_string(),
            datacenter: None,
            token: None,
            request_timeout_ms: 2_000,
            health_check: RegistryHealthCheckConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryHealthCheckConfig {
    /// Path probed on the registered instance.
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Agent removes the instance after being critical this long.
    pub deregister_after_secs: u64,
}

impl Default for RegistryHealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_secs: 10,
            timeout_secs: 5,
            deregister_after_secs: 60,
        }
    }
}

/// HTTP polling discovery settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpPollingConfig {
    /// Base URL of the discovery service.
    pub base_url: String,

    /// Path of the service catalog endpoint.
    pub services_path: String,

    /// Refresh interval in seconds (0 = fetch on every lookup).
    pub poll_interval_secs: u64,

    pub request_timeout_ms: u64,
}

impl Default for HttpPollingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            services_path: "/services".to_string(),
            poll_interval_secs: 5,
            request_timeout_ms: 2_000,
        }
    }
}

/// Instance selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Random,
}

/// Quota for one rate-limit tier or route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Requests admitted per window.
    pub requests: u32,

    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    1_000
}

/// Rate limiting configuration.
///
/// Each tier is independent; an absent tier is not enforced.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Master switch for the global/IP/user/path tiers (route limits always apply).
    pub enabled: bool,

    pub global: Option<RateLimitRule>,
    pub per_ip: Option<RateLimitRule>,
    pub per_user: Option<RateLimitRule>,
    pub per_path: Option<RateLimitRule>,

    /// Upper bound on a single counter-store call.
    pub store_timeout_ms: u64,

    /// How often expired counters are evicted.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global: None,
            per_ip: None,
            per_user: None,
            per_path: None,
            store_timeout_ms: 50,
            sweep_interval_secs: 30,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,

    /// Failures older than this no longer count.
    pub failure_window_ms: u64,

    /// Time spent Open before trial requests are let through.
    pub reset_timeout_ms: u64,

    /// Trial successes required to close again.
    pub success_threshold: u32,

    /// Concurrent trial requests allowed while HalfOpen.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
            half_open_max_requests: 1,
        }
    }
}

/// Retry backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds (0 = retry immediately).
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request deadline in seconds, covering every stage and retry.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered request body in bytes.
    pub max_body_size: usize,

    /// Take the client IP from the first X-Forwarded-For hop.
    pub trust_forwarded_for: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            trust_forwarded_for: false,
        }
    }
}

/// Identity bound to a static token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenIdentity {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token -> identity.
    pub tokens: HashMap<String, TokenIdentity>,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.discovery.kind, DiscoveryKind::Static);
        assert_eq!(config.load_balancing, LoadBalancingStrategy::RoundRobin);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn parses_discovery_and_tiers() {
        let raw = r#"
            load_balancing = "random"

            [discovery]
            type = "http_polling"
            cache_ttl_ms = 500

            [discovery.http_polling]
            base_url = "http://house.internal:7000"
            poll_interval_secs = 2

            [rate_limit]
            per_ip = { requests = 20 }
            global = { requests = 1000, window_ms = 60000 }
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.discovery.kind, DiscoveryKind::HttpPolling);
        assert_eq!(config.discovery.http_polling.poll_interval_secs, 2);
        assert_eq!(config.discovery.http_polling.services_path, "/services");
        assert_eq!(config.load_balancing, LoadBalancingStrategy::Random);

        let per_ip = config.rate_limit.per_ip.unwrap();
        assert_eq!((per_ip.requests, per_ip.window_ms), (20, 1_000));
        assert_eq!(config.rate_limit.global.unwrap().window_ms, 60_000);
        assert!(config.rate_limit.per_user.is_none());
    }
}
