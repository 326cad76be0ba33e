//! Request-path error taxonomy.
//!
//! Every way the pipeline can refuse or fail a request. The HTTP mapping
//! lives in `http::response`.

use std::time::Duration;

use crate::discovery::DiscoveryError;
use crate::routing::RuleViolation;
use crate::security::LimitTier;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route matches {method} {path}")]
    NoRoute { method: String, path: String },

    #[error("route `{0}` is not active")]
    RouteInactive(String),

    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("caller lacks a role allowed on this route")]
    Forbidden,

    #[error("rate limit exceeded ({tier} tier)")]
    RateLimited { tier: LimitTier, retry_after: Duration },

    #[error("circuit open for `{target}`")]
    CircuitOpen { target: String, retry_after: Duration },

    #[error("no healthy instance of `{0}`")]
    NoHealthyInstance(String),

    #[error("service discovery failed for `{service}`: {source}")]
    DiscoveryTransport {
        service: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("upstream `{target}` timed out")]
    UpstreamTimeout { target: String },

    #[error("upstream `{target}` unavailable: {reason}")]
    UpstreamUnavailable { target: String, reason: String },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("could not read request body: {0}")]
    InvalidBody(String),

    #[error("invalid route configuration")]
    InvalidRouteConfig(Vec<RuleViolation>),
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NoRoute { .. } => "no_route",
            GatewayError::RouteInactive(_) => "route_inactive",
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Forbidden => "forbidden",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::NoHealthyInstance(_) | GatewayError::DiscoveryTransport { .. } => {
                "no_healthy_instance"
            }
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::InvalidBody(_) => "invalid_body",
            GatewayError::InvalidRouteConfig(_) => "invalid_route_config",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after, .. }
            | GatewayError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
