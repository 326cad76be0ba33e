//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, addresses parse)
//! - Validate boot routes the same way the route registry will
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;

use crate::config::schema::{DiscoveryKind, GatewayConfig, RateLimitRule};
use crate::gateway::middleware::builtin_names;

/// A single invalid setting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("`{}` is not a socket address", value),
        ));
    }
}

fn check_rule(errors: &mut Vec<ValidationError>, field: &str, rule: &Option<RateLimitRule>) {
    if let Some(rule) = rule {
        if rule.requests == 0 {
            errors.push(ValidationError::new(field, "requests must be > 0"));
        }
        if rule.window_ms == 0 {
            errors.push(ValidationError::new(field, "window_ms must be > 0"));
        }
    }
}

/// Validate a parsed configuration.
///
/// Route middleware names are checked against the built-in set; routes that
/// use custom middleware are added at runtime once it is registered.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.defaults.timeout_ms == 0 {
        errors.push(ValidationError::new("defaults.timeout_ms", "must be > 0"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be > 0"));
    }

    let cb = &config.circuit_breaker;
    for (field, value) in [
        ("circuit_breaker.failure_threshold", cb.failure_threshold),
        ("circuit_breaker.success_threshold", cb.success_threshold),
        ("circuit_breaker.half_open_max_requests", cb.half_open_max_requests),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if cb.reset_timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.reset_timeout_ms", "must be > 0"));
    }

    let rl = &config.rate_limit;
    check_rule(&mut errors, "rate_limit.global", &rl.global);
    check_rule(&mut errors, "rate_limit.per_ip", &rl.per_ip);
    check_rule(&mut errors, "rate_limit.per_user", &rl.per_user);
    check_rule(&mut errors, "rate_limit.per_path", &rl.per_path);
    if rl.store_timeout_ms == 0 {
        errors.push(ValidationError::new("rate_limit.store_timeout_ms", "must be > 0"));
    }

    match config.discovery.kind {
        DiscoveryKind::Static => {
            let services = &config.discovery.services;
            if let Err(e) = crate::discovery::StaticDiscovery::from_config(services) {
                errors.push(ValidationError::new("discovery.services", e.to_string()));
            }
        }
        DiscoveryKind::Registry => {
            let registry = &config.discovery.registry;
            if registry.address.is_empty() {
                errors.push(ValidationError::new(
                    "discovery.registry.address",
                    "must not be empty",
                ));
            }
            if !matches!(registry.scheme.as_str(), "http" | "https") {
                errors.push(ValidationError::new(
                    "discovery.registry.scheme",
                    "must be `http` or `https`",
                ));
            }
        }
        DiscoveryKind::HttpPolling => {
            if url::Url::parse(&config.discovery.http_polling.base_url).is_err() {
                errors.push(ValidationError::new(
                    "discovery.http_polling.base_url",
                    "must be an absolute URL",
                ));
            }
        }
    }

    let known: BTreeSet<String> = builtin_names().iter().map(|s| s.to_string()).collect();
    let mut ids = HashSet::new();
    let mut keys = HashSet::new();
    for (i, rule) in config.routes.iter().enumerate() {
        let label = if rule.id.is_empty() {
            format!("routes[{}]", i)
        } else {
            format!("routes[{}]", rule.id)
        };

        for violation in rule.violations(&known) {
            errors.push(ValidationError::new(
                format!("{}.{}", label, violation.field),
                violation.message,
            ));
        }
        if !rule.id.is_empty() && !ids.insert(rule.id.as_str()) {
            errors.push(ValidationError::new(label.clone(), "duplicate route id"));
        }
        if !keys.insert((rule.method.to_ascii_uppercase(), rule.path.as_str())) {
            errors.push(ValidationError::new(
                label,
                format!("another route already serves {} {}", rule.method, rule.path),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
