//! Route rule model and per-rule validation.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use axum::http::{HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RateLimitRule;
use crate::routing::matcher::PathPattern;

/// Wildcard method.
pub const ANY_METHOD: &str = "ANY";

const KNOWN_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "TRACE", "CONNECT", ANY_METHOD,
];

/// Lifecycle status of a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    #[default]
    Active,
    Inactive,
    Deprecated,
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteStatus::Active => "active",
            RouteStatus::Inactive => "inactive",
            RouteStatus::Deprecated => "deprecated",
        };
        f.write_str(s)
    }
}

/// One (method, path) -> target mapping plus its policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteRule {
    /// Stable id; generated on add when empty.
    pub id: String,

    /// Exact path, or a prefix pattern ending in `/*`.
    pub path: String,

    /// HTTP method or `ANY`.
    pub method: String,

    /// Logical service resolved through discovery.
    pub target_service: Option<String>,

    /// Fixed upstream base URL, bypassing discovery.
    pub target_url: Option<String>,

    /// Remove the route's literal prefix before forwarding.
    pub strip_prefix: bool,

    pub requires_auth: bool,

    /// When non-empty the identity must hold one of these roles.
    pub allowed_roles: Vec<String>,

    /// Route-level quota, applied before the gateway-wide tiers.
    pub rate_limit: Option<RateLimitRule>,

    /// Named middleware, run in declared order.
    pub middleware: Vec<String>,

    /// Merged into the forwarded request's headers.
    pub headers: BTreeMap<String, String>,

    /// Per-attempt timeout (0 = gateway default).
    pub timeout_ms: u64,

    /// Extra attempts on failure (0 = gateway default).
    pub retry_count: u32,

    pub status: RouteStatus,

    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RouteRule {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            path: String::new(),
            method: String::new(),
            target_service: None,
            target_url: None,
            strip_prefix: false,
            requires_auth: false,
            allowed_roles: Vec::new(),
            rate_limit: None,
            middleware: Vec::new(),
            headers: BTreeMap::new(),
            timeout_ms: 0,
            retry_count: 0,
            status: RouteStatus::Active,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleViolation {
    pub field: &'static str,
    pub message: String,
}

impl RuleViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl RouteRule {
    /// Route to a discovered service.
    pub fn to_service(method: &str, path: &str, service: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            target_service: Some(service.to_string()),
            ..Self::default()
        }
    }

    /// Route to a fixed upstream URL.
    pub fn to_url(method: &str, path: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            target_url: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RouteStatus::Active
    }

    pub fn pattern(&self) -> PathPattern {
        PathPattern::parse(&self.path)
    }

    /// Key the circuit breaker tracks this route under.
    ///
    /// Service routes share their service's breaker. Fixed-URL routes get
    /// `route:{id}`, which can never equal a service name.
    pub fn breaker_target(&self) -> Cow<'_, str> {
        match &self.target_service {
            Some(service) => Cow::Borrowed(service.as_str()),
            None => Cow::Owned(format!("route:{}", self.id)),
        }
    }

    /// Path forwarded upstream for an inbound `path`.
    pub fn upstream_path(&self, path: &str) -> String {
        if !self.strip_prefix {
            return path.to_string();
        }
        let pattern = self.pattern();
        let rest = path.strip_prefix(pattern.literal()).unwrap_or(path);
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        }
    }

    /// Violations of the rule on its own (table-level conflicts are checked
    /// by the registry).
    pub fn violations(&self, known_middleware: &BTreeSet<String>) -> Vec<RuleViolation> {
        let mut out = Vec::new();

        if self.path.is_empty() {
            out.push(RuleViolation::new("path", "must not be empty"));
        } else if !self.path.starts_with('/') {
            out.push(RuleViolation::new("path", "must start with `/`"));
        } else if self.path.strip_suffix("/*").unwrap_or(&self.path).contains('*') {
            out.push(RuleViolation::new("path", "`*` is only allowed as a trailing `/*`"));
        }

        if self.method.is_empty() {
            out.push(RuleViolation::new("method", "must not be empty"));
        } else if !KNOWN_METHODS.contains(&self.method.to_ascii_uppercase().as_str()) {
            out.push(RuleViolation::new(
                "method",
                format!("unknown method `{}`", self.method),
            ));
        }

        let service = self.target_service.as_deref().filter(|s| !s.is_empty());
        let url = self.target_url.as_deref().filter(|s| !s.is_empty());
        match (service, url) {
            (Some(_), Some(_)) => out.push(RuleViolation::new(
                "target",
                "set exactly one of target_service or target_url, not both",
            )),
            (None, None) => out.push(RuleViolation::new(
                "target",
                "one of target_service or target_url is required",
            )),
            (None, Some(raw)) => match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
                Ok(_) => out.push(RuleViolation::new(
                    "target_url",
                    "must be an absolute http(s) URL",
                )),
                Err(e) => out.push(RuleViolation::new("target_url", e.to_string())),
            },
            (Some(_), None) => {}
        }

        for name in &self.middleware {
            if !known_middleware.contains(name) {
                out.push(RuleViolation::new(
                    "middleware",
                    format!("unknown middleware `{}`", name),
                ));
            }
        }

        if let Some(limit) = &self.rate_limit {
            if limit.requests == 0 {
                out.push(RuleViolation::new("rate_limit", "requests must be > 0"));
            }
            if limit.window_ms == 0 {
                out.push(RuleViolation::new("rate_limit", "window_ms must be > 0"));
            }
        }

        for (name, value) in &self.headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                out.push(RuleViolation::new(
                    "headers",
                    format!("`{}` is not a valid header name", name),
                ));
            }
            if HeaderValue::from_str(value).is_err() {
                out.push(RuleViolation::new(
                    "headers",
                    format!("value of `{}` is not a valid header value", name),
                ));
            }
        }

        out
    }
}
