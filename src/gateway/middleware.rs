//! Named per-route middleware.
//!
//! # Responsibilities
//! - Define the request/response hook contract
//! - Hold the name → implementation registry built at startup
//! - Provide the built-in hooks routes can name
//!
//! # Design Decisions
//! - Names are resolved when a rule is validated, never skipped at request time
//! - Hooks are synchronous; anything needing I/O belongs in a pipeline stage

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::Response,
};

use crate::http::request::X_REQUEST_ID;
use crate::routing::RouteRule;
use crate::security::Identity;

/// Per-request state visible to middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_ip: Option<IpAddr>,
    pub rule: Arc<RouteRule>,
    pub identity: Option<Identity>,
    pub started: Instant,
}

pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect or amend the request. `Err` answers the client directly.
    fn on_request(&self, _ctx: &mut RequestContext) -> Result<(), Response> {
        Ok(())
    }

    /// Amend the response, whichever stage produced it.
    fn on_response(&self, _ctx: &RequestContext, _response: &mut Response) {}
}

const REQUEST_ID: &str = "request_id";
const ACCESS_LOG: &str = "access_log";
const CORS: &str = "cors";
const SECURITY_HEADERS: &str = "security_headers";

/// Middleware every registry starts with.
pub fn builtin_names() -> &'static [&'static str] {
    &[REQUEST_ID, ACCESS_LOG, CORS, SECURITY_HEADERS]
}

/// Name → middleware lookup.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RequestIdMiddleware));
        registry.register(Arc::new(AccessLogMiddleware));
        registry.register(Arc::new(CorsMiddleware));
        registry.register(Arc::new(SecurityHeadersMiddleware));
        registry
    }

    /// Add or replace by name.
    pub fn register(&mut self, middleware: Arc<dyn Middleware>) {
        self.entries.insert(middleware.name().to_string(), middleware);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// The chain for `names`, in order. Unknown names are dropped with a
    /// warning; validation keeps them out of the table.
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn Middleware>> {
        names
            .iter()
            .filter_map(|name| {
                let found = self.get(name);
                if found.is_none() {
                    tracing::warn!(middleware = %name, "Route names unregistered middleware");
                }
                found
            })
            .collect()
    }
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("names", &self.names())
            .finish()
    }
}

struct RequestIdMiddleware;

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        REQUEST_ID
    }

    fn on_request(&self, ctx: &mut RequestContext) -> Result<(), Response> {
        if !ctx.headers.contains_key(&X_REQUEST_ID) {
            if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
                ctx.headers.insert(X_REQUEST_ID, value);
            }
        }
        Ok(())
    }

    fn on_response(&self, ctx: &RequestContext, response: &mut Response) {
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
    }
}

struct AccessLogMiddleware;

impl Middleware for AccessLogMiddleware {
    fn name(&self) -> &str {
        ACCESS_LOG
    }

    fn on_response(&self, ctx: &RequestContext, response: &mut Response) {
        tracing::info!(
            request_id = %ctx.request_id,
            route_id = %ctx.rule.id,
            method = %ctx.method,
            path = %ctx.uri.path(),
            status = response.status().as_u16(),
            latency_ms = ctx.started.elapsed().as_millis() as u64,
            user_id = ctx.identity.as_ref().map(|i| i.user_id.as_str()),
            "access"
        );
    }
}

struct CorsMiddleware;

const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const CORS_MAX_AGE: &str = "86400";

impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        CORS
    }

    fn on_request(&self, ctx: &mut RequestContext) -> Result<(), Response> {
        let preflight = ctx.method == Method::OPTIONS
            && ctx.headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
        if !preflight {
            return Ok(());
        }

        let allow_headers = ctx
            .headers
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE));
        Err(response)
    }

    fn on_response(&self, _ctx: &RequestContext, response: &mut Response) {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
}

struct SecurityHeadersMiddleware;

impl Middleware for SecurityHeadersMiddleware {
    fn name(&self) -> &str {
        SECURITY_HEADERS
    }

    fn on_response(&self, _ctx: &RequestContext, response: &mut Response) {
        let headers = response.headers_mut();
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    }
}
