//! Upstream dispatch with retries.
//!
//! # Responsibilities
//! - Pick an instance per attempt and rewrite the request for it
//! - Bound every attempt with the route's timeout
//! - Retry transport errors, timeouts and 5xx up to the route's budget
//! - Report every attempt to the circuit breaker
//!
//! # Design Decisions
//! - The body is buffered once and replayed on each attempt
//! - An empty instance set fails before any attempt
//! - Client disconnect drops the handler future and with it the attempt

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri},
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::RetryConfig;
use crate::discovery::ServiceInstance;
use crate::error::GatewayError;
use crate::http::request::X_REQUEST_ID;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;
use crate::resilience::{is_retryable_status, within, CircuitBreakers, Outcome, RetryPolicy};
use crate::routing::RouteRule;
use crate::security::headers::{apply_forwarded, apply_identity, strip_hop_by_hop};
use crate::security::Identity;

/// Transport failure talking to an upstream.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct UpstreamError(pub String);

/// Sends one fully-formed request upstream.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError>;
}

/// Production transport on the hyper-util pooled client.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
}

impl HyperUpstream {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let response: Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError(e.to_string()))?;
        Ok(response.map(Body::new))
    }
}

/// Where a request may go.
#[derive(Debug, Clone)]
pub enum Target {
    /// Fixed upstream base URL.
    Fixed(String),
    /// Healthy instances of a discovered service.
    Instances {
        service: String,
        instances: Vec<ServiceInstance>,
    },
}

/// Everything needed to rebuild the request for each attempt.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
    pub identity: Option<Identity>,
}

enum Failure {
    Status(axum::http::StatusCode),
    Transport(String),
    Timeout,
}

pub struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    balancer: Arc<dyn LoadBalancer>,
    retry: RetryConfig,
}

impl Dispatcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        balancer: Arc<dyn LoadBalancer>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            upstream,
            balancer,
            retry,
        }
    }

    fn base_url(&self, target: &Target) -> Option<String> {
        match target {
            Target::Fixed(url) => Some(url.clone()),
            Target::Instances { service, instances } => self
                .balancer
                .pick(service, instances)
                .map(ServiceInstance::base_url),
        }
    }

    /// Forward `request` following `rule`, retrying per its budget.
    pub async fn dispatch(
        &self,
        rule: &RouteRule,
        target: &Target,
        request: &ForwardRequest,
        breakers: &CircuitBreakers,
    ) -> Result<Response<Body>, GatewayError> {
        let breaker_target = rule.breaker_target();
        let breaker_key: &str = &breaker_target;
        if let Target::Instances { service, instances } = target {
            if instances.is_empty() {
                return Err(GatewayError::NoHealthyInstance(service.clone()));
            }
        }

        let policy = RetryPolicy::new(rule.retry_count, &self.retry);
        let per_attempt = Duration::from_millis(rule.timeout_ms.max(1));
        let mut last = Failure::Transport("no attempt made".to_string());

        for attempt in 1..=policy.max_attempts() {
            let Some(base) = self.base_url(target) else { break };
            let outbound = build_request(rule, &base, request)?;

            tracing::debug!(
                request_id = %request.request_id,
                route_id = %rule.id,
                target = %breaker_key,
                attempt,
                uri = %outbound.uri(),
                "Dispatching upstream"
            );

            let failure = match within(per_attempt, self.upstream.send(outbound)).await {
                Ok(Ok(mut response)) if !is_retryable_status(response.status()) => {
                    breakers.record(breaker_key, Outcome::Success);
                    metrics::record_upstream_attempt(breaker_key, Outcome::Success.as_str());
                    strip_hop_by_hop(response.headers_mut());
                    return Ok(response);
                }
                Ok(Ok(response)) => {
                    breakers.record(breaker_key, Outcome::Failure);
                    metrics::record_upstream_attempt(breaker_key, Outcome::Failure.as_str());
                    Failure::Status(response.status())
                }
                Ok(Err(e)) => {
                    breakers.record(breaker_key, Outcome::Failure);
                    metrics::record_upstream_attempt(breaker_key, Outcome::Failure.as_str());
                    Failure::Transport(e.0)
                }
                Err(_) => {
                    breakers.record(breaker_key, Outcome::Timeout);
                    metrics::record_upstream_attempt(breaker_key, Outcome::Timeout.as_str());
                    Failure::Timeout
                }
            };

            match &failure {
                Failure::Status(status) => tracing::warn!(
                    request_id = %request.request_id,
                    target = %breaker_key,
                    attempt,
                    status = %status,
                    "Upstream returned server error"
                ),
                Failure::Transport(e) => tracing::warn!(
                    request_id = %request.request_id,
                    target = %breaker_key,
                    attempt,
                    error = %e,
                    "Upstream request failed"
                ),
                Failure::Timeout => tracing::warn!(
                    request_id = %request.request_id,
                    target = %breaker_key,
                    attempt,
                    timeout = ?per_attempt,
                    "Upstream attempt timed out"
                ),
            }
            last = failure;

            if attempt < policy.max_attempts() {
                let delay = policy.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let target = breaker_key.to_string();
        Err(match last {
            Failure::Timeout => GatewayError::UpstreamTimeout { target },
            Failure::Status(status) => GatewayError::UpstreamUnavailable {
                target,
                reason: format!("upstream returned {}", status),
            },
            Failure::Transport(reason) => GatewayError::UpstreamUnavailable { target, reason },
        })
    }
}

/// Rewrite the inbound request for one upstream base URL.
fn build_request(
    rule: &RouteRule,
    base: &str,
    request: &ForwardRequest,
) -> Result<Request<Body>, GatewayError> {
    let unavailable = |reason: String| GatewayError::UpstreamUnavailable {
        target: rule.breaker_target().to_string(),
        reason,
    };

    let path = rule.upstream_path(request.uri.path());
    let query = request
        .uri
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let uri: Uri = format!("{}{}{}", base.trim_end_matches('/'), path, query)
        .parse()
        .map_err(|e| unavailable(format!("bad upstream uri: {}", e)))?;
    let authority = uri
        .authority()
        .map(|a| a.to_string())
        .ok_or_else(|| unavailable("upstream uri has no authority".to_string()))?;

    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    apply_forwarded(&mut headers, request.client_ip, "http");
    apply_identity(&mut headers, request.identity.as_ref());
    if let Ok(host) = HeaderValue::from_str(&authority) {
        headers.insert(header::HOST, host);
    }
    if let Ok(id) = HeaderValue::from_str(&request.request_id) {
        headers.insert(X_REQUEST_ID, id);
    }
    for (name, value) in &rule.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    let mut outbound = Request::builder()
        .method(request.method.clone())
        .uri(uri)
        .body(Body::from(request.body.clone()))
        .map_err(|e| unavailable(e.to_string()))?;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}
