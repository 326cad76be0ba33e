//! The per-request pipeline.
//!
//! # Responsibilities
//! - Own every shared subsystem (routes, breakers, limiter, discovery)
//! - Run the fixed stage order for each request
//! - Turn every refusal into a typed error and a JSON response
//!
//! # Design Decisions
//! - The matched rule is captured once as an `Arc` and used for the whole request
//! - Response hooks of the middleware that ran apply to every outcome,
//!   including error responses
//! - The breaker permit lives until dispatch returns

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::config::{DiscoveryKind, GatewayConfig, RateLimitConfig, RateLimitRule, SecurityConfig};
use crate::discovery::{self, DiscoveryBackend};
use crate::error::GatewayError;
use crate::gateway::middleware::{Middleware, MiddlewareRegistry, RequestContext};
use crate::http::dispatcher::{Dispatcher, ForwardRequest, HyperUpstream, Target, Upstream};
use crate::http::request::{buffer_body, client_ip, request_id};
use crate::lifecycle::StartupError;
use crate::load_balancer;
use crate::observability::metrics;
use crate::resilience::CircuitBreakers;
use crate::routing::{
    ImportMode, ImportReport, RouteError, RouteRegistry, RouteRule, RouteTableDocument,
};
use crate::security::{
    bearer_token, Authenticator, CounterStore, LimitTier, MemoryCounterStore, RateLimiter,
    StaticTokenAuthenticator,
};

/// Assembles a [`Gateway`], with seams for tests and embedders.
pub struct GatewayBuilder {
    config: GatewayConfig,
    discovery: Option<Arc<dyn DiscoveryBackend>>,
    upstream: Option<Arc<dyn Upstream>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    counter_store: Option<Arc<dyn CounterStore>>,
    middleware: MiddlewareRegistry,
}

impl GatewayBuilder {
    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryBackend>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Register custom middleware routes can name.
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.register(middleware);
        self
    }

    /// Build the subsystems and seed the route table from the config.
    pub fn build(self) -> Result<Gateway, StartupError> {
        let config = self.config;

        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None => discovery::build_backend(&config.discovery)?,
        };
        let upstream = self
            .upstream
            .unwrap_or_else(|| Arc::new(HyperUpstream::new()));
        let authenticator = self
            .authenticator
            .unwrap_or_else(|| Arc::new(StaticTokenAuthenticator::from_config(&config.auth)));
        let store = self
            .counter_store
            .unwrap_or_else(|| Arc::new(MemoryCounterStore::new()));

        let gateway = Gateway {
            routes: Arc::new(RouteRegistry::new(config.defaults.clone(), self.middleware.names())),
            breakers: Arc::new(CircuitBreakers::new(config.circuit_breaker.clone())),
            limiter: Arc::new(RateLimiter::new(
                store,
                Duration::from_millis(config.rate_limit.store_timeout_ms),
            )),
            discovery,
            discovery_kind: config.discovery.kind,
            middleware: self.middleware,
            authenticator,
            dispatcher: Dispatcher::new(
                upstream,
                load_balancer::from_strategy(config.load_balancing),
                config.retries.clone(),
            ),
            rate_limit: config.rate_limit.clone(),
            security: config.security.clone(),
        };

        let report = gateway.apply_routes(&config.routes)?;
        tracing::info!(
            routes = gateway.routes.len(),
            created = report.created,
            discovery = %gateway.discovery_kind,
            "Gateway initialized"
        );
        Ok(gateway)
    }
}

/// Shared per-process gateway state.
pub struct Gateway {
    routes: Arc<RouteRegistry>,
    breakers: Arc<CircuitBreakers>,
    limiter: Arc<RateLimiter>,
    discovery: Arc<dyn DiscoveryBackend>,
    discovery_kind: DiscoveryKind,
    middleware: MiddlewareRegistry,
    authenticator: Arc<dyn Authenticator>,
    dispatcher: Dispatcher,
    rate_limit: RateLimitConfig,
    security: SecurityConfig,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            discovery: None,
            upstream: None,
            authenticator: None,
            counter_store: None,
            middleware: MiddlewareRegistry::with_builtins(),
        }
    }

    pub fn routes(&self) -> &Arc<RouteRegistry> {
        &self.routes
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn discovery(&self) -> &Arc<dyn DiscoveryBackend> {
        &self.discovery
    }

    pub fn discovery_kind(&self) -> DiscoveryKind {
        self.discovery_kind
    }

    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    /// Upsert config-file routes by id, leaving admin-added routes alone.
    ///
    /// Rules without an id are keyed `"{METHOD} {path}"` so a reload of the
    /// same file updates them in place.
    pub fn apply_routes(&self, rules: &[RouteRule]) -> Result<ImportReport, RouteError> {
        let routes = rules
            .iter()
            .cloned()
            .map(|mut rule| {
                if rule.id.is_empty() {
                    rule.id = format!("{} {}", rule.method.trim().to_ascii_uppercase(), rule.path);
                }
                rule
            })
            .collect();
        self.routes.import(
            RouteTableDocument {
                version: 1,
                exported_at: Utc::now(),
                routes,
            },
            ImportMode::Merge,
        )
    }

    /// Stop discovery background work.
    pub async fn close(&self) {
        if let Err(e) = self.discovery.close().await {
            tracing::warn!(error = %e, "Discovery backend failed to close cleanly");
        }
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let request_id = request_id(request.headers())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let Some(rule) = self.routes.match_route(method.as_str(), &path) else {
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                "No route matched"
            );
            metrics::record_request(method.as_str(), 404, "none", started);
            return GatewayError::NoRoute {
                method: method.to_string(),
                path,
            }
            .into_response();
        };

        let client_ip = client_ip(&request, self.security.trust_forwarded_for);
        let (parts, body) = request.into_parts();
        let mut ctx = RequestContext {
            request_id,
            method,
            uri: parts.uri,
            headers: parts.headers,
            client_ip,
            rule: rule.clone(),
            identity: None,
            started,
        };

        let mut ran: Vec<Arc<dyn Middleware>> = Vec::new();
        let mut response = match self.process(&mut ctx, &mut ran, body).await {
            Ok(response) => response,
            Err(e) => {
                log_rejection(&ctx, &e);
                e.into_response()
            }
        };

        for middleware in ran.iter().rev() {
            middleware.on_response(&ctx, &mut response);
        }

        metrics::record_request(
            ctx.method.as_str(),
            response.status().as_u16(),
            &rule.breaker_target(),
            started,
        );
        response
    }

    async fn process(
        &self,
        ctx: &mut RequestContext,
        ran: &mut Vec<Arc<dyn Middleware>>,
        body: Body,
    ) -> Result<Response, GatewayError> {
        let rule = ctx.rule.clone();

        if !rule.is_active() {
            return Err(GatewayError::RouteInactive(rule.id.clone()));
        }

        for middleware in self.middleware.resolve(&rule.middleware) {
            ran.push(middleware.clone());
            if let Err(response) = middleware.on_request(ctx) {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    middleware = %middleware.name(),
                    "Middleware answered the request"
                );
                return Ok(response);
            }
        }

        if rule.requires_auth {
            self.authenticate(ctx).await?;
        }

        self.check_rate_limits(ctx).await?;

        let breaker_target = rule.breaker_target();
        let _permit = self
            .breakers
            .acquire(&breaker_target)
            .map_err(|rejected| GatewayError::CircuitOpen {
                target: breaker_target.to_string(),
                retry_after: rejected.retry_after,
            })?;

        let target = self.resolve_target(&rule).await?;
        let body = buffer_body(&ctx.headers, body, self.security.max_body_size).await?;

        let forward = ForwardRequest {
            request_id: ctx.request_id.clone(),
            method: ctx.method.clone(),
            uri: ctx.uri.clone(),
            headers: ctx.headers.clone(),
            body,
            client_ip: ctx.client_ip,
            identity: ctx.identity.clone(),
        };
        self.dispatcher
            .dispatch(&rule, &target, &forward, &self.breakers)
            .await
    }

    async fn authenticate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let token = bearer_token(&ctx.headers)
            .ok_or_else(|| GatewayError::Unauthenticated("missing bearer token".to_string()))?;
        let identity = self
            .authenticator
            .authenticate(token)
            .await
            .map_err(|e| GatewayError::Unauthenticated(e.to_string()))?;

        if !ctx.rule.allowed_roles.is_empty() && !identity.has_any_role(&ctx.rule.allowed_roles) {
            return Err(GatewayError::Forbidden);
        }
        ctx.identity = Some(identity);
        Ok(())
    }

    /// Route tier first, then global, per-IP, per-user and per-path.
    async fn check_rate_limits(&self, ctx: &RequestContext) -> Result<(), GatewayError> {
        let mut checks: Vec<(LimitTier, String, RateLimitRule)> = Vec::new();
        if let Some(limit) = ctx.rule.rate_limit {
            checks.push((LimitTier::Route, ctx.rule.id.clone(), limit));
        }
        if self.rate_limit.enabled {
            if let Some(limit) = self.rate_limit.global {
                checks.push((LimitTier::Global, "*".to_string(), limit));
            }
            if let Some(limit) = self.rate_limit.per_ip {
                let key = ctx
                    .client_ip
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                checks.push((LimitTier::Ip, key, limit));
            }
            if let (Some(limit), Some(identity)) =
                (self.rate_limit.per_user, ctx.identity.as_ref())
            {
                checks.push((LimitTier::User, identity.user_id.clone(), limit));
            }
            if let Some(limit) = self.rate_limit.per_path {
                checks.push((LimitTier::Path, ctx.uri.path().to_string(), limit));
            }
        }

        for (tier, key, limit) in checks {
            let decision = self.limiter.allow(tier, &key, &limit).await;
            if !decision.allowed {
                return Err(GatewayError::RateLimited {
                    tier,
                    retry_after: decision.reset_after,
                });
            }
        }
        Ok(())
    }

    async fn resolve_target(&self, rule: &RouteRule) -> Result<Target, GatewayError> {
        if let Some(url) = &rule.target_url {
            return Ok(Target::Fixed(url.clone()));
        }
        let Some(service) = rule.target_service.as_deref() else {
            return Err(GatewayError::NoHealthyInstance(rule.id.clone()));
        };

        let instances = self
            .discovery
            .healthy_instances(service)
            .await
            .map_err(|source| {
                tracing::error!(
                    route_id = %rule.id,
                    service = %service,
                    backend = %self.discovery_kind,
                    error = %source,
                    "Service discovery transport error"
                );
                metrics::record_discovery_error(self.discovery_kind.as_str());
                GatewayError::DiscoveryTransport {
                    service: service.to_string(),
                    source,
                }
            })?;

        if instances.is_empty() {
            return Err(GatewayError::NoHealthyInstance(service.to_string()));
        }
        Ok(Target::Instances {
            service: service.to_string(),
            instances,
        })
    }
}

fn log_rejection(ctx: &RequestContext, error: &GatewayError) {
    match error {
        GatewayError::UpstreamTimeout { .. }
        | GatewayError::UpstreamUnavailable { .. }
        | GatewayError::NoHealthyInstance(_)
        | GatewayError::CircuitOpen { .. } => tracing::warn!(
            request_id = %ctx.request_id,
            route_id = %ctx.rule.id,
            code = error.code(),
            error = %error,
            "Request failed"
        ),
        // Discovery transport errors are logged where they occur.
        GatewayError::DiscoveryTransport { .. } => {}
        _ => tracing::debug!(
            request_id = %ctx.request_id,
            route_id = %ctx.rule.id,
            code = error.code(),
            error = %error,
            "Request rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use axum::http::StatusCode;
    use std::collections::HashMap;

    fn gateway(services: &[(&str, &str)]) -> Gateway {
        let services: HashMap<String, String> = services
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Gateway::builder(GatewayConfig::default())
            .with_discovery(Arc::new(StaticDiscovery::from_config(&services).unwrap()))
            .build()
            .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn unmatched_request_is_404() {
        let gw = gateway(&[]);
        let response = gw.handle(get("/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inactive_route_is_503_and_skips_middleware() {
        let gw = gateway(&[("orders", "127.0.0.1:1")]);
        let mut rule = RouteRule::to_service("GET", "/orders", "orders");
        rule.middleware = vec!["security_headers".into()];
        let id = gw.routes().add(rule).unwrap();
        gw.routes().toggle(&id, false).unwrap();

        let response = gw.handle(get("/orders")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.headers().contains_key("x-frame-options"));
    }

    #[tokio::test]
    async fn config_routes_get_stable_ids() {
        let mut config = GatewayConfig::default();
        config.routes.push(RouteRule::to_url("get", "/legacy/*", "http://127.0.0.1:9"));
        let gw = Gateway::builder(config.clone()).build().unwrap();
        assert!(gw.routes().get("GET /legacy/*").is_some());

        let report = gw.apply_routes(&config.routes).unwrap();
        assert_eq!((report.created, report.updated), (0, 1));
        assert_eq!(gw.routes().len(), 1);
    }
}
