use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::discovery::{DiscoveryError, ServiceInstance};
use crate::http::response::{error_response, ErrorBody};
use crate::http::server::AppState;
use crate::resilience::BreakerStatus;
use crate::routing::{ImportMode, ImportReport, RouteError, RouteRule, RouteTableDocument};
use crate::security::RateLimitStats;

/// Failures of admin operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("malformed request body: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            AdminError::Route(RouteError::Invalid(violations)) => {
                let body = ErrorBody {
                    error: "invalid_route_config",
                    message,
                    details: Some(violations.as_slice()),
                };
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            AdminError::Route(RouteError::NotFound(_)) | AdminError::NotFound(_) => {
                error_response(StatusCode::NOT_FOUND, "not_found", message)
            }
            AdminError::Route(RouteError::DuplicateId(_)) => {
                error_response(StatusCode::CONFLICT, "duplicate_id", message)
            }
            AdminError::Discovery(DiscoveryError::Unsupported(_)) => {
                error_response(StatusCode::NOT_IMPLEMENTED, "unsupported", message)
            }
            AdminError::Discovery(DiscoveryError::InvalidConfig(_)) | AdminError::BadRequest(_) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            AdminError::Discovery(
                DiscoveryError::Transport(_) | DiscoveryError::InvalidResponse(_),
            ) => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, "discovery_unavailable", message)
            }
        }
    }
}

type AdminResult<T> = Result<T, AdminError>;

fn parse<T: DeserializeOwned>(body: &Bytes) -> AdminResult<T> {
    serde_json::from_slice(body).map_err(|e| AdminError::BadRequest(e.to_string()))
}

/// Like [`parse`], but an empty body yields `T::default()`.
fn parse_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> AdminResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        parse(body)
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub discovery: &'static str,
    pub open_circuits: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let gateway = &state.gateway;
    let open_circuits = gateway
        .breakers()
        .all_statuses()
        .iter()
        .filter(|s| s.state != crate::resilience::CircuitState::Closed)
        .count();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes: gateway.routes().len(),
        discovery: gateway.discovery_kind().as_str(),
        open_circuits,
    })
}

// ---- routes ----

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub service: Option<String>,
}

pub async fn list_routes(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<RouteRule>> {
    let routes = state.gateway.routes();
    let rules = match query.service.as_deref() {
        Some(service) => routes.list_by_service(service),
        None => routes.list(),
    };
    Json(rules.iter().map(|r| RouteRule::clone(r)).collect())
}

pub async fn create_route(
    State(state): State<AppState>,
    body: Bytes,
) -> AdminResult<(StatusCode, Json<RouteRule>)> {
    let rule: RouteRule = parse(&body)?;
    let routes = state.gateway.routes();
    let id = routes.add(rule)?;
    let created = routes
        .get(&id)
        .ok_or_else(|| AdminError::NotFound(format!("route `{}` not found", id)))?;
    tracing::info!(
        route_id = %id,
        method = %created.method,
        path = %created.path,
        "Route added via admin"
    );
    Ok((StatusCode::CREATED, Json(RouteRule::clone(&created))))
}

pub async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AdminResult<Json<RouteRule>> {
    state
        .gateway
        .routes()
        .get(&id)
        .map(|rule| Json(RouteRule::clone(&rule)))
        .ok_or(AdminError::Route(RouteError::NotFound(id)))
}

pub async fn update_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AdminResult<Json<RouteRule>> {
    let rule: RouteRule = parse(&body)?;
    let updated = state.gateway.routes().update(&id, rule)?;
    tracing::info!(route_id = %id, "Route updated via admin");
    Ok(Json(RouteRule::clone(&updated)))
}

pub async fn delete_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AdminResult<Json<RouteRule>> {
    let removed = state.gateway.routes().remove(&id)?;
    tracing::info!(route_id = %id, "Route removed via admin");
    Ok(Json(RouteRule::clone(&removed)))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub active: bool,
}

pub async fn toggle_route(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> AdminResult<Json<RouteRule>> {
    let request: ToggleRequest = parse(&body)?;
    let toggled = state.gateway.routes().toggle(&id, request.active)?;
    tracing::info!(route_id = %id, active = request.active, "Route toggled via admin");
    Ok(Json(RouteRule::clone(&toggled)))
}

#[derive(Serialize)]
pub struct ValidationResult {
    pub valid: bool,
}

pub async fn validate_route(
    State(state): State<AppState>,
    body: Bytes,
) -> AdminResult<Json<ValidationResult>> {
    let rule: RouteRule = parse(&body)?;
    state.gateway.routes().validate(&rule)?;
    Ok(Json(ValidationResult { valid: true }))
}

pub async fn export_routes(State(state): State<AppState>) -> Json<RouteTableDocument> {
    Json(state.gateway.routes().export())
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    #[serde(default)]
    pub mode: ImportMode,
}

pub async fn import_routes(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> AdminResult<Json<ImportReport>> {
    let document: RouteTableDocument = parse(&body)?;
    let report = state.gateway.routes().import(document, query.mode)?;
    Ok(Json(report))
}

// ---- circuit breakers ----

pub async fn list_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    Json(state.gateway.breakers().all_statuses())
}

pub async fn get_breaker(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> AdminResult<Json<BreakerStatus>> {
    breaker_status(&state, &target)
}

#[derive(Debug, Default, Deserialize)]
pub struct OverrideRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

impl OverrideRequest {
    fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("manual override")
    }
}

fn breaker_status(state: &AppState, target: &str) -> AdminResult<Json<BreakerStatus>> {
    state
        .gateway
        .breakers()
        .status(target)
        .map(Json)
        .ok_or_else(|| AdminError::NotFound(format!("no circuit state for `{}`", target)))
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> AdminResult<Json<BreakerStatus>> {
    state.gateway.breakers().reset(&target);
    breaker_status(&state, &target)
}

pub async fn force_open_breaker(
    State(state): State<AppState>,
    Path(target): Path<String>,
    body: Bytes,
) -> AdminResult<Json<BreakerStatus>> {
    let request: OverrideRequest = parse_or_default(&body)?;
    state.gateway.breakers().force_open(&target, request.reason());
    breaker_status(&state, &target)
}

pub async fn force_close_breaker(
    State(state): State<AppState>,
    Path(target): Path<String>,
    body: Bytes,
) -> AdminResult<Json<BreakerStatus>> {
    let request: OverrideRequest = parse_or_default(&body)?;
    state.gateway.breakers().force_close(&target, request.reason());
    breaker_status(&state, &target)
}

// ---- rate limits ----

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitStats> {
    Json(state.gateway.limiter().stats().await)
}

// ---- discovery ----

pub async fn list_instances(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AdminResult<Json<Vec<ServiceInstance>>> {
    Ok(Json(state.gateway.discovery().discover(&name).await?))
}

pub async fn register_instance(
    State(state): State<AppState>,
    body: Bytes,
) -> AdminResult<(StatusCode, Json<ServiceInstance>)> {
    let instance: ServiceInstance = parse(&body)?;
    state.gateway.discovery().register(instance.clone()).await?;
    tracing::info!(id = %instance.id, service = %instance.name, "Instance registered via admin");
    Ok((StatusCode::CREATED, Json(instance)))
}

pub async fn deregister_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AdminResult<StatusCode> {
    state.gateway.discovery().deregister(&id).await?;
    tracing::info!(id = %id, "Instance deregistered via admin");
    Ok(StatusCode::NO_CONTENT)
}
