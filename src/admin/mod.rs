pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(list_routes).post(create_route))
        .route("/admin/routes/validate", post(validate_route))
        .route("/admin/routes/export", get(export_routes))
        .route("/admin/routes/import", post(import_routes))
        .route(
            "/admin/routes/{id}",
            get(get_route).put(update_route).delete(delete_route),
        )
        .route("/admin/routes/{id}/toggle", post(toggle_route))
        .route("/admin/circuit-breakers", get(list_breakers))
        .route("/admin/circuit-breakers/{target}", get(get_breaker))
        .route("/admin/circuit-breakers/{target}/reset", post(reset_breaker))
        .route("/admin/circuit-breakers/{target}/force-open", post(force_open_breaker))
        .route("/admin/circuit-breakers/{target}/force-close", post(force_close_breaker))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route("/admin/services", post(register_instance))
        .route("/admin/services/{name}", delete(deregister_instance))
        .route("/admin/services/{name}/instances", get(list_instances))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
