use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response::error_response;
use crate::http::server::AppState;
use crate::security::bearer_token;

/// Every admin endpoint requires `Authorization: Bearer <admin.api_key>`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let expected = state.config.admin.api_key.as_str();
    match bearer_token(request.headers()) {
        Some(token) if !expected.is_empty() && token == expected => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Admin request rejected");
            error_response(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing or invalid admin key",
            )
        }
    }
}
