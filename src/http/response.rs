//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map gateway errors to HTTP status codes and JSON bodies
//! - Add Retry-After to throttling and circuit rejections
//!
//! # Design Decisions
//! - Error bodies are always `{"error": code, "message": text}`
//! - Upstream 5xx after retries surface as 502; timeouts as 504

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::GatewayError;
use crate::routing::RuleViolation;

#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a [RuleViolation]>,
}

/// JSON error response with the given status.
pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: code,
        message: message.into(),
        details: None,
    };
    (status, Json(body)).into_response()
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(after: std::time::Duration) -> u64 {
    let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
    secs.max(1)
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RouteInactive(_)
            | GatewayError::CircuitOpen { .. }
            | GatewayError::NoHealthyInstance(_)
            | GatewayError::DiscoveryTransport { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidRouteConfig(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let details = match &self {
            GatewayError::InvalidRouteConfig(violations) => Some(violations.as_slice()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            details,
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let Some(after) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryError;
    use crate::security::LimitTier;
    use std::time::Duration;

    #[test]
    fn statuses_follow_the_error_table() {
        let cases = [
            (GatewayError::NoRoute { method: "GET".into(), path: "/".into() }, 404),
            (GatewayError::RouteInactive("r".into()), 503),
            (GatewayError::Unauthenticated("missing".into()), 401),
            (GatewayError::Forbidden, 403),
            (
                GatewayError::RateLimited {
                    tier: LimitTier::Ip,
                    retry_after: Duration::from_secs(1),
                },
                429,
            ),
            (
                GatewayError::CircuitOpen {
                    target: "a".into(),
                    retry_after: Duration::from_secs(1),
                },
                503,
            ),
            (GatewayError::NoHealthyInstance("a".into()), 503),
            (
                GatewayError::DiscoveryTransport {
                    service: "a".into(),
                    source: DiscoveryError::Transport("refused".into()),
                },
                503,
            ),
            (GatewayError::UpstreamTimeout { target: "a".into() }, 504),
            (GatewayError::UpstreamUnavailable { target: "a".into(), reason: "x".into() }, 502),
            (GatewayError::PayloadTooLarge { limit: 1 }, 413),
            (GatewayError::InvalidBody("reset".into()), 400),
            (GatewayError::InvalidRouteConfig(vec![]), 400),
        ];
        for (error, status) in cases {
            assert_eq!(error.status().as_u16(), status, "{}", error);
        }
    }

    #[test]
    fn retry_after_is_rounded_up() {
        let response = GatewayError::RateLimited {
            tier: LimitTier::Global,
            retry_after: Duration::from_millis(1_200),
        }
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");

        let response = GatewayError::CircuitOpen {
            target: "a".into(),
            retry_after: Duration::from_millis(10),
        }
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let response = GatewayError::Forbidden.into_response();
        assert!(!response.headers().contains_key(header::RETRY_AFTER));
    }
}
