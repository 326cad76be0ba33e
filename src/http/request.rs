//! Request handling and transformation.
//!
//! # Responsibilities
//! - Request ID layers (UUID v4, set on the way in, echoed on the way out)
//! - Resolve the client IP (connection peer, or trusted X-Forwarded-For)
//! - Buffer the body up to the configured limit so retries can replay it
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Size limit checked against Content-Length before reading the body

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderName, Request},
};
use http_body_util::LengthLimitError;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::error::GatewayError;
use crate::security::headers::forwarded_client_ip;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer that assigns an `x-request-id` to requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// The request's id, if it carries a usable one.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client address for rate limiting and X-Forwarded-For.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_client_ip(request.headers()) {
            return Some(ip);
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Read the whole body, refusing anything over `limit` bytes.
pub async fn buffer_body(
    headers: &HeaderMap,
    body: Body,
    limit: usize,
) -> Result<Bytes, GatewayError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        if exceeded_limit(&e) {
            GatewayError::PayloadTooLarge { limit }
        } else {
            GatewayError::InvalidBody(e.to_string())
        }
    })
}

fn exceeded_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn rejects_oversized_bodies() {
        let headers = HeaderMap::new();
        let ok = buffer_body(&headers, Body::from("hello"), 5).await.unwrap();
        assert_eq!(&ok[..], b"hello");

        let err = buffer_body(&headers, Body::from("hello!"), 5).await.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { limit: 5 }));

        let mut declared = HeaderMap::new();
        declared.insert(header::CONTENT_LENGTH, HeaderValue::from_static("100"));
        assert!(buffer_body(&declared, Body::empty(), 5).await.is_err());
    }

    #[tokio::test]
    async fn broken_bodies_are_bad_requests() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"par")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let err = buffer_body(&HeaderMap::new(), body, 1_024).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidBody(_)), "got {:?}", err);
    }

    #[test]
    fn client_ip_prefers_trusted_forwarded_for() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("10.9.9.9:5000".parse::<SocketAddr>().unwrap()));

        assert_eq!(client_ip(&request, false), Some("10.9.9.9".parse().unwrap()));
        assert_eq!(client_ip(&request, true), Some("203.0.113.7".parse().unwrap()));
    }
}
