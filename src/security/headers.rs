//! Header manipulation for forwarded requests and responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//! - Replace client-supplied identity headers with the authenticated identity
//!
//! # Design Decisions
//! - Preserve original client IP in X-Forwarded-For (appended, never replaced)
//! - Never trust X-User-* headers from the client

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::security::auth::Identity;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_ROLES: HeaderName = HeaderName::from_static("x-user-roles");

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Append the client to X-Forwarded-For and record the original host/proto.
pub fn apply_forwarded(headers: &mut HeaderMap, client_ip: Option<IpAddr>, scheme: &str) {
    if let Some(ip) = client_ip {
        let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = headers.get(header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    if let Ok(proto) = HeaderValue::from_str(scheme) {
        headers.insert(X_FORWARDED_PROTO, proto);
    }
}

/// Drop client-supplied identity headers, then set them from `identity`.
pub fn apply_identity(headers: &mut HeaderMap, identity: Option<&Identity>) {
    headers.remove(&X_USER_ID);
    headers.remove(&X_USER_ROLES);

    let Some(identity) = identity else { return };
    if let Ok(value) = HeaderValue::from_str(&identity.user_id) {
        headers.insert(X_USER_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&identity.roles.join(",")) {
        headers.insert(X_USER_ROLES, value);
    }
}

/// First hop of X-Forwarded-For, if it parses as an IP.
pub fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(&X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_and_connection_listed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-secret", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn appends_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.example.com"));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));

        apply_forwarded(&mut headers, Some("10.1.1.1".parse().unwrap()), "http");
        assert_eq!(headers[&X_FORWARDED_FOR], "203.0.113.9, 10.1.1.1");
        assert_eq!(headers[&X_FORWARDED_HOST], "api.example.com");
        assert_eq!(headers[&X_FORWARDED_PROTO], "http");
        assert_eq!(forwarded_client_ip(&headers), Some("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn client_identity_headers_are_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(X_USER_ID, HeaderValue::from_static("mallory"));
        apply_identity(&mut headers, None);
        assert!(!headers.contains_key(&X_USER_ID));

        let identity = Identity {
            user_id: "alice".into(),
            roles: vec!["a".into(), "b".into()],
        };
        headers.insert(X_USER_ID, HeaderValue::from_static("mallory"));
        apply_identity(&mut headers, Some(&identity));
        assert_eq!(headers[&X_USER_ID], "alice");
        assert_eq!(headers[&X_USER_ROLES], "a,b");
    }
}
