//! Bearer-token authentication seam.
//!
//! # Responsibilities
//! - Extract the bearer token from a request
//! - Resolve it to an [`Identity`] through an [`Authenticator`]
//!
//! # Design Decisions
//! - The gateway never validates tokens itself; it calls the authenticator
//! - A static token table is provided for deployments without an identity service

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::Serialize;

use crate::config::AuthConfig;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|wanted| self.roles.iter().any(|held| held == wanted))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Resolves bearer tokens to identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticator over a fixed token table.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenAuthenticator {
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|(token, identity)| {
                (
                    token.clone(),
                    Identity {
                        user_id: identity.user_id.clone(),
                        roles: identity.roles.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenIdentity;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn static_tokens_resolve() {
        let mut config = AuthConfig::default();
        config.tokens.insert(
            "t-1".into(),
            TokenIdentity {
                user_id: "alice".into(),
                roles: vec!["admin".into()],
            },
        );
        let auth = StaticTokenAuthenticator::from_config(&config);

        let identity = auth.authenticate("t-1").await.unwrap();
        assert_eq!(identity.user_id, "alice");
        assert!(identity.has_any_role(&["ops".into(), "admin".into()]));
        assert!(!identity.has_any_role(&["ops".into()]));
        assert!(matches!(auth.authenticate("nope").await, Err(AuthError::InvalidToken)));
    }
}
