use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::debug;

/// Optional bearer token guarding every route except `/health`
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub api_token: Option<String>,
}

impl AuthConfig {
    pub fn new(api_token: Option<String>) -> Self {
        // an empty token in config means "no auth", not "empty bearer"
        Self {
            api_token: api_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_token.is_some()
    }

    /// Constant-time check of an `Authorization` header value
    pub fn accepts(&self, header: Option<&str>) -> bool {
        let Some(expected) = &self.api_token else {
            return true;
        };
        match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) => token.as_bytes().ct_eq(expected.as_bytes()).into(),
            None => false,
        }
    }
}

pub async fn auth_middleware(auth_config: Arc<AuthConfig>, request: Request, next: Next) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if auth_config.accepts(header) {
        return next.run(request).await;
    }

    debug!(path = %request.uri().path(), "Rejected unauthenticated request");
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_accepts_anything() {
        let auth = AuthConfig::new(None);
        assert!(!auth.is_enabled());
        assert!(auth.accepts(None));
        assert!(AuthConfig::new(Some(String::new())).accepts(None));
    }

    #[test]
    fn test_bearer_token_checked() {
        let auth = AuthConfig::new(Some("s3cret".into()));
        assert!(auth.accepts(Some("Bearer s3cret")));
        assert!(!auth.accepts(Some("Bearer s3cre")));
        assert!(!auth.accepts(Some("s3cret")));
        assert!(!auth.accepts(None));
    }
}
