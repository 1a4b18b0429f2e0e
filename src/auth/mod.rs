use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::logging::{REQUEST_ID_HEADER, generate_request_id};

pub mod audit;
pub mod identity;

pub use audit::*;
pub use identity::*;

/// Caller credentials pulled from request headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub request_id: String,
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

impl AuthContext {
    pub fn has_token(&self) -> bool {
        self.bearer_token.is_some()
    }

    pub fn require_token(&self) -> Result<&str, AppError> {
        self.bearer_token
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))
    }
}

/// Extract credentials from request headers
pub fn extract_auth_context(headers: &HeaderMap) -> AuthContext {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    let bearer_token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    AuthContext {
        request_id,
        bearer_token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_auth_context_with_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req123"));
        headers.insert("authorization", HeaderValue::from_static("Bearer token456"));

        let auth = extract_auth_context(&headers);

        assert_eq!(auth.request_id, "req123");
        assert_eq!(auth.require_token().unwrap(), "token456");
    }

    #[test]
    fn test_extract_auth_context_minimal_headers() {
        let auth = extract_auth_context(&HeaderMap::new());

        assert!(!auth.request_id.is_empty());
        assert!(!auth.has_token());
        assert!(matches!(auth.require_token(), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_token_requires_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("token456"));
        assert!(!extract_auth_context(&headers).has_token());

        headers.insert("authorization", HeaderValue::from_static("Bearer    "));
        assert!(!extract_auth_context(&headers).has_token());
    }
}
