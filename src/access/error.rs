use thiserror::Error;

use super::retry::RetryableError;

/// Failure talking to an external collaborator (profile table, payments provider, identity service)
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("{service} request failed: {message}")]
    Request { service: &'static str, message: String },

    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} response could not be decoded: {message}")]
    Decode { service: &'static str, message: String },

    #[error("{service} did not respond within {timeout_ms}ms")]
    Timeout { service: &'static str, timeout_ms: u64 },

    #[error("{service} is unavailable (circuit open)")]
    CircuitOpen { service: &'static str },

    #[error("{service} rejected the credentials")]
    Unauthorized { service: &'static str },
}

impl UpstreamError {
    pub fn request(service: &'static str, error: impl std::fmt::Display) -> Self {
        UpstreamError::Request {
            service,
            message: error.to_string(),
        }
    }

    pub fn decode(service: &'static str, error: impl std::fmt::Display) -> Self {
        UpstreamError::Decode {
            service,
            message: error.to_string(),
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            UpstreamError::Request { service, .. }
            | UpstreamError::Status { service, .. }
            | UpstreamError::Decode { service, .. }
            | UpstreamError::Timeout { service, .. }
            | UpstreamError::CircuitOpen { service }
            | UpstreamError::Unauthorized { service } => service,
        }
    }
}

/// Errors that escape entitlement resolution
#[derive(Debug, Clone, Error)]
pub enum AccessError {
    /// Missing or invalid identity. Terminal: the user must re-authenticate.
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    /// No entitlement source could be consulted
    #[error("Entitlement sources unavailable: {0}")]
    Upstream(String),
}

impl RetryableError for AccessError {
    fn is_retryable(&self) -> bool {
        matches!(self, AccessError::Upstream(_))
    }
}
