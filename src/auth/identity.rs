//! Caller identity verification
//!
//! A bearer token is exchanged for the user id it was issued to. The server
//! never trusts a user id supplied directly by the client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::access::{AccessError, UpstreamError, upstream};
use crate::logging::sanitize_log_message;

const SERVICE: &str = "identity";

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// User id the token was issued to
    ///
    /// Rejected tokens yield [`AccessError::Unauthorized`]; an unreachable
    /// identity service yields [`AccessError::Upstream`].
    async fn verify(&self, token: &str) -> Result<String, AccessError>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

/// Verifies tokens against the auth service's `/auth/v1/user` endpoint
pub struct RestIdentityVerifier {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RestIdentityVerifier {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: upstream::build_client(SERVICE, timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
        })
    }
}

#[async_trait]
impl IdentityVerifier for RestIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<String, AccessError> {
        let request = self
            .client
            .get(format!("{}/auth/v1/user", upstream::trim_base(&self.base_url)))
            .header("apikey", &self.api_key)
            .bearer_auth(token);

        let result = async {
            let response = upstream::send(SERVICE, self.timeout, request).await?;
            upstream::decode::<UserResponse>(SERVICE, response).await
        }
        .await;

        match result {
            Ok(user) if !user.id.is_empty() => Ok(user.id),
            Ok(_) => Err(AccessError::Unauthorized("token carries no user id".to_string())),
            Err(UpstreamError::Unauthorized { .. }) => {
                debug!("Identity service rejected token");
                Err(AccessError::Unauthorized("invalid or expired token".to_string()))
            }
            Err(e) => {
                warn!(error = %sanitize_log_message(&e.to_string()), "Identity verification failed");
                Err(AccessError::Upstream(e.to_string()))
            }
        }
    }
}

/// Token-to-user table for tests and demo mode
///
/// With `token_is_identity` set, any non-empty token not in the table is
/// taken as the user id itself.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    tokens: RwLock<HashMap<String, String>>,
    token_is_identity: bool,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_is_identity() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            token_is_identity: true,
        }
    }

    pub async fn insert(&self, token: &str, user_id: &str) {
        self.tokens
            .write()
            .await
            .insert(token.to_string(), user_id.to_string());
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<String, AccessError> {
        if let Some(user_id) = self.tokens.read().await.get(token) {
            return Ok(user_id.clone());
        }

        if self.token_is_identity && !token.trim().is_empty() {
            return Ok(token.to_string());
        }

        Err(AccessError::Unauthorized("unknown token".to_string()))
    }
}
