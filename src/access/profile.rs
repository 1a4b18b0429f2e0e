//! Profile store: the denormalized subscription flag on the user's profile row

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::UpstreamError;
use super::upstream;

pub const PREMIUM_STATUS: &str = "premium";

const SERVICE: &str = "profiles";

/// Subscription columns of a profile record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub subscription_status: Option<String>,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    pub fn premium(end_date: Option<DateTime<Utc>>) -> Self {
        Self {
            subscription_status: Some(PREMIUM_STATUS.to_string()),
            subscription_end_date: end_date,
        }
    }

    pub fn with_status(status: &str) -> Self {
        Self {
            subscription_status: Some(status.to_string()),
            subscription_end_date: None,
        }
    }

    /// `status == 'premium' AND (expiry absent OR expiry > now)`
    pub fn has_denormalized_premium(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status.as_deref() == Some(PREMIUM_STATUS)
            && self.subscription_end_date.is_none_or(|end| end > now)
    }
}

/// Read/write access to profile records
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when the user has no profile row
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, UpstreamError>;

    async fn update_subscription(
        &self,
        user_id: &str,
        status: &str,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<(), UpstreamError>;
}

/// Profile table served over a PostgREST-style REST API
pub struct RestProfileStore {
    client: Client,
    base_url: String,
    service_key: String,
    table: String,
    timeout: Duration,
}

impl RestProfileStore {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        table: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: upstream::build_client(SERVICE, timeout)?,
            base_url: base_url.into(),
            service_key: service_key.into(),
            table: table.into(),
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", upstream::trim_base(&self.base_url), self.table)
    }
}

#[async_trait]
impl ProfileStore for RestProfileStore {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, UpstreamError> {
        let request = self
            .client
            .get(self.endpoint())
            .query(&[
                ("id", format!("eq.{}", user_id)),
                ("select", "subscription_status,subscription_end_date".to_string()),
            ])
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key);

        let response = upstream::send(SERVICE, self.timeout, request).await?;
        let rows: Vec<ProfileRecord> = upstream::decode(SERVICE, response).await?;

        debug!(rows = rows.len(), "Fetched profile subscription columns");
        Ok(rows.into_iter().next())
    }

    async fn update_subscription(
        &self,
        user_id: &str,
        status: &str,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<(), UpstreamError> {
        let request = self
            .client
            .patch(self.endpoint())
            .query(&[("id", format!("eq.{}", user_id))])
            .header("apikey", &self.service_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(&self.service_key)
            .json(&json!({
                "subscription_status": status,
                "subscription_end_date": end_date,
            }));

        upstream::send(SERVICE, self.timeout, request).await?;
        Ok(())
    }
}

/// In-memory profile store for tests and demo mode
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, ProfileRecord>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: &str, record: ProfileRecord) {
        self.profiles.write().await.insert(user_id.to_string(), record);
    }

    pub async fn profile(&self, user_id: &str) -> Option<ProfileRecord> {
        self.profiles.read().await.get(user_id).cloned()
    }

    /// Make every call fail with a request error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), UpstreamError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(UpstreamError::request(SERVICE, "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, UpstreamError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.profile(user_id).await)
    }

    async fn update_subscription(
        &self,
        user_id: &str,
        status: &str,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<(), UpstreamError> {
        self.check_available()?;
        let mut profiles = self.profiles.write().await;
        let record = profiles.entry(user_id.to_string()).or_default();
        record.subscription_status = Some(status.to_string());
        record.subscription_end_date = end_date;
        Ok(())
    }
}
