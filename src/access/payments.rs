//! Payments provider client: customer lookup and live subscription status

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::error::UpstreamError;
use super::upstream;

pub const SERVICE: &str = "payments";

/// Subscription lifecycle states reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Only `active` entitles the user
    pub fn is_entitled(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub plan_name: Option<String>,
}

impl SubscriptionRecord {
    pub fn new(id: impl Into<String>, status: SubscriptionStatus) -> Self {
        Self {
            id: id.into(),
            status,
            current_period_start: None,
            current_period_end: None,
            plan_name: None,
        }
    }
}

/// Payments provider operations the resolver needs
#[async_trait]
pub trait PaymentsClient: Send + Sync {
    /// Customer linked to `user_id`, if any
    async fn find_customer(&self, user_id: &str) -> Result<Option<Customer>, UpstreamError>;

    /// The customer's most relevant subscription, if any
    async fn find_subscription(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireSubscription {
    id: String,
    status: SubscriptionStatus,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    plan: Option<WirePlan>,
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    nickname: Option<String>,
    product: Option<WireProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireProduct {
    Expanded { name: Option<String> },
    /// Unexpanded product id; only the expanded form carries a name
    Id(serde::de::IgnoredAny),
}

impl From<WireSubscription> for SubscriptionRecord {
    fn from(wire: WireSubscription) -> Self {
        let plan_name = wire.plan.and_then(|plan| {
            let product_name = match plan.product {
                Some(WireProduct::Expanded { name }) => name,
                _ => None,
            };
            product_name.or(plan.nickname)
        });

        Self {
            id: wire.id,
            status: wire.status,
            current_period_start: wire.current_period_start.and_then(|s| DateTime::from_timestamp(s, 0)),
            current_period_end: wire.current_period_end.and_then(|s| DateTime::from_timestamp(s, 0)),
            plan_name,
        }
    }
}

/// Prefer an entitling subscription, otherwise the most recent one
fn pick_subscription(subscriptions: Vec<SubscriptionRecord>) -> Option<SubscriptionRecord> {
    let entitled = subscriptions.iter().position(|s| s.status.is_entitled());
    match entitled {
        Some(index) => subscriptions.into_iter().nth(index),
        None => subscriptions.into_iter().next(),
    }
}

/// Stripe-style REST payments API
///
/// Customers are linked to users through a metadata key on the customer record.
pub struct RestPaymentsClient {
    client: Client,
    base_url: String,
    secret_key: String,
    customer_metadata_key: String,
    timeout: Duration,
}

impl RestPaymentsClient {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        customer_metadata_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: upstream::build_client(SERVICE, timeout)?,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            customer_metadata_key: customer_metadata_key.into(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", upstream::trim_base(&self.base_url), path)
    }

    fn customer_query(&self, user_id: &str) -> String {
        format!(
            "metadata['{}']:'{}'",
            self.customer_metadata_key,
            user_id.replace('\'', "\\'")
        )
    }
}

#[async_trait]
impl PaymentsClient for RestPaymentsClient {
    async fn find_customer(&self, user_id: &str) -> Result<Option<Customer>, UpstreamError> {
        let request = self
            .client
            .get(self.url("/v1/customers/search"))
            .query(&[("query", self.customer_query(user_id)), ("limit", "1".to_string())])
            .bearer_auth(&self.secret_key);

        let response = upstream::send(SERVICE, self.timeout, request).await?;
        let customers: ListResponse<Customer> = upstream::decode(SERVICE, response).await?;

        Ok(customers.data.into_iter().next())
    }

    async fn find_subscription(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>, UpstreamError> {
        let request = self
            .client
            .get(self.url("/v1/subscriptions"))
            .query(&[
                ("customer", customer_id),
                ("status", "all"),
                ("limit", "10"),
                ("expand[]", "data.plan.product"),
            ])
            .bearer_auth(&self.secret_key);

        let response = upstream::send(SERVICE, self.timeout, request).await?;
        let subscriptions: ListResponse<WireSubscription> = upstream::decode(SERVICE, response).await?;

        debug!(count = subscriptions.data.len(), "Fetched customer subscriptions");
        Ok(pick_subscription(
            subscriptions.data.into_iter().map(SubscriptionRecord::from).collect(),
        ))
    }
}

/// In-memory payments provider for tests and demo mode
#[derive(Default)]
pub struct InMemoryPaymentsClient {
    customers: RwLock<HashMap<String, Customer>>,
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
    failing: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl InMemoryPaymentsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a customer to `user_id`, optionally with a subscription
    pub async fn insert(&self, user_id: &str, customer_id: &str, subscription: Option<SubscriptionRecord>) {
        self.customers.write().await.insert(
            user_id.to_string(),
            Customer {
                id: customer_id.to_string(),
                email: None,
            },
        );
        if let Some(subscription) = subscription {
            self.subscriptions
                .write()
                .await
                .insert(customer_id.to_string(), subscription);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call, to exercise timeouts
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Number of provider calls made
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn simulate_call(&self) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            Err(UpstreamError::request(SERVICE, "connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentsClient for InMemoryPaymentsClient {
    async fn find_customer(&self, user_id: &str) -> Result<Option<Customer>, UpstreamError> {
        self.simulate_call().await?;
        Ok(self.customers.read().await.get(user_id).cloned())
    }

    async fn find_subscription(&self, customer_id: &str) -> Result<Option<SubscriptionRecord>, UpstreamError> {
        self.simulate_call().await?;
        Ok(self.subscriptions.read().await.get(customer_id).cloned())
    }
}
