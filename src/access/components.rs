//! Access components for dependency injection
//!
//! Bundles everything the HTTP layer needs: the resolver with its
//! collaborators, the shared cache and the identity verifier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use super::payments::{self, InMemoryPaymentsClient, PaymentsClient, RestPaymentsClient, SubscriptionRecord, SubscriptionStatus};
use super::profile::{InMemoryProfileStore, ProfileRecord, ProfileStore, RestProfileStore};
use super::resolver::{AccessResolver, ResolverConfig};
use crate::auth::{IdentityVerifier, RestIdentityVerifier, StaticIdentityVerifier};
use crate::cache::{CacheStores, ExpiringCache};
use crate::config::{AppConfig, CacheBackend};
use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

#[derive(Clone)]
pub struct AccessComponents {
    pub resolver: Arc<AccessResolver>,
    /// Shared cache; per-user views are derived with [`ExpiringCache::scoped`]
    pub cache: ExpiringCache,
    pub identity: Arc<dyn IdentityVerifier>,
    admins: Arc<HashSet<String>>,
}

impl AccessComponents {
    /// REST collaborators from configuration
    pub fn new_production(config: &AppConfig) -> Result<Self> {
        let profiles: Arc<dyn ProfileStore> = Arc::new(RestProfileStore::new(
            config.profiles.base_url.clone(),
            config.profiles.service_key.clone(),
            config.profiles.table.clone(),
            config.profiles.timeout(),
        )?);

        let payments: Arc<dyn PaymentsClient> = Arc::new(RestPaymentsClient::new(
            config.payments.base_url.clone(),
            config.payments.secret_key.clone(),
            config.payments.customer_metadata_key.clone(),
            config.payments.timeout(),
        )?);

        let identity: Arc<dyn IdentityVerifier> = Arc::new(RestIdentityVerifier::new(
            config.profiles.base_url.clone(),
            config.profiles.service_key.clone(),
            config.profiles.timeout(),
        )?);

        Ok(Self::assemble(config, profiles, payments, identity))
    }

    /// In-memory collaborators seeded from the `demo` section
    ///
    /// Bearer tokens are taken as user ids.
    pub async fn new_demo(config: &AppConfig) -> Result<Self> {
        let profiles = Arc::new(InMemoryProfileStore::new());
        for user in &config.demo.premium_users {
            profiles.insert(user, ProfileRecord::premium(None)).await;
        }

        let payments = Arc::new(InMemoryPaymentsClient::new());
        for user in &config.demo.subscribed_users {
            let subscription = SubscriptionRecord {
                plan_name: Some("Premium (demo)".to_string()),
                current_period_end: Some(Utc::now() + chrono::Duration::days(30)),
                ..SubscriptionRecord::new(format!("sub_demo_{}", user), SubscriptionStatus::Active)
            };
            payments
                .insert(user, &format!("cus_demo_{}", user), Some(subscription))
                .await;
        }

        Ok(Self::in_memory(config, profiles, payments))
    }

    /// Components over caller-provided in-memory collaborators
    pub fn in_memory(
        config: &AppConfig,
        profiles: Arc<InMemoryProfileStore>,
        payments: Arc<InMemoryPaymentsClient>,
    ) -> Self {
        Self::assemble(
            config,
            profiles,
            payments,
            Arc::new(StaticIdentityVerifier::token_is_identity()),
        )
    }

    /// Whether `user_id` may reset cached state for every user
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }

    fn assemble(
        config: &AppConfig,
        profiles: Arc<dyn ProfileStore>,
        payments: Arc<dyn PaymentsClient>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let stores = match config.cache.backend {
            CacheBackend::Memory => CacheStores::in_memory(),
            CacheBackend::File => CacheStores::file_backed(&config.cache.dir),
        };
        let cache = ExpiringCache::new(stores).with_companion_keys(config.cache.signout_companion_keys.clone());

        let access = &config.access;
        let resolver_config = ResolverConfig {
            override_user_id: access.override_user_id.clone(),
            override_grant: access.override_grant(),
            decision_ttl: access.decision_ttl(),
            policy: access.policy,
            retry: access.retry_config(),
        };

        let breaker = CircuitBreaker::new(
            payments::SERVICE,
            CircuitBreakerConfig {
                failure_threshold: access.breaker_failure_threshold,
                success_threshold: 2,
                timeout: config.payments.timeout(),
                half_open_timeout: Duration::from_secs(access.breaker_cooldown_seconds),
            },
        );

        let resolver = AccessResolver::new(profiles, payments, cache.clone(), resolver_config)
            .with_circuit_breaker(breaker);

        Self {
            resolver: Arc::new(resolver),
            cache,
            identity,
            admins: Arc::new(access.admin_user_ids.iter().cloned().collect()),
        }
    }
}
