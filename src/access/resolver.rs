//! Entitlement resolver
//!
//! Combines the override identity, the denormalized profile flag and the live
//! payments subscription into an [`AccessDecision`]:
//!
//! 1. The override identity is granted immediately and its profile row is
//!    stamped premium; the payments provider is never called.
//! 2. Otherwise the profile row and the payments subscription are fetched
//!    concurrently; the payments lookup runs behind a circuit breaker with an
//!    explicit timeout.
//! 3. If one source fails, the decision is made from the other. Only when
//!    neither answered does resolution fail, and that failure is retried
//!    under the configured [`RetryConfig`].
//! 4. The decision is cached per user under `SUBSCRIPTION` with a short TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::decision::{AccessDecision, AccessSignals, DecisionSource, ReconciliationPolicy};
use super::error::{AccessError, UpstreamError};
use super::payments::{self, PaymentsClient, SubscriptionRecord};
use super::profile::{PREMIUM_STATUS, ProfileRecord, ProfileStore};
use super::retry::{RetryConfig, RetryExecutor};
use crate::auth::audit_access_decision;
use crate::cache::{CacheKey, ExpiringCache};
use crate::logging::sanitize_log_message;
use crate::middleware::circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
use crate::observability::metrics::record_access_resolution;

/// Resolver settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Identity granted premium unconditionally
    pub override_user_id: Option<String>,
    /// How far ahead the override identity's premium expiry is stamped
    pub override_grant: Duration,
    /// TTL of cached decisions
    pub decision_ttl: Duration,
    pub policy: ReconciliationPolicy,
    pub retry: RetryConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            override_user_id: None,
            override_grant: Duration::from_secs(365 * 24 * 60 * 60),
            decision_ttl: Duration::from_secs(60),
            policy: ReconciliationPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Whether a resolution may be answered from cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    CacheFirst,
    /// Drop the cached decision and resolve from the sources
    Refresh,
}

/// Progress notifications emitted while resolving
#[derive(Debug)]
pub enum ResolveEvent<'a> {
    /// A resolution attempt (1-based) is starting
    Attempt(u32),
    /// An attempt failed and another will follow after `delay`
    Retrying {
        attempt: u32,
        delay: Duration,
        error: &'a AccessError,
    },
}

/// Outcome of the payments-side lookup
#[derive(Debug, Clone)]
enum PaymentsLookup {
    /// No customer is linked to the user; the provider cannot attest either way
    NoCustomer,
    NoSubscription,
    Subscription(SubscriptionRecord),
}

impl PaymentsLookup {
    fn live_signal(&self) -> Option<bool> {
        match self {
            PaymentsLookup::NoCustomer => None,
            PaymentsLookup::NoSubscription => Some(false),
            PaymentsLookup::Subscription(s) => Some(s.status.is_entitled()),
        }
    }
}

/// Resolves entitlement decisions
///
/// Collaborators are injected at construction; consumers hold an
/// `Arc<AccessResolver>`.
pub struct AccessResolver {
    profiles: Arc<dyn ProfileStore>,
    payments: Arc<dyn PaymentsClient>,
    cache: ExpiringCache,
    breaker: CircuitBreaker,
    config: ResolverConfig,
}

impl AccessResolver {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        payments: Arc<dyn PaymentsClient>,
        cache: ExpiringCache,
        config: ResolverConfig,
    ) -> Self {
        Self {
            profiles,
            payments,
            cache,
            breaker: CircuitBreaker::new(payments::SERVICE, CircuitBreakerConfig::default()),
            config,
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn payments_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Decision for `user_id`, served from cache while fresh
    pub async fn resolve(&self, user_id: &str) -> Result<AccessDecision, AccessError> {
        self.resolve_with(user_id, LookupMode::CacheFirst, |_| {}).await
    }

    /// Re-resolve from the sources, bypassing the cache
    ///
    /// Each call starts with a fresh retry budget.
    pub async fn refresh(&self, user_id: &str) -> Result<AccessDecision, AccessError> {
        self.resolve_with(user_id, LookupMode::Refresh, |_| {}).await
    }

    /// Drop the cached decision for `user_id`
    pub async fn invalidate(&self, user_id: &str) {
        self.cache.scoped(user_id).remove(CacheKey::Subscription).await;
    }

    /// Resolve with progress notifications
    pub async fn resolve_with<F>(
        &self,
        user_id: &str,
        mode: LookupMode,
        on_event: F,
    ) -> Result<AccessDecision, AccessError>
    where
        F: Fn(ResolveEvent<'_>),
    {
        let user_id = validate_identity(user_id)?;
        let cache = self.cache.scoped(user_id);

        match mode {
            LookupMode::CacheFirst => {
                if let Some(decision) = cache.get::<AccessDecision>(CacheKey::Subscription).await {
                    debug!(user_id = %user_id, premium = decision.resolved_premium, "Access decision from cache");
                    return Ok(decision);
                }
            }
            LookupMode::Refresh => cache.remove(CacheKey::Subscription).await,
        }

        let start = Instant::now();
        let executor = RetryExecutor::new(self.config.retry.clone());
        let result = executor
            .execute_observed(
                |attempt| {
                    on_event(ResolveEvent::Attempt(attempt));
                    self.resolve_uncached(user_id)
                },
                |attempt, delay, error| on_event(ResolveEvent::Retrying { attempt, delay, error }),
            )
            .await;

        match result {
            Ok(decision) => {
                cache
                    .set(CacheKey::Subscription, &decision, self.config.decision_ttl)
                    .await;
                record_access_resolution(decision.source.as_str(), decision.resolved_premium, start.elapsed());
                audit_access_decision(&decision);
                Ok(decision)
            }
            Err(error) => {
                record_access_resolution("error", false, start.elapsed());
                Err(error)
            }
        }
    }

    /// One resolution attempt against the sources, without touching the cache
    pub async fn resolve_uncached(&self, user_id: &str) -> Result<AccessDecision, AccessError> {
        let user_id = validate_identity(user_id)?;
        let now = Utc::now();

        if self.is_override(user_id) {
            return Ok(self.grant_override(user_id, now).await);
        }

        let (profile, payments) = tokio::join!(
            self.profiles.fetch_profile(user_id),
            self.lookup_payments(user_id)
        );

        let (has_denormalized_premium, profile_ok) = match profile {
            Ok(record) => (
                record.as_ref().is_some_and(|p| p.has_denormalized_premium(now)),
                true,
            ),
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %sanitize_log_message(&e.to_string()),
                    "Profile lookup failed; deciding from payments provider"
                );
                (false, false)
            }
        };

        let lookup = match payments {
            Ok(lookup) => Some(lookup),
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %sanitize_log_message(&e.to_string()),
                    "Payments lookup failed; deciding from profile"
                );
                None
            }
        };

        let (source, has_live_subscription) = match (profile_ok, &lookup) {
            (false, None) => {
                return Err(AccessError::Upstream(
                    "profile and payments lookups both failed".to_string(),
                ));
            }
            // No customer record cannot stand in for the missing profile
            (false, Some(PaymentsLookup::NoCustomer)) => {
                return Err(AccessError::Upstream(
                    "profile lookup failed and payments has no customer".to_string(),
                ));
            }
            (true, None) => (DecisionSource::ProfileOnly, None),
            (true, Some(PaymentsLookup::NoCustomer)) => (DecisionSource::ProfileOnly, None),
            (true, Some(lookup)) => (DecisionSource::Combined, lookup.live_signal()),
            (false, Some(lookup)) => (DecisionSource::PaymentsOnly, lookup.live_signal()),
        };

        let signals = AccessSignals {
            is_override: false,
            has_denormalized_premium,
            has_live_subscription,
        };

        let (plan_name, next_billing_date) = match lookup {
            Some(PaymentsLookup::Subscription(subscription)) => {
                (subscription.plan_name, subscription.current_period_end)
            }
            _ => (None, None),
        };

        let decision = AccessDecision::from_signals(user_id, signals, self.config.policy, source, now)
            .with_plan(plan_name, next_billing_date);

        debug!(
            user_id = %user_id,
            premium = decision.resolved_premium,
            source = decision.source.as_str(),
            "Resolved access decision"
        );
        Ok(decision)
    }

    fn is_override(&self, user_id: &str) -> bool {
        self.config.override_user_id.as_deref() == Some(user_id)
    }

    async fn grant_override(&self, user_id: &str, now: DateTime<Utc>) -> AccessDecision {
        let grant = chrono::Duration::from_std(self.config.override_grant)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let end_date = now + grant;

        info!(user_id = %user_id, until = %end_date, "Override identity: granting premium");

        if let Err(e) = self
            .profiles
            .update_subscription(user_id, PREMIUM_STATUS, Some(end_date))
            .await
        {
            warn!(
                user_id = %user_id,
                error = %sanitize_log_message(&e.to_string()),
                "Failed to stamp premium on override profile"
            );
        }

        let signals = AccessSignals {
            is_override: true,
            has_denormalized_premium: ProfileRecord::premium(Some(end_date)).has_denormalized_premium(now),
            has_live_subscription: None,
        };

        AccessDecision::from_signals(user_id, signals, self.config.policy, DecisionSource::Override, now)
            .with_plan(None, Some(end_date))
    }

    async fn fetch_payments(&self, user_id: &str) -> Result<PaymentsLookup, UpstreamError> {
        let Some(customer) = self.payments.find_customer(user_id).await? else {
            return Ok(PaymentsLookup::NoCustomer);
        };

        Ok(match self.payments.find_subscription(&customer.id).await? {
            Some(subscription) => PaymentsLookup::Subscription(subscription),
            None => PaymentsLookup::NoSubscription,
        })
    }

    async fn lookup_payments(&self, user_id: &str) -> Result<PaymentsLookup, UpstreamError> {
        let result = self.breaker.call(|| self.fetch_payments(user_id)).await;

        result.map_err(|e| match e {
            BreakerError::Inner(inner) => inner,
            BreakerError::Open => UpstreamError::CircuitOpen { service: payments::SERVICE },
            BreakerError::Timeout(timeout) => UpstreamError::Timeout {
                service: payments::SERVICE,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        })
    }
}

/// Reject empty or whitespace-padded identities before touching any source
fn validate_identity(user_id: &str) -> Result<&str, AccessError> {
    if user_id.trim().is_empty() {
        return Err(AccessError::Unauthorized("missing user identity".to_string()));
    }
    if user_id.trim() != user_id || user_id.contains(':') {
        return Err(AccessError::Unauthorized("malformed user identity".to_string()));
    }
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::payments::{InMemoryPaymentsClient, SubscriptionStatus};
    use crate::access::profile::InMemoryProfileStore;
    use crate::cache::ManualClock;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    const OVERRIDE_ID: &str = "demo-account";

    struct Harness {
        profiles: Arc<InMemoryProfileStore>,
        payments: Arc<InMemoryPaymentsClient>,
        cache: ExpiringCache,
        clock: ManualClock,
        resolver: AccessResolver,
    }

    fn harness_with(config: ResolverConfig) -> Harness {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let payments = Arc::new(InMemoryPaymentsClient::new());
        let clock = ManualClock::new(Utc::now().timestamp_millis());
        let cache = ExpiringCache::in_memory().with_clock(Arc::new(clock.clone()));

        let resolver = AccessResolver::new(
            profiles.clone(),
            payments.clone(),
            cache.clone(),
            config,
        )
        .with_circuit_breaker(CircuitBreaker::new(
            "payments",
            CircuitBreakerConfig {
                failure_threshold: 1_000,
                timeout: Duration::from_millis(200),
                ..CircuitBreakerConfig::default()
            },
        ));

        Harness { profiles, payments, cache, clock, resolver }
    }

    fn harness() -> Harness {
        harness_with(ResolverConfig {
            override_user_id: Some(OVERRIDE_ID.to_string()),
            retry: RetryConfig::default().with_initial_delay(Duration::from_millis(10)),
            ..ResolverConfig::default()
        })
    }

    fn active() -> SubscriptionRecord {
        SubscriptionRecord {
            plan_name: Some("OwnBite Premium".to_string()),
            current_period_end: Some(Utc::now() + ChronoDuration::days(20)),
            ..SubscriptionRecord::new("sub_1", SubscriptionStatus::Active)
        }
    }

    #[tokio::test]
    async fn test_premium_profile_and_active_subscription_is_cached() {
        let h = harness();
        h.profiles.insert("alice", ProfileRecord::premium(None)).await;
        h.payments.insert("alice", "cus_a", Some(active())).await;

        let decision = h.resolver.resolve("alice").await.unwrap();

        assert!(decision.resolved_premium);
        assert!(decision.has_denormalized_premium);
        assert!(decision.has_live_payments_subscription);
        assert_eq!(decision.source, DecisionSource::Combined);
        assert_eq!(decision.plan_name.as_deref(), Some("OwnBite Premium"));
        assert!(decision.next_billing_date.is_some());

        let scoped = h.cache.scoped("alice");
        let cached: AccessDecision = scoped.get(CacheKey::Subscription).await.unwrap();
        assert_eq!(cached, decision);

        h.clock.advance(Duration::from_millis(60_000));
        assert!(scoped.get::<AccessDecision>(CacheKey::Subscription).await.is_some());
        h.clock.advance(Duration::from_millis(1));
        assert!(scoped.get::<AccessDecision>(CacheKey::Subscription).await.is_none());
    }

    #[tokio::test]
    async fn test_free_profile_without_customer_is_not_premium() {
        let h = harness();
        h.profiles.insert("bob", ProfileRecord::with_status("free")).await;

        let decision = h.resolver.resolve("bob").await.unwrap();

        assert!(!decision.resolved_premium);
        assert_eq!(decision.source, DecisionSource::ProfileOnly);
        assert_eq!(h.payments.call_count(), 1);
    }

    #[tokio::test]
    async fn test_override_identity_skips_payments_and_stamps_profile() {
        let h = harness();

        let decision = h.resolver.resolve(OVERRIDE_ID).await.unwrap();

        assert!(decision.resolved_premium);
        assert!(decision.is_override_account);
        assert_eq!(decision.source, DecisionSource::Override);
        assert_eq!(h.payments.call_count(), 0);
        assert_eq!(h.profiles.fetch_count(), 0);

        let profile = h.profiles.profile(OVERRIDE_ID).await.unwrap();
        assert_eq!(profile.subscription_status.as_deref(), Some(PREMIUM_STATUS));
        let days_out = (profile.subscription_end_date.unwrap() - Utc::now()).num_days();
        assert!((364..=365).contains(&days_out), "expiry {} days out", days_out);
    }

    #[tokio::test]
    async fn test_override_granted_even_when_profile_write_fails() {
        let h = harness();
        h.profiles.set_failing(true);

        let decision = h.resolver.resolve(OVERRIDE_ID).await.unwrap();
        assert!(decision.resolved_premium);
        assert_eq!(h.payments.call_count(), 0);
    }

    #[tokio::test]
    async fn test_signal_combinations_follow_or_merge() {
        for bits in 0..8u8 {
            let (is_override, denormalized, live) = (bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            let h = harness();
            let user = if is_override { OVERRIDE_ID } else { "carol" };

            let profile = if denormalized {
                ProfileRecord::premium(None)
            } else {
                ProfileRecord::with_status("free")
            };
            h.profiles.insert(user, profile).await;
            let status = if live { SubscriptionStatus::Active } else { SubscriptionStatus::Canceled };
            h.payments
                .insert(user, "cus_c", Some(SubscriptionRecord::new("sub_c", status)))
                .await;

            let decision = h.resolver.resolve(user).await.unwrap();

            assert_eq!(
                decision.resolved_premium,
                is_override || denormalized || live,
                "override={} denormalized={} live={}",
                is_override,
                denormalized,
                live
            );
            if is_override {
                assert_eq!(h.payments.call_count(), 0);
            } else {
                assert_eq!(h.payments.call_count(), 2);
            }
        }
    }

    #[tokio::test]
    async fn test_payments_failure_falls_back_to_profile() {
        for denormalized in [false, true] {
            let h = harness();
            let profile = if denormalized {
                ProfileRecord::premium(None)
            } else {
                ProfileRecord::with_status("free")
            };
            h.profiles.insert("dave", profile).await;
            h.payments.set_failing(true);

            let decision = h.resolver.resolve("dave").await.unwrap();

            assert_eq!(decision.resolved_premium, denormalized);
            assert_eq!(decision.source, DecisionSource::ProfileOnly);
            assert!(!decision.has_live_payments_subscription);
        }
    }

    #[tokio::test]
    async fn test_profile_failure_uses_payments_alone() {
        let h = harness();
        h.profiles.set_failing(true);
        h.payments.insert("erin", "cus_e", Some(active())).await;

        let decision = h.resolver.resolve("erin").await.unwrap();

        assert!(decision.resolved_premium);
        assert_eq!(decision.source, DecisionSource::PaymentsOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_failure_without_customer_retries_and_caches_nothing() {
        let h = harness();
        h.profiles.set_failing(true);

        let result = h.resolver.resolve("ivy").await;

        assert!(matches!(result, Err(AccessError::Upstream(_))));
        assert_eq!(h.profiles.fetch_count(), 4);
        assert!(h.cache.scoped("ivy").get::<AccessDecision>(CacheKey::Subscription).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_payments_provider_times_out_to_profile() {
        let h = harness();
        h.profiles.insert("frank", ProfileRecord::premium(None)).await;
        h.payments.set_latency(Duration::from_secs(30));

        let decision = h.resolver.resolve("frank").await.unwrap();

        assert!(decision.resolved_premium);
        assert_eq!(decision.source, DecisionSource::ProfileOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_sources_down_retries_then_fails() {
        let h = harness();
        h.profiles.set_failing(true);
        h.payments.set_failing(true);

        let retries = Mutex::new(Vec::new());
        let result = h
            .resolver
            .resolve_with("gina", LookupMode::CacheFirst, |event| {
                if let ResolveEvent::Retrying { attempt, .. } = event {
                    retries.lock().unwrap().push(attempt);
                }
            })
            .await;

        assert!(matches!(result, Err(AccessError::Upstream(_))));
        assert_eq!(h.profiles.fetch_count(), 4);
        assert_eq!(*retries.lock().unwrap(), vec![1, 2, 3]);
        assert!(h.cache.scoped("gina").get::<AccessDecision>(CacheKey::Subscription).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_identity_is_unauthorized_without_upstream_calls() {
        let h = harness();

        for user in ["", "   ", " padded", "ns:key"] {
            let err = h.resolver.resolve(user).await.unwrap_err();
            assert!(matches!(err, AccessError::Unauthorized(_)), "{:?}", user);
        }
        assert_eq!(h.profiles.fetch_count(), 0);
        assert_eq!(h.payments.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_sources_and_refresh_bypasses_it() {
        let h = harness();
        h.profiles.insert("hank", ProfileRecord::with_status("free")).await;

        assert!(!h.resolver.resolve("hank").await.unwrap().resolved_premium);
        assert!(!h.resolver.resolve("hank").await.unwrap().resolved_premium);
        assert_eq!(h.profiles.fetch_count(), 1);

        h.payments.insert("hank", "cus_h", Some(active())).await;
        assert!(!h.resolver.resolve("hank").await.unwrap().resolved_premium);

        let refreshed = h.resolver.refresh("hank").await.unwrap();
        assert!(refreshed.resolved_premium);
        assert_eq!(h.profiles.fetch_count(), 2);
        assert!(h.resolver.resolve("hank").await.unwrap().resolved_premium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_starts_with_fresh_retry_budget() {
        let h = harness();
        h.profiles.set_failing(true);
        h.payments.set_failing(true);

        let _ = h.resolver.refresh("ivy").await;
        let _ = h.resolver.refresh("ivy").await;

        assert_eq!(h.profiles.fetch_count(), 8);
    }

    #[tokio::test]
    async fn test_payments_authoritative_policy_revokes_stale_flag() {
        let h = harness_with(ResolverConfig {
            policy: ReconciliationPolicy::PaymentsAuthoritative,
            ..ResolverConfig::default()
        });
        h.profiles.insert("jack", ProfileRecord::premium(None)).await;
        h.payments
            .insert("jack", "cus_j", Some(SubscriptionRecord::new("sub_j", SubscriptionStatus::Canceled)))
            .await;

        let decision = h.resolver.resolve("jack").await.unwrap();
        assert!(!decision.resolved_premium);
        assert!(decision.has_denormalized_premium);
    }

    #[tokio::test]
    async fn test_invalidate_drops_cached_decision() {
        let h = harness();
        h.profiles.insert("kim", ProfileRecord::premium(None)).await;

        h.resolver.resolve("kim").await.unwrap();
        h.resolver.invalidate("kim").await;

        assert!(h.cache.scoped("kim").get::<AccessDecision>(CacheKey::Subscription).await.is_none());
    }
}
