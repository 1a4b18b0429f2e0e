//! Entitlement decision and the shared merge rule
//!
//! Every resolver (in-process or behind the HTTP endpoint) funnels its
//! signals through [`merge_signals`], so the same
//! `(profile status, profile expiry, payments status)` tuple always yields the
//! same answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How disagreeing entitlement sources are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationPolicy {
    /// Premium if any source says premium.
    ///
    /// A profile flag that lags behind a cancellation keeps access until the
    /// flag is corrected or expires; a payments subscription that has not yet
    /// been mirrored onto the profile grants access immediately.
    #[default]
    GrantIfAnySource,

    /// The payments provider decides whenever it answered.
    ///
    /// The denormalized profile flag is only used when the provider could not
    /// be consulted.
    PaymentsAuthoritative,
}

/// The independent inputs to an entitlement decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessSignals {
    pub is_override: bool,
    pub has_denormalized_premium: bool,
    /// `None` when the payments provider could not attest either way
    pub has_live_subscription: Option<bool>,
}

/// Merge the signals under `policy`
///
/// The override identity always wins.
pub fn merge_signals(signals: &AccessSignals, policy: ReconciliationPolicy) -> bool {
    if signals.is_override {
        return true;
    }

    match policy {
        ReconciliationPolicy::GrantIfAnySource => {
            signals.has_denormalized_premium || signals.has_live_subscription.unwrap_or(false)
        }
        ReconciliationPolicy::PaymentsAuthoritative => signals
            .has_live_subscription
            .unwrap_or(signals.has_denormalized_premium),
    }
}

/// Which sources contributed to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Override identity; nothing else consulted
    Override,
    /// Profile and payments provider both answered
    Combined,
    /// Payments provider unavailable or no linked customer
    ProfileOnly,
    /// Profile lookup failed
    PaymentsOnly,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Override => "override",
            DecisionSource::Combined => "combined",
            DecisionSource::ProfileOnly => "profile_only",
            DecisionSource::PaymentsOnly => "payments_only",
        }
    }
}

/// A user's resolved entitlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub user_id: String,
    pub resolved_premium: bool,
    pub has_denormalized_premium: bool,
    pub has_live_payments_subscription: bool,
    pub is_override_account: bool,
    pub source: DecisionSource,
    /// Product/plan name, if the subscription could be resolved
    pub plan_name: Option<String>,
    /// End of the current billing period, if known
    pub next_billing_date: Option<DateTime<Utc>>,
    pub resolved_at: DateTime<Utc>,
}

impl AccessDecision {
    pub fn from_signals(
        user_id: impl Into<String>,
        signals: AccessSignals,
        policy: ReconciliationPolicy,
        source: DecisionSource,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resolved_premium: merge_signals(&signals, policy),
            has_denormalized_premium: signals.has_denormalized_premium,
            has_live_payments_subscription: signals.has_live_subscription.unwrap_or(false),
            is_override_account: signals.is_override,
            source,
            plan_name: None,
            next_billing_date: None,
            resolved_at,
        }
    }

    pub fn with_plan(mut self, plan_name: Option<String>, next_billing_date: Option<DateTime<Utc>>) -> Self {
        self.plan_name = plan_name;
        self.next_billing_date = next_billing_date;
        self
    }
}
