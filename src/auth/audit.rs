use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::access::AccessDecision;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: String,
    pub premium: bool,
    pub source: String,
}

impl AuditEntry {
    pub fn for_decision(decision: &AccessDecision) -> Self {
        Self {
            timestamp: decision.resolved_at,
            user_id: decision.user_id.clone(),
            action: "resolve_access".to_string(),
            premium: decision.resolved_premium,
            source: decision.source.as_str().to_string(),
        }
    }
}

/// Audit-log a freshly resolved decision
pub fn audit_access_decision(decision: &AccessDecision) {
    let entry = AuditEntry::for_decision(decision);

    info!(
        target: "audit",
        audit_type = "access",
        user_id = %entry.user_id,
        action = %entry.action,
        premium = entry.premium,
        source = %entry.source,
        is_override = decision.is_override_account,
        "Access decision"
    );
}

/// Audit-log a session operation (sign-out, reset)
pub fn audit_session_event(user_id: &str, action: &str, request_id: &str) {
    info!(
        target: "audit",
        audit_type = "session",
        user_id = %user_id,
        action = %action,
        request_id = %request_id,
        "Session event"
    );
}
