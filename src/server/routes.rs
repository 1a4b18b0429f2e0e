//! Access endpoints
//!
//! Every `/v1` route requires `Authorization: Bearer <token>`. The token is
//! exchanged for a user id through the configured identity verifier, so a
//! caller can only ever read or purge their own entries. The one exception
//! is a full reset by an identity listed in `access.admin_user_ids`.

use axum::{
    Json,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
};
use tracing::{debug, info};

use crate::access::{AccessComponents, AccessDecision};
use crate::auth::{AuthContext, audit_session_event, extract_auth_context};
use crate::cache::CacheKey;
use crate::error::AppError;
use crate::health::HealthManager;

#[derive(Clone)]
pub struct AppState {
    pub health: HealthManager,
    pub access: AccessComponents,
}

impl FromRef<AppState> for HealthManager {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

/// Caller's verified identity
struct Caller {
    auth: AuthContext,
    user_id: String,
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, AppError> {
    let auth = extract_auth_context(headers);
    let token = auth.require_token()?;
    let user_id = state.access.identity.verify(token).await?;

    debug!(request_id = %auth.request_id, user_id = %user_id, "Caller authenticated");
    Ok(Caller { auth, user_id })
}

/// `GET /v1/access`
pub async fn get_access(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<AccessDecision>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    let decision = state.access.resolver.resolve(&caller.user_id).await?;
    Ok(Json(decision))
}

/// `POST /v1/access/refresh`
pub async fn refresh_access(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccessDecision>, AppError> {
    let caller = authenticate(&state, &headers).await?;
    let decision = state.access.resolver.refresh(&caller.user_id).await?;
    Ok(Json(decision))
}

/// `POST /v1/session/signout`: purge the caller's user-scoped entries
pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, AppError> {
    let caller = authenticate(&state, &headers).await?;

    state
        .access
        .cache
        .scoped(caller.user_id.as_str())
        .clear_namespace(CacheKey::user_scoped())
        .await;

    audit_session_event(&caller.user_id, "signout", &caller.auth.request_id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/session/reset`: troubleshooting reset
///
/// Configured admins empty the whole cache; anyone else only resets their
/// own namespace.
pub async fn reset_cache(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, AppError> {
    let caller = authenticate(&state, &headers).await?;

    if state.access.is_admin(&caller.user_id) {
        state.access.cache.clear_all().await;
        info!(user_id = %caller.user_id, "Full cache reset requested");
        audit_session_event(&caller.user_id, "reset_all", &caller.auth.request_id);
    } else {
        state.access.cache.scoped(caller.user_id.as_str()).clear_scope().await;
        audit_session_event(&caller.user_id, "reset", &caller.auth.request_id);
    }

    Ok(StatusCode::NO_CONTENT)
}
