use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use tracing::debug;

use super::{HealthManager, HealthResponse, HealthStatus};

/// Liveness probe: the process is up
pub async fn liveness_handler() -> &'static str {
    "OK"
}

/// Readiness probe
///
/// A degraded service (e.g. payments circuit open) still accepts traffic,
/// since decisions fall back to the profile signal.
pub async fn readiness_handler(
    State(health_manager): State<HealthManager>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let health = health_manager.get_health().await;
    debug!(status = ?health.status, "Readiness check");

    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => Ok(Json(health)),
        HealthStatus::Starting if health_manager.is_in_startup_period() => Ok(Json(health)),
        HealthStatus::Starting | HealthStatus::Unhealthy => Err((StatusCode::SERVICE_UNAVAILABLE, Json(health))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_handler() {
        assert_eq!(liveness_handler().await, "OK");
    }

    #[tokio::test]
    async fn test_readiness_handler_healthy() {
        let health_manager = HealthManager::new();
        health_manager.mark_ready().await;

        let Json(response) = readiness_handler(State(health_manager)).await.unwrap();
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(response.services.contains_key("api"));
    }

    #[tokio::test]
    async fn test_readiness_handler_starting_within_grace_period() {
        let Json(response) = readiness_handler(State(HealthManager::new())).await.unwrap();
        assert_eq!(response.status, HealthStatus::Starting);
    }

    #[tokio::test]
    async fn test_readiness_handler_unhealthy() {
        let health_manager = HealthManager::new();
        health_manager
            .update_service_health("cache", HealthStatus::Unhealthy, "store unwritable".to_string())
            .await;

        let (status, Json(body)) = readiness_handler(State(health_manager)).await.unwrap_err();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Unhealthy);
    }
}
