use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::info;

use crate::middleware::circuit_breaker::{CircuitBreaker, CircuitState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Operational with reduced fidelity (e.g. deciding from one source)
    Degraded,
    Unhealthy,
    Starting,
}

impl HealthStatus {
    /// Lower is worse
    fn priority(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 0,
            HealthStatus::Starting => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Healthy => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub message: String,
    pub last_checked: SystemTime,
}

impl ServiceHealth {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            last_checked: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across services
    pub status: HealthStatus,
    pub services: HashMap<String, ServiceHealth>,
    pub timestamp: SystemTime,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone)]
struct CachedHealth {
    response: HealthResponse,
    cached_at: Instant,
}

/// Readiness state shared by the health endpoints
///
/// Clones share state.
#[derive(Clone)]
pub struct HealthManager {
    services: Arc<RwLock<HashMap<String, ServiceHealth>>>,
    cache: Arc<RwLock<Option<CachedHealth>>>,
    payments_breaker: Option<CircuitBreaker>,
    startup_time: Instant,
    cache_ttl: Duration,
    startup_grace_period: Duration,
}

impl HealthManager {
    pub fn new() -> Self {
        let mut services = HashMap::new();
        services.insert(
            "api".to_string(),
            ServiceHealth::new(HealthStatus::Starting, "API server starting up"),
        );

        Self {
            services: Arc::new(RwLock::new(services)),
            cache: Arc::new(RwLock::new(None)),
            payments_breaker: None,
            startup_time: Instant::now(),
            cache_ttl: Duration::from_secs(5),
            startup_grace_period: Duration::from_secs(30),
        }
    }

    /// Report the payments provider from its circuit breaker on every check
    pub fn with_payments_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.payments_breaker = Some(breaker);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub async fn mark_ready(&self) {
        self.update_service_health("api", HealthStatus::Healthy, "API server is ready".to_string())
            .await;
        info!("API service marked as ready");
    }

    pub async fn update_service_health(&self, service_name: &str, status: HealthStatus, message: String) {
        self.services
            .write()
            .await
            .insert(service_name.to_string(), ServiceHealth::new(status, message));

        *self.cache.write().await = None;
    }

    /// Current health, cached for `cache_ttl`
    pub async fn get_health(&self) -> HealthResponse {
        if let Some(cached) = &*self.cache.read().await {
            if cached.cached_at.elapsed() < self.cache_ttl {
                return cached.response.clone();
            }
        }

        self.refresh_health().await
    }

    async fn refresh_health(&self) -> HealthResponse {
        let mut services = self.services.read().await.clone();

        if let Some(breaker) = &self.payments_breaker {
            let state = breaker.state().await;
            let health = match state {
                CircuitState::Closed => ServiceHealth::new(HealthStatus::Healthy, "payments provider reachable"),
                CircuitState::HalfOpen => {
                    ServiceHealth::new(HealthStatus::Degraded, "payments provider recovering")
                }
                CircuitState::Open => ServiceHealth::new(
                    HealthStatus::Degraded,
                    "payments provider unavailable; deciding from profiles",
                ),
            };
            services.insert("payments".to_string(), health);
        }

        let status = services
            .values()
            .map(|s| &s.status)
            .min_by_key(|s| s.priority())
            .cloned()
            .unwrap_or(HealthStatus::Healthy);

        let response = HealthResponse {
            status,
            services,
            timestamp: SystemTime::now(),
            uptime_seconds: self.startup_time.elapsed().as_secs(),
        };

        *self.cache.write().await = Some(CachedHealth {
            response: response.clone(),
            cached_at: Instant::now(),
        });

        response
    }

    pub fn is_in_startup_period(&self) -> bool {
        self.startup_time.elapsed() < self.startup_grace_period
    }
}

impl Default for HealthManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::circuit_breaker::CircuitBreakerConfig;

    #[tokio::test]
    async fn test_health_manager_initialization() {
        let manager = HealthManager::new();
        let health = manager.get_health().await;

        assert_eq!(health.status, HealthStatus::Starting);
        assert_eq!(health.services["api"].status, HealthStatus::Starting);
    }

    #[tokio::test]
    async fn test_mark_ready() {
        let manager = HealthManager::new();
        manager.mark_ready().await;

        let health = manager.get_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_overall_status_is_worst_service() {
        let manager = HealthManager::new();
        manager.mark_ready().await;
        manager
            .update_service_health("cache", HealthStatus::Degraded, "file store slow".to_string())
            .await;

        assert_eq!(manager.get_health().await.status, HealthStatus::Degraded);

        manager
            .update_service_health("cache", HealthStatus::Unhealthy, "file store unwritable".to_string())
            .await;
        assert_eq!(manager.get_health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_caching_mechanism() {
        let manager = HealthManager::new();
        manager.mark_ready().await;

        let first = manager.get_health().await;
        let second = manager.get_health().await;

        assert_eq!(first.timestamp, second.timestamp);
    }

    #[tokio::test]
    async fn test_open_payments_breaker_degrades_readiness() {
        let breaker = CircuitBreaker::new(
            "payments",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        );
        let manager = HealthManager::new()
            .with_payments_breaker(breaker.clone())
            .with_cache_ttl(Duration::ZERO);
        manager.mark_ready().await;

        assert_eq!(manager.get_health().await.status, HealthStatus::Healthy);

        let _ = breaker.call(|| async { Err::<(), _>("down") }).await;

        let health = manager.get_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.services["payments"].status, HealthStatus::Degraded);
    }

    #[test]
    fn test_status_priority() {
        assert!(HealthStatus::Unhealthy.priority() < HealthStatus::Starting.priority());
        assert!(HealthStatus::Starting.priority() < HealthStatus::Degraded.priority());
        assert!(HealthStatus::Degraded.priority() < HealthStatus::Healthy.priority());
    }
}
