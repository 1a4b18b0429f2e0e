//! Prometheus recorder installation
//!
//! The recorder is installed once per process; the handle is kept globally so
//! the `/metrics` route on the main router can render it.

use std::sync::{Arc, OnceLock};

use anyhow::{Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Service environment label (development, staging, production)
    pub environment: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
        }
    }
}

pub struct MetricsManager {
    handle: PrometheusHandle,
    config: MetricsConfig,
}

impl MetricsManager {
    /// Install the Prometheus recorder as the global `metrics` recorder
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .add_global_label("service", env!("CARGO_PKG_NAME"))
            .add_global_label("environment", &config.environment)
            .add_global_label("version", env!("CARGO_PKG_VERSION"))
            .install_recorder()
            .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))?;

        tracing::info!(environment = %config.environment, "Prometheus metrics recorder initialized");

        Ok(Self { handle, config })
    }

    /// Prometheus text exposition
    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }
}

static METRICS_MANAGER: OnceLock<Arc<MetricsManager>> = OnceLock::new();

pub fn init_metrics(config: MetricsConfig) -> Result<()> {
    if METRICS_MANAGER.get().is_some() {
        return Err(anyhow!("Metrics manager was already initialized"));
    }

    let manager = Arc::new(MetricsManager::new(config)?);
    METRICS_MANAGER
        .set(manager)
        .map_err(|_| anyhow!("Metrics manager was already initialized"))
}

pub fn get_metrics_manager() -> Result<Arc<MetricsManager>> {
    METRICS_MANAGER
        .get()
        .cloned()
        .ok_or_else(|| anyhow!("Metrics manager not initialized. Call init_metrics() first."))
}

/// Install the recorder for tests, tolerating earlier installs in the same process
#[cfg(test)]
pub(crate) fn init_test_metrics() -> Arc<MetricsManager> {
    let _ = init_metrics(MetricsConfig {
        environment: "test".to_string(),
    });
    get_metrics_manager().expect("metrics manager initialized")
}
