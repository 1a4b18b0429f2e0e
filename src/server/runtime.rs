use std::time::Duration;

use anyhow::Result;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use super::routes::{AppState, get_access, refresh_access, reset_cache, sign_out};
use crate::access::AccessComponents;
use crate::config::AppConfig;
use crate::health::{HealthManager, liveness_handler, readiness_handler};
use crate::logging::propagate_request_id;
use crate::middleware::metrics_middleware;
use crate::observability::metrics_endpoint;

/// Serve the access API until SIGINT/SIGTERM
pub async fn start_server(config: AppConfig, access: AccessComponents) -> Result<()> {
    let health = HealthManager::new().with_payments_breaker(access.resolver.payments_breaker().clone());

    let app = create_router(
        AppState {
            health: health.clone(),
            access,
        },
        &config,
    );

    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {}: {}. Is another process using this port?", bind_addr, e)
    })?;
    info!("Server bound to {}", bind_addr);

    health.mark_ready().await;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Duration::from_secs(config.server.shutdown_timeout)))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Routing table with middleware
pub fn create_router(state: AppState, config: &AppConfig) -> Router {
    Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route(&config.health.liveness_path, get(liveness_handler))
        .route(&config.health.readiness_path, get(readiness_handler))
        .route("/v1/access", get(get_access))
        .route("/v1/access/refresh", post(refresh_access))
        .route("/v1/session/signout", post(sign_out))
        .route("/v1/session/reset", post(reset_cache))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(propagate_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Resolve on SIGINT or SIGTERM
///
/// In-flight requests get `timeout` to finish before the process exits.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!(timeout_secs = timeout.as_secs(), "Graceful shutdown timed out; exiting");
        std::process::exit(1);
    });
}
