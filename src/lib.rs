//! OwnBite access service
//!
//! Resolves whether a user holds premium access from three signals (an
//! override identity, the profile's denormalized subscription flag and the
//! payments provider's live subscription) and serves the decision over HTTP.
//! Decisions are kept in an expiring key/value cache.

pub mod access;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::*;
pub use error::*;
pub use server::*;

use anyhow::Result;
use std::panic;

use crate::access::AccessComponents;
use crate::observability::MetricsConfig;

/// Library entry point: configuration, observability, components, server
pub async fn run_server(cli: Cli) -> Result<()> {
    let app_config = config::load_config(&cli)?;

    logging::setup_tracing(&app_config.logging)?;

    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(?panic_info, "FATAL: Panic occurred");
        std::process::exit(1);
    }));

    observability::init_metrics(MetricsConfig {
        environment: cli.environment_name(),
    })?;

    ::tracing::info!(
        environment = %cli.environment_name(),
        policy = ?app_config.access.policy,
        "OwnBite access service starting up"
    );

    let access = if app_config.demo.is_enabled() {
        ::tracing::warn!("Creating demo access components (DEMO MODE)");
        AccessComponents::new_demo(&app_config).await?
    } else {
        ::tracing::info!("Creating production access components");
        AccessComponents::new_production(&app_config)?
    };

    server::start_server(app_config, access).await
}
