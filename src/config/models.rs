use std::path::PathBuf;
use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::access::{BackoffStrategy, ReconciliationPolicy, RetryConfig};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub health: HealthConfig,

    #[garde(dive)]
    #[serde(default)]
    pub cache: CacheConfig,

    #[garde(dive)]
    #[serde(default)]
    pub access: AccessConfig,

    #[garde(dive)]
    #[serde(default)]
    pub profiles: ProfilesConfig,

    #[garde(dive)]
    #[serde(default)]
    pub payments: PaymentsConfig,

    #[garde(skip)]
    #[serde(default)]
    pub demo: DemoConfig,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: default_bind(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HealthConfig {
    #[garde(pattern(r"^/[a-z0-9/_-]*$"))]
    #[serde(default = "default_liveness_path")]
    pub liveness_path: String,

    #[garde(pattern(r"^/[a-z0-9/_-]*$"))]
    #[serde(default = "default_readiness_path")]
    pub readiness_path: String,
}

fn default_liveness_path() -> String {
    "/health".to_string()
}

fn default_readiness_path() -> String {
    "/health/ready".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            liveness_path: default_liveness_path(),
            readiness_path: default_readiness_path(),
        }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CacheConfig {
    #[garde(skip)]
    #[serde(default)]
    pub backend: CacheBackend,

    /// Directory for the file backend
    #[garde(skip)]
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Local-state keys removed on sign-out
    #[garde(length(min = 1))]
    #[serde(default = "default_companion_keys")]
    pub signout_companion_keys: Vec<String>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_companion_keys() -> Vec<String> {
    crate::cache::SIGNOUT_COMPANION_KEYS
        .iter()
        .map(|k| k.to_string())
        .collect()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            dir: default_cache_dir(),
            signout_companion_keys: default_companion_keys(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AccessConfig {
    /// Identity that is always granted premium
    #[garde(length(min = 1))]
    #[serde(default)]
    pub override_user_id: Option<String>,

    /// Identities allowed to reset the cache for every user; others only reset their own
    #[garde(inner(length(min = 1)))]
    #[serde(default)]
    pub admin_user_ids: Vec<String>,

    #[garde(range(min = 1, max = 3650))]
    #[serde(default = "default_override_grant_days")]
    pub override_grant_days: u32,

    #[garde(range(min = 1, max = 86_400))]
    #[serde(default = "default_decision_ttl")]
    pub decision_ttl_seconds: u64,

    #[garde(skip)]
    #[serde(default)]
    pub policy: ReconciliationPolicy,

    #[garde(range(max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[garde(range(min = 1, max = 60_000))]
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Growth of the delay between retries
    #[garde(skip)]
    #[serde(default)]
    pub retry_strategy: BackoffStrategy,

    /// Cap on any single retry delay
    #[garde(range(min = 1, max = 300_000), custom(at_least_retry_delay(&self.retry_delay_ms)))]
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Jitter as a fraction of the delay, applied by `exponential_with_jitter`
    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_retry_jitter_ratio")]
    pub retry_jitter_ratio: f64,

    /// Consecutive payments failures before the circuit opens
    #[garde(range(min = 1, max = 100))]
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_threshold: u32,

    #[garde(range(min = 1, max = 3600))]
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_seconds: u64,
}

fn default_override_grant_days() -> u32 {
    365
}

fn default_decision_ttl() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    10_000
}

fn default_retry_jitter_ratio() -> f64 {
    0.3
}

fn at_least_retry_delay(retry_delay_ms: &u64) -> impl FnOnce(&u64, &()) -> garde::Result + '_ {
    move |max_delay_ms, _| {
        if max_delay_ms < retry_delay_ms {
            return Err(garde::Error::new("must not be below retry_delay_ms"));
        }
        Ok(())
    }
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown() -> u64 {
    30
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            override_user_id: None,
            admin_user_ids: Vec::new(),
            override_grant_days: default_override_grant_days(),
            decision_ttl_seconds: default_decision_ttl(),
            policy: ReconciliationPolicy::default(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            retry_strategy: BackoffStrategy::default(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_jitter_ratio: default_retry_jitter_ratio(),
            breaker_failure_threshold: default_breaker_threshold(),
            breaker_cooldown_seconds: default_breaker_cooldown(),
        }
    }
}

impl AccessConfig {
    pub fn decision_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_ttl_seconds)
    }

    pub fn override_grant(&self) -> Duration {
        Duration::from_secs(u64::from(self.override_grant_days) * 24 * 60 * 60)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(self.max_retries)
            .with_initial_delay(self.retry_delay())
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_strategy(self.retry_strategy)
            .with_jitter_ratio(self.retry_jitter_ratio)
    }
}

/// Profile table (PostgREST-style) settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ProfilesConfig {
    #[garde(length(min = 1), custom(validate_http_url))]
    #[serde(default = "default_profiles_url")]
    pub base_url: String,

    /// Service key; also used to verify caller tokens against the auth service
    #[garde(skip)]
    #[serde(default)]
    pub service_key: String,

    #[garde(length(min = 1), pattern(r"^[a-z_][a-z0-9_]*$"))]
    #[serde(default = "default_profiles_table")]
    pub table: String,

    #[garde(range(min = 100, max = 60_000))]
    #[serde(default = "default_upstream_timeout")]
    pub timeout_ms: u64,
}

fn default_profiles_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_profiles_table() -> String {
    "profiles".to_string()
}

fn default_upstream_timeout() -> u64 {
    5000
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            base_url: default_profiles_url(),
            service_key: String::new(),
            table: default_profiles_table(),
            timeout_ms: default_upstream_timeout(),
        }
    }
}

impl ProfilesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Payments provider (Stripe-style) settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PaymentsConfig {
    #[garde(length(min = 1), custom(validate_http_url))]
    #[serde(default = "default_payments_url")]
    pub base_url: String,

    #[garde(skip)]
    #[serde(default)]
    pub secret_key: String,

    /// Customer metadata key holding the user id
    #[garde(length(min = 1))]
    #[serde(default = "default_metadata_key")]
    pub customer_metadata_key: String,

    #[garde(range(min = 100, max = 60_000))]
    #[serde(default = "default_payments_timeout")]
    pub timeout_ms: u64,
}

fn default_payments_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_metadata_key() -> String {
    "user_id".to_string()
}

fn default_payments_timeout() -> u64 {
    3000
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            base_url: default_payments_url(),
            secret_key: String::new(),
            customer_metadata_key: default_metadata_key(),
            timeout_ms: default_payments_timeout(),
        }
    }
}

impl PaymentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Demo mode: in-memory collaborators and token-as-identity
///
/// Only honored when built with the `demo` feature.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DemoConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Users seeded with a premium profile
    #[serde(default)]
    pub premium_users: Vec<String>,

    /// Users seeded with an active payments subscription
    #[serde(default)]
    pub subscribed_users: Vec<String>,
}

impl DemoConfig {
    pub fn is_enabled(&self) -> bool {
        cfg!(feature = "demo") && self.enabled
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}

fn validate_http_url(value: &str, _: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("URL must start with http:// or https://"))
    }
}
