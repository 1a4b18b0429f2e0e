pub mod models;
pub mod validation;

pub use models::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{BackoffStrategy, ReconciliationPolicy};
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };
    use garde::Validate;
    use std::time::Duration;

    fn from_toml(toml: &str) -> AppConfig {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .expect("Should parse config")
    }

    #[test]
    fn test_valid_config_loads() {
        let config = from_toml(
            r#"
            [server]
            port = 8080
            bind = "127.0.0.1"

            [access]
            override_user_id = "b7c1e2d4-demo"
            policy = "payments_authoritative"
            decision_ttl_seconds = 30

            [payments]
            base_url = "https://payments.internal"
            customer_metadata_key = "supabase_user_id"
        "#,
        );

        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.access.override_user_id.as_deref(), Some("b7c1e2d4-demo"));
        assert_eq!(config.access.policy, ReconciliationPolicy::PaymentsAuthoritative);
        assert_eq!(config.access.decision_ttl(), Duration::from_secs(30));
        assert_eq!(config.payments.customer_metadata_key, "supabase_user_id");
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.access.max_retries, 3);
        assert_eq!(config.access.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.access.decision_ttl(), Duration::from_secs(60));
        assert_eq!(config.access.override_grant(), Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(config.access.policy, ReconciliationPolicy::GrantIfAnySource);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.signout_companion_keys.len(), 4);
        assert!(!config.demo.enabled);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let config = from_toml("[server]\nport = 80");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_validation_catches_invalid_bind() {
        let config = from_toml("[server]\nport = 8080\nbind = \"invalid-ip-address\"");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bind"));
    }

    #[test]
    fn test_validation_catches_bad_upstream_settings() {
        let config = from_toml("[payments]\nbase_url = \"ftp://payments\"");
        assert!(config.validate().unwrap_err().to_string().contains("base_url"));

        let config = from_toml("[access]\nmax_retries = 50");
        assert!(config.validate().unwrap_err().to_string().contains("max_retries"));

        let config = from_toml("[access]\nadmin_user_ids = [\"\"]");
        assert!(config.validate().unwrap_err().to_string().contains("admin_user_ids"));

        let config = from_toml("[access]\noverride_user_id = \"\"");
        assert!(config.validate().unwrap_err().to_string().contains("override_user_id"));

        let config = from_toml("[health]\nreadiness_path = \"ready\"");
        assert!(config.validate().unwrap_err().to_string().contains("readiness_path"));
    }

    #[test]
    fn test_retry_backoff_settings() {
        let config = from_toml(
            r#"
            [access]
            max_retries = 5
            retry_delay_ms = 200
            retry_strategy = "exponential_with_jitter"
            retry_max_delay_ms = 2000
            retry_jitter_ratio = 0.5
        "#,
        );
        assert!(config.validate().is_ok());

        let retry = config.access.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(200));
        assert_eq!(retry.max_delay, Duration::from_millis(2000));
        assert_eq!(retry.strategy, BackoffStrategy::ExponentialWithJitter);
        assert!((retry.jitter_ratio - 0.5).abs() < f64::EPSILON);

        let defaults = AppConfig::default().access.retry_config();
        assert_eq!(defaults.strategy, BackoffStrategy::Fixed);
        assert_eq!(defaults.initial_delay, Duration::from_millis(1000));

        let config = from_toml("[access]\nretry_jitter_ratio = 1.5");
        assert!(config.validate().unwrap_err().to_string().contains("retry_jitter_ratio"));

        let config = from_toml("[access]\nretry_delay_ms = 5000\nretry_max_delay_ms = 1000");
        assert!(config.validate().unwrap_err().to_string().contains("retry_max_delay_ms"));
    }

    #[test]
    fn test_config_hierarchy() {
        unsafe {
            std::env::set_var("APP_ACCESS__RETRY_DELAY_MS", "250");
        }

        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("[access]\nretry_delay_ms = 500"))
            .merge(Env::prefixed("APP_").split("__"))
            .extract()
            .expect("Should merge configs");

        unsafe {
            std::env::remove_var("APP_ACCESS__RETRY_DELAY_MS");
        }

        assert_eq!(config.access.retry_delay_ms, 250);
    }

    #[test]
    fn test_cli_flags_take_precedence() {
        let cli = Cli {
            port: Some(9443),
            debug: true,
            environment: Some("no-such-environment".to_string()),
            ..Cli::default()
        };

        let config: AppConfig = build_figment(&cli).extract().unwrap();

        assert_eq!(config.server.port, 9443);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_demo_mode_requires_feature() {
        let config = from_toml("[demo]\nenabled = true");
        assert_eq!(config.demo.is_enabled(), cfg!(feature = "demo"));
    }
}
