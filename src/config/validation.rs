use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;

use super::AppConfig;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ownbite-access", about = "Premium entitlement service")]
pub struct Cli {
    /// Extra configuration file, merged above the environment file
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Environment name selecting config/{environment}.toml
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn environment_name(&self) -> String {
        self.environment.clone().unwrap_or_else(|| "production".to_string())
    }
}

/// Layered configuration, lowest priority first:
///
/// 1. embedded defaults
/// 2. `config/default.toml`
/// 3. `config/{environment}.toml`
/// 4. `--config` file
/// 5. `APP_` environment variables (`APP_ACCESS__MAX_RETRIES`)
/// 6. CLI flags
pub fn build_figment(cli: &Cli) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/default.toml"))
        .merge(Toml::file(format!("config/{}.toml", cli.environment_name())));

    if let Some(path) = &cli.config {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("APP_").split("__"));

    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if cli.debug {
        figment = figment.merge(Serialized::default("logging.level", "debug"));
    }

    figment
}

pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config: AppConfig = build_figment(cli).extract()?;
    config.validate()?;
    Ok(config)
}
