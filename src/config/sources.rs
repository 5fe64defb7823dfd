use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "SPLITBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/splitbox.toml";
const ENV_PREFIX: &str = "SPLITBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env is normal
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // SPLITBOX__RATE__MIN_INTERVAL_MS -> rate.min_interval_ms
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
