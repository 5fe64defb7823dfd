//! Configuration management for SplitBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use splitbox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Memory ceiling: {}", config.memory.ceiling);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `SPLITBOX__<section>__<key>`
//!
//! Examples:
//! - `SPLITBOX__RATE__MIN_INTERVAL_MS=250`
//! - `SPLITBOX__MEMORY__CEILING=1GB`
//! - `SPLITBOX__LIMITS__MAX_RANGES=50`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/splitbox.toml`.
//! This can be overridden using the `SPLITBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{Config, LoggingConfig, MemoryConfig, RangeLimits, RateConfig, TierConfig};
pub use validation::{MIN_AMPLIFICATION, ValidationError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`SPLITBOX__*`)
    /// 2. TOML file (default: `config/splitbox.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Check an in-memory configuration, e.g. one built in code
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)?;
        Ok(())
    }
}
