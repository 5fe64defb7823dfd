use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub limits: RangeLimits,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub tier: TierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Structural ceilings, independent of any subscription tier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RangeLimits {
    #[serde(default = "default_max_ranges")]
    pub max_ranges: usize,
}

impl Default for RangeLimits {
    fn default() -> Self {
        Self {
            max_ranges: default_max_ranges(),
        }
    }
}

fn default_max_ranges() -> usize {
    100
}

/// Rate gate settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateConfig {
    /// Minimum gap between two accepted starts
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Length of the trailing window used for burst counting
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_starts_per_window")]
    pub max_starts_per_window: usize,
}

impl RateConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            window_ms: default_window_ms(),
            max_starts_per_window: default_max_starts_per_window(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_starts_per_window() -> usize {
    10
}

/// Memory gate settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_ceiling")]
    pub ceiling: ByteSize,
    /// Extraction copies content into a new output, so this is at least 2
    #[serde(default = "default_amplification")]
    pub amplification: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ceiling: default_memory_ceiling(),
            amplification: default_amplification(),
        }
    }
}

fn default_memory_ceiling() -> ByteSize {
    ByteSize::from_mib(512)
}

fn default_amplification() -> u64 {
    2
}

/// Business ceilings supplied by the subscription tier. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_page_ranges: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_documents: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "splitbox=info".to_string()
}
