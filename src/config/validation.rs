use super::models::Config;
use thiserror::Error;

/// Lowest amplification the memory gate accepts: an extraction holds the
/// source and its copy at the same time.
pub const MIN_AMPLIFICATION: u64 = 2;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("limits.max_ranges must be positive")]
    ZeroRangeCeiling,

    #[error("rate.max_starts_per_window must be positive")]
    ZeroStartsPerWindow,

    #[error("rate.window_ms ({window_ms}) is below rate.min_interval_ms ({min_interval_ms})")]
    WindowShorterThanInterval { window_ms: u64, min_interval_ms: u64 },

    #[error("memory.amplification must be at least 2, got {0}")]
    AmplificationTooLow(u64),

    #[error("memory.ceiling must be positive")]
    ZeroMemoryCeiling,

    #[error("tier ceiling must be positive when set: {field}")]
    ZeroTierCeiling { field: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_limits(config)?;
    validate_rate(config)?;
    validate_memory(config)?;
    validate_tier(config)?;
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    if config.limits.max_ranges == 0 {
        return Err(ValidationError::ZeroRangeCeiling);
    }
    Ok(())
}

fn validate_rate(config: &Config) -> Result<(), ValidationError> {
    let rate = &config.rate;

    if rate.max_starts_per_window == 0 {
        return Err(ValidationError::ZeroStartsPerWindow);
    }

    if rate.window_ms < rate.min_interval_ms {
        return Err(ValidationError::WindowShorterThanInterval {
            window_ms: rate.window_ms,
            min_interval_ms: rate.min_interval_ms,
        });
    }

    Ok(())
}

fn validate_memory(config: &Config) -> Result<(), ValidationError> {
    if config.memory.amplification < MIN_AMPLIFICATION {
        return Err(ValidationError::AmplificationTooLow(config.memory.amplification));
    }

    if config.memory.ceiling.as_u64() == 0 {
        return Err(ValidationError::ZeroMemoryCeiling);
    }

    Ok(())
}

/// A tier ceiling of zero would reject everything, which is never what a tier means
fn validate_tier(config: &Config) -> Result<(), ValidationError> {
    let tier = &config.tier;
    let zero_field = [
        ("max_page_ranges", tier.max_page_ranges == Some(0)),
        ("max_file_size", tier.max_file_size.is_some_and(|s| s.as_u64() == 0)),
        ("max_documents", tier.max_documents == Some(0)),
    ]
    .into_iter()
    .find(|(_, is_zero)| *is_zero);

    if let Some((field, _)) = zero_field {
        return Err(ValidationError::ZeroTierCeiling {
            field: field.to_string(),
        });
    }

    Ok(())
}
