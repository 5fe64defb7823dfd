use serde::Serialize;
use thiserror::Error;

use crate::blobs::LifecycleError;
use crate::codec::CodecError;
use crate::governor::{GateError, MemoryBudgetError, RateLimitError};
use crate::tier::TierError;
use crate::validator::RangeError;

/// Which limit a rejection ran into, so the caller can choose to wait,
/// shrink the batch, or move to a bigger tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ceiling {
    Count,
    Rate,
    Memory,
    Tier,
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("invalid selection: {0}")]
    Validation(#[from] RangeError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    MemoryBudget(#[from] MemoryBudgetError),
    #[error("codec failed: {0}")]
    Codec(#[from] CodecError),
    #[error("blob lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Tier(#[from] TierError),
    #[error("no document loaded")]
    NoDocument,
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("task {0} has no output")]
    NoOutput(String),
    #[error("session is closed")]
    SessionClosed,
}

impl SplitError {
    pub fn code(&self) -> &'static str {
        match self {
            SplitError::Validation(RangeError::TooManyRanges { .. }) => "RANGE_LIMIT",
            SplitError::Validation(_) => "INVALID_RANGE",
            SplitError::RateLimit(_) => "RATE_LIMITED",
            SplitError::MemoryBudget(_) => "MEMORY_BUDGET",
            SplitError::Codec(_) => "CODEC_ERROR",
            SplitError::Lifecycle(_) => "BLOB_LIFECYCLE",
            SplitError::Tier(_) => "TIER_LIMIT",
            SplitError::NoDocument => "NO_DOCUMENT",
            SplitError::TaskNotFound(_) => "TASK_NOT_FOUND",
            SplitError::NoOutput(_) => "NO_OUTPUT",
            SplitError::SessionClosed => "SESSION_CLOSED",
        }
    }

    /// The ceiling that was hit, when this is an admission rejection
    pub fn ceiling(&self) -> Option<Ceiling> {
        match self {
            SplitError::Validation(RangeError::TooManyRanges { .. }) => Some(Ceiling::Count),
            SplitError::RateLimit(_) => Some(Ceiling::Rate),
            SplitError::MemoryBudget(_) => Some(Ceiling::Memory),
            SplitError::Tier(_) => Some(Ceiling::Tier),
            _ => None,
        }
    }

    /// Whether retrying the same call later can succeed without the caller
    /// changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(self, SplitError::RateLimit(_))
    }
}

impl From<GateError> for SplitError {
    fn from(value: GateError) -> Self {
        match value {
            GateError::Rate(err) => SplitError::RateLimit(err),
            GateError::Memory(err) => SplitError::MemoryBudget(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, SplitError>;
