//! Subscription-tier ceilings, layered above the structural validator.
//!
//! The tier itself (who is on which plan, monthly quotas) lives outside this
//! crate; callers hand in the resolved [`TierConfig`].

use thiserror::Error;

use crate::config::TierConfig;
use crate::humanize::ByteSize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TierError {
    #[error("tier limit: {requested} page ranges exceed the plan's {max}")]
    PageRanges { requested: usize, max: usize },
    #[error("tier limit: file of {size} exceeds the plan's {max}")]
    FileSize { size: ByteSize, max: ByteSize },
    #[error("tier limit: plan allows {max} documents per session")]
    Documents { max: usize },
}

#[derive(Debug, Clone, Default)]
pub struct TierPolicy {
    limits: TierConfig,
}

impl TierPolicy {
    pub fn new(limits: TierConfig) -> Self {
        Self { limits }
    }

    /// No ceilings at all
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn limits(&self) -> &TierConfig {
        &self.limits
    }

    /// `loaded_so_far` excludes the document being checked.
    pub fn check_document(&self, size: ByteSize, loaded_so_far: usize) -> Result<(), TierError> {
        if let Some(max) = self.limits.max_file_size {
            if size > max {
                return Err(TierError::FileSize { size, max });
            }
        }
        if let Some(max) = self.limits.max_documents {
            if loaded_so_far >= max {
                return Err(TierError::Documents { max });
            }
        }
        Ok(())
    }

    /// `total` counts ranges already accepted plus the new batch.
    pub fn check_ranges(&self, total: usize) -> Result<(), TierError> {
        match self.limits.max_page_ranges {
            Some(max) if total > max => Err(TierError::PageRanges {
                requested: total,
                max,
            }),
            _ => Ok(()),
        }
    }
}
