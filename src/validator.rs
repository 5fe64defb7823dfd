//! Structural checks on range selections.
//!
//! Nothing here knows about subscription tiers; those ceilings are layered on
//! top by [`crate::tier`].

use thiserror::Error;

use crate::config::RangeLimits;
use crate::document::PageRange;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("page numbers start at 1, got range {0}")]
    StartIsZero(PageRange),
    #[error("document has no pages")]
    EmptyDocument,
    #[error("range {0} ends before it starts")]
    Inverted(PageRange),
    #[error("range {range} is outside the document's {page_count} pages")]
    OutOfBounds { range: PageRange, page_count: u32 },
    #[error(
        "range count ceiling reached: {accepted} accepted + {requested} requested exceeds {max}"
    )]
    TooManyRanges {
        accepted: usize,
        requested: usize,
        max: usize,
    },
}

/// Checks a batch size against the session's structural range ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RangeValidator {
    max_ranges: usize,
}

impl RangeValidator {
    pub fn new(max_ranges: usize) -> Self {
        Self { max_ranges }
    }

    pub fn from_limits(limits: &RangeLimits) -> Self {
        Self::new(limits.max_ranges)
    }

    pub fn max_ranges(&self) -> usize {
        self.max_ranges
    }

    /// `accepted` is what the session already admitted; `candidate_count`
    /// is the new batch only.
    pub fn validate(&self, accepted: usize, candidate_count: usize) -> Result<(), RangeError> {
        let total = accepted.saturating_add(candidate_count);
        if total > self.max_ranges {
            return Err(RangeError::TooManyRanges {
                accepted,
                requested: candidate_count,
                max: self.max_ranges,
            });
        }
        Ok(())
    }
}

/// Check one range against the document it will be cut from.
pub fn check_bounds(range: PageRange, page_count: u32) -> Result<(), RangeError> {
    if range.start() == 0 {
        return Err(RangeError::StartIsZero(range));
    }
    if range.start() > range.end() {
        return Err(RangeError::Inverted(range));
    }
    if range.end() > page_count {
        return Err(RangeError::OutOfBounds { range, page_count });
    }
    Ok(())
}
