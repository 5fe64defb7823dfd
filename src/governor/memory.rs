use thiserror::Error;

use crate::config::MemoryConfig;
use crate::humanize::ByteSize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("memory budget: {ranges} new ranges need an estimated {estimate}, ceiling is {ceiling}")]
pub struct MemoryBudgetError {
    pub estimate: ByteSize,
    pub ceiling: ByteSize,
    pub ranges: usize,
}

/// Conservative admission control: `source_size × new_ranges × amplification`
/// must stay at or below the ceiling. Not a measurement of real usage.
#[derive(Debug, Clone, Copy)]
pub struct MemoryGate {
    ceiling: ByteSize,
    amplification: u64,
}

impl MemoryGate {
    pub fn new(ceiling: ByteSize, amplification: u64) -> Self {
        Self {
            ceiling,
            amplification,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.ceiling, config.amplification)
    }

    pub fn ceiling(&self) -> ByteSize {
        self.ceiling
    }

    pub fn estimate(&self, source_size: ByteSize, new_ranges: usize) -> ByteSize {
        source_size.saturating_mul(new_ranges as u64) * self.amplification
    }

    /// Returns the estimate on success so callers can log it.
    pub fn check(
        &self,
        source_size: ByteSize,
        new_ranges: usize,
    ) -> Result<ByteSize, MemoryBudgetError> {
        let estimate = self.estimate(source_size, new_ranges);
        if estimate > self.ceiling {
            return Err(MemoryBudgetError {
                estimate,
                ceiling: self.ceiling,
                ranges: new_ranges,
            });
        }
        Ok(estimate)
    }
}
