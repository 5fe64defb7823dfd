//! Admission control for extraction batches.
//!
//! The [`Governor`] owns two independent gates and the session-scoped
//! counters they read:
//!
//! - [`RateGate`] rejects bursts (busy session, minimum interval, trailing
//!   window).
//! - [`MemoryGate`] rejects batches whose estimated footprint exceeds the
//!   configured ceiling.
//!
//! Both checks are synchronous and leave state untouched on rejection. An
//! accepted start is recorded with [`Governor::record_slice`] and must be
//! paired with [`Governor::complete_slice`] on every exit path, otherwise the
//! busy flag wedges the gate shut.

mod memory;
mod rate;

pub use memory::{MemoryBudgetError, MemoryGate};
pub use rate::{RateGate, RateHistory, RateLimitError};

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::humanize::ByteSize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error(transparent)]
    Rate(#[from] RateLimitError),
    #[error(transparent)]
    Memory(#[from] MemoryBudgetError),
}

/// Point-in-time view of the governor's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GovernorSnapshot {
    pub recent_starts: usize,
    pub busy: bool,
    pub accepted_ranges: usize,
}

#[derive(Debug, Clone)]
pub struct Governor {
    rate: RateGate,
    memory: MemoryGate,
    history: RateHistory,
    accepted_ranges: usize,
}

impl Governor {
    pub fn new(rate: RateGate, memory: MemoryGate) -> Self {
        Self {
            rate,
            memory,
            history: RateHistory::default(),
            accepted_ranges: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            RateGate::from_config(&config.rate),
            MemoryGate::from_config(&config.memory),
        )
    }

    pub fn rate_gate(&self) -> &RateGate {
        &self.rate
    }

    pub fn memory_gate(&self) -> &MemoryGate {
        &self.memory
    }

    /// Run both gates for `new_ranges` ranges of a `source_size` document.
    ///
    /// The rate gate runs first: a burst is rejected even when the batch
    /// would also blow the memory budget. Returns the memory estimate.
    pub fn admit(
        &self,
        now: Instant,
        source_size: ByteSize,
        new_ranges: usize,
    ) -> Result<ByteSize, GateError> {
        self.rate.check(&self.history, now)?;
        let estimate = self.memory.check(source_size, new_ranges)?;
        Ok(estimate)
    }

    /// Mark an admitted batch as started.
    pub fn record_slice(&mut self, now: Instant, ranges: usize) {
        self.rate.record(&mut self.history, now);
        self.accepted_ranges = self.accepted_ranges.saturating_add(ranges);
        debug!(
            ranges,
            accepted_ranges = self.accepted_ranges,
            "Slice recorded"
        );
    }

    /// Release the busy flag taken by [`Governor::record_slice`].
    pub fn complete_slice(&mut self) {
        if !self.rate.complete(&mut self.history) {
            warn!("complete_slice called while no slice was running");
        }
    }

    pub fn is_busy(&self) -> bool {
        self.history.is_busy()
    }

    pub fn accepted_ranges(&self) -> usize {
        self.accepted_ranges
    }

    /// Forget all history and counters.
    pub fn reset(&mut self) {
        self.rate.reset(&mut self.history);
        self.accepted_ranges = 0;
        debug!("Governor reset");
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        GovernorSnapshot {
            recent_starts: self.history.len(),
            busy: self.history.is_busy(),
            accepted_ranges: self.accepted_ranges,
        }
    }
}
