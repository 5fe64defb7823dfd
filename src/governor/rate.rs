use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::RateConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit: a previous batch is still processing")]
    Busy,
    #[error("rate limit: started too soon after the last batch, retry in {retry_after:?}")]
    TooSoon { retry_after: Duration },
    #[error(
        "rate limit: {max} starts already within the last {window:?}, retry in {retry_after:?}"
    )]
    WindowExhausted {
        max: usize,
        window: Duration,
        retry_after: Duration,
    },
}

impl RateLimitError {
    /// How long the caller should wait; `None` while busy, since that ends
    /// when the running batch finishes rather than at a known time.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitError::Busy => None,
            RateLimitError::TooSoon { retry_after }
            | RateLimitError::WindowExhausted { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// Start timestamps and the busy flag for one session.
#[derive(Debug, Default, Clone)]
pub struct RateHistory {
    starts: VecDeque<Instant>,
    busy: bool,
}

impl RateHistory {
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn last_start(&self) -> Option<Instant> {
        self.starts.back().copied()
    }

    fn clear(&mut self) {
        self.starts.clear();
        self.busy = false;
    }
}

/// Rejects bursts: a busy session, a start inside the minimum interval, or
/// too many starts in the trailing window.
#[derive(Debug, Clone, Copy)]
pub struct RateGate {
    min_interval: Duration,
    window: Duration,
    max_starts: usize,
}

impl RateGate {
    pub fn new(min_interval: Duration, window: Duration, max_starts: usize) -> Self {
        Self {
            min_interval,
            window,
            max_starts,
        }
    }

    pub fn from_config(config: &RateConfig) -> Self {
        Self::new(config.min_interval(), config.window(), config.max_starts_per_window)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Read-only verdict for a start at `now`.
    pub fn check(&self, history: &RateHistory, now: Instant) -> Result<(), RateLimitError> {
        if history.busy {
            return Err(RateLimitError::Busy);
        }

        if let Some(last) = history.last_start() {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Err(RateLimitError::TooSoon {
                    retry_after: self.min_interval - elapsed,
                });
            }
        }

        let mut in_window = history
            .starts
            .iter()
            .filter(|started| now.saturating_duration_since(**started) < self.window);

        if let Some(oldest) = in_window.next() {
            let count = 1 + in_window.count();
            if count >= self.max_starts {
                let expires_at = *oldest + self.window;
                return Err(RateLimitError::WindowExhausted {
                    max: self.max_starts,
                    window: self.window,
                    retry_after: expires_at.saturating_duration_since(now),
                });
            }
        }

        Ok(())
    }

    /// Record an accepted start and mark the session busy.
    pub fn record(&self, history: &mut RateHistory, now: Instant) {
        while let Some(oldest) = history.starts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                history.starts.pop_front();
            } else {
                break;
            }
        }
        history.starts.push_back(now);
        history.busy = true;
    }

    /// Clear the busy flag; returns whether it was set.
    pub fn complete(&self, history: &mut RateHistory) -> bool {
        std::mem::replace(&mut history.busy, false)
    }

    pub fn reset(&self, history: &mut RateHistory) {
        history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RateGate {
        RateGate::new(Duration::from_millis(500), Duration::from_secs(10), 3)
    }

    #[test]
    fn test_first_start_is_accepted() {
        let history = RateHistory::default();
        assert!(gate().check(&history, Instant::now()).is_ok());
    }

    #[test]
    fn test_busy_rejects_until_completed() {
        let gate = gate();
        let mut history = RateHistory::default();
        let t0 = Instant::now();

        gate.record(&mut history, t0);
        let later = t0 + Duration::from_secs(2);
        assert_eq!(gate.check(&history, later), Err(RateLimitError::Busy));

        assert!(gate.complete(&mut history));
        assert!(!gate.complete(&mut history));
        assert!(gate.check(&history, later).is_ok());
    }

    #[test]
    fn test_min_interval_reports_remaining_wait() {
        let gate = gate();
        let mut history = RateHistory::default();
        let t0 = Instant::now();

        gate.record(&mut history, t0);
        gate.complete(&mut history);

        let err = gate
            .check(&history, t0 + Duration::from_millis(200))
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_millis(300)));

        assert!(gate.check(&history, t0 + Duration::from_millis(500)).is_ok());
    }

    #[test]
    fn test_window_exhaustion_and_expiry() {
        let gate = gate();
        let mut history = RateHistory::default();
        let t0 = Instant::now();

        for i in 0..3 {
            let at = t0 + Duration::from_secs(i);
            gate.check(&history, at).unwrap();
            gate.record(&mut history, at);
            gate.complete(&mut history);
        }

        let at = t0 + Duration::from_secs(4);
        let err = gate.check(&history, at).unwrap_err();
        assert!(matches!(err, RateLimitError::WindowExhausted { max: 3, .. }));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(6)));

        // The first start falls out of the window at t0 + 10s.
        assert!(gate.check(&history, t0 + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_check_has_no_side_effects() {
        let gate = gate();
        let history = RateHistory::default();

        gate.check(&history, Instant::now()).unwrap();
        assert!(history.is_empty());
        assert!(!history.is_busy());
    }

    #[test]
    fn test_record_prunes_expired_starts() {
        let gate = gate();
        let mut history = RateHistory::default();
        let t0 = Instant::now();

        gate.record(&mut history, t0);
        gate.complete(&mut history);
        gate.record(&mut history, t0 + Duration::from_secs(30));

        assert_eq!(history.len(), 1);
    }
}
