//! Tracing setup and in-process counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Session counters
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_created: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    blobs_registered: AtomicU64,
    blobs_released: AtomicU64,
    gate_rejections: AtomicU64,
    late_results_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks_created(&self, count: usize) {
        self.tasks_created.fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!(counter = "tasks_created", count, "Metric incremented");
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "tasks_completed", "Metric incremented");
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "tasks_failed", "Metric incremented");
    }

    pub fn blob_registered(&self) {
        self.blobs_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blobs_released(&self, count: usize) {
        self.blobs_released.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn gate_rejected(&self) {
        self.gate_rejections.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "gate_rejections", "Metric incremented");
    }

    pub fn late_result_dropped(&self) {
        self.late_results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            blobs_registered: self.blobs_registered.load(Ordering::Relaxed),
            blobs_released: self.blobs_released.load(Ordering::Relaxed),
            gate_rejections: self.gate_rejections.load(Ordering::Relaxed),
            late_results_dropped: self.late_results_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_created: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub blobs_registered: u64,
    pub blobs_released: u64,
    pub gate_rejections: u64,
    pub late_results_dropped: u64,
}
