//! Federation metrics
//!
//! Counters shared by every query running through a federation searcher:
//! - Query and per-target outcome counts (success, timeout, failure, optional drop)
//! - Fill phase outcomes and hits removed because they could not be filled
//! - Query latency percentiles over a bounded window of recent samples
//!
//! Counters are plain atomics so concurrent queries never contend on them;
//! only latency samples sit behind a short-lived lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Number of latency samples kept for percentile calculation
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Atomic counters for lock-free metric updates
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub queries: AtomicU64,
    pub queries_without_targets: AtomicU64,
    pub targets_launched: AtomicU64,
    pub targets_succeeded: AtomicU64,
    pub targets_timed_out: AtomicU64,
    pub targets_failed: AtomicU64,
    pub optional_dropped: AtomicU64,
    pub selection_errors: AtomicU64,
    pub fills: AtomicU64,
    pub fill_timeouts: AtomicU64,
    pub fill_failures: AtomicU64,
    pub hits_removed_by_fill: AtomicU64,
}

/// Outcome of one target as seen by the metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEvent {
    Succeeded,
    TimedOut,
    Failed,
    OptionalDropped,
}

/// Outcome of one target's fill as seen by the metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillEvent {
    Filled,
    TimedOut { hits_removed: usize },
    Failed { hits_removed: usize },
}

/// Shared metrics of a federation searcher
#[derive(Debug, Clone, Default)]
pub struct FederationMetrics {
    counters: Arc<AtomicCounters>,
    latencies: Arc<Mutex<PercentileCalculator>>,
}

/// Point-in-time copy of [`FederationMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub queries_without_targets: u64,
    pub targets_launched: u64,
    pub targets_succeeded: u64,
    pub targets_timed_out: u64,
    pub targets_failed: u64,
    pub optional_dropped: u64,
    pub selection_errors: u64,
    pub fills: u64,
    pub fill_timeouts: u64,
    pub fill_failures: u64,
    pub hits_removed_by_fill: u64,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
}

impl MetricsSnapshot {
    /// Fraction of launched targets that timed out
    pub fn timeout_rate(&self) -> f64 {
        if self.targets_launched == 0 {
            0.0
        } else {
            self.targets_timed_out as f64 / self.targets_launched as f64
        }
    }
}

impl FederationMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the counters
    pub fn counters(&self) -> &AtomicCounters {
        &self.counters
    }

    pub(crate) fn record_query_start(&self, targets: usize, selection_errors: usize) {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        self.counters.targets_launched.fetch_add(targets as u64, Ordering::Relaxed);
        self.counters
            .selection_errors
            .fetch_add(selection_errors as u64, Ordering::Relaxed);
        if targets == 0 {
            self.counters.queries_without_targets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_target(&self, event: TargetEvent) {
        let counter = match event {
            TargetEvent::Succeeded => &self.counters.targets_succeeded,
            TargetEvent::TimedOut => &self.counters.targets_timed_out,
            TargetEvent::Failed => &self.counters.targets_failed,
            TargetEvent::OptionalDropped => &self.counters.optional_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fill(&self, event: FillEvent) {
        self.counters.fills.fetch_add(1, Ordering::Relaxed);
        let removed = match event {
            FillEvent::Filled => 0,
            FillEvent::TimedOut { hits_removed } => {
                self.counters.fill_timeouts.fetch_add(1, Ordering::Relaxed);
                hits_removed
            }
            FillEvent::Failed { hits_removed } => {
                self.counters.fill_failures.fetch_add(1, Ordering::Relaxed);
                hits_removed
            }
        };
        self.counters
            .hits_removed_by_fill
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_latency(&self, latency: Duration) {
        let mut latencies = self.latencies.lock();
        latencies.add_sample(latency);
        latencies.truncate_to(MAX_LATENCY_SAMPLES);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (latency_p50, latency_p95, latency_p99) = {
            let latencies = self.latencies.lock();
            (
                latencies.percentile(0.5),
                latencies.percentile(0.95),
                latencies.percentile(0.99),
            )
        };

        let c = &self.counters;
        MetricsSnapshot {
            queries: c.queries.load(Ordering::Relaxed),
            queries_without_targets: c.queries_without_targets.load(Ordering::Relaxed),
            targets_launched: c.targets_launched.load(Ordering::Relaxed),
            targets_succeeded: c.targets_succeeded.load(Ordering::Relaxed),
            targets_timed_out: c.targets_timed_out.load(Ordering::Relaxed),
            targets_failed: c.targets_failed.load(Ordering::Relaxed),
            optional_dropped: c.optional_dropped.load(Ordering::Relaxed),
            selection_errors: c.selection_errors.load(Ordering::Relaxed),
            fills: c.fills.load(Ordering::Relaxed),
            fill_timeouts: c.fill_timeouts.load(Ordering::Relaxed),
            fill_failures: c.fill_failures.load(Ordering::Relaxed),
            hits_removed_by_fill: c.hits_removed_by_fill.load(Ordering::Relaxed),
            latency_p50,
            latency_p95,
            latency_p99,
        }
    }
}

/// Percentiles over a set of duration samples
///
/// Samples stay in arrival order so truncation always evicts the oldest.
#[derive(Debug, Default)]
pub struct PercentileCalculator {
    samples: VecDeque<Duration>,
}

impl PercentileCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, duration: Duration) {
        self.samples.push_back(duration);
    }

    /// Drop the oldest samples beyond `max`
    pub fn truncate_to(&mut self, max: usize) {
        if self.samples.len() > max {
            let excess = self.samples.len() - max;
            self.samples.drain(..excess);
        }
    }

    pub fn percentile(&self, p: f64) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
