//! Pipeline counters.
//!
//! Cheap atomic counters shared across clones of the pipeline, with a
//! serializable point-in-time snapshot for logging or export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    gets: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    puts: AtomicU64,
    transforms: AtomicU64,
    backfills: AtomicU64,
    backfill_failures: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.get_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.get_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform(&self) {
        self.transforms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill(&self) {
        self.backfills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill_failure(&self) {
        self.backfill_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let gets = self.gets.load(Ordering::Relaxed);
        let get_hits = self.get_hits.load(Ordering::Relaxed);
        MetricsSnapshot {
            gets,
            get_hits,
            get_misses: self.get_misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            transforms: self.transforms.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            backfill_failures: self.backfill_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if gets > 0 {
                get_hits as f64 / gets as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset(&self) {
        self.gets.store(0, Ordering::Relaxed);
        self.get_hits.store(0, Ordering::Relaxed);
        self.get_misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.transforms.store(0, Ordering::Relaxed);
        self.backfills.store(0, Ordering::Relaxed);
        self.backfill_failures.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub gets: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub puts: u64,
    pub transforms: u64,
    pub backfills: u64,
    pub backfill_failures: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = PipelineMetrics::new();
        metrics.record_get();
        metrics.record_get();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_backfill();

        let snap = metrics.snapshot();
        assert_eq!(snap.gets, 2);
        assert_eq!(snap.get_hits, 1);
        assert_eq!(snap.get_misses, 1);
        assert_eq!(snap.backfills, 1);
        assert!((snap.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_hit_rate_is_zero() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().hit_rate, 0.0);
    }

    #[test]
    fn test_reset_clears_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_get();
        metrics.record_backfill_failure();
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.gets, 0);
        assert_eq!(snap.backfill_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = PipelineMetrics::new();
        metrics.record_get();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["gets"], 1);
    }
}
