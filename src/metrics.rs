//! Service metrics for package acquisition and translation.
//!
//! Counters are plain atomics owned by the service and shared through an
//! `Arc`, so every test gets its own isolated instance.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Installer invocations (one per ticket actually created)
    installs_started: AtomicUsize,

    /// Installer invocations that ended in an error
    installs_failed: AtomicUsize,

    /// Callers that joined an install already in flight
    install_joins: AtomicUsize,

    /// Models loaded from disk
    model_loads: AtomicUsize,

    /// Lookups served by an already loaded model
    model_cache_hits: AtomicUsize,

    /// Completed translations
    translations: AtomicUsize,

    /// Translation requests that ended in an error
    translation_failures: AtomicUsize,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_install_started(&self) {
        self.installs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_install_failed(&self) {
        self.installs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_install_joined(&self) {
        self.install_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_load(&self) {
        self.model_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_cache_hit(&self) {
        self.model_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_translation(&self) {
        self.translations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_translation_failure(&self) {
        self.translation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn installs_started(&self) -> usize {
        self.installs_started.load(Ordering::Relaxed)
    }

    pub fn installs_failed(&self) -> usize {
        self.installs_failed.load(Ordering::Relaxed)
    }

    pub fn install_joins(&self) -> usize {
        self.install_joins.load(Ordering::Relaxed)
    }

    pub fn model_loads(&self) -> usize {
        self.model_loads.load(Ordering::Relaxed)
    }

    pub fn model_cache_hits(&self) -> usize {
        self.model_cache_hits.load(Ordering::Relaxed)
    }

    pub fn translations(&self) -> usize {
        self.translations.load(Ordering::Relaxed)
    }

    pub fn translation_failures(&self) -> usize {
        self.translation_failures.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let loads = self.model_loads();
        let hits = self.model_cache_hits();
        let lookups = loads + hits;
        let model_cache_hit_rate = if lookups > 0 {
            (hits as f64 / lookups as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            installs_started: self.installs_started(),
            installs_failed: self.installs_failed(),
            install_joins: self.install_joins(),
            model_loads: loads,
            model_cache_hits: hits,
            model_cache_hit_rate,
            translations: self.translations(),
            translation_failures: self.translation_failures(),
        }
    }
}

/// Snapshot served by `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub installs_started: usize,
    pub installs_failed: usize,
    pub install_joins: usize,
    pub model_loads: usize,
    pub model_cache_hits: usize,

    /// Percentage (0-100) of model lookups served from memory
    pub model_cache_hit_rate: f64,

    pub translations: usize,
    pub translation_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_start_at_zero() {
        let report = ServiceMetrics::new().report();

        assert_eq!(report.installs_started, 0);
        assert_eq!(report.installs_failed, 0);
        assert_eq!(report.install_joins, 0);
        assert_eq!(report.model_loads, 0);
        assert_eq!(report.model_cache_hit_rate, 0.0);
        assert_eq!(report.translations, 0);
    }

    #[test]
    fn test_install_counters() {
        let metrics = ServiceMetrics::new();

        metrics.record_install_started();
        metrics.record_install_started();
        metrics.record_install_failed();
        metrics.record_install_joined();

        assert_eq!(metrics.installs_started(), 2);
        assert_eq!(metrics.installs_failed(), 1);
        assert_eq!(metrics.install_joins(), 1);
    }

    #[test]
    fn test_model_cache_hit_rate() {
        let metrics = ServiceMetrics::new();

        // 1 load, 3 hits = 75% hit rate
        metrics.record_model_load();
        metrics.record_model_cache_hit();
        metrics.record_model_cache_hit();
        metrics.record_model_cache_hit();

        let report = metrics.report();
        assert_eq!(report.model_loads, 1);
        assert_eq!(report.model_cache_hits, 3);
        assert_eq!(report.model_cache_hit_rate, 75.0);
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = ServiceMetrics::new();
        let b = ServiceMetrics::new();

        a.record_translation();

        assert_eq!(a.translations(), 1);
        assert_eq!(b.translations(), 0);
    }

    #[test]
    fn test_report_serializes() {
        let metrics = ServiceMetrics::new();
        metrics.record_translation_failure();

        let json = serde_json::to_value(metrics.report()).unwrap();
        assert_eq!(json["translation_failures"], 1);
    }
}
