//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_entries_total{tx_type}` - Entries committed
//! - `ledger_duplicate_applies_total` - Offline applies answered from the idempotency index
//! - `ledger_rejections_total{reason}` - Applies refused by the wallet writer
//! - `ledger_apply_duration_seconds` - Histogram of apply latencies
//! - `ledger_active_writers` - Wallet writers currently spawned

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Entries committed, by transaction type
    pub entries_total: IntCounterVec,

    /// Duplicate offline applies
    pub duplicates_total: IntCounter,

    /// Rejected applies, by reason
    pub rejections_total: IntCounterVec,

    /// Apply duration histogram
    pub apply_duration: Histogram,

    /// Spawned wallet writers
    pub active_writers: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("duplicates_total", &self.duplicates_total.get())
            .field("active_writers", &self.active_writers.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounterVec::new(
            Opts::new("ledger_entries_total", "Ledger entries committed"),
            &["tx_type"],
        )?;
        registry.register(Box::new(entries_total.clone()))?;

        let duplicates_total = IntCounter::new(
            "ledger_duplicate_applies_total",
            "Offline applies answered from the idempotency index",
        )?;
        registry.register(Box::new(duplicates_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Applies refused by the wallet writer"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_apply_duration_seconds", "Histogram of apply latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        let active_writers =
            IntGauge::new("ledger_active_writers", "Wallet writers currently spawned")?;
        registry.register(Box::new(active_writers.clone()))?;

        Ok(Self {
            entries_total,
            duplicates_total,
            rejections_total,
            apply_duration,
            active_writers,
            registry,
        })
    }

    /// Record a committed entry
    pub fn record_entry(&self, tx_type: crate::types::TransactionType) {
        self.entries_total.with_label_values(&[tx_type.code()]).inc();
    }

    /// Record a duplicate apply
    pub fn record_duplicate(&self) {
        self.duplicates_total.inc();
    }

    /// Record a rejected apply
    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    /// Record apply duration
    pub fn record_apply_duration(&self, duration_seconds: f64) {
        self.apply_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionType;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.duplicates_total.get(), 0);
        assert_eq!(metrics.active_writers.get(), 0);

        // Independent registries do not collide
        let other = Metrics::new().unwrap();
        assert_eq!(other.duplicates_total.get(), 0);
    }

    #[test]
    fn test_record_entry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_entry(TransactionType::Purchase);
        metrics.record_entry(TransactionType::Purchase);
        metrics.record_entry(TransactionType::TopUp);

        assert_eq!(
            metrics.entries_total.with_label_values(&["PURCHASE"]).get(),
            2
        );
        assert_eq!(metrics.entries_total.with_label_values(&["TOP_UP"]).get(), 1);
    }

    #[test]
    fn test_record_rejection() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection("insufficient_balance");
        assert_eq!(
            metrics
                .rejections_total
                .with_label_values(&["insufficient_balance"])
                .get(),
            1
        );
        assert!(!metrics.registry().gather().is_empty());
    }
}
