//! Prometheus metrics for the sync engine
//!
//! - `sync_batches_total{status}` - Processed batches by final status
//! - `sync_batches_replayed_total` - Resubmissions answered from the batch store
//! - `sync_transactions_total{outcome}` - Transactions by outcome (`applied`, `duplicate` or conflict code)
//! - `sync_batch_duration_seconds` - Batch processing time
//!
//! Metrics are observational only; no decision reads them.

use crate::types::{BatchStatus, TransactionOutcome};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Sync metrics collector
#[derive(Clone)]
pub struct SyncMetrics {
    /// Processed batches by status
    pub batches_total: IntCounterVec,

    /// Replayed resubmissions
    pub batches_replayed: IntCounter,

    /// Transactions by outcome
    pub transactions_total: IntCounterVec,

    /// Batch processing duration
    pub batch_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics")
            .field("batches_replayed", &self.batches_replayed.get())
            .finish()
    }
}

impl SyncMetrics {
    /// Create new collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let batches_total = IntCounterVec::new(
            Opts::new("sync_batches_total", "Processed batches by final status"),
            &["status"],
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let batches_replayed = IntCounter::new(
            "sync_batches_replayed_total",
            "Resubmissions answered from the batch store",
        )?;
        registry.register(Box::new(batches_replayed.clone()))?;

        let transactions_total = IntCounterVec::new(
            Opts::new("sync_transactions_total", "Offline transactions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let batch_duration = Histogram::with_opts(
            HistogramOpts::new("sync_batch_duration_seconds", "Batch processing time")
                .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(batch_duration.clone()))?;

        Ok(Self {
            batches_total,
            batches_replayed,
            transactions_total,
            batch_duration,
            registry,
        })
    }

    /// Record one transaction outcome
    pub fn record_outcome(&self, outcome: &TransactionOutcome) {
        let label = match outcome {
            TransactionOutcome::Applied(s) if s.duplicate => "duplicate",
            TransactionOutcome::Applied(_) => "applied",
            TransactionOutcome::Conflict(c) => c.reason.code(),
        };
        self.transactions_total.with_label_values(&[label]).inc();
    }

    /// Record a processed batch
    pub fn record_batch(&self, status: BatchStatus, duration_seconds: f64) {
        self.batches_total.with_label_values(&[status.label()]).inc();
        self.batch_duration.observe(duration_seconds);
    }

    /// Record a replayed resubmission
    pub fn record_replay(&self) {
        self.batches_replayed.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
