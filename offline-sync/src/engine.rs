//! Main sync engine
//!
//! Orchestrates batch acceptance, the validation pipeline and the batch store.

use crate::{
    auth::SignatureAuthenticator,
    config::Config,
    metrics::SyncMetrics,
    pipeline::{Clock, SystemClock, ValidationPipeline},
    store::BatchStore,
    types::{BatchResult, OfflineTransaction, SubmitBatchRequest, SyncBatch},
    Error, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;
use wallet_ledger::{DeviceId, Ledger};

/// Sync engine
pub struct SyncEngine {
    /// Wallet ledger
    ledger: Arc<Ledger>,

    /// Batch store
    store: BatchStore,

    /// Validation pipeline
    pipeline: ValidationPipeline,

    /// Sync time source
    clock: Arc<dyn Clock>,

    /// Metrics
    metrics: SyncMetrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("service_name", &self.config.service_name)
            .field("ledger", &self.ledger)
            .field("store", &self.store)
            .finish()
    }
}

impl SyncEngine {
    /// Open engine with its own ledger
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await?);
        Self::with_ledger(config, ledger)
    }

    /// Open engine on a ledger shared with other services
    pub fn with_ledger(config: Config, ledger: Arc<Ledger>) -> Result<Self> {
        config.validate()?;

        let secret = config
            .signing_secret
            .clone()
            .ok_or_else(|| Error::Config("signing_secret is required".to_string()))?;

        let store = BatchStore::open(&config.batch_data_dir)?;
        let pipeline = ValidationPipeline::new(
            SignatureAuthenticator::new(secret)?,
            ledger.clone(),
            config.validation.max_age(),
        );

        info!(
            service = %config.service_name,
            version = %config.service_version,
            max_age_secs = config.validation.max_transaction_age_secs,
            "Sync engine ready"
        );

        Ok(Self {
            ledger,
            store,
            pipeline,
            clock: Arc::new(SystemClock),
            metrics: SyncMetrics::new()?,
            config,
        })
    }

    /// Replace the sync time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Metrics of this engine
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Submit a batch of offline transactions
    ///
    /// Transactions run through the pipeline in submission order; a conflict
    /// never rolls back earlier successes. An identical resubmission of a
    /// processed batch is answered from the store without reprocessing.
    pub async fn submit_batch(
        &self,
        device_id: DeviceId,
        event_id: Uuid,
        transactions: Vec<OfflineTransaction>,
    ) -> Result<BatchResult> {
        let fingerprint = SyncBatch::fingerprint_of(&device_id, event_id, &transactions);

        let batch = match self.store.find_by_fingerprint(&fingerprint)? {
            Some(existing) if existing.is_processed() => {
                self.metrics.record_replay();
                info!(
                    batch_id = %existing.batch_id,
                    device_id = %device_id,
                    "Identical batch resubmitted, returning stored result"
                );
                return Ok(existing.result());
            }
            // Accepted earlier but never finished: finish it now
            Some(existing) => existing,
            None => {
                let batch = SyncBatch::new(device_id, event_id, transactions);
                self.store.put_pending(&batch)?;
                batch
            }
        };

        self.process_batch(batch).await
    }

    /// Submit a decoded request envelope
    pub async fn submit(&self, request: SubmitBatchRequest) -> Result<BatchResult> {
        self.submit_batch(request.device_id, request.event_id, request.transactions)
            .await
    }

    async fn process_batch(&self, mut batch: SyncBatch) -> Result<BatchResult> {
        let started = Instant::now();
        let now = self.clock.now();

        let mut outcomes = Vec::with_capacity(batch.transactions.len());
        for tx in &batch.transactions {
            // An operation-level error leaves the batch pending for a retry
            let outcome = self
                .pipeline
                .process(&batch.device_id, batch.event_id, tx, now)
                .await?;
            self.metrics.record_outcome(&outcome);
            outcomes.push(outcome);
        }

        batch.finish(outcomes);
        self.store.complete(&batch)?;

        let elapsed = started.elapsed();
        self.metrics.record_batch(batch.status, elapsed.as_secs_f64());

        info!(
            batch_id = %batch.batch_id,
            device_id = %batch.device_id,
            status = batch.status.label(),
            total = batch.transactions.len(),
            succeeded = batch.successes.len(),
            conflicts = batch.conflicts.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Batch processed"
        );

        Ok(batch.result())
    }

    /// Finish batches left pending by an interrupted run
    pub async fn resume_pending(&self) -> Result<Vec<BatchResult>> {
        let pending = self.store.all_pending_batches()?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        info!(count = pending.len(), "Resuming pending batches");

        let mut results = Vec::with_capacity(pending.len());
        for batch in pending {
            results.push(self.process_batch(batch).await?);
        }
        Ok(results)
    }

    /// Get batch by ID
    pub fn get_batch(&self, batch_id: Uuid) -> Result<SyncBatch> {
        self.store.get_batch(batch_id)
    }

    /// Batches of a device accepted but not yet processed
    pub fn get_pending_batches(&self, device_id: &DeviceId) -> Result<Vec<SyncBatch>> {
        self.store.get_pending_batches(device_id)
    }

    /// Every batch a device submitted
    pub fn list_device_batches(&self, device_id: &DeviceId) -> Result<Vec<SyncBatch>> {
        self.store.list_device_batches(device_id)
    }

    /// Shutdown the ledger writers
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down sync engine");
        self.ledger.shutdown().await?;
        Ok(())
    }
}
