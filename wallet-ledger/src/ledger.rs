//! Main ledger orchestration layer
//!
//! This module ties together storage, metrics and the per-wallet writers
//! into the high-level API used by the sync engine and online services.
//!
//! # Example
//!
//! ```no_run
//! use wallet_ledger::{Config, Ledger, OwnerId, TransactionType};
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let wallet = ledger
//!         .get_or_create_wallet(&OwnerId::new("attendee-42"), uuid::Uuid::now_v7())?;
//!     ledger
//!         .apply_online(wallet.wallet_id, TransactionType::TopUp, 5_000, Default::default())
//!         .await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_wallet_actor, WalletHandle},
    metrics::Metrics,
    types::{
        Applied, ApplyRequest, DeviceId, EntryOrigin, EntryRefs, LedgerEntry, OwnerId,
        TransactionType, Wallet, WalletId, WalletStatus,
    },
    Config, Error, Result, Storage,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Deliveries tried before giving up on a wallet writer
const WRITER_ATTEMPTS: usize = 3;

/// Main ledger interface
pub struct Ledger {
    /// Storage (reads go straight here; writes go through wallet writers)
    storage: Arc<Storage>,

    /// One writer per recently written wallet, spawned on demand
    writers: Arc<DashMap<WalletId, WalletHandle>>,

    /// Serializes lazy wallet creation
    creation_lock: Mutex<()>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("storage", &self.storage)
            .field("writers", &self.writers.len())
            .finish()
    }
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;

        Ok(Self {
            storage,
            writers: Arc::new(DashMap::new()),
            creation_lock: Mutex::new(()),
            metrics,
            config,
        })
    }

    /// Metrics of this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Number of wallet writers currently registered
    pub fn active_writers(&self) -> usize {
        self.writers.len()
    }

    fn writer(&self, wallet_id: WalletId) -> WalletHandle {
        let existing = self.writers.get(&wallet_id).map(|h| h.value().clone());
        if let Some(handle) = existing {
            if !handle.is_closed() {
                return handle;
            }
            self.writers.remove_if(&wallet_id, |_, h| h.is_closed());
        }

        self.writers
            .entry(wallet_id)
            .or_insert_with(|| self.spawn_writer(wallet_id))
            .value()
            .clone()
    }

    fn spawn_writer(&self, wallet_id: WalletId) -> WalletHandle {
        let writers = Arc::clone(&self.writers);
        let active = self.metrics.active_writers.clone();
        active.inc();

        spawn_wallet_actor(wallet_id, self.storage.clone(), &self.config.writer, move || {
            // A successor may already be registered; only drop a stopped handle
            writers.remove_if(&wallet_id, |_, h| h.is_closed());
            active.dec();
        })
    }

    /// Call a wallet's writer, replacing it if it stopped before delivery
    async fn with_writer<T, F, Fut>(&self, wallet_id: WalletId, call: F) -> Result<T>
    where
        F: Fn(WalletHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call(self.writer(wallet_id)).await {
                Err(Error::WriterUnavailable(_)) if attempt < WRITER_ATTEMPTS => attempt += 1,
                result => return result,
            }
        }
    }

    // Wallets

    /// Get the wallet of an owner at an event, creating it on first access
    pub fn get_or_create_wallet(&self, owner_id: &OwnerId, event_id: Uuid) -> Result<Wallet> {
        if let Some(wallet_id) = self.storage.find_wallet_id(owner_id, event_id)? {
            return self.storage.get_wallet(wallet_id);
        }

        let _guard = self.creation_lock.lock();

        // Re-check under the lock: another caller may have won the race
        if let Some(wallet_id) = self.storage.find_wallet_id(owner_id, event_id)? {
            return self.storage.get_wallet(wallet_id);
        }

        let wallet = Wallet::open(owner_id.clone(), event_id);
        self.storage.create_wallet(&wallet)?;

        tracing::info!(
            wallet_id = %wallet.wallet_id,
            owner_id = %owner_id,
            event_id = %event_id,
            "Wallet opened"
        );

        Ok(wallet)
    }

    /// Get wallet by ID
    pub fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.storage.get_wallet(wallet_id)
    }

    /// Find the wallet of an owner at an event without creating it
    pub fn find_wallet(&self, owner_id: &OwnerId, event_id: Uuid) -> Result<Option<Wallet>> {
        match self.storage.find_wallet_id(owner_id, event_id)? {
            Some(wallet_id) => Ok(Some(self.storage.get_wallet(wallet_id)?)),
            None => Ok(None),
        }
    }

    /// Freeze or reactivate a wallet
    pub async fn set_wallet_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet> {
        // Fail fast without spawning a writer for an unknown wallet
        self.storage.get_wallet(wallet_id)?;
        self.with_writer(wallet_id, |writer| async move { writer.set_status(status).await })
            .await
    }

    // Entries

    /// Check and apply one transaction atomically
    ///
    /// Existence, status, balance and (for offline origins) the idempotency
    /// key are all re-checked by the wallet's writer together with the
    /// mutation. A failed call leaves the wallet exactly as it was.
    pub async fn apply_transaction(&self, request: ApplyRequest) -> Result<Applied> {
        let started = Instant::now();
        let tx_type = request.tx_type;
        let wallet_id = request.wallet_id;

        let result = self
            .with_writer(wallet_id, |writer| {
                let request = request.clone();
                async move { writer.apply(request).await }
            })
            .await;

        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());
        match &result {
            Ok(applied) if applied.duplicate => self.metrics.record_duplicate(),
            Ok(_) => self.metrics.record_entry(tx_type),
            Err(e) => self.metrics.record_rejection(e.label()),
        }

        result
    }

    /// Apply a transaction made by an online service at the current time
    pub async fn apply_online(
        &self,
        wallet_id: WalletId,
        tx_type: TransactionType,
        amount: u64,
        refs: EntryRefs,
    ) -> Result<Applied> {
        self.apply_transaction(ApplyRequest {
            wallet_id,
            event_id: None,
            tx_type,
            amount,
            event_time: Utc::now(),
            refs,
            origin: EntryOrigin::Online,
        })
        .await
    }

    /// Entry previously created for (device, local id), if any
    pub fn find_offline_entry(&self, device_id: &DeviceId, local_id: &str) -> Result<Option<LedgerEntry>> {
        match self.storage.find_offline_entry_id(device_id, local_id)? {
            Some(entry_id) => Ok(Some(self.storage.get_entry(entry_id)?)),
            None => Ok(None),
        }
    }

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        self.storage.get_entry(entry_id)
    }

    /// Get a wallet's entries in application order
    pub fn get_wallet_entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        self.storage.get_wallet_entries(wallet_id)
    }

    /// Check the balance chain of a wallet
    ///
    /// Each entry must start where the previous one ended, apply exactly its
    /// signed amount, and the last entry must end at the wallet balance.
    pub fn check_balance_chain(&self, wallet_id: WalletId) -> Result<bool> {
        let wallet = self.storage.get_wallet(wallet_id)?;
        let entries = self.storage.get_wallet_entries(wallet_id)?;

        if entries.len() as u64 != wallet.entry_count {
            tracing::warn!(
                wallet_id = %wallet_id,
                expected = wallet.entry_count,
                found = entries.len(),
                "Entry count mismatch"
            );
            return Ok(false);
        }

        let mut running: u64 = 0;
        for (index, entry) in entries.iter().enumerate() {
            let expected_after = entry.balance_before as i128 + entry.signed_amount();
            if entry.sequence != index as u64
                || entry.balance_before != running
                || expected_after != entry.balance_after as i128
            {
                tracing::warn!(
                    wallet_id = %wallet_id,
                    entry_id = %entry.entry_id,
                    sequence = entry.sequence,
                    "Balance chain broken"
                );
                return Ok(false);
            }
            running = entry.balance_after;
        }

        Ok(running == wallet.balance)
    }

    /// Shutdown all wallet writers
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<WalletHandle> = self.writers.iter().map(|h| h.value().clone()).collect();
        self.writers.clear();

        for handle in handles {
            // A writer that already stopped is fine
            if let Err(e) = handle.shutdown().await {
                tracing::debug!("Writer already stopped: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_ledger() -> (Ledger, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        (Ledger::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_ledger_open() {
        let (ledger, _temp) = create_test_ledger().await;
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_wallet_created_once_per_owner_and_event() {
        let (ledger, _temp) = create_test_ledger().await;
        let owner = OwnerId::new("attendee-1");
        let event_id = Uuid::now_v7();

        let first = ledger.get_or_create_wallet(&owner, event_id).unwrap();
        let second = ledger.get_or_create_wallet(&owner, event_id).unwrap();
        assert_eq!(first.wallet_id, second.wallet_id);

        let other_event = ledger.get_or_create_wallet(&owner, Uuid::now_v7()).unwrap();
        assert_ne!(first.wallet_id, other_event.wallet_id);

        assert!(ledger
            .find_wallet(&OwnerId::new("nobody"), event_id)
            .unwrap()
            .is_none());

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lazy_creation() {
        let (ledger, _temp) = create_test_ledger().await;
        let ledger = Arc::new(ledger);
        let event_id = Uuid::now_v7();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .get_or_create_wallet(&OwnerId::new("same-owner"), event_id)
                    .unwrap()
                    .wallet_id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_online_and_history() {
        let (ledger, _temp) = create_test_ledger().await;
        let wallet = ledger
            .get_or_create_wallet(&OwnerId::new("attendee-2"), Uuid::now_v7())
            .unwrap();

        ledger
            .apply_online(wallet.wallet_id, TransactionType::TopUp, 2_000, EntryRefs::default())
            .await
            .unwrap();
        let purchase = ledger
            .apply_online(
                wallet.wallet_id,
                TransactionType::Purchase,
                750,
                EntryRefs {
                    vendor_id: Some("bar-3".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(purchase.balance_before, 2_000);
        assert_eq!(purchase.balance_after, 1_250);

        let entries = ledger.get_wallet_entries(wallet.wallet_id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].refs.vendor_id.as_deref(), Some("bar-3"));
        assert!(ledger.check_balance_chain(wallet.wallet_id).unwrap());

        assert_eq!(
            ledger.metrics().entries_total.with_label_values(&["PURCHASE"]).get(),
            1
        );

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_entry_keeps_event_time() {
        let (ledger, _temp) = create_test_ledger().await;
        let wallet = ledger
            .get_or_create_wallet(&OwnerId::new("attendee-3"), Uuid::now_v7())
            .unwrap();

        let event_time = Utc::now() - chrono::Duration::hours(3);
        let applied = ledger
            .apply_transaction(ApplyRequest {
                wallet_id: wallet.wallet_id,
                event_id: Some(wallet.event_id),
                tx_type: TransactionType::CashIn,
                amount: 500,
                event_time,
                refs: EntryRefs::default(),
                origin: EntryOrigin::Offline {
                    device_id: DeviceId::new("pos-1"),
                    local_id: "a1".to_string(),
                },
            })
            .await
            .unwrap();

        let entry = ledger.get_entry(applied.entry_id).unwrap();
        assert_eq!(entry.created_at, event_time);
        assert!(entry.recorded_at > event_time);

        let found = ledger
            .find_offline_entry(&DeviceId::new("pos-1"), "a1")
            .unwrap()
            .unwrap();
        assert_eq!(found.entry_id, applied.entry_id);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_status_unknown_wallet() {
        let (ledger, _temp) = create_test_ledger().await;
        let result = ledger
            .set_wallet_status(WalletId::generate(), WalletStatus::Frozen)
            .await;
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_writer_is_evicted_and_respawned() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        config.writer.idle_timeout_ms = 50;
        let ledger = Ledger::open(config).await.unwrap();

        let wallet = ledger
            .get_or_create_wallet(&OwnerId::new("attendee-4"), Uuid::now_v7())
            .unwrap();
        ledger
            .apply_online(wallet.wallet_id, TransactionType::TopUp, 300, EntryRefs::default())
            .await
            .unwrap();
        assert_eq!(ledger.active_writers(), 1);
        assert_eq!(ledger.metrics().active_writers.get(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(ledger.active_writers(), 0);
        assert_eq!(ledger.metrics().active_writers.get(), 0);

        let applied = ledger
            .apply_online(wallet.wallet_id, TransactionType::Purchase, 120, EntryRefs::default())
            .await
            .unwrap();
        assert_eq!(applied.balance_before, 300);
        assert_eq!(applied.balance_after, 180);
        assert_eq!(ledger.active_writers(), 1);
        assert!(ledger.check_balance_chain(wallet.wallet_id).unwrap());

        ledger.shutdown().await.unwrap();
        assert_eq!(ledger.metrics().active_writers.get(), 0);
    }
}
