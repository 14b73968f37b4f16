//! Durable batch store using RocksDB
//!
//! # Column Families
//!
//! - `batches` - Full batch records with results (key: batch_id)
//! - `pending` - Batches accepted but not processed (key: len(device) || device || batch_id)
//! - `device_batches` - Every batch of a device (key: len(device) || device || batch_id)
//! - `fingerprints` - Content fingerprint to latest batch (key: fingerprint)

use crate::{types::SyncBatch, Error, Result};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::path::Path;
use uuid::Uuid;
use wallet_ledger::DeviceId;

/// Column family names
const CF_BATCHES: &str = "batches";
const CF_PENDING: &str = "pending";
const CF_DEVICE_BATCHES: &str = "device_batches";
const CF_FINGERPRINTS: &str = "fingerprints";

/// Batch store
pub struct BatchStore {
    db: DB,
}

impl std::fmt::Debug for BatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStore").field("path", &self.db.path()).finish()
    }
}

impl BatchStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BATCHES, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_PENDING, Options::default()),
            ColumnFamilyDescriptor::new(CF_DEVICE_BATCHES, Options::default()),
            ColumnFamilyDescriptor::new(CF_FINGERPRINTS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened batch store");

        Ok(Self { db })
    }

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    /// Persist a newly accepted batch as pending (atomic)
    pub fn put_pending(&self, batch: &SyncBatch) -> Result<()> {
        let mut write = WriteBatch::default();
        let device_key = Self::device_key(&batch.device_id, Some(batch.batch_id));

        write.put_cf(
            self.cf_handle(CF_BATCHES)?,
            batch.batch_id.as_bytes(),
            bincode::serialize(batch)?,
        );
        write.put_cf(self.cf_handle(CF_PENDING)?, &device_key, b"");
        write.put_cf(self.cf_handle(CF_DEVICE_BATCHES)?, &device_key, b"");
        write.put_cf(
            self.cf_handle(CF_FINGERPRINTS)?,
            batch.fingerprint.as_bytes(),
            batch.batch_id.as_bytes(),
        );

        self.write(write)?;

        tracing::debug!(
            batch_id = %batch.batch_id,
            device_id = %batch.device_id,
            transactions = batch.transactions.len(),
            "Batch accepted"
        );

        Ok(())
    }

    /// Persist the processed batch and clear its pending marker (atomic)
    pub fn complete(&self, batch: &SyncBatch) -> Result<()> {
        if !batch.is_processed() {
            return Err(Error::Other(format!(
                "Batch {} has not been processed",
                batch.batch_id
            )));
        }

        let mut write = WriteBatch::default();
        write.put_cf(
            self.cf_handle(CF_BATCHES)?,
            batch.batch_id.as_bytes(),
            bincode::serialize(batch)?,
        );
        write.delete_cf(
            self.cf_handle(CF_PENDING)?,
            Self::device_key(&batch.device_id, Some(batch.batch_id)),
        );

        self.write(write)
    }

    /// Get batch by ID
    pub fn get_batch(&self, batch_id: Uuid) -> Result<SyncBatch> {
        let value = self
            .db
            .get_cf(self.cf_handle(CF_BATCHES)?, batch_id.as_bytes())?
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Latest batch with this content fingerprint
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<SyncBatch>> {
        let cf = self.cf_handle(CF_FINGERPRINTS)?;
        match self.db.get_cf(cf, fingerprint.as_bytes())? {
            Some(value) => {
                let batch_id = Self::uuid_from_slice(&value)?;
                Ok(Some(self.get_batch(batch_id)?))
            }
            None => Ok(None),
        }
    }

    /// Batches of a device accepted but not yet processed, oldest first
    pub fn get_pending_batches(&self, device_id: &DeviceId) -> Result<Vec<SyncBatch>> {
        self.scan_device(CF_PENDING, device_id)
    }

    /// Every batch a device submitted, oldest first
    pub fn list_device_batches(&self, device_id: &DeviceId) -> Result<Vec<SyncBatch>> {
        self.scan_device(CF_DEVICE_BATCHES, device_id)
    }

    /// Pending batches of all devices
    pub fn all_pending_batches(&self) -> Result<Vec<SyncBatch>> {
        let cf = self.cf_handle(CF_PENDING)?;
        let mut batches = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batches.push(self.get_batch(Self::batch_id_from_key(&key)?)?);
        }

        Ok(batches)
    }

    fn scan_device(&self, cf_name: &str, device_id: &DeviceId) -> Result<Vec<SyncBatch>> {
        let cf = self.cf_handle(cf_name)?;
        let prefix = Self::device_key(device_id, None);

        let mut batches = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            // Exact prefix plus a 16-byte batch id, nothing longer
            if !key.starts_with(&prefix) || key.len() != prefix.len() + 16 {
                break;
            }
            batches.push(self.get_batch(Self::batch_id_from_key(&key)?)?);
        }

        Ok(batches)
    }

    // Key helpers

    fn device_key(device_id: &DeviceId, batch_id: Option<Uuid>) -> Vec<u8> {
        let device = device_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + device.len() + 16);
        key.extend_from_slice(&(device.len() as u32).to_be_bytes());
        key.extend_from_slice(device);
        if let Some(id) = batch_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn batch_id_from_key(key: &[u8]) -> Result<Uuid> {
        if key.len() < 16 {
            return Err(Error::Storage("Corrupt batch index key".to_string()));
        }
        Self::uuid_from_slice(&key[key.len() - 16..])
    }

    fn uuid_from_slice(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt index value: {}", e)))
    }
}
