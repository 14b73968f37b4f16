//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `wallets` - Current wallet state (key: wallet_id)
//! - `entries` - Append-only entry log (key: entry_id)
//! - `wallet_entries` - Per-wallet chain index (key: wallet_id || sequence)
//! - `owners` - Wallet lookup (key: event_id || owner_id)
//! - `offline_keys` - Offline idempotency keys (key: len(device) || device || local_id)

use crate::{
    error::{Error, Result},
    types::{DeviceId, LedgerEntry, OwnerId, Wallet, WalletId, EntryOrigin},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use uuid::Uuid;

/// Column family names
const CF_WALLETS: &str = "wallets";
const CF_ENTRIES: &str = "entries";
const CF_WALLET_ENTRIES: &str = "wallet_entries";
const CF_OWNERS: &str = "owners";
const CF_OFFLINE_KEYS: &str = "offline_keys";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_WALLET_ENTRIES, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_OWNERS, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_OFFLINE_KEYS, Self::cf_options_index()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened wallet ledger store");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Wallets are read on every apply, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    // Wallet operations

    /// Get wallet by ID
    pub fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        let cf = self.cf_handle(CF_WALLETS)?;

        let value = self
            .db
            .get_cf(cf, wallet_id.as_bytes())?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Find the wallet of an owner at an event
    pub fn find_wallet_id(&self, owner_id: &OwnerId, event_id: Uuid) -> Result<Option<WalletId>> {
        let cf = self.cf_handle(CF_OWNERS)?;
        let key = Self::index_key_owner(event_id, owner_id);

        match self.db.get_cf(cf, &key)? {
            Some(value) => Ok(Some(WalletId::from_uuid(Self::uuid_from_slice(&value)?))),
            None => Ok(None),
        }
    }

    /// Create wallet with its owner index (atomic)
    pub fn create_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        batch.put_cf(cf_wallets, wallet.wallet_id.as_bytes(), bincode::serialize(wallet)?);

        let cf_owners = self.cf_handle(CF_OWNERS)?;
        let idx_owner = Self::index_key_owner(wallet.event_id, &wallet.owner_id);
        batch.put_cf(cf_owners, &idx_owner, wallet.wallet_id.as_bytes());

        self.write(batch)?;

        tracing::debug!(
            wallet_id = %wallet.wallet_id,
            owner_id = %wallet.owner_id,
            event_id = %wallet.event_id,
            "Wallet created"
        );

        Ok(())
    }

    /// Overwrite wallet state (status changes)
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        let cf = self.cf_handle(CF_WALLETS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, wallet.wallet_id.as_bytes(), bincode::serialize(wallet)?);
        self.write(batch)
    }

    // Entry operations

    /// Get entry by ID
    pub fn get_entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let cf = self.cf_handle(CF_ENTRIES)?;

        let value = self
            .db
            .get_cf(cf, entry_id.as_bytes())?
            .ok_or_else(|| Error::EntryNotFound(entry_id.to_string()))?;

        Ok(bincode::deserialize(&value)?)
    }

    /// Get a wallet's entries in application order (via index)
    pub fn get_wallet_entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let cf_index = self.cf_handle(CF_WALLET_ENTRIES)?;
        let prefix = wallet_id.as_bytes();

        let iter = self
            .db
            .iterator_cf(cf_index, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }

            let entry_id = Self::uuid_from_slice(&value)?;
            entries.push(self.get_entry(entry_id)?);
        }

        Ok(entries)
    }

    /// Look up the entry created for an offline transaction
    pub fn find_offline_entry_id(&self, device_id: &DeviceId, local_id: &str) -> Result<Option<Uuid>> {
        let cf = self.cf_handle(CF_OFFLINE_KEYS)?;
        let key = Self::index_key_offline(device_id, local_id);

        match self.db.get_cf(cf, &key)? {
            Some(value) => Ok(Some(Self::uuid_from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Append entry with wallet update and indices (atomic)
    ///
    /// Either the entry, the new wallet state, the chain index and the
    /// idempotency key all become visible, or none of them do.
    pub fn append_entry_atomic(&self, entry: &LedgerEntry, wallet: &Wallet) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Entry
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(cf_entries, entry.entry_id.as_bytes(), bincode::serialize(entry)?);

        // 2. Wallet state
        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        batch.put_cf(cf_wallets, wallet.wallet_id.as_bytes(), bincode::serialize(wallet)?);

        // 3. Chain index: wallet_id || sequence -> entry_id
        let cf_chain = self.cf_handle(CF_WALLET_ENTRIES)?;
        let idx_chain = Self::index_key_wallet_entry(entry.wallet_id, entry.sequence);
        batch.put_cf(cf_chain, &idx_chain, entry.entry_id.as_bytes());

        // 4. Idempotency key for offline entries
        if let EntryOrigin::Offline { device_id, local_id } = &entry.origin {
            let cf_offline = self.cf_handle(CF_OFFLINE_KEYS)?;
            let idx_offline = Self::index_key_offline(device_id, local_id);
            batch.put_cf(cf_offline, &idx_offline, entry.entry_id.as_bytes());
        }

        self.write(batch)?;

        tracing::debug!(
            entry_id = %entry.entry_id,
            wallet_id = %entry.wallet_id,
            sequence = entry.sequence,
            balance_after = entry.balance_after,
            "Entry appended"
        );

        Ok(())
    }

    // Index key helpers

    fn index_key_wallet_entry(wallet_id: WalletId, sequence: u64) -> Vec<u8> {
        let mut key = wallet_id.as_bytes().to_vec();
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn index_key_owner(event_id: Uuid, owner_id: &OwnerId) -> Vec<u8> {
        let mut key = event_id.as_bytes().to_vec();
        key.extend_from_slice(owner_id.as_str().as_bytes());
        key
    }

    fn index_key_offline(device_id: &DeviceId, local_id: &str) -> Vec<u8> {
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart
        let device = device_id.as_str().as_bytes();
        let mut key = Vec::with_capacity(4 + device.len() + local_id.len());
        key.extend_from_slice(&(device.len() as u32).to_be_bytes());
        key.extend_from_slice(device);
        key.extend_from_slice(local_id.as_bytes());
        key
    }

    fn uuid_from_slice(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt index value: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryRefs, EntryStatus, TransactionType};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    fn test_entry(wallet: &Wallet, sequence: u64, origin: EntryOrigin) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::now_v7(),
            wallet_id: wallet.wallet_id,
            sequence,
            tx_type: TransactionType::TopUp,
            amount: 100,
            balance_before: sequence * 100,
            balance_after: (sequence + 1) * 100,
            refs: EntryRefs::default(),
            origin,
            created_at: Utc::now(),
            recorded_at: Utc::now(),
            status: EntryStatus::Completed,
        }
    }

    #[test]
    fn test_create_and_find_wallet() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let event_id = Uuid::now_v7();
        let wallet = Wallet::open(OwnerId::new("attendee-1"), event_id);
        storage.create_wallet(&wallet).unwrap();

        let found = storage
            .find_wallet_id(&OwnerId::new("attendee-1"), event_id)
            .unwrap();
        assert_eq!(found, Some(wallet.wallet_id));

        // Same owner at another event has no wallet yet
        let other = storage
            .find_wallet_id(&OwnerId::new("attendee-1"), Uuid::now_v7())
            .unwrap();
        assert_eq!(other, None);

        let retrieved = storage.get_wallet(wallet.wallet_id).unwrap();
        assert_eq!(retrieved.balance, 0);
    }

    #[test]
    fn test_missing_wallet() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let result = storage.get_wallet(WalletId::generate());
        assert!(matches!(result, Err(Error::WalletNotFound(_))));
    }

    #[test]
    fn test_atomic_append_and_chain_order() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let mut wallet = Wallet::open(OwnerId::new("attendee-2"), Uuid::now_v7());
        storage.create_wallet(&wallet).unwrap();

        // A second wallet whose entries must not leak into the first one's scan
        let neighbour = Wallet::open(OwnerId::new("attendee-3"), Uuid::now_v7());
        storage.create_wallet(&neighbour).unwrap();
        storage
            .append_entry_atomic(&test_entry(&neighbour, 0, EntryOrigin::Online), &neighbour)
            .unwrap();

        let mut ids = Vec::new();
        for sequence in 0..3 {
            let entry = test_entry(&wallet, sequence, EntryOrigin::Online);
            wallet.balance = entry.balance_after;
            wallet.entry_count = sequence + 1;
            wallet.last_entry_id = Some(entry.entry_id);
            storage.append_entry_atomic(&entry, &wallet).unwrap();
            ids.push(entry.entry_id);
        }

        let entries = storage.get_wallet_entries(wallet.wallet_id).unwrap();
        assert_eq!(entries.iter().map(|e| e.entry_id).collect::<Vec<_>>(), ids);

        let stored = storage.get_wallet(wallet.wallet_id).unwrap();
        assert_eq!(stored.balance, 300);
        assert_eq!(stored.last_entry_id, Some(ids[2]));
    }

    #[test]
    fn test_offline_key_scoped_by_device() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let wallet = Wallet::open(OwnerId::new("attendee-4"), Uuid::now_v7());
        storage.create_wallet(&wallet).unwrap();

        let origin = EntryOrigin::Offline {
            device_id: DeviceId::new("pos-1"),
            local_id: "tx-1".to_string(),
        };
        let entry = test_entry(&wallet, 0, origin);
        storage.append_entry_atomic(&entry, &wallet).unwrap();

        assert_eq!(
            storage.find_offline_entry_id(&DeviceId::new("pos-1"), "tx-1").unwrap(),
            Some(entry.entry_id)
        );
        assert_eq!(
            storage.find_offline_entry_id(&DeviceId::new("pos-2"), "tx-1").unwrap(),
            None
        );
        // Concatenation ambiguity: "pos-1" + "tx-1" vs "pos-1t" + "x-1"
        assert_eq!(
            storage.find_offline_entry_id(&DeviceId::new("pos-1t"), "x-1").unwrap(),
            None
        );
    }
}
