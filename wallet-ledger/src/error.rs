//! Error types for the wallet ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Wallet does not exist
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Wallet exists but is not accepting transactions
    #[error("Wallet not active: {0}")]
    WalletNotActive(String),

    /// Debit would take the balance below zero
    #[error("Insufficient balance in wallet {wallet_id}: available {available}, required {required}")]
    InsufficientBalance {
        /// Wallet that rejected the debit
        wallet_id: String,
        /// Balance at the time of the check
        available: u64,
        /// Amount the debit asked for
        required: u64,
    },

    /// Ledger entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Invariant violation (balance overflow, broken chain, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (reply lost, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Wallet writer stopped before the message was delivered; nothing was applied
    #[error("Wallet writer unavailable: {0}")]
    WriterUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the business rejections a caller can report per transaction.
    ///
    /// Everything else means the ledger itself could not do its job.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::WalletNotFound(_) | Error::WalletNotActive(_) | Error::InsufficientBalance { .. }
        )
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::WalletNotFound(_) => "wallet_not_found",
            Error::WalletNotActive(_) => "wallet_not_active",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::EntryNotFound(_) => "entry_not_found",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Concurrency(_) => "concurrency",
            Error::WriterUnavailable(_) => "writer_unavailable",
            Error::Config(_) => "config",
            Error::Metrics(_) => "metrics",
            Error::Io(_) => "io",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
