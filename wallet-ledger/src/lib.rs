//! Wallet Ledger
//!
//! Append-only ledger of stored-value wallet transactions for cashless events.
//!
//! # Architecture
//!
//! - **Append-only**: Every balance change is a `LedgerEntry`; wallets only move by entries
//! - **Single Writer per Wallet**: One actor per wallet serializes check-and-apply
//! - **Atomic Commit**: Entry, wallet state and indices land in one RocksDB write batch
//! - **Idempotent Offline Applies**: (device, local id) maps to at most one entry
//!
//! # Invariants
//!
//! - Non-negative balances: a debit that would go below zero is refused
//! - Chain continuity: `balance_after` of entry n == `balance_before` of entry n+1
//! - Exactly-once: an offline transaction is applied at most once per device

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Applied, ApplyRequest, DeviceId, EntryOrigin, EntryRefs, EntryStatus, LedgerEntry, OwnerId,
    TransactionType, Wallet, WalletId, WalletStatus,
};
pub use storage::Storage;
pub use ledger::Ledger;
pub use config::Config;
