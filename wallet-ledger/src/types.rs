//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer minor currency units)
//! - A per-wallet chain where each entry starts at the balance the previous one ended at

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wallet identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(Uuid);

impl WalletId {
    /// Generate a new time-ordered wallet ID
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Raw 16 bytes, used for storage keys
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wallet owner (attendee) identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create new owner ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-of-sale device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create new device ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of balance-affecting transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TransactionType {
    /// Money loaded onto the wallet (card, online)
    TopUp = 1,
    /// Cash handed to staff and credited
    CashIn = 2,
    /// Sale at a vendor point of sale
    Purchase = 3,
    /// Money returned to the wallet
    Refund = 4,
}

impl TransactionType {
    /// Canonical code, also used in signed payloads
    pub fn code(&self) -> &'static str {
        match self {
            TransactionType::TopUp => "TOP_UP",
            TransactionType::CashIn => "CASH_IN",
            TransactionType::Purchase => "PURCHASE",
            TransactionType::Refund => "REFUND",
        }
    }

    /// Whether this type takes money out of the wallet
    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionType::Purchase)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum WalletStatus {
    /// Accepting transactions
    Active = 1,
    /// Blocked (lost wristband, fraud review)
    Frozen = 2,
}

/// Stored-value wallet, one per (owner, event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub wallet_id: WalletId,

    /// Owner of the wallet
    pub owner_id: OwnerId,

    /// Event the wallet belongs to
    pub event_id: Uuid,

    /// Current balance in minor units
    pub balance: u64,

    /// Current status
    pub status: WalletStatus,

    /// Number of entries applied so far (next entry sequence)
    pub entry_count: u64,

    /// Last applied entry (head of the chain)
    pub last_entry_id: Option<Uuid>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty active wallet
    pub fn open(owner_id: OwnerId, event_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            wallet_id: WalletId::generate(),
            owner_id,
            event_id,
            balance: 0,
            status: WalletStatus::Active,
            entry_count: 0,
            last_entry_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if wallet accepts transactions
    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Balance after applying `amount` of `tx_type`, without mutating.
    pub fn balance_after(&self, tx_type: TransactionType, amount: u64) -> crate::Result<u64> {
        if tx_type.is_debit() {
            self.balance
                .checked_sub(amount)
                .ok_or_else(|| crate::Error::InsufficientBalance {
                    wallet_id: self.wallet_id.to_string(),
                    available: self.balance,
                    required: amount,
                })
        } else {
            self.balance.checked_add(amount).ok_or_else(|| {
                crate::Error::InvariantViolation(format!(
                    "Balance overflow in wallet {}",
                    self.wallet_id
                ))
            })
        }
    }
}

/// Optional references attached to an entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRefs {
    /// Vendor that made the sale
    pub vendor_id: Option<String>,
    /// Staff member operating the point of sale
    pub staff_id: Option<String>,
    /// Product sold
    pub product_id: Option<String>,
}

/// Where an entry came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryOrigin {
    /// Applied directly by an online service
    Online,
    /// Synchronized from a disconnected device
    Offline {
        /// Submitting device
        device_id: DeviceId,
        /// Device-local idempotency key
        local_id: String,
    },
}

/// Entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum EntryStatus {
    /// Applied
    Completed = 1,
    /// Reversed by a later refund
    Refunded = 2,
}

/// Applied, immutable ledger record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7)
    pub entry_id: Uuid,

    /// Wallet this entry belongs to
    pub wallet_id: WalletId,

    /// Position in the wallet's chain (0-based)
    pub sequence: u64,

    /// Transaction type
    pub tx_type: TransactionType,

    /// Magnitude in minor units
    pub amount: u64,

    /// Balance before this entry
    pub balance_before: u64,

    /// Balance after this entry
    pub balance_after: u64,

    /// Vendor/staff/product references
    pub refs: EntryRefs,

    /// Online or offline origin
    pub origin: EntryOrigin,

    /// Original event time (client-reported for offline entries)
    pub created_at: DateTime<Utc>,

    /// Server time the entry was committed
    pub recorded_at: DateTime<Utc>,

    /// Entry status
    pub status: EntryStatus,
}

impl LedgerEntry {
    /// Signed effect on the balance
    pub fn signed_amount(&self) -> i128 {
        if self.tx_type.is_debit() {
            -(self.amount as i128)
        } else {
            self.amount as i128
        }
    }
}

/// Request to apply one transaction to a wallet
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    /// Target wallet
    pub wallet_id: WalletId,
    /// Event the caller operates at; a wallet of another event counts as missing
    pub event_id: Option<Uuid>,
    /// Transaction type
    pub tx_type: TransactionType,
    /// Magnitude in minor units
    pub amount: u64,
    /// Time the transaction happened
    pub event_time: DateTime<Utc>,
    /// Optional references
    pub refs: EntryRefs,
    /// Origin; offline origins are deduplicated by (device, local id)
    pub origin: EntryOrigin,
}

/// Result of a successful apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied {
    /// Entry that carries the effect
    pub entry_id: Uuid,
    /// Balance before the entry
    pub balance_before: u64,
    /// Balance after the entry
    pub balance_after: u64,
    /// The effect had already been applied by an earlier call
    pub duplicate: bool,
}

impl Applied {
    /// Describe an existing entry as a duplicate apply
    pub fn duplicate_of(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            duplicate: true,
        }
    }
}
