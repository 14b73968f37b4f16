//! Core types for the sync engine

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;
use wallet_ledger::{DeviceId, EntryRefs, TransactionType, WalletId};

/// Transaction created on a disconnected point of sale (untrusted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineTransaction {
    /// Device-local idempotency key
    pub local_id: String,

    /// Transaction type
    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    /// Magnitude in minor units
    pub amount: u64,

    /// Target wallet
    pub wallet_id: WalletId,

    /// Vendor that made the sale
    #[serde(default)]
    pub vendor_id: Option<String>,

    /// Staff member operating the device
    #[serde(default)]
    pub staff_id: Option<String>,

    /// Product sold
    #[serde(default)]
    pub product_id: Option<String>,

    /// Hex HMAC produced by the device at creation time
    pub signature: String,

    /// When the transaction happened, per the device clock (millisecond precision)
    #[serde(deserialize_with = "deserialize_event_time")]
    pub event_time: DateTime<Utc>,
}

// Devices sign milliseconds; finer digits would be unsigned yet stored
fn deserialize_event_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer).map(|t| t.trunc_subsecs(3))
}

impl OfflineTransaction {
    /// References carried onto the ledger entry
    pub fn refs(&self) -> EntryRefs {
        EntryRefs {
            vendor_id: self.vendor_id.clone(),
            staff_id: self.staff_id.clone(),
            product_id: self.product_id.clone(),
        }
    }
}

/// Why a transaction was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    /// Signature does not match the transaction contents
    InvalidSignature,
    /// Event time older than the configured maximum age
    TransactionTooOld,
    /// Target wallet does not exist
    WalletNotFound,
    /// Target wallet is frozen
    WalletNotActive,
    /// Debit exceeds the server-side balance
    InsufficientBalance,
}

impl ConflictReason {
    /// Canonical code
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::InvalidSignature => "INVALID_SIGNATURE",
            ConflictReason::TransactionTooOld => "TRANSACTION_TOO_OLD",
            ConflictReason::WalletNotFound => "WALLET_NOT_FOUND",
            ConflictReason::WalletNotActive => "WALLET_NOT_ACTIVE",
            ConflictReason::InsufficientBalance => "INSUFFICIENT_BALANCE",
        }
    }

    /// Map a ledger rejection to its conflict reason
    ///
    /// Returns `None` for ledger failures that are not about the transaction.
    pub fn from_ledger_error(err: &wallet_ledger::Error) -> Option<Self> {
        match err {
            wallet_ledger::Error::WalletNotFound(_) => Some(ConflictReason::WalletNotFound),
            wallet_ledger::Error::WalletNotActive(_) => Some(ConflictReason::WalletNotActive),
            wallet_ledger::Error::InsufficientBalance { .. } => {
                Some(ConflictReason::InsufficientBalance)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Transaction applied (now or by an earlier submission)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRecord {
    /// Device-local ID
    pub local_id: String,
    /// Ledger entry carrying the effect
    pub server_entry_id: Uuid,
    /// Answered from the idempotency index, nothing was applied this time
    pub duplicate: bool,
}

/// Transaction refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Device-local ID
    pub local_id: String,
    /// Single deterministic reason
    pub reason: ConflictReason,
    /// Human-readable explanation
    pub message: String,
}

/// Outcome of running one transaction through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Applied or already applied
    Applied(SuccessRecord),
    /// Refused
    Conflict(ConflictRecord),
}

impl TransactionOutcome {
    pub(crate) fn conflict(local_id: &str, reason: ConflictReason, message: impl Into<String>) -> Self {
        TransactionOutcome::Conflict(ConflictRecord {
            local_id: local_id.to_string(),
            reason,
            message: message.into(),
        })
    }
}

/// Batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum BatchStatus {
    /// Accepted, processing not finished
    Pending = 0,
    /// No conflicts
    Completed = 1,
    /// Some successes, some conflicts
    Partial = 2,
    /// Only conflicts
    Failed = 3,
}

impl BatchStatus {
    /// Derive the final status from outcome counts
    pub fn derive(success_count: usize, conflict_count: usize) -> Self {
        match (success_count, conflict_count) {
            (_, 0) => BatchStatus::Completed,
            (0, _) => BatchStatus::Failed,
            _ => BatchStatus::Partial,
        }
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Completed => "completed",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
        }
    }
}

/// Batch of offline transactions submitted by one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncBatch {
    /// Batch ID (UUIDv7)
    pub batch_id: Uuid,

    /// Submitting device
    pub device_id: DeviceId,

    /// Event the device operates at
    pub event_id: Uuid,

    /// Transactions in submission order
    pub transactions: Vec<OfflineTransaction>,

    /// Current status
    pub status: BatchStatus,

    /// Content fingerprint (hex BLAKE3)
    pub fingerprint: String,

    /// Submitted timestamp
    pub submitted_at: DateTime<Utc>,

    /// Processing finished timestamp
    pub processed_at: Option<DateTime<Utc>>,

    /// Applied transactions
    pub successes: Vec<SuccessRecord>,

    /// Refused transactions
    pub conflicts: Vec<ConflictRecord>,
}

impl SyncBatch {
    /// Accept a new batch
    pub fn new(device_id: DeviceId, event_id: Uuid, transactions: Vec<OfflineTransaction>) -> Self {
        let fingerprint = Self::fingerprint_of(&device_id, event_id, &transactions);
        Self {
            batch_id: Uuid::now_v7(),
            device_id,
            event_id,
            transactions,
            status: BatchStatus::Pending,
            fingerprint,
            submitted_at: Utc::now(),
            processed_at: None,
            successes: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Fingerprint identifying identical resubmissions
    ///
    /// Covers device, event and the ordered (local id, signature) pairs; the
    /// signature already binds wallet, amount, type and event time.
    pub fn fingerprint_of(
        device_id: &DeviceId,
        event_id: Uuid,
        transactions: &[OfflineTransaction],
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        update_field(&mut hasher, device_id.as_str().as_bytes());
        hasher.update(event_id.as_bytes());
        hasher.update(&(transactions.len() as u64).to_be_bytes());
        for tx in transactions {
            update_field(&mut hasher, tx.local_id.as_bytes());
            update_field(&mut hasher, tx.signature.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Whether processing finished
    pub fn is_processed(&self) -> bool {
        self.status != BatchStatus::Pending
    }

    /// Record outcomes and derive the final status
    pub fn finish(&mut self, outcomes: Vec<TransactionOutcome>) {
        self.successes.clear();
        self.conflicts.clear();

        for outcome in outcomes {
            match outcome {
                TransactionOutcome::Applied(success) => self.successes.push(success),
                TransactionOutcome::Conflict(conflict) => self.conflicts.push(conflict),
            }
        }

        self.status = BatchStatus::derive(self.successes.len(), self.conflicts.len());
        self.processed_at = Some(Utc::now());
    }

    /// Summary returned to the submitting device
    pub fn result(&self) -> BatchResult {
        BatchResult {
            batch_id: self.batch_id,
            status: self.status,
            total_count: self.transactions.len(),
            success_count: self.successes.len(),
            failed_count: self.conflicts.len(),
            successes: self.successes.clone(),
            conflicts: self.conflicts.clone(),
        }
    }
}

fn update_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Result of `SubmitBatch`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Batch ID
    pub batch_id: Uuid,
    /// Final status
    pub status: BatchStatus,
    /// Transactions in the batch
    pub total_count: usize,
    /// Applied (including duplicates)
    pub success_count: usize,
    /// Refused
    pub failed_count: usize,
    /// Per-transaction successes
    pub successes: Vec<SuccessRecord>,
    /// Per-transaction conflicts
    pub conflicts: Vec<ConflictRecord>,
}

/// Submission envelope as received from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBatchRequest {
    /// Submitting device
    pub device_id: DeviceId,
    /// Event the device operates at
    pub event_id: Uuid,
    /// Transactions in submission order
    pub transactions: Vec<OfflineTransaction>,
}
