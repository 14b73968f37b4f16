//! Per-transaction validation pipeline
//!
//! Checks run in a fixed order and the first failure decides the outcome:
//!
//! 1. Signature
//! 2. Age (`now - event_time` against the configured maximum)
//! 3. Idempotency key (device, local id)
//! 4. Wallet exists at the batch's event
//! 5. Wallet active
//! 6. Balance covers a debit
//! 7. Apply through the wallet writer
//!
//! Steps 3 to 6 read committed state ahead of the writer and are advisory;
//! the writer repeats them atomically with the mutation, so a race between
//! the read and the apply still ends in exactly one deterministic outcome.

use crate::{
    auth::SignatureAuthenticator,
    types::{ConflictReason, OfflineTransaction, SuccessRecord, TransactionOutcome},
    Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;
use wallet_ledger::{ApplyRequest, DeviceId, EntryOrigin, Ledger};

/// Source of the sync time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Validation pipeline
#[derive(Debug)]
pub struct ValidationPipeline {
    authenticator: SignatureAuthenticator,
    ledger: Arc<Ledger>,
    max_age: chrono::Duration,
}

impl ValidationPipeline {
    /// Create pipeline
    pub fn new(
        authenticator: SignatureAuthenticator,
        ledger: Arc<Ledger>,
        max_age: chrono::Duration,
    ) -> Self {
        Self {
            authenticator,
            ledger,
            max_age,
        }
    }

    /// Run one transaction through every check and apply it if all pass
    ///
    /// Conflicts are returned as outcomes; `Err` is reserved for failures
    /// that say nothing about the transaction itself (storage, writer).
    pub async fn process(
        &self,
        device_id: &DeviceId,
        event_id: Uuid,
        tx: &OfflineTransaction,
        now: DateTime<Utc>,
    ) -> Result<TransactionOutcome> {
        let outcome = self.run_checks(device_id, event_id, tx, now).await?;

        match &outcome {
            TransactionOutcome::Applied(success) => debug!(
                device_id = %device_id,
                local_id = %tx.local_id,
                entry_id = %success.server_entry_id,
                duplicate = success.duplicate,
                "Offline transaction applied"
            ),
            TransactionOutcome::Conflict(conflict) => warn!(
                device_id = %device_id,
                local_id = %tx.local_id,
                wallet_id = %tx.wallet_id,
                reason = %conflict.reason,
                "Offline transaction rejected: {}",
                conflict.message
            ),
        }

        Ok(outcome)
    }

    async fn run_checks(
        &self,
        device_id: &DeviceId,
        event_id: Uuid,
        tx: &OfflineTransaction,
        now: DateTime<Utc>,
    ) -> Result<TransactionOutcome> {
        if !self.authenticator.verify(tx) {
            return Ok(TransactionOutcome::conflict(
                &tx.local_id,
                ConflictReason::InvalidSignature,
                "Signature does not match transaction contents",
            ));
        }

        // The signed instant, not any finer digits the device sent
        let event_time = SignatureAuthenticator::canonical_time(tx.event_time);

        // Future event times pass: only staleness is bounded
        let age = now.signed_duration_since(event_time);
        if age > self.max_age {
            return Ok(TransactionOutcome::conflict(
                &tx.local_id,
                ConflictReason::TransactionTooOld,
                format!(
                    "Transaction is {}s old, maximum is {}s",
                    age.num_seconds(),
                    self.max_age.num_seconds()
                ),
            ));
        }

        if let Some(entry) = self.ledger.find_offline_entry(device_id, &tx.local_id)? {
            return Ok(TransactionOutcome::Applied(SuccessRecord {
                local_id: tx.local_id.clone(),
                server_entry_id: entry.entry_id,
                duplicate: true,
            }));
        }

        let wallet = match self.ledger.get_wallet(tx.wallet_id) {
            Ok(wallet) => wallet,
            Err(wallet_ledger::Error::WalletNotFound(_)) => {
                return Ok(TransactionOutcome::conflict(
                    &tx.local_id,
                    ConflictReason::WalletNotFound,
                    format!("Wallet {} not found", tx.wallet_id),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if wallet.event_id != event_id {
            return Ok(TransactionOutcome::conflict(
                &tx.local_id,
                ConflictReason::WalletNotFound,
                format!("Wallet {} not found at event {}", tx.wallet_id, event_id),
            ));
        }

        if !wallet.is_active() {
            return Ok(TransactionOutcome::conflict(
                &tx.local_id,
                ConflictReason::WalletNotActive,
                format!("Wallet {} is not active", tx.wallet_id),
            ));
        }

        if tx.tx_type.is_debit() && wallet.balance < tx.amount {
            return Ok(insufficient(&tx.local_id, wallet.balance, tx.amount));
        }

        let request = ApplyRequest {
            wallet_id: tx.wallet_id,
            event_id: Some(event_id),
            tx_type: tx.tx_type,
            amount: tx.amount,
            event_time,
            refs: tx.refs(),
            origin: EntryOrigin::Offline {
                device_id: device_id.clone(),
                local_id: tx.local_id.clone(),
            },
        };

        match self.ledger.apply_transaction(request).await {
            Ok(applied) => Ok(TransactionOutcome::Applied(SuccessRecord {
                local_id: tx.local_id.clone(),
                server_entry_id: applied.entry_id,
                duplicate: applied.duplicate,
            })),
            Err(wallet_ledger::Error::InsufficientBalance {
                available,
                required,
                ..
            }) => Ok(insufficient(&tx.local_id, available, required)),
            Err(e) => match ConflictReason::from_ledger_error(&e) {
                Some(reason) => Ok(TransactionOutcome::conflict(&tx.local_id, reason, e.to_string())),
                None => Err(e.into()),
            },
        }
    }
}

fn insufficient(local_id: &str, available: u64, required: u64) -> TransactionOutcome {
    TransactionOutcome::conflict(
        local_id,
        ConflictReason::InsufficientBalance,
        format!("Insufficient balance: available {}, required {}", available, required),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SigningSecret;
    use chrono::SubsecRound;
    use tempfile::TempDir;
    use uuid::Uuid;
    use wallet_ledger::{EntryRefs, OwnerId, TransactionType, Wallet, WalletId, WalletStatus};

    struct Harness {
        pipeline: ValidationPipeline,
        ledger: Arc<Ledger>,
        auth: SignatureAuthenticator,
        _temp: TempDir,
    }

    async fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let mut config = wallet_ledger::Config::default();
        config.data_dir = temp.path().to_path_buf();
        config.rocksdb.sync_writes = false;

        let ledger = Arc::new(Ledger::open(config).await.unwrap());
        let auth = SignatureAuthenticator::new(SigningSecret::from_bytes(vec![3u8; 32]).unwrap()).unwrap();
        let pipeline = ValidationPipeline::new(auth.clone(), ledger.clone(), chrono::Duration::hours(24));

        Harness {
            pipeline,
            ledger,
            auth,
            _temp: temp,
        }
    }

    async fn funded_wallet(ledger: &Ledger, balance: u64) -> Wallet {
        let wallet = ledger
            .get_or_create_wallet(&OwnerId::new(Uuid::now_v7().to_string()), Uuid::now_v7())
            .unwrap();
        if balance > 0 {
            ledger
                .apply_online(wallet.wallet_id, TransactionType::TopUp, balance, EntryRefs::default())
                .await
                .unwrap();
        }
        wallet
    }

    fn signed(
        auth: &SignatureAuthenticator,
        local_id: &str,
        wallet_id: WalletId,
        tx_type: TransactionType,
        amount: u64,
        event_time: DateTime<Utc>,
    ) -> OfflineTransaction {
        OfflineTransaction {
            local_id: local_id.to_string(),
            tx_type,
            amount,
            wallet_id,
            vendor_id: None,
            staff_id: None,
            product_id: None,
            signature: auth.sign(local_id, wallet_id, amount, tx_type, event_time),
            event_time,
        }
    }

    fn reason(outcome: &TransactionOutcome) -> Option<ConflictReason> {
        match outcome {
            TransactionOutcome::Conflict(c) => Some(c.reason),
            TransactionOutcome::Applied(_) => None,
        }
    }

    #[tokio::test]
    async fn test_applies_valid_purchase() {
        let h = harness().await;
        let wallet = funded_wallet(&h.ledger, 1_000).await;
        let device = DeviceId::new("pos-1");
        let now = Utc::now();

        let tx = signed(&h.auth, "L1", wallet.wallet_id, TransactionType::Purchase, 400, now);
        let outcome = h.pipeline.process(&device, wallet.event_id, &tx, now).await.unwrap();

        match outcome {
            TransactionOutcome::Applied(s) => {
                assert!(!s.duplicate);
                let entry = h.ledger.get_entry(s.server_entry_id).unwrap();
                assert_eq!(entry.balance_after, 600);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let again = h.pipeline.process(&device, wallet.event_id, &tx, now).await.unwrap();
        assert!(matches!(again, TransactionOutcome::Applied(ref s) if s.duplicate));
        assert_eq!(h.ledger.get_wallet(wallet.wallet_id).unwrap().balance, 600);
    }

    #[tokio::test]
    async fn test_signature_checked_before_balance() {
        let h = harness().await;
        let wallet = funded_wallet(&h.ledger, 100).await;
        let now = Utc::now();

        let mut tx = signed(&h.auth, "L1", wallet.wallet_id, TransactionType::Purchase, 50, now);
        tx.amount = 5_000;

        let outcome = h
            .pipeline
            .process(&DeviceId::new("pos-1"), wallet.event_id, &tx, now)
            .await
            .unwrap();
        assert_eq!(reason(&outcome), Some(ConflictReason::InvalidSignature));
    }

    #[tokio::test]
    async fn test_age_checked_before_balance() {
        let h = harness().await;
        let wallet = funded_wallet(&h.ledger, 0).await;
        let device = DeviceId::new("pos-1");
        let now = Utc::now();
        let stale = now - chrono::Duration::hours(25);

        let tx = signed(&h.auth, "L1", wallet.wallet_id, TransactionType::Purchase, 50, stale);
        let outcome = h.pipeline.process(&device, wallet.event_id, &tx, now).await.unwrap();
        assert_eq!(reason(&outcome), Some(ConflictReason::TransactionTooOld));

        let future = now + chrono::Duration::hours(2);
        let tx = signed(&h.auth, "L2", wallet.wallet_id, TransactionType::TopUp, 50, future);
        let outcome = h.pipeline.process(&device, wallet.event_id, &tx, now).await.unwrap();
        assert_eq!(reason(&outcome), None);
    }

    #[tokio::test]
    async fn test_wallet_conflicts() {
        let h = harness().await;
        let now = Utc::now();
        let device = DeviceId::new("pos-1");

        let tx = signed(&h.auth, "L1", WalletId::generate(), TransactionType::TopUp, 10, now);
        let outcome = h.pipeline.process(&device, Uuid::now_v7(), &tx, now).await.unwrap();
        assert_eq!(reason(&outcome), Some(ConflictReason::WalletNotFound));

        let wallet = funded_wallet(&h.ledger, 500).await;
        h.ledger
            .set_wallet_status(wallet.wallet_id, WalletStatus::Frozen)
            .await
            .unwrap();
        let tx = signed(&h.auth, "L2", wallet.wallet_id, TransactionType::Purchase, 10, now);
        let outcome = h.pipeline.process(&device, wallet.event_id, &tx, now).await.unwrap();
        assert_eq!(reason(&outcome), Some(ConflictReason::WalletNotActive));
    }

    #[tokio::test]
    async fn test_wallet_of_other_event_not_found() {
        let h = harness().await;
        let wallet = funded_wallet(&h.ledger, 500).await;
        let now = Utc::now();

        let tx = signed(&h.auth, "L1", wallet.wallet_id, TransactionType::Purchase, 100, now);
        let outcome = h
            .pipeline
            .process(&DeviceId::new("pos-1"), Uuid::now_v7(), &tx, now)
            .await
            .unwrap();

        assert_eq!(reason(&outcome), Some(ConflictReason::WalletNotFound));
        assert_eq!(h.ledger.get_wallet(wallet.wallet_id).unwrap().balance, 500);
        assert!(h
            .ledger
            .find_offline_entry(&DeviceId::new("pos-1"), "L1")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insufficient_balance_message() {
        let h = harness().await;
        let wallet = funded_wallet(&h.ledger, 300).await;
        let now = Utc::now();

        let tx = signed(&h.auth, "L1", wallet.wallet_id, TransactionType::Purchase, 500, now);
        match h
            .pipeline
            .process(&DeviceId::new("pos-1"), wallet.event_id, &tx, now)
            .await
            .unwrap()
        {
            TransactionOutcome::Conflict(c) => {
                assert_eq!(c.reason, ConflictReason::InsufficientBalance);
                assert!(c.message.contains("300"));
                assert!(c.message.contains("500"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(h.ledger.get_wallet(wallet.wallet_id).unwrap().balance, 300);
    }

    #[tokio::test]
    async fn test_stored_time_is_the_signed_time() {
        let h = harness().await;
        let wallet = funded_wallet(&h.ledger, 0).await;
        let signed_at = Utc::now().trunc_subsecs(3) - chrono::Duration::minutes(5);

        let mut tx = signed(&h.auth, "L1", wallet.wallet_id, TransactionType::TopUp, 70, signed_at);
        tx.event_time = signed_at + chrono::Duration::microseconds(750);

        let outcome = h
            .pipeline
            .process(&DeviceId::new("pos-1"), wallet.event_id, &tx, Utc::now())
            .await
            .unwrap();
        let entry_id = match outcome {
            TransactionOutcome::Applied(s) => s.server_entry_id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert_eq!(h.ledger.get_entry(entry_id).unwrap().created_at, signed_at);
    }

    #[test]
    fn test_fixed_clock() {
        let instant = Utc::now();
        assert_eq!(FixedClock(instant).now(), instant);
    }
}
