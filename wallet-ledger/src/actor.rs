//! Per-wallet writer actors
//!
//! Every balance mutation for a wallet goes through exactly one Tokio task:
//! - One writer per wallet makes read-check-write on the balance race-free
//! - Writers for different wallets run independently
//! - Async message passing with a bounded mailbox for backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Batch processors (many concurrent tasks)       │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ Ledger::apply_transaction
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │       DashMap<WalletId, WalletHandle> (Clone)         │
//! └──────────┬───────────────────────────┬───────────────┘
//!            │ mpsc (bounded)            │ mpsc (bounded)
//!            ▼                           ▼
//! ┌─────────────────────┐     ┌─────────────────────┐
//! │ WalletActor (W1)    │     │ WalletActor (W2)    │
//! │ dedup → status →    │     │        ...          │
//! │ balance → commit    │     │                     │
//! └──────────┬──────────┘     └──────────┬──────────┘
//!            └───────────┬───────────────┘
//!                        ▼
//!          Storage::append_entry_atomic()
//!            (one RocksDB WriteBatch)
//! ```

use crate::types::{Applied, ApplyRequest, EntryStatus, LedgerEntry, Wallet, WalletId, WalletStatus, EntryOrigin};
use crate::{config::WriterConfig, Error, Result, Storage};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to a wallet writer
#[derive(Debug)]
pub enum WalletMessage {
    /// Check and apply one transaction
    Apply {
        request: ApplyRequest,
        response: oneshot::Sender<Result<Applied>>,
    },

    /// Change wallet status
    SetStatus {
        status: WalletStatus,
        response: oneshot::Sender<Result<Wallet>>,
    },

    /// Stop the writer; acknowledged once its storage handle is released
    Shutdown { response: oneshot::Sender<()> },
}

/// Actor owning all writes to one wallet
pub struct WalletActor {
    /// Wallet this actor writes
    wallet_id: WalletId,

    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<WalletMessage>,

    /// Last committed wallet state; this actor is the only writer
    cached: Option<Wallet>,

    /// Stop after this long without messages
    idle_timeout: Option<Duration>,
}

impl std::fmt::Debug for WalletActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletActor")
            .field("wallet_id", &self.wallet_id)
            .field("cached", &self.cached.is_some())
            .finish()
    }
}

impl WalletActor {
    /// Create new actor
    pub fn new(
        wallet_id: WalletId,
        storage: Arc<Storage>,
        mailbox: mpsc::Receiver<WalletMessage>,
    ) -> Self {
        Self {
            wallet_id,
            storage,
            mailbox,
            cached: None,
            idle_timeout: None,
        }
    }

    /// Stop the actor once its mailbox stays empty for `idle`
    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Run the actor event loop until shutdown, idle timeout or all handles drop
    ///
    /// Returns the acknowledgement of an explicit shutdown; it must be sent
    /// only after the actor (and its storage handle) is dropped.
    pub async fn run(mut self) -> Option<oneshot::Sender<()>> {
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, self.mailbox.recv()).await {
                    Ok(msg) => msg,
                    Err(_) => return self.drain_and_stop().await,
                },
                None => self.mailbox.recv().await,
            };

            let Some(msg) = next else {
                tracing::debug!(wallet_id = %self.wallet_id, "Wallet writer handles dropped");
                return None;
            };

            if let Some(ack) = self.handle(msg) {
                tracing::debug!(wallet_id = %self.wallet_id, "Wallet writer stopped");
                return Some(ack);
            }
        }
    }

    /// Refuse new messages, then finish the ones already queued
    async fn drain_and_stop(&mut self) -> Option<oneshot::Sender<()>> {
        self.mailbox.close();
        while let Some(msg) = self.mailbox.recv().await {
            if let Some(ack) = self.handle(msg) {
                return Some(ack);
            }
        }

        tracing::debug!(wallet_id = %self.wallet_id, "Wallet writer idle, stopping");
        None
    }

    fn handle(&mut self, msg: WalletMessage) -> Option<oneshot::Sender<()>> {
        match msg {
            WalletMessage::Apply { request, response } => {
                let result = self.apply(request);
                if let Err(ref e) = result {
                    if !e.is_rejection() {
                        tracing::error!(wallet_id = %self.wallet_id, "Apply failed: {}", e);
                    }
                }
                let _ = response.send(result);
                None
            }

            WalletMessage::SetStatus { status, response } => {
                let _ = response.send(self.set_status(status));
                None
            }

            WalletMessage::Shutdown { response } => Some(response),
        }
    }

    /// Current wallet state; not cached when missing so a later create is seen
    fn wallet(&mut self) -> Result<Wallet> {
        if let Some(wallet) = &self.cached {
            return Ok(wallet.clone());
        }

        let wallet = self.storage.get_wallet(self.wallet_id)?;
        self.cached = Some(wallet.clone());
        Ok(wallet)
    }

    /// Atomic check-and-apply
    fn apply(&mut self, request: ApplyRequest) -> Result<Applied> {
        // 1. Already applied under the same idempotency key
        if let EntryOrigin::Offline { device_id, local_id } = &request.origin {
            if let Some(entry_id) = self.storage.find_offline_entry_id(device_id, local_id)? {
                let entry = self.storage.get_entry(entry_id)?;
                return Ok(Applied::duplicate_of(&entry));
            }
        }

        // 2. Existence (within the caller's event) and eligibility
        let wallet = self.wallet()?;
        if request.event_id.is_some_and(|event_id| event_id != wallet.event_id) {
            return Err(Error::WalletNotFound(wallet.wallet_id.to_string()));
        }
        if !wallet.is_active() {
            return Err(Error::WalletNotActive(wallet.wallet_id.to_string()));
        }

        // 3. Balance arithmetic against the authoritative state
        let balance_after = wallet.balance_after(request.tx_type, request.amount)?;

        let now = Utc::now();
        let entry = LedgerEntry {
            entry_id: Uuid::now_v7(),
            wallet_id: wallet.wallet_id,
            sequence: wallet.entry_count,
            tx_type: request.tx_type,
            amount: request.amount,
            balance_before: wallet.balance,
            balance_after,
            refs: request.refs,
            origin: request.origin,
            created_at: request.event_time,
            recorded_at: now,
            status: EntryStatus::Completed,
        };

        let mut updated = wallet;
        updated.balance = balance_after;
        updated.entry_count += 1;
        updated.last_entry_id = Some(entry.entry_id);
        updated.updated_at = now;

        // 4. Commit; on failure the cache still holds the previous state
        self.storage.append_entry_atomic(&entry, &updated)?;
        self.cached = Some(updated);

        Ok(Applied {
            entry_id: entry.entry_id,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            duplicate: false,
        })
    }

    fn set_status(&mut self, status: WalletStatus) -> Result<Wallet> {
        let mut updated = self.wallet()?;
        if updated.status == status {
            return Ok(updated);
        }

        updated.status = status;
        updated.updated_at = Utc::now();
        self.storage.put_wallet(&updated)?;
        self.cached = Some(updated.clone());

        tracing::info!(wallet_id = %self.wallet_id, status = ?status, "Wallet status changed");
        Ok(updated)
    }
}

/// Handle for sending messages to a wallet writer
#[derive(Clone, Debug)]
pub struct WalletHandle {
    wallet_id: WalletId,
    sender: mpsc::Sender<WalletMessage>,
}

impl WalletHandle {
    /// Create new handle
    pub fn new(wallet_id: WalletId, sender: mpsc::Sender<WalletMessage>) -> Self {
        Self { wallet_id, sender }
    }

    /// Whether the writer behind this handle has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Check and apply one transaction
    pub async fn apply(&self, request: ApplyRequest) -> Result<Applied> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WalletMessage::Apply {
                request,
                response: tx,
            })
            .await
            .map_err(|_| Error::WriterUnavailable(self.wallet_id.to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Change wallet status
    pub async fn set_status(&self, status: WalletStatus) -> Result<Wallet> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WalletMessage::SetStatus {
                status,
                response: tx,
            })
            .await
            .map_err(|_| Error::WriterUnavailable(self.wallet_id.to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(WalletMessage::Shutdown { response: tx })
            .await
            .map_err(|_| Error::WriterUnavailable(self.wallet_id.to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Wallet writer stopped without ack".to_string()))
    }
}

/// Spawn the writer for one wallet
///
/// `on_stop` runs once the actor has stopped for any reason, before a
/// shutdown is acknowledged.
pub fn spawn_wallet_actor<F>(
    wallet_id: WalletId,
    storage: Arc<Storage>,
    config: &WriterConfig,
    on_stop: F,
) -> WalletHandle
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let actor = WalletActor::new(wallet_id, storage, rx).with_idle_timeout(config.idle_timeout());

    tokio::spawn(async move {
        let ack = actor.run().await;
        on_stop();
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    });

    WalletHandle::new(wallet_id, tx)
}
