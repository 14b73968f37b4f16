//! Offline transaction authentication
//!
//! Devices sign each transaction at creation time with a shared secret:
//!
//! ```text
//! HMAC-SHA256(secret, local_id | wallet_id | amount | TYPE | event_time)
//! ```
//!
//! `event_time` is RFC 3339 UTC with millisecond precision, so every field
//! has one canonical rendering. The signature travels as lowercase hex.
//! A valid signature proves the contents are unchanged since signing; it
//! says nothing about whether the transaction can still be applied.

use crate::{types::OfflineTransaction, Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use wallet_ledger::{TransactionType, WalletId};

type HmacSha256 = Hmac<Sha256>;

/// Shared secret provisioned to trusted devices
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    /// Minimum secret length in bytes
    pub const MIN_LEN: usize = 16;

    /// Generate a new random 32-byte secret
    pub fn generate() -> Self {
        Self(rand::random::<[u8; 32]>().to_vec())
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            return Err(Error::InvalidSecret(format!(
                "Secret must be at least {} bytes, got {}",
                Self::MIN_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::InvalidSecret(format!("Secret is not valid hex: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSecret(<{} bytes redacted>)", self.0.len())
    }
}

impl TryFrom<String> for SigningSecret {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<SigningSecret> for String {
    fn from(secret: SigningSecret) -> Self {
        secret.to_hex()
    }
}

/// Signs and verifies offline transactions
#[derive(Clone)]
pub struct SignatureAuthenticator {
    keyed: HmacSha256,
}

impl std::fmt::Debug for SignatureAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureAuthenticator").finish_non_exhaustive()
    }
}

impl SignatureAuthenticator {
    /// Create authenticator keyed with a secret
    pub fn new(secret: SigningSecret) -> Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::InvalidSecret(format!("Secret rejected by HMAC: {}", e)))?;
        Ok(Self { keyed })
    }

    /// Event time as covered by the signature (millisecond precision)
    pub fn canonical_time(event_time: DateTime<Utc>) -> DateTime<Utc> {
        event_time.trunc_subsecs(3)
    }

    /// Canonical bytes covered by the signature
    pub fn canonical_message(
        local_id: &str,
        wallet_id: WalletId,
        amount: u64,
        tx_type: TransactionType,
        event_time: DateTime<Utc>,
    ) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}",
            local_id,
            wallet_id,
            amount,
            tx_type.code(),
            event_time.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
        .into_bytes()
    }

    /// Sign transaction fields (what a device does at creation time)
    pub fn sign(
        &self,
        local_id: &str,
        wallet_id: WalletId,
        amount: u64,
        tx_type: TransactionType,
        event_time: DateTime<Utc>,
    ) -> String {
        let mut mac = self.keyed.clone();
        mac.update(&Self::canonical_message(local_id, wallet_id, amount, tx_type, event_time));
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recompute the code and compare in constant time
    pub fn verify(&self, tx: &OfflineTransaction) -> bool {
        let submitted = match hex::decode(tx.signature.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut mac = self.keyed.clone();
        mac.update(&Self::canonical_message(
            &tx.local_id,
            tx.wallet_id,
            tx.amount,
            tx.tx_type,
            tx.event_time,
        ));
        mac.verify_slice(&submitted).is_ok()
    }
}
