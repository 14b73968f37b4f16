//! Configuration for the sync engine

use crate::auth::SigningSecret;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sync engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Wallet ledger configuration
    pub ledger: wallet_ledger::Config,

    /// Data directory for the batch store
    pub batch_data_dir: PathBuf,

    /// Validation pipeline configuration
    pub validation: ValidationConfig,

    /// Secret shared with signing devices (hex)
    pub signing_secret: Option<SigningSecret>,

    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "offline-sync".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger: wallet_ledger::Config::default(),
            batch_data_dir: PathBuf::from("./data/batches"),
            validation: ValidationConfig::default(),
            signing_secret: None,
            log_json: false,
        }
    }
}

/// Validation pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Oldest accepted event time, relative to sync time (default: 24 hours)
    pub max_transaction_age_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_transaction_age_secs: 24 * 60 * 60,
        }
    }
}

impl ValidationConfig {
    /// Maximum age as a chrono duration, saturating past what chrono can hold
    pub fn max_age(&self) -> chrono::Duration {
        i64::try_from(self.max_transaction_age_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            ledger: wallet_ledger::Config::from_env()?,
            ..Config::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(dir) = std::env::var("SYNC_BATCH_DATA_DIR") {
            self.batch_data_dir = PathBuf::from(dir);
        }

        if let Ok(secret) = std::env::var("SYNC_SIGNING_SECRET") {
            self.signing_secret = Some(SigningSecret::from_hex(&secret)?);
        }

        if let Ok(age) = std::env::var("SYNC_MAX_TX_AGE_SECS") {
            self.validation.max_transaction_age_secs = age
                .parse()
                .map_err(|e| crate::Error::Config(format!("SYNC_MAX_TX_AGE_SECS: {}", e)))?;
        }

        if let Ok(json) = std::env::var("SYNC_LOG_JSON") {
            self.log_json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Check the configuration can run an engine
    pub fn validate(&self) -> crate::Result<()> {
        if self.signing_secret.is_none() {
            return Err(crate::Error::Config(
                "signing_secret is required (set SYNC_SIGNING_SECRET)".to_string(),
            ));
        }

        if self.validation.max_transaction_age_secs == 0 {
            return Err(crate::Error::Config(
                "validation.max_transaction_age_secs must be positive".to_string(),
            ));
        }

        if self.batch_data_dir == self.ledger.data_dir {
            return Err(crate::Error::Config(
                "batch_data_dir and ledger.data_dir must differ".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "offline-sync");
        assert_eq!(config.validation.max_transaction_age_secs, 86_400);
        assert_eq!(config.validation.max_age(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_validate_requires_secret() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        config.signing_secret = Some(SigningSecret::generate());
        assert!(config.validate().is_ok());

        config.validation.max_transaction_age_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_max_age_saturates() {
        let mut validation = ValidationConfig::default();

        validation.max_transaction_age_secs = u64::MAX;
        assert_eq!(validation.max_age(), chrono::Duration::MAX);

        validation.max_transaction_age_secs = 10_000_000_000_000_000;
        assert_eq!(validation.max_age(), chrono::Duration::MAX);

        validation.max_transaction_age_secs = 9_223_372_036_854_775;
        assert_eq!(validation.max_age().num_seconds(), 9_223_372_036_854_775);
    }

    #[test]
    fn test_from_toml() {
        let config: Config = toml::from_str(
            r#"
            batch_data_dir = "/var/lib/sync/batches"
            signing_secret = "000102030405060708090a0b0c0d0e0f"

            [ledger]
            data_dir = "/var/lib/sync/ledger"

            [validation]
            max_transaction_age_secs = 3600
            "#,
        )
        .unwrap();

        assert_eq!(config.validation.max_age(), chrono::Duration::hours(1));
        assert_eq!(config.ledger.data_dir, PathBuf::from("/var/lib/sync/ledger"));
        assert!(config.signing_secret.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_secret_in_toml() {
        let result: Result<Config, _> = toml::from_str(r#"signing_secret = "xyz""#);
        assert!(result.is_err());
    }
}
