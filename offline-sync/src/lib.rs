//! Offline Sync Engine
//!
//! Reconciles transactions recorded by disconnected points of sale into the
//! wallet ledger when the devices come back online.
//!
//! # Architecture
//!
//! A device submits everything it recorded while offline as one batch:
//!
//! 1. **Accept**: Persist the batch as pending in the batch store
//! 2. **Validate**: Run each transaction, in order, through the pipeline
//! 3. **Apply**: Passing transactions go through the wallet's single writer
//! 4. **Record**: Persist per-transaction outcomes and the batch status
//!
//! # Conflict Resolution
//!
//! The server is the source of truth. A transaction the server cannot honour
//! becomes a conflict with exactly one reason, the earliest in pipeline order:
//!
//! - `INVALID_SIGNATURE` - contents changed after the device signed them
//! - `TRANSACTION_TOO_OLD` - event time older than the configured window
//! - `WALLET_NOT_FOUND` - no such wallet
//! - `WALLET_NOT_ACTIVE` - wallet frozen
//! - `INSUFFICIENT_BALANCE` - server-side balance does not cover the debit
//!
//! # Example
//!
//! ```no_run
//! use offline_sync::{Config, SyncEngine};
//! use wallet_ledger::DeviceId;
//!
//! #[tokio::main]
//! async fn main() -> offline_sync::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = SyncEngine::open(config).await?;
//!
//!     let result = engine
//!         .submit_batch(DeviceId::new("pos-12"), uuid::Uuid::now_v7(), vec![])
//!         .await?;
//!     println!("{:?}: {} ok, {} conflicts",
//!              result.status, result.success_count, result.failed_count);
//!
//!     engine.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod auth;
pub mod pipeline;
pub mod store;
pub mod error;
pub mod config;
pub mod metrics;
pub mod engine;

// Re-exports
pub use error::{Error, Result};
pub use types::*;
pub use auth::{SignatureAuthenticator, SigningSecret};
pub use pipeline::{Clock, FixedClock, SystemClock, ValidationPipeline};
pub use store::BatchStore;
pub use config::Config;
pub use engine::SyncEngine;
