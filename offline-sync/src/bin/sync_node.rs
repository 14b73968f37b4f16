//! Sync Node Binary
//!
//! Opens the sync engine, finishes batches an earlier run left pending, then
//! submits every JSON batch file given on the command line and prints each
//! result. Without files it stays up until interrupted.

use anyhow::Context;
use offline_sync::{Config, SubmitBatchRequest, SyncEngine};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::var("SYNC_CONFIG") {
        Ok(path) => {
            let mut config = Config::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            config.apply_env()?;
            config
        }
        Err(_) => Config::from_env()?,
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (json, plain) = if config.log_json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();

    info!(
        "Starting {} v{}",
        config.service_name, config.service_version
    );

    let engine = SyncEngine::open(config)
        .await
        .context("Failed to open sync engine")?;

    let resumed = engine.resume_pending().await?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "Finished batches left pending");
    }

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        info!("No batch files given, waiting for shutdown signal");
        signal::ctrl_c().await?;
    }

    for path in &files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path))?;
        let request: SubmitBatchRequest = serde_json::from_str(&content)
            .with_context(|| format!("Malformed batch file {}", path))?;

        let result = engine.submit(request).await?;
        if result.failed_count > 0 {
            warn!(batch_id = %result.batch_id, conflicts = result.failed_count, "Batch had conflicts");
        }

        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    engine.shutdown().await?;
    info!("Sync node stopped");

    Ok(())
}
