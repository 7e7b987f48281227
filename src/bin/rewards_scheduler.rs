//! rewards-scheduler: periodic escrow release
//!
//! Scans for escrows past their auto-release deadline and distributes each
//! one, logging per-scan counts. Stops cleanly on Ctrl-C.
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: sqlite
//!   sqlite:
//!     path: data/rewards.db
//!
//! scheduler:
//!   interval_secs: 60
//!   max_per_run: 500
//! ```

use tracing::{info, warn};

use rewards_ledger::config::Config;
use rewards_ledger::utils::bootstrap::{init_tracing, parse_config_path};
use rewards_ledger::RewardsEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref())?;
    info!(
        storage = ?config.storage.storage_type,
        interval_secs = config.scheduler.interval_secs,
        "rewards-scheduler starting"
    );

    let engine = RewardsEngine::from_config(config).await?;
    let scheduler = engine.scheduler();

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("rewards-scheduler stopped");
    Ok(())
}
