//! Periodic release of due escrows.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::distribution::{DistributionEngine, ReleaseOutcome};
use crate::error::{EngineError, Result};
use crate::escrow::EscrowManager;
use crate::model::{OnholdId, OnholdPoint};

/// Per-item counts for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    pub released: usize,
    pub not_eligible: usize,
    pub insufficient_float: usize,
    pub failed: usize,
}

impl ReleaseReport {
    pub fn attempted(&self) -> usize {
        self.released + self.not_eligible + self.insufficient_float + self.failed
    }
}

/// Finds due escrows and releases each one.
///
/// With `max_per_run` set, a scan that stops early remembers the last escrow
/// it attempted and the next scan resumes after it, wrapping around to the
/// start, so rows that keep failing cannot hold back the rest.
pub struct ReleaseScheduler {
    escrow: Arc<EscrowManager>,
    engine: Arc<DistributionEngine>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    cursor: Mutex<Option<OnholdId>>,
}

impl ReleaseScheduler {
    pub fn new(
        escrow: Arc<EscrowManager>,
        engine: Arc<DistributionEngine>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            escrow,
            engine,
            clock,
            config,
            cursor: Mutex::new(None),
        }
    }

    /// Release everything due at `now`, up to `max_per_run`.
    ///
    /// A failed release is counted and the scan moves on; only a failure to
    /// list due escrows aborts the scan.
    #[tracing::instrument(name = "scheduler.run_once", skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReleaseReport> {
        let mut cursor = self.cursor.lock().await;
        let start = *cursor;
        let mut report = ReleaseReport::default();

        // Rows after the cursor first, then wrap to those at or before it.
        let mut passes = vec![(start, None)];
        if start.is_some() {
            passes.push((None, start));
        }

        for (after, until) in passes {
            let mut due = self.escrow.ready_for_release_after(now, after);
            while let Some(onhold) = due.next().await {
                let onhold = onhold?;
                if until.is_some_and(|until| onhold.id > until) {
                    break;
                }
                self.release_one(&onhold, &mut report).await;
                if self
                    .config
                    .max_per_run
                    .is_some_and(|max| report.attempted() >= max)
                {
                    *cursor = Some(onhold.id);
                    log_report(&report);
                    return Ok(report);
                }
            }
        }

        *cursor = None;
        log_report(&report);
        Ok(report)
    }

    async fn release_one(&self, onhold: &OnholdPoint, report: &mut ReleaseReport) {
        match self.engine.release(onhold.id).await {
            Ok(ReleaseOutcome::Released(_)) => report.released += 1,
            Ok(ReleaseOutcome::NotEligible(_)) => report.not_eligible += 1,
            Ok(ReleaseOutcome::InsufficientFloat { .. }) => report.insufficient_float += 1,
            Err(e) => {
                match &e {
                    EngineError::Integrity(_) => {
                        error!(onhold_id = %onhold.id, error = %e, "Release failed")
                    }
                    _ => warn!(onhold_id = %onhold.id, error = %e, "Release failed"),
                }
                report.failed += 1;
            }
        }
    }

    /// Scan on the configured interval forever.
    pub async fn run(&self) {
        self.run_until(std::future::pending()).await
    }

    /// Scan on the configured interval until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = self.config.interval_secs, "Release scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Release scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(self.clock.now()).await {
                        error!(error = %e, "Release scan failed");
                    }
                }
            }
        }
    }
}

fn log_report(report: &ReleaseReport) {
    if report.attempted() > 0 {
        info!(
            released = report.released,
            not_eligible = report.not_eligible,
            insufficient_float = report.insufficient_float,
            failed = report.failed,
            "Release scan complete"
        );
    }
}
