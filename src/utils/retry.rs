//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter. Ledger operations are
//! retried as a whole when their optimistic-concurrency commit loses a race;
//! nothing else is retried.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use serde::Deserialize;
use tracing::{error, warn};

use crate::error::{EngineError, Result};

/// Backoff settings for version-conflict retries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First retry delay in milliseconds. Default: 10.
    pub min_delay_ms: u64,
    /// Delay cap in milliseconds. Default: 2000.
    pub max_delay_ms: u64,
    /// Maximum retries after the initial attempt. Default: 10.
    pub max_times: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 2_000,
            max_times: 10,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter built from these settings.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

/// Determines if an engine error is retryable (version conflict only).
///
/// Integrity, ledger and configuration errors will never succeed on retry.
pub fn is_retryable(error: &EngineError) -> bool {
    error.is_conflict()
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// backoff is exhausted.
///
/// Each attempt must re-read everything it depends on; a conflict means the
/// rows it read have moved.
pub async fn run_with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = config.backoff().build();
    let mut tries = 0u32;
    loop {
        match attempt().await {
            Err(e) if is_retryable(&e) => match delays.next() {
                Some(delay) => {
                    warn!(
                        operation,
                        attempt = tries,
                        error = %e,
                        "Version conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                None => {
                    error!(operation, error = %e, "Version conflict (retries exhausted)");
                    return Err(e);
                }
            },
            other => return other,
        }
    }
}
