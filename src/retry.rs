//! Backoff with jitter for store calls that fail transiently.
//!
//! Only errors that report [`Error::is_transient`] are retried. NotFound,
//! Conflict, validation failures and cancellation pass straight through so
//! the orchestrator sees them on the first attempt.
//!
//! # Example
//!
//! ```ignore
//! use converge::retry::{retry_transient, RetryConfig};
//!
//! let doc = retry_transient(&RetryConfig::default(), "get", &cancel, || {
//!     store.get(&reference, &cancel)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{Error, Result};

/// Backoff settings for transient store failures
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first (0 = until cancelled)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default backoff with a different attempt limit
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Retry until the operation succeeds, fails permanently or is cancelled
    pub fn until_cancelled() -> Self {
        Self::with_max_attempts(0)
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// Jitter scales each delay by 0.5x to 1.5x. Cancellation during a backoff
/// sleep returns [`Error::Cancelled`] immediately.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "store operation failed after max retries"
            );
            return Err(err);
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %err,
            delay_ms = jittered_delay.as_millis() as u64,
            "transient store failure, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation_name)),
            _ = tokio::time::sleep(jittered_delay) => {}
        }

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
