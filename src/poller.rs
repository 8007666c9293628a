//! Bounded condition polling
//!
//! [`poll_conditions`] re-fetches a document's status conditions every
//! `interval` until the expected set is satisfied or `timeout` elapses.
//! Timing out is an outcome, not an error: the caller decides whether
//! [`PollOutcome::NotReady`] is fatal. Store errors that are not transient
//! end the poll immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::condition::{Condition, ConditionSnapshot, ExpectedConditionSet};
use crate::{Error, Result};

/// Default time between fetches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time to wait for conditions
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Pacing and bounds for one poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between fetches
    pub interval: Duration,
    /// Total time before giving up
    pub timeout: Duration,
    /// Treat NotFound as "not ready yet" instead of a fetch failure
    pub tolerate_not_found: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            tolerate_not_found: false,
        }
    }
}

impl PollConfig {
    /// Poll every `interval` for at most `timeout`
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            tolerate_not_found: false,
        }
    }

    /// Keep polling while the object does not exist yet
    pub fn tolerating_not_found(mut self) -> Self {
        self.tolerate_not_found = true;
        self
    }
}

/// How a poll ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The expected conditions held
    Ready {
        /// Number of fetches made
        attempts: u32,
        /// Time from the first fetch to the match
        elapsed: Duration,
    },
    /// The deadline passed first
    NotReady {
        /// Conditions seen on the last successful fetch
        last: ConditionSnapshot,
        /// Number of fetches made
        attempts: u32,
        /// Time from the first fetch to giving up
        elapsed: Duration,
    },
}

impl PollOutcome {
    /// Whether the expected conditions were met
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    /// Number of fetches made
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::NotReady { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Time spent polling
    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Ready { elapsed, .. } | PollOutcome::NotReady { elapsed, .. } => *elapsed,
        }
    }
}

/// Poll `fetch` until `expected` is satisfied, the timeout elapses, or a
/// non-transient fetch error occurs.
///
/// Returns within `[timeout, timeout + interval)`: the pacing sleep never
/// crosses the deadline and an in-flight fetch is cut off at it.
pub async fn poll_conditions<F, Fut>(
    mut fetch: F,
    expected: &ExpectedConditionSet,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<Condition>>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut attempts = 0u32;
    let mut last = ConditionSnapshot::default();

    loop {
        attempts += 1;

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("poll")),
            fetched = tokio::time::timeout_at(deadline, fetch()) => fetched,
        };

        match fetched {
            Ok(Ok(conditions)) => {
                if expected.is_satisfied_by(&conditions) {
                    return Ok(PollOutcome::Ready {
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                trace!(
                    attempt = attempts,
                    expected = %expected,
                    unmet = expected.unmet(&conditions).len(),
                    "conditions not met yet"
                );
                last = ConditionSnapshot::new(conditions);
            }
            Ok(Err(e)) if e.is_transient() => {
                debug!(attempt = attempts, error = %e, "transient fetch failure, resampling");
            }
            Ok(Err(e)) if e.is_not_found() && config.tolerate_not_found => {
                trace!(attempt = attempts, "object not found yet");
            }
            Ok(Err(e)) => return Err(e),
            // fetch still in flight at the deadline
            Err(_) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::NotReady {
                last,
                attempts,
                elapsed: now - start,
            });
        }

        let pause = config.interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled("poll")),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
