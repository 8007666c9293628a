//! Logging initialization for harness binaries and tests
//!
//! Flow progress is reported through `tracing` events: lifecycle at info,
//! store calls at debug, poll misses at trace. [`init_logging`] installs a
//! `tracing-subscriber` registry with an `EnvFilter` (from `RUST_LOG`, or a
//! default that keeps kube-rs quiet) and either human-readable or JSON output.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,converge=debug,kube=info,tower=warn,hyper=warn";

/// Environment variable selecting JSON output (`1` or `true`)
pub const ENV_LOG_JSON: &str = "CONVERGE_LOG_JSON";

/// Output format for log events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact single-line text, suited to test output
    #[default]
    Text,
    /// JSON objects, suited to CI log collectors
    Json,
}

impl LogFormat {
    /// `Json` when [`ENV_LOG_JSON`] is set to `1` or `true`
    pub fn from_env() -> Self {
        match std::env::var(ENV_LOG_JSON) {
            Ok(v) if v == "1" || v.eq_ignore_ascii_case("true") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber.
///
/// Safe to call from every test: only the first call installs anything, and
/// a subscriber installed by someone else is left in place.
pub fn init_logging(format: LogFormat) {
    INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let registry = tracing_subscriber::registry().with(env_filter);
        // try_init fails only when a global subscriber already exists
        let _ = match format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_target(true),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_test_writer()
                        .with_target(false),
                )
                .try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(LogFormat::Text);
        init_logging(LogFormat::Json);
        tracing::info!(step = "namespace", "logging initialized");
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
