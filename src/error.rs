//! Error types for flow orchestration
//!
//! Errors are structured so a failing flow report names the object and step
//! involved. The four lifecycle failures (`Apply`, `Fetch`, `NotReady`,
//! `Teardown`) wrap the underlying store error; the rest describe store and
//! transport failures directly.

use std::time::Duration;

use thiserror::Error;

use crate::condition::ConditionSnapshot;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for converge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The store rejected a create for a document
    #[error("apply failed for {reference}: {source}")]
    Apply {
        /// Identity of the document being created (e.g. "Composition/robots-test")
        reference: String,
        /// What the store returned
        #[source]
        source: Box<Error>,
    },

    /// The store errored while a readiness poll was fetching the document
    #[error("fetch failed for {reference}: {source}")]
    Fetch {
        /// Identity of the document being polled
        reference: String,
        /// What the store returned
        #[source]
        source: Box<Error>,
    },

    /// Readiness timed out without the expected conditions
    #[error("{reference} not ready after {timeout:?} (expected {expected}; observed {snapshot})")]
    NotReady {
        /// Identity of the document being polled
        reference: String,
        /// The configured readiness timeout
        timeout: Duration,
        /// Rendering of the expected condition set
        expected: String,
        /// Last conditions observed before the deadline
        snapshot: ConditionSnapshot,
    },

    /// Cleanup of a document failed
    #[error("teardown failed for {reference}: {source}")]
    Teardown {
        /// Identity of the document being deleted
        reference: String,
        /// What the store returned
        #[source]
        source: Box<Error>,
    },

    /// The document does not exist in the store
    #[error("{reference} not found")]
    NotFound {
        /// Identity that was looked up
        reference: String,
    },

    /// The document already exists in the store
    #[error("{reference} already exists")]
    Conflict {
        /// Identity that collided
        reference: String,
    },

    /// The store could not be reached; safe to resample
    #[error("store unavailable [{context}]: {message}")]
    Unavailable {
        /// Operation that failed (e.g. "get", "kubectl")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// The operation was cancelled by the caller's deadline
    #[error("cancelled during {context}")]
    Cancelled {
        /// Where cancellation was observed (step or operation name)
        context: String,
    },

    /// A manifest could not be turned into a document
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of what's wrong
        message: String,
        /// The manifest kind, when it could be read
        kind: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed: {message}")]
    Command {
        /// The program and verb that ran (e.g. "kubectl get")
        command: String,
        /// Captured stderr or spawn error
        message: String,
    },

    /// Invalid harness configuration
    #[error("configuration error for {key}: {message}")]
    Config {
        /// The setting that was rejected
        key: String,
        /// Why it was rejected
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "flow", "store")
        context: String,
    },
}

impl Error {
    /// Wrap a store error raised while creating `reference`
    pub fn apply_failed(reference: impl ToString, source: Error) -> Self {
        Self::Apply {
            reference: reference.to_string(),
            source: Box::new(source),
        }
    }

    /// Wrap a store error raised while polling `reference`
    pub fn fetch_failed(reference: impl ToString, source: Error) -> Self {
        Self::Fetch {
            reference: reference.to_string(),
            source: Box::new(source),
        }
    }

    /// Wrap a store error raised while deleting `reference`
    pub fn teardown_failed(reference: impl ToString, source: Error) -> Self {
        Self::Teardown {
            reference: reference.to_string(),
            source: Box::new(source),
        }
    }

    /// Create a not-found error
    pub fn not_found(reference: impl ToString) -> Self {
        Self::NotFound {
            reference: reference.to_string(),
        }
    }

    /// Create an already-exists error
    pub fn conflict(reference: impl ToString) -> Self {
        Self::Conflict {
            reference: reference.to_string(),
        }
    }

    /// Create a transient store error
    pub fn unavailable(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create a manifest error with the given message
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a manifest error with resource kind context
    pub fn manifest_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a command error
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the store reported that the object does not exist.
    ///
    /// Looks through lifecycle wrappers so a `Teardown` wrapping a 404 still
    /// reads as not-found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::Apply { source, .. }
            | Error::Fetch { source, .. }
            | Error::Teardown { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether resampling the same request may succeed.
    ///
    /// Connection-level failures, 5xx and 429 responses are transient. 4xx
    /// responses, validation and serialization problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Unavailable { .. } => true,
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 429 || ae.code >= 500,
                kube::Error::HyperError(_) | kube::Error::Service(_) => true,
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether this error came from cancellation rather than the store
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Get the object reference if this error is tied to one
    pub fn reference(&self) -> Option<&str> {
        match self {
            Error::Apply { reference, .. }
            | Error::Fetch { reference, .. }
            | Error::NotReady { reference, .. }
            | Error::Teardown { reference, .. }
            | Error::NotFound { reference }
            | Error::Conflict { reference } => Some(reference),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: A rejected create names the object it was applying
    #[test]
    fn story_apply_failure_names_the_document() {
        let err = Error::apply_failed(
            "Composition/robots-test",
            Error::conflict("Composition/robots-test"),
        );
        let msg = err.to_string();
        assert!(msg.contains("apply failed"));
        assert!(msg.contains("robots-test"));
        assert!(msg.contains("already exists"));
        assert_eq!(err.reference(), Some("Composition/robots-test"));
    }

    /// Story: A readiness timeout reports what was last observed
    #[test]
    fn story_not_ready_carries_condition_snapshot() {
        let err = Error::NotReady {
            reference: "Robot/default/test-robot".to_string(),
            timeout: Duration::from_secs(60),
            expected: "Ready=True".to_string(),
            snapshot: ConditionSnapshot::new(vec![Condition::new(
                "Ready",
                "False",
                "Creating",
                "",
            )]),
        };
        let msg = err.to_string();
        assert!(msg.contains("not ready after 60s"));
        assert!(msg.contains("Ready=False"));
        assert!(msg.contains("Creating"));
    }

    #[test]
    fn not_found_is_detected_through_wrappers() {
        assert!(Error::not_found("XRobot/x").is_not_found());
        assert!(Error::from(api_error(404)).is_not_found());
        assert!(Error::teardown_failed("XRobot/x", Error::from(api_error(404))).is_not_found());
        assert!(!Error::from(api_error(409)).is_not_found());
        assert!(!Error::unavailable("get", "connection refused").is_not_found());
    }

    #[test]
    fn transient_errors_are_classified_by_status_code() {
        assert!(Error::from(api_error(503)).is_transient());
        assert!(Error::from(api_error(429)).is_transient());
        assert!(!Error::from(api_error(404)).is_transient());
        assert!(!Error::from(api_error(422)).is_transient());
        assert!(Error::unavailable("get", "connection reset").is_transient());
        assert!(!Error::manifest("missing kind").is_transient());
        assert!(!Error::cancelled("poll").is_transient());
    }

    #[test]
    fn constructors_accept_str_and_string() {
        let err = Error::command("kubectl get", format!("exit status {}", 1));
        assert_eq!(err.to_string(), "command `kubectl get` failed: exit status 1");

        let err = Error::config("CONVERGE_TIMEOUT_SECS", "not a number");
        assert!(err.to_string().contains("CONVERGE_TIMEOUT_SECS"));

        let err = Error::manifest_for_kind("Composition", "missing metadata.name");
        assert!(matches!(err, Error::Manifest { kind: Some(ref k), .. } if k == "Composition"));
    }

    #[test]
    fn cancelled_is_distinct_from_store_errors() {
        assert!(Error::cancelled("setup:xrd").is_cancelled());
        assert!(!Error::internal("boom").is_cancelled());
        assert_eq!(
            Error::internal_with_context("flow", "boom").to_string(),
            "internal error [flow]: boom"
        );
    }
}
