//! Converge - condition-gated resource lifecycle orchestration for end-to-end tests
//!
//! Converge drives declarative control planes (Kubernetes plus a composition
//! engine) through test scenarios: it creates chains of dependent objects,
//! waits for each to report the expected status conditions, and tears
//! everything down in reverse order no matter how the scenario ended.
//!
//! # Architecture
//!
//! ```text
//! FlowRunner -> ResourceStep -> ObjectStore (create/delete)
//!                    |
//!                    +-> poll_conditions -> ObjectStore (get/list)
//! ```
//!
//! # Modules
//!
//! - [`flow`] - Flow definition, runner, and report
//! - [`step`] - Resource steps: apply-and-wait and delete-if-exists teardown
//! - [`poller`] - Bounded, interval-paced condition polling
//! - [`condition`] - Conditions, expected condition sets, and match policies
//! - [`document`] - Object identities and the dynamic/typed document types
//! - [`manifest`] - YAML/JSON manifest loading
//! - [`store`] - The object store trait and its API, kubectl, and in-memory adapters
//! - [`retry`] - Backoff with jitter for transient store failures
//! - [`config`] - Harness configuration from code and environment
//! - [`telemetry`] - Logging initialization
//! - [`kube_utils`] - kube-rs client and `ApiResource` helpers
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod condition;
pub mod config;
pub mod document;
pub mod error;
pub mod flow;
pub mod kube_utils;
pub mod manifest;
pub mod poller;
pub mod retry;
pub mod step;
pub mod store;
pub mod telemetry;

pub use condition::{Condition, ConditionStatus, ExpectedConditionSet, MatchPolicy};
pub use config::{unique_name, HarnessConfig, Transport};
pub use document::{Document, DynamicDocument, LabelSelector, ListScope, ObjectRef, TypedDocument};
pub use error::Error;
pub use flow::{Flow, FlowReport, FlowRunner};
pub use step::ResourceStep;
pub use store::ObjectStore;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Labels
// =============================================================================
// Stamped onto every document a flow builds so leftovers from crashed runs
// can be found with a label selector.

/// Standard Kubernetes label naming the tool that created an object
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on objects created by a flow
pub const MANAGED_BY_VALUE: &str = "converge";

/// Label carrying the name of the flow that created an object
pub const LABEL_FLOW: &str = "converge.dev/flow";
