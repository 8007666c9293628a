//! Resource steps: apply a document, wait for its conditions, delete it
//!
//! A [`ResourceStep`] binds a deterministic document builder (or a label
//! selection) to an apply action, a teardown action and an optional
//! readiness check. [`apply_and_wait`] and [`teardown`] execute one step
//! against an [`ObjectStore`]; the flow runner sequences them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::condition::{Condition, ExpectedConditionSet};
use crate::document::{
    Document, DynamicDocument, LabelSelector, ListScope, ObjectRef, TypedDocument,
};
use crate::poller::{poll_conditions, PollConfig, PollOutcome};
use crate::store::ObjectStore;
use crate::{Error, Result};

/// Deterministic document builder
pub type BuildFn = Arc<dyn Fn() -> Result<DynamicDocument> + Send + Sync>;

/// What a step operates on
#[derive(Clone)]
pub enum Target {
    /// A document produced by a builder; its identity is the built identity
    Built(BuildFn),
    /// An object created by someone else, addressed by identity
    Reference(ObjectRef),
    /// The first object of a kind matching a label selector
    Selected {
        /// Kind and namespace to search
        scope: ListScope,
        /// Labels the object must carry
        selector: LabelSelector,
    },
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Built(_) => f.write_str("Built(<builder>)"),
            Target::Reference(r) => f.debug_tuple("Reference").field(r).finish(),
            Target::Selected { scope, selector } => f
                .debug_struct("Selected")
                .field("scope", scope)
                .field("selector", selector)
                .finish(),
        }
    }
}

/// Action taken when the step runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyAction {
    /// Create the built document
    Create,
    /// Create nothing; only readiness is checked
    Skip,
}

/// Action taken when the flow tears down
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownAction {
    /// Delete by identity, treating NotFound as success
    DeleteIfExists,
    /// Leave the object in place
    Skip,
}

/// How a teardown ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The store deleted the object
    Deleted,
    /// The object was already gone
    AlreadyAbsent,
    /// The step has no teardown
    Skipped,
}

/// Readiness check run after apply
#[derive(Clone, Debug, PartialEq)]
pub struct Readiness {
    /// Conditions to wait for
    pub expected: ExpectedConditionSet,
    /// Override of the flow's default timeout
    pub timeout: Option<Duration>,
    /// Override of the flow's default poll interval
    pub interval: Option<Duration>,
}

/// Values a step inherits from the flow it runs in
#[derive(Clone, Debug, PartialEq)]
pub struct StepDefaults {
    /// Labels stamped onto every built document
    pub labels: BTreeMap<String, String>,
    /// Poll interval when the step sets none
    pub poll_interval: Duration,
    /// Readiness timeout when the step sets none
    pub timeout: Duration,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            poll_interval: crate::poller::DEFAULT_POLL_INTERVAL,
            timeout: crate::poller::DEFAULT_POLL_TIMEOUT,
        }
    }
}

/// A named unit of work in a flow
#[derive(Clone, Debug)]
pub struct ResourceStep {
    name: String,
    target: Target,
    apply: ApplyAction,
    teardown: TeardownAction,
    expected: Option<ExpectedConditionSet>,
    timeout: Option<Duration>,
    interval: Option<Duration>,
}

impl ResourceStep {
    /// Create the document `build` returns and delete it on teardown.
    ///
    /// `build` is called once to apply and again on teardown to recover
    /// the identity, so it must be deterministic.
    pub fn apply<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<DynamicDocument> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target: Target::Built(Arc::new(build)),
            apply: ApplyAction::Create,
            teardown: TeardownAction::DeleteIfExists,
            expected: None,
            timeout: None,
            interval: None,
        }
    }

    /// Apply a fixed document (e.g. a parsed fixture)
    pub fn manifest(name: impl Into<String>, document: DynamicDocument) -> Self {
        Self::apply(name, move || Ok(document.clone()))
    }

    /// Apply a typed document
    pub fn typed<D>(name: impl Into<String>, document: D) -> Self
    where
        D: Document + 'static,
    {
        Self::apply(name, move || document.to_dynamic())
    }

    /// Create namespace `namespace` and delete it on teardown
    pub fn namespace(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        Self::typed(format!("namespace/{}", namespace), TypedDocument::new(ns))
    }

    /// Wait for conditions on an object this flow does not own
    pub fn await_conditions(
        name: impl Into<String>,
        reference: ObjectRef,
        expected: ExpectedConditionSet,
    ) -> Self {
        Self {
            name: name.into(),
            target: Target::Reference(reference),
            apply: ApplyAction::Skip,
            teardown: TeardownAction::Skip,
            expected: Some(expected),
            timeout: None,
            interval: None,
        }
    }

    /// Wait for conditions on the first object matching `selector`.
    ///
    /// Until such an object appears the step keeps polling.
    pub fn await_selected(
        name: impl Into<String>,
        scope: ListScope,
        selector: LabelSelector,
        expected: ExpectedConditionSet,
    ) -> Self {
        Self {
            name: name.into(),
            target: Target::Selected { scope, selector },
            apply: ApplyAction::Skip,
            teardown: TeardownAction::Skip,
            expected: Some(expected),
            timeout: None,
            interval: None,
        }
    }

    /// Wait for `expected` after applying
    pub fn ready_when(mut self, expected: ExpectedConditionSet) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Readiness timeout for this step
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Poll interval for this step
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Leave the object in place on teardown
    pub fn without_teardown(mut self) -> Self {
        self.teardown = TeardownAction::Skip;
        self
    }

    /// Step name used in logs and reports
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the step operates on
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Apply action
    pub fn apply_action(&self) -> ApplyAction {
        self.apply
    }

    /// Teardown action
    pub fn teardown_action(&self) -> TeardownAction {
        self.teardown
    }

    /// Readiness check, if any
    pub fn readiness(&self) -> Option<Readiness> {
        self.expected.as_ref().map(|expected| Readiness {
            expected: expected.clone(),
            timeout: self.timeout,
            interval: self.interval,
        })
    }

    /// Whether teardown would touch the store
    pub fn has_teardown(&self) -> bool {
        self.teardown == TeardownAction::DeleteIfExists
            && !matches!(self.target, Target::Selected { .. })
    }

    /// Identity this step addresses, `None` for label selections
    pub fn identity(&self) -> Result<Option<ObjectRef>> {
        match &self.target {
            Target::Built(build) => Ok(Some(build()?.object_ref())),
            Target::Reference(reference) => Ok(Some(reference.clone())),
            Target::Selected { .. } => Ok(None),
        }
    }
}

/// What a readiness poll reads back
enum PollTarget<'a> {
    Object(ObjectRef),
    Selected {
        scope: &'a ListScope,
        selector: &'a LabelSelector,
    },
}

impl fmt::Display for PollTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTarget::Object(reference) => write!(f, "{}", reference),
            PollTarget::Selected { scope, selector } => write!(f, "{} [{}]", scope, selector),
        }
    }
}

async fn fetch_conditions(
    store: &dyn ObjectStore,
    target: &PollTarget<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<Condition>> {
    match target {
        PollTarget::Object(reference) => {
            let document = store.get(reference, cancel).await?;
            Ok(document.conditions())
        }
        PollTarget::Selected { scope, selector } => {
            let documents = store.list(scope, selector, cancel).await?;
            documents
                .first()
                .map(|d| d.conditions())
                .ok_or_else(|| Error::not_found(target))
        }
    }
}

/// Apply `step` and wait for its readiness check.
///
/// Store failures during create become [`Error::Apply`]; failures while
/// polling become [`Error::Fetch`]; a timeout becomes [`Error::NotReady`]
/// carrying the last observed conditions. Cancellation is returned as-is.
pub async fn apply_and_wait(
    store: &dyn ObjectStore,
    step: &ResourceStep,
    defaults: &StepDefaults,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled(step.name()));
    }

    let poll_target = match &step.target {
        Target::Built(build) => {
            let document = build()
                .map_err(|e| Error::apply_failed(step.name(), e))?
                .with_labels(&defaults.labels);
            let reference = document.object_ref();
            if step.apply == ApplyAction::Create {
                info!(step = %step.name, reference = %reference, "applying document");
                store.create(&document, cancel).await.map_err(|e| {
                    if e.is_cancelled() {
                        e
                    } else {
                        Error::apply_failed(&reference, e)
                    }
                })?;
            }
            PollTarget::Object(reference)
        }
        Target::Reference(reference) => PollTarget::Object(reference.clone()),
        Target::Selected { scope, selector } => PollTarget::Selected { scope, selector },
    };

    let Some(readiness) = step.readiness() else {
        return Ok(());
    };

    let config = PollConfig {
        interval: readiness.interval.unwrap_or(defaults.poll_interval),
        timeout: readiness.timeout.unwrap_or(defaults.timeout),
        tolerate_not_found: matches!(poll_target, PollTarget::Selected { .. }),
    };
    debug!(
        step = %step.name,
        target = %poll_target,
        expected = %readiness.expected,
        timeout_secs = config.timeout.as_secs(),
        "waiting for conditions"
    );

    let outcome = poll_conditions(
        || fetch_conditions(store, &poll_target, cancel),
        &readiness.expected,
        &config,
        cancel,
    )
    .await
    .map_err(|e| {
        if e.is_cancelled() {
            e
        } else {
            Error::fetch_failed(&poll_target, e)
        }
    })?;

    match outcome {
        PollOutcome::Ready { attempts, elapsed } => {
            info!(
                step = %step.name,
                target = %poll_target,
                attempts = attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "conditions met"
            );
            Ok(())
        }
        PollOutcome::NotReady { last, .. } => Err(Error::NotReady {
            reference: poll_target.to_string(),
            timeout: config.timeout,
            expected: readiness.expected.to_string(),
            snapshot: last,
        }),
    }
}

/// Delete the object `step` created, treating NotFound as success
pub async fn teardown(
    store: &dyn ObjectStore,
    step: &ResourceStep,
    cancel: &CancellationToken,
) -> Result<TeardownOutcome> {
    if !step.has_teardown() {
        return Ok(TeardownOutcome::Skipped);
    }
    let reference = match step.identity() {
        Ok(Some(reference)) => reference,
        Ok(None) => return Ok(TeardownOutcome::Skipped),
        Err(e) => return Err(Error::teardown_failed(step.name(), e)),
    };

    info!(step = %step.name, reference = %reference, "deleting document");
    match store.delete(&reference, cancel).await {
        Ok(()) => Ok(TeardownOutcome::Deleted),
        Err(e) if e.is_not_found() => {
            debug!(step = %step.name, reference = %reference, "already absent");
            Ok(TeardownOutcome::AlreadyAbsent)
        }
        Err(e) => Err(Error::teardown_failed(&reference, e)),
    }
}
