//! Flow orchestration: setup, assess, teardown
//!
//! A [`Flow`] is an ordered scenario of [`ResourceStep`]s. [`FlowRunner::run`]
//! executes it exactly once:
//!
//! ```text
//! Pending -> SettingUp -> Assessing -> TearingDown -> Done
//!                 |                         ^
//!                 +------- on failure ------+
//! ```
//!
//! Every step of a phase that has a teardown is pushed onto a stack before
//! the phase runs; the stack is unwound in LIFO order when the flow
//! concludes, whatever happened before. The first setup/assess error is the verdict; teardown
//! errors are attached to the report but never change it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::step::{self, ResourceStep, StepDefaults, TeardownOutcome};
use crate::store::ObjectStore;
use crate::{Error, Result, LABEL_FLOW, LABEL_MANAGED_BY, MANAGED_BY_VALUE};

/// Lifecycle state of a flow run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowState {
    /// Not started
    Pending,
    /// Running setup steps in order
    SettingUp,
    /// Running assess steps in order
    Assessing,
    /// Unwinding the teardown stack
    TearingDown,
    /// Finished; the report is final
    Done,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowState::Pending => "Pending",
            FlowState::SettingUp => "SettingUp",
            FlowState::Assessing => "Assessing",
            FlowState::TearingDown => "TearingDown",
            FlowState::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Phase a step ran in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Setup step
    Setup,
    /// Assess step
    Assess,
    /// Teardown of a registered step
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Assess => f.write_str("assess"),
            Phase::Teardown => f.write_str("teardown"),
        }
    }
}

/// Result of one step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// Setup/assess step succeeded
    Passed,
    /// Step failed with the rendered error
    Failed(String),
    /// Step never ran because an earlier one failed or the flow was cancelled
    Skipped,
    /// Teardown deleted the object
    Deleted,
    /// Teardown found the object already gone
    AlreadyAbsent,
}

impl StepStatus {
    fn label(&self) -> &'static str {
        match self {
            StepStatus::Passed | StepStatus::Deleted | StepStatus::AlreadyAbsent => "PASS",
            StepStatus::Failed(_) => "FAIL",
            StepStatus::Skipped => "SKIP",
        }
    }
}

/// Record of one executed (or skipped) step
#[derive(Clone, Debug)]
pub struct StepRecord {
    /// Phase it belongs to
    pub phase: Phase,
    /// Step name
    pub name: String,
    /// How it ended
    pub status: StepStatus,
    /// Wall time spent
    pub elapsed: Duration,
}

/// Ordered scenario of setup, assess and teardown steps
#[derive(Clone, Debug)]
pub struct Flow {
    name: String,
    labels: BTreeMap<String, String>,
    setup: Vec<ResourceStep>,
    assess: Vec<ResourceStep>,
    teardown: Vec<ResourceStep>,
}

impl Flow {
    /// Empty flow.
    ///
    /// Built documents are labelled with the flow name and the managed-by
    /// marker so leftovers can be found after a crashed run.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
        labels.insert(LABEL_FLOW.to_string(), label_value(&name));
        Self {
            name,
            labels,
            setup: Vec::new(),
            assess: Vec::new(),
            teardown: Vec::new(),
        }
    }

    /// Add a scoping label stamped onto every built document
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Append a setup step
    pub fn setup(mut self, step: ResourceStep) -> Self {
        self.setup.push(step);
        self
    }

    /// Append an assess step; runs only when every setup step succeeded
    pub fn assess(mut self, step: ResourceStep) -> Self {
        self.assess.push(step);
        self
    }

    /// Append a standalone teardown step.
    ///
    /// Standalone teardowns run after every registered step teardown, in
    /// reverse order of declaration.
    pub fn teardown(mut self, step: ResourceStep) -> Self {
        self.teardown.push(step);
        self
    }

    /// Flow name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scoping labels
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

/// Render `name` as a valid label value: at most 63 characters of
/// `[a-z0-9-_.]`, starting and ending with an alphanumeric
fn label_value(name: &str) -> String {
    let mapped: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(63)
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Outcome of a flow run
#[derive(Debug)]
pub struct FlowReport {
    /// Flow name
    pub flow: String,
    /// Final state, always [`FlowState::Done`] once returned by the runner
    pub state: FlowState,
    /// Every step in execution order, teardowns last
    pub steps: Vec<StepRecord>,
    /// First setup/assess failure; `None` means the flow passed
    pub error: Option<Error>,
    /// Teardown failures, in the order they occurred
    pub teardown_errors: Vec<Error>,
    /// Total wall time
    pub elapsed: Duration,
}

impl FlowReport {
    fn new(flow: &str) -> Self {
        Self {
            flow: flow.to_string(),
            state: FlowState::Pending,
            steps: Vec::new(),
            error: None,
            teardown_errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Whether the flow passed; teardown errors do not count
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }

    /// Names of steps in `phase`, in execution order
    pub fn step_names(&self, phase: Phase) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.phase == phase)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Convert into the primary verdict
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Log one line per step plus a verdict line
    pub fn log_summary(&self) {
        info!(flow = %self.flow, "========================================");
        for step in &self.steps {
            match &step.status {
                StepStatus::Failed(reason) => error!(
                    flow = %self.flow,
                    phase = %step.phase,
                    elapsed_ms = step.elapsed.as_millis() as u64,
                    "[FAIL] {}: {}",
                    step.name,
                    reason
                ),
                status => info!(
                    flow = %self.flow,
                    phase = %step.phase,
                    elapsed_ms = step.elapsed.as_millis() as u64,
                    "[{}] {}",
                    status.label(),
                    step.name
                ),
            }
        }
        let total = self.steps.len();
        let failed = self
            .steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
            .count();
        if self.passed() {
            info!(
                flow = %self.flow,
                steps = total,
                teardown_errors = self.teardown_errors.len(),
                elapsed_ms = self.elapsed.as_millis() as u64,
                "FLOW PASSED"
            );
        } else {
            error!(
                flow = %self.flow,
                steps = total,
                failed = failed,
                teardown_errors = self.teardown_errors.len(),
                elapsed_ms = self.elapsed.as_millis() as u64,
                "FLOW FAILED"
            );
        }
    }
}

/// Executes flows against one store
#[derive(Clone)]
pub struct FlowRunner {
    store: Arc<dyn ObjectStore>,
    config: HarnessConfig,
}

impl FlowRunner {
    /// Runner over an explicit store and configuration
    pub fn new(store: Arc<dyn ObjectStore>, config: HarnessConfig) -> Self {
        Self { store, config }
    }

    /// The store flows run against
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The runner's configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run `flow` to completion.
    ///
    /// Never returns early: cancellation stops setup/assess at the next
    /// boundary (or inside a poll), then teardown still runs with its own
    /// per-step deadline.
    pub async fn run(&self, flow: Flow, cancel: &CancellationToken) -> FlowReport {
        let started = Instant::now();
        let mut report = FlowReport::new(&flow.name);
        let defaults = self.config.step_defaults(flow.labels.clone());

        // Standalone teardowns sit at the bottom of the stack. Each phase
        // registers all of its steps before the first one runs; teardown is
        // delete-if-exists, so steps that never ran come back as AlreadyAbsent.
        let mut stack: Vec<&ResourceStep> = flow.teardown.iter().collect();
        stack.extend(flow.setup.iter().filter(|s| s.has_teardown()));

        info!(
            flow = %flow.name,
            setup = flow.setup.len(),
            assess = flow.assess.len(),
            "starting flow"
        );

        report.state = FlowState::SettingUp;
        let setup_ok = self
            .run_phase(Phase::Setup, &flow.setup, &defaults, cancel, &mut report)
            .await;

        if setup_ok {
            report.state = FlowState::Assessing;
            stack.extend(flow.assess.iter().filter(|s| s.has_teardown()));
            self.run_phase(Phase::Assess, &flow.assess, &defaults, cancel, &mut report)
                .await;
        } else {
            for step in &flow.assess {
                report.steps.push(StepRecord {
                    phase: Phase::Assess,
                    name: step.name().to_string(),
                    status: StepStatus::Skipped,
                    elapsed: Duration::ZERO,
                });
            }
        }

        report.state = FlowState::TearingDown;
        self.unwind(stack, &mut report).await;

        report.state = FlowState::Done;
        report.elapsed = started.elapsed();
        report
    }

    /// Run independent flows concurrently against the same store.
    ///
    /// Flows must not share identities; use [`crate::unique_name`] for
    /// namespaces. Reports come back in the order the flows were given.
    pub async fn run_all(&self, flows: Vec<Flow>, cancel: &CancellationToken) -> Vec<FlowReport> {
        join_all(flows.into_iter().map(|flow| self.run(flow, cancel))).await
    }

    /// Run `steps` in order, stopping at the first failure.
    ///
    /// Returns whether every step passed.
    async fn run_phase(
        &self,
        phase: Phase,
        steps: &[ResourceStep],
        defaults: &StepDefaults,
        cancel: &CancellationToken,
        report: &mut FlowReport,
    ) -> bool {
        let mut failed = false;
        for step in steps {
            if failed {
                report.steps.push(StepRecord {
                    phase,
                    name: step.name().to_string(),
                    status: StepStatus::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }
            if cancel.is_cancelled() {
                warn!(flow = %report.flow, phase = %phase, step = %step.name(), "flow cancelled");
                report
                    .error
                    .get_or_insert_with(|| Error::cancelled(format!("{}:{}", phase, step.name())));
                report.steps.push(StepRecord {
                    phase,
                    name: step.name().to_string(),
                    status: StepStatus::Skipped,
                    elapsed: Duration::ZERO,
                });
                failed = true;
                continue;
            }

            let step_started = Instant::now();
            let result = step::apply_and_wait(self.store.as_ref(), step, defaults, cancel).await;
            let elapsed = step_started.elapsed();

            match result {
                Ok(()) => {
                    info!(flow = %report.flow, phase = %phase, step = %step.name(), "step passed");
                    report.steps.push(StepRecord {
                        phase,
                        name: step.name().to_string(),
                        status: StepStatus::Passed,
                        elapsed,
                    });
                }
                Err(e) => {
                    error!(
                        flow = %report.flow,
                        phase = %phase,
                        step = %step.name(),
                        error = %e,
                        "step failed"
                    );
                    report.steps.push(StepRecord {
                        phase,
                        name: step.name().to_string(),
                        status: StepStatus::Failed(e.to_string()),
                        elapsed,
                    });
                    report.error.get_or_insert(e);
                    failed = true;
                }
            }
        }
        !failed
    }

    /// Tear down every registered step in LIFO order, collecting errors
    async fn unwind(&self, mut stack: Vec<&ResourceStep>, report: &mut FlowReport) {
        while let Some(step) = stack.pop() {
            // Teardown ignores the caller's token; each step gets its own budget
            let token = CancellationToken::new();
            let step_started = Instant::now();
            let result = tokio::time::timeout(
                self.config.teardown_timeout,
                step::teardown(self.store.as_ref(), step, &token),
            )
            .await
            .unwrap_or_else(|_| {
                Err(Error::teardown_failed(
                    step.name(),
                    Error::cancelled(format!(
                        "teardown deadline of {:?}",
                        self.config.teardown_timeout
                    )),
                ))
            });
            let elapsed = step_started.elapsed();

            let status = match result {
                Ok(TeardownOutcome::Deleted) => StepStatus::Deleted,
                Ok(TeardownOutcome::AlreadyAbsent) => StepStatus::AlreadyAbsent,
                Ok(TeardownOutcome::Skipped) => StepStatus::Skipped,
                Err(e) => {
                    warn!(flow = %report.flow, step = %step.name(), error = %e, "teardown failed");
                    let status = StepStatus::Failed(e.to_string());
                    report.teardown_errors.push(e);
                    status
                }
            };
            report.steps.push(StepRecord {
                phase: Phase::Teardown,
                name: step.name().to_string(),
                status,
                elapsed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{self, Condition};
    use crate::document::{Document, DynamicDocument, ObjectRef};
    use crate::store::{ConvergenceRule, Fault, MemoryStore, Verb};
    use serde_json::json;

    fn configmap(name: &str) -> DynamicDocument {
        DynamicDocument::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "default" }
        }))
        .expect("config map should parse")
    }

    fn step(name: &str) -> ResourceStep {
        ResourceStep::manifest(name, configmap(name))
    }

    fn runner(store: Arc<MemoryStore>) -> FlowRunner {
        let config = HarnessConfig::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_timeout(Duration::from_secs(1))
            .with_teardown_timeout(Duration::from_secs(5));
        FlowRunner::new(store, config)
    }

    fn names(refs: Vec<ObjectRef>) -> Vec<String> {
        refs.into_iter().map(|r| r.name).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn run_all_keeps_flows_apart_and_in_order() {
        let store = Arc::new(MemoryStore::new());
        let flows = vec![
            Flow::new("first").setup(step("a1")).setup(step("a2")),
            Flow::new("second")
                .setup(step("b1"))
                .setup(step("never-ready").ready_when(condition::ready())),
        ];

        let reports = runner(store.clone())
            .run_all(flows, &CancellationToken::new())
            .await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].flow, "first");
        assert!(reports[0].passed());
        assert!(matches!(reports[1].error, Some(Error::NotReady { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn teardown_is_lifo_even_when_setup_fails() {
        let store = Arc::new(
            MemoryStore::new().with_fault(Fault::on(Verb::Create).name("s2")),
        );
        let flow = Flow::new("lifo")
            .setup(step("s1"))
            .setup(step("s2"))
            .setup(step("s3"))
            .assess(step("a1"));

        let report = runner(store.clone()).run(flow, &CancellationToken::new()).await;

        assert!(!report.passed());
        assert!(matches!(report.error, Some(Error::Apply { .. })));
        assert_eq!(names(store.creates()), vec!["s1", "s2"]);
        // s3 never ran but its teardown is still observed
        assert_eq!(names(store.deletes()), vec!["s3", "s2", "s1"]);
        assert_eq!(report.step_names(Phase::Teardown), vec!["s3", "s2", "s1"]);
        assert_eq!(report.state, FlowState::Done);
        assert!(report.teardown_errors.is_empty());

        let skipped: Vec<&str> = report
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(skipped, vec!["s3", "a1"]);
    }

    #[tokio::test]
    async fn passing_flow_runs_assess_and_cleans_up() {
        let store = Arc::new(MemoryStore::new().with_rule(ConvergenceRule::new(
            "ConfigMap",
            vec![Condition::true_("Ready")],
        )));
        let flow = Flow::new("pass")
            .setup(step("s1").ready_when(condition::ready()))
            .assess(ResourceStep::await_conditions(
                "s1 still ready",
                configmap("s1").object_ref(),
                condition::ready(),
            ));

        let report = runner(store.clone()).run(flow, &CancellationToken::new()).await;

        assert!(report.passed(), "unexpected error: {:?}", report.error);
        assert_eq!(names(store.deletes()), vec!["s1"]);
        assert!(store.is_empty());
        report.log_summary();
        report.into_result().expect("flow should pass");
    }

    #[tokio::test]
    async fn built_documents_carry_flow_labels() {
        let store = Arc::new(MemoryStore::new());
        let flow = Flow::new("Labels").label("team", "qa").setup(step("s1").without_teardown());

        runner(store.clone()).run(flow, &CancellationToken::new()).await;

        let stored = store
            .get(&configmap("s1").object_ref(), &CancellationToken::new())
            .await
            .expect("s1 was kept");
        let labels = stored.labels();
        assert_eq!(labels.get(LABEL_FLOW).map(String::as_str), Some("labels"));
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY_VALUE));
        assert_eq!(labels.get("team").map(String::as_str), Some("qa"));
    }

    #[test]
    fn flow_names_become_valid_label_values() {
        assert_eq!(label_value("create claim flow"), "create-claim-flow");
        assert_eq!(label_value("  Provider (dummy)!"), "provider--dummy");
        assert_eq!(label_value(&"x".repeat(80)).len(), 63);
        assert_eq!(label_value("converge-e2e-x7k2p"), "converge-e2e-x7k2p");
    }

    #[tokio::test]
    async fn teardown_errors_are_secondary() {
        let store = Arc::new(
            MemoryStore::new().with_fault(Fault::on(Verb::Delete).name("s2")),
        );
        let flow = Flow::new("secondary").setup(step("s1")).setup(step("s2")).setup(step("s3"));

        let report = runner(store.clone()).run(flow, &CancellationToken::new()).await;

        assert!(report.passed());
        assert_eq!(report.teardown_errors.len(), 1);
        assert!(matches!(report.teardown_errors[0], Error::Teardown { .. }));
        // s1 is still deleted after s2 failed
        assert_eq!(names(store.deletes()), vec!["s3", "s2", "s1"]);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn standalone_teardowns_run_last() {
        let store = Arc::new(MemoryStore::new());
        store.insert(configmap("leftover-a"));
        let flow = Flow::new("standalone")
            .setup(step("s1"))
            .teardown(step("leftover-a"))
            .teardown(step("leftover-b"));

        let report = runner(store.clone()).run(flow, &CancellationToken::new()).await;

        assert!(report.passed());
        assert_eq!(names(store.deletes()), vec!["s1", "leftover-b", "leftover-a"]);
        let statuses: Vec<StepStatus> = report
            .steps
            .iter()
            .filter(|s| s.phase == Phase::Teardown)
            .map(|s| s.status.clone())
            .collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Deleted, StepStatus::AlreadyAbsent, StepStatus::Deleted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_setup_fails_the_flow_with_a_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let flow = Flow::new("not-ready")
            .setup(step("s1").ready_when(condition::ready()))
            .setup(step("s2"));

        let report = runner(store.clone()).run(flow, &CancellationToken::new()).await;

        match &report.error {
            Some(Error::NotReady { snapshot, .. }) => assert!(snapshot.is_empty()),
            other => panic!("expected NotReady, got {:?}", other),
        }
        assert_eq!(names(store.creates()), vec!["s1"]);
        assert_eq!(names(store.deletes()), vec!["s2", "s1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_setup_but_not_teardown() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let flow = Flow::new("cancelled")
            .setup(step("s1"))
            .setup(
                step("s2")
                    .ready_when(condition::ready())
                    .with_timeout(Duration::from_secs(3600)),
            )
            .setup(step("s3"));

        let started = Instant::now();
        let report = runner(store.clone()).run(flow, &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(report.error.as_ref().is_some_and(Error::is_cancelled));
        assert_eq!(names(store.creates()), vec!["s1", "s2"]);
        assert_eq!(names(store.deletes()), vec!["s3", "s2", "s1"]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_flow_only_runs_standalone_teardown() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let flow = Flow::new("pre-cancelled")
            .setup(step("s1"))
            .teardown(step("leftover"));

        let report = runner(store.clone()).run(flow, &cancel).await;

        assert!(report.error.as_ref().is_some_and(Error::is_cancelled));
        assert!(store.creates().is_empty());
        assert_eq!(names(store.deletes()), vec!["s1", "leftover"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_teardown_is_bounded() {
        let store = Arc::new(MemoryStore::new().with_latency(Duration::from_secs(3600)));
        store.insert(configmap("slow"));
        let flow = Flow::new("hung").teardown(step("slow"));

        let started = Instant::now();
        let report = runner(store).run(flow, &CancellationToken::new()).await;

        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(report.passed());
        assert_eq!(report.teardown_errors.len(), 1);
    }
}
