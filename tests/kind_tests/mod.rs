//! Flows that tell the story of installing a composition and claiming it
//!
//! - `claim_flow`: XRD, Composition, and claim through the Kubernetes API
//! - `kubectl_flow`: the same flow driven through the `kubectl` binary
//!
//! ```bash
//! cargo test --test kind claim_flow -- --ignored --nocapture
//! CONVERGE_KUBECTL=/usr/local/bin/kubectl cargo test --test kind kubectl_flow -- --ignored
//! ```

mod claim_flow;
mod kubectl_flow;

use converge::telemetry::{init_logging, LogFormat};
use converge::{FlowReport, HarnessConfig};

/// Harness config from the environment, with logging initialized
pub fn harness() -> HarnessConfig {
    init_logging(LogFormat::from_env());
    HarnessConfig::from_env().expect("harness environment should be valid")
}

/// Print the report and fail the test with the first error
pub fn assert_passed(report: FlowReport) {
    report.log_summary();
    let flow = report.flow.clone();
    if let Err(err) = report.into_result() {
        panic!("flow {} failed: {}", flow, err);
    }
}
