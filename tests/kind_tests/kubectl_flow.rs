//! Claim flow driven through the kubectl binary

use std::time::Duration;

use converge::retry::RetryConfig;
use converge::store::KubectlStore;
use converge::{FlowRunner, ObjectStore, Transport};
use tokio_util::sync::CancellationToken;

use super::{assert_passed, harness};
use crate::fixtures::{claim_flow, CLAIM};

/// Story: CI images without cluster credentials in-process still run flows
/// through kubectl, with retries smoothing over API server hiccups
#[tokio::test]
#[ignore = "requires a cluster and kubectl - run with: cargo test --test kind -- --ignored"]
async fn story_claim_flow_over_kubectl() {
    let config = harness()
        .with_transport(Transport::Kubectl)
        .with_retry(RetryConfig::with_max_attempts(3));
    let store = config.connect().await.expect("kubectl store should build");
    let runner = FlowRunner::new(store, config);

    let report = runner
        .run(claim_flow("create claim flow via kubectl"), &CancellationToken::new())
        .await;
    assert_passed(report);
}

/// Story: Once a flow finishes, its claim is gone from the cluster
#[tokio::test]
#[ignore = "requires a cluster and kubectl - run with: cargo test --test kind -- --ignored"]
async fn story_claim_is_absent_after_teardown() {
    let config = harness()
        .with_transport(Transport::Kubectl)
        .with_teardown_timeout(Duration::from_secs(120));
    let mut direct = KubectlStore::new(&config.kubectl);
    if let Some(path) = &config.kubeconfig {
        direct = direct.with_kubeconfig(path);
    }
    let store = config.connect().await.expect("kubectl store should build");
    let runner = FlowRunner::new(store, config);
    let report = runner
        .run(claim_flow("claim teardown via kubectl"), &CancellationToken::new())
        .await;
    assert_passed(report);

    // Deletes are issued without waiting, so finalizers may still be running
    let reference = converge::Document::object_ref(&*CLAIM);
    let cancel = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        match direct.get(&reference, &cancel).await {
            Err(err) if err.is_not_found() => break,
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) if tokio::time::Instant::now() >= deadline => {
                panic!("{} still present after teardown", reference)
            }
            Ok(_) => tokio::time::sleep(Duration::from_secs(2)).await,
        }
    }
}
