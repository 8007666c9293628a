//! Claim flow through the Kubernetes API

use std::sync::Arc;

use converge::condition::ready;
use converge::{
    unique_name, DynamicDocument, Flow, FlowRunner, LabelSelector, ListScope, ResourceStep,
    Transport,
};
use tokio_util::sync::CancellationToken;

use super::{assert_passed, harness};
use crate::fixtures::{claim_flow, provider_flow};

/// Story: A platform team installs the dummy provider before anything else
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_dummy_provider_becomes_healthy() {
    let config = harness().with_transport(Transport::Api);
    let store = config.connect().await.expect("cluster should be reachable");
    let runner = FlowRunner::new(store, config);

    let report = runner
        .run(provider_flow("install dummy provider"), &CancellationToken::new())
        .await;
    assert_passed(report);
}

/// Story: A developer claims a robot and the composite behind it converges
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_claim_converges_through_its_composite() {
    let config = harness().with_transport(Transport::Api);
    let store = config.connect().await.expect("cluster should be reachable");
    let runner = FlowRunner::new(Arc::clone(&store), config);

    let flow = claim_flow("create claim flow").assess(ResourceStep::await_selected(
        "composite is ready",
        ListScope::all("dummy.crossplane.io/v1alpha1", "XRobot"),
        LabelSelector::everything().with("crossplane.io/claim-namespace", "default"),
        ready(),
    ));
    let report = runner.run(flow, &CancellationToken::new()).await;
    assert_passed(report);
}

/// Story: Config maps land in a namespace of their own and vanish with it
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test kind -- --ignored"]
async fn story_namespace_scoped_flow_cleans_up() {
    let config = harness().with_transport(Transport::Api);
    let store = config.connect().await.expect("cluster should be reachable");
    let runner = FlowRunner::new(store, config);

    let ns = unique_name("converge-e2e");
    let configmap = DynamicDocument::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "settings", "namespace": ns.clone() },
        "data": { "greeting": "hello" }
    }))
    .expect("config map should parse");
    let flow = Flow::new(ns.clone())
        .setup(ResourceStep::namespace(ns))
        .setup(ResourceStep::manifest("settings", configmap));

    let report = runner.run(flow, &CancellationToken::new()).await;
    assert_passed(report);
}
