//! Shared fixtures for the claim flow
//!
//! Manifests are embedded at compile time and parsed once per test binary.

use std::sync::LazyLock;
use std::time::Duration;

use converge::condition::{
    established_and_offered, ready, ConditionStatus, ExpectedConditionSet, CONDITION_HEALTHY,
    CONDITION_INSTALLED, REASON_HEALTHY_PACKAGE_REVISION,
};
use converge::manifest::{parse_manifest, parse_manifests};
use converge::{Document, DynamicDocument, Flow, ResourceStep};

/// Readiness budget used by the claim flow for each wait
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

pub static XRD: LazyLock<DynamicDocument> = LazyLock::new(|| {
    parse_manifest(include_str!("testdata/xrd.yaml")).expect("xrd fixture should parse")
});

pub static COMPOSITION: LazyLock<DynamicDocument> = LazyLock::new(|| {
    parse_manifest(include_str!("testdata/composition.yaml"))
        .expect("composition fixture should parse")
});

pub static CLAIM: LazyLock<DynamicDocument> = LazyLock::new(|| {
    parse_manifest(include_str!("testdata/claim.yaml")).expect("claim fixture should parse")
});

pub static PROVIDER: LazyLock<DynamicDocument> = LazyLock::new(|| {
    parse_manifest(include_str!("testdata/provider.yaml")).expect("provider fixture should parse")
});

pub static PROVIDER_CONFIG: LazyLock<DynamicDocument> = LazyLock::new(|| {
    parse_manifest(include_str!("testdata/providerconfig.yaml"))
        .expect("provider config fixture should parse")
});

/// Deployment and Service of the dummy provider's backend
pub static PROVIDER_SERVER: LazyLock<Vec<DynamicDocument>> = LazyLock::new(|| {
    parse_manifests(include_str!("testdata/provider-server.yaml"))
        .expect("provider server fixture should parse")
});

/// Provider must be installed and healthy on its current package revision
pub fn provider_healthy() -> ExpectedConditionSet {
    ExpectedConditionSet::all()
        .expect_true(CONDITION_INSTALLED)
        .expect_with_reason(
            CONDITION_HEALTHY,
            ConditionStatus::True,
            REASON_HEALTHY_PACKAGE_REVISION,
        )
}

/// XRD (Established + Offered) -> Composition -> claim, then assess the
/// claim reports Ready
pub fn claim_flow(name: &str) -> Flow {
    Flow::new(name)
        .label("type", "flow-claim")
        .setup(
            ResourceStep::manifest("install the XRD", XRD.clone())
                .ready_when(established_and_offered())
                .with_timeout(READY_TIMEOUT),
        )
        .setup(ResourceStep::manifest(
            "install the Composition",
            COMPOSITION.clone(),
        ))
        .setup(ResourceStep::manifest("create the claim", CLAIM.clone()))
        .assess(
            ResourceStep::await_conditions("claim is ready", CLAIM.object_ref(), ready())
                .with_timeout(READY_TIMEOUT),
        )
}

/// Dummy provider and its backend, a health gate, then its ProviderConfig
pub fn provider_flow(name: &str) -> Flow {
    let mut flow = Flow::new(name).setup(ResourceStep::manifest(
        "install the provider",
        PROVIDER.clone(),
    ));
    for doc in PROVIDER_SERVER.iter() {
        let reference = doc.object_ref();
        flow = flow.setup(ResourceStep::manifest(
            format!("create {}", reference),
            doc.clone(),
        ));
    }
    flow.setup(
        ResourceStep::await_conditions(
            "provider is healthy",
            PROVIDER.object_ref(),
            provider_healthy(),
        )
        .with_timeout(READY_TIMEOUT),
    )
    .setup(ResourceStep::manifest(
        "create the provider config",
        PROVIDER_CONFIG.clone(),
    ))
}
