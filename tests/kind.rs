//! End-to-end flows against a real cluster
//!
//! These tests need a cluster with the composition engine and the dummy
//! provider's package available. They are ignored by default and can be run
//! with:
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture --test-threads=1
//! ```
//!
//! The claim flows share fixture identities, so they must not run in
//! parallel.
//!
//! The cluster is taken from `CONVERGE_KUBECONFIG`, falling back to the
//! ambient kubeconfig. Each story picks its own transport.

#[allow(dead_code)]
mod fixtures;
mod kind_tests;
