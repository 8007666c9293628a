//! Object store seam
//!
//! The orchestrator never talks to a cluster directly. It consumes the
//! [`ObjectStore`] trait, which has three implementations:
//!
//! - [`KubeStore`] - Kubernetes API through kube-rs `DynamicObject`s
//! - [`KubectlStore`] - the same operations by shelling out to `kubectl`
//! - [`MemoryStore`] - in-process fake that records every call
//!
//! [`RetryingStore`] wraps any of them with backoff on transient errors.
//! Every call takes a cancellation token and must return
//! [`Error::Cancelled`] promptly once it fires.

mod api;
mod kubectl;
mod memory;
mod retrying;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use mockall::automock;

pub use api::KubeStore;
pub use kubectl::{KubectlStore, DEFAULT_KUBECTL};
pub use memory::{Action, ConvergenceRule, Fault, MemoryStore, Verb};
pub use retrying::RetryingStore;

use crate::document::{DynamicDocument, LabelSelector, ListScope, ObjectRef};
use crate::{Error, Result};

/// Typed CRUD + label-filtered list over declarative documents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the current state of a document.
    ///
    /// Returns [`Error::NotFound`] when it does not exist.
    async fn get(&self, reference: &ObjectRef, cancel: &CancellationToken)
        -> Result<DynamicDocument>;

    /// Create a document, returning what the store persisted.
    ///
    /// Returns [`Error::Conflict`] when the identity is already taken.
    async fn create(
        &self,
        document: &DynamicDocument,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument>;

    /// Delete a document by identity.
    ///
    /// Returns [`Error::NotFound`] when it does not exist.
    async fn delete(&self, reference: &ObjectRef, cancel: &CancellationToken) -> Result<()>;

    /// List documents of one kind that match `selector`
    async fn list(
        &self,
        scope: &ListScope,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamicDocument>>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get(
        &self,
        reference: &ObjectRef,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        (**self).get(reference, cancel).await
    }

    async fn create(
        &self,
        document: &DynamicDocument,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        (**self).create(document, cancel).await
    }

    async fn delete(&self, reference: &ObjectRef, cancel: &CancellationToken) -> Result<()> {
        (**self).delete(reference, cancel).await
    }

    async fn list(
        &self,
        scope: &ListScope,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamicDocument>> {
        (**self).list(scope, selector, cancel).await
    }
}

/// Race `operation` against `cancel`, returning [`Error::Cancelled`] if the
/// token fires first.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, context: &str, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(context));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(context)),
        result = operation => result,
    }
}
