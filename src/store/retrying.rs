//! Store decorator that retries transient failures

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ObjectStore;
use crate::document::{Document, DynamicDocument, LabelSelector, ListScope, ObjectRef};
use crate::retry::{retry_transient, RetryConfig};
use crate::{Error, Result};

/// Wraps another store and resamples calls that fail transiently.
///
/// A create can land and still report a transient error. When a retried
/// create then hits `Conflict`, the stored object is fetched and returned.
pub struct RetryingStore<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: ObjectStore> RetryingStore<S> {
    /// Wrap `inner` with the default backoff
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    /// Wrap `inner` with explicit backoff settings
    pub fn with_config(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    async fn get(
        &self,
        reference: &ObjectRef,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        retry_transient(&self.config, "get", cancel, || self.inner.get(reference, cancel)).await
    }

    async fn create(
        &self,
        document: &DynamicDocument,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        let interrupted = &AtomicBool::new(false);
        let result = retry_transient(&self.config, "create", cancel, move || async move {
            let result = self.inner.create(document, cancel).await;
            if result.as_ref().is_err_and(Error::is_transient) {
                interrupted.store(true, Ordering::Relaxed);
            }
            result
        })
        .await;

        match result {
            Err(Error::Conflict { reference }) if interrupted.load(Ordering::Relaxed) => {
                debug!(reference = %reference, "interrupted create had landed");
                self.get(&document.object_ref(), cancel).await
            }
            other => other,
        }
    }

    async fn delete(&self, reference: &ObjectRef, cancel: &CancellationToken) -> Result<()> {
        retry_transient(&self.config, "delete", cancel, || {
            self.inner.delete(reference, cancel)
        })
        .await
    }

    async fn list(
        &self,
        scope: &ListScope,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamicDocument>> {
        retry_transient(&self.config, "list", cancel, || {
            self.inner.list(scope, selector, cancel)
        })
        .await
    }
}
