//! Kubernetes API transport using kube-rs `DynamicObject`s

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{with_cancel, ObjectStore};
use crate::document::{Document, DynamicDocument, LabelSelector, ListScope, ObjectRef};
use crate::kube_utils::build_api_resource;
use crate::{Error, Result};

/// Object store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store from an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    fn api_for(&self, reference: &ObjectRef) -> Api<DynamicObject> {
        self.api(&reference.api_resource(), reference.namespace.as_deref())
    }
}

/// Map kube errors onto the store taxonomy (404 → NotFound, 409 → Conflict)
fn map_kube_error(reference: &ObjectRef, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(reference),
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(reference),
        _ => Error::from(err),
    }
}

/// Convert a `DynamicObject` read from the API into a document.
///
/// Dynamic objects from typed APIs omit `apiVersion`/`kind` in some list
/// responses, so the caller's identity fills any gaps.
fn to_document(obj: DynamicObject, api_version: &str, kind: &str) -> Result<DynamicDocument> {
    let mut value = serde_json::to_value(&obj)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    if let Some(root) = value.as_object_mut() {
        root.entry("apiVersion")
            .or_insert_with(|| serde_json::Value::String(api_version.to_string()));
        root.entry("kind")
            .or_insert_with(|| serde_json::Value::String(kind.to_string()));
    }
    DynamicDocument::from_value(value)
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        reference: &ObjectRef,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        let api = self.api_for(reference);
        let obj = with_cancel(cancel, "get", async {
            api.get(&reference.name)
                .await
                .map_err(|e| map_kube_error(reference, e))
        })
        .await?;
        to_document(obj, &reference.api_version, &reference.kind)
    }

    async fn create(
        &self,
        document: &DynamicDocument,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        let reference = document.object_ref();
        let obj: DynamicObject = serde_json::from_value(document.value().clone())
            .map_err(|e| Error::serialization_for_kind(&reference.kind, e.to_string()))?;
        let api = self.api_for(&reference);

        debug!(reference = %reference, "creating document");
        let created = with_cancel(cancel, "create", async {
            api.create(&PostParams::default(), &obj)
                .await
                .map_err(|e| map_kube_error(&reference, e))
        })
        .await?;
        to_document(created, &reference.api_version, &reference.kind)
    }

    async fn delete(&self, reference: &ObjectRef, cancel: &CancellationToken) -> Result<()> {
        let api = self.api_for(reference);
        debug!(reference = %reference, "deleting document");
        with_cancel(cancel, "delete", async {
            api.delete(&reference.name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error(reference, e))
        })
        .await
    }

    async fn list(
        &self,
        scope: &ListScope,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamicDocument>> {
        let ar = build_api_resource(&scope.api_version, &scope.kind);
        let api = self.api(&ar, scope.namespace.as_deref());
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }

        let list = with_cancel(cancel, "list", async {
            api.list(&params).await.map_err(Error::from)
        })
        .await?;

        list.items
            .into_iter()
            .map(|obj| to_document(obj, &scope.api_version, &scope.kind))
            .collect()
    }
}
