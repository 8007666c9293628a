//! Declarative documents and their identities
//!
//! Every object the orchestrator touches is addressed by an [`ObjectRef`]
//! (apiVersion, kind, optional namespace, name). The [`Document`] trait is the
//! capability set callers depend on: identity, labels, status conditions, and
//! conversion to the JSON form that stores accept.
//!
//! Two representations implement it:
//! - [`DynamicDocument`] - JSON-backed, produced by manifest loading and by
//!   every store read
//! - [`TypedDocument`] - wraps any kube-rs `Resource` (e.g. `k8s_openapi`
//!   types) for fixtures that are easier to build in code

use std::collections::BTreeMap;
use std::fmt;

use kube::discovery::ApiResource;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::condition::Condition;
use crate::kube_utils::{build_api_resource, parse_api_version};
use crate::{Error, Result};

/// Identity of a document in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Full API version (e.g. "apiextensions.crossplane.io/v1", "v1")
    pub api_version: String,
    /// Resource kind (e.g. "Composition")
    pub kind: String,
    /// Namespace for namespaced kinds, `None` for cluster-scoped ones
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectRef {
    /// Reference a cluster-scoped object
    pub fn cluster_scoped(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    /// Reference a namespaced object
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// API group, empty for the core group
    pub fn group(&self) -> String {
        parse_api_version(&self.api_version).0
    }

    /// API version within the group
    pub fn version(&self) -> String {
        parse_api_version(&self.api_version).1
    }

    /// The `ApiResource` used to address this kind through kube-rs
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Kind (and optionally namespace) to list within
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListScope {
    /// Full API version of the listed kind
    pub api_version: String,
    /// Listed kind
    pub kind: String,
    /// Namespace to list in, `None` for all namespaces / cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ListScope {
    /// Scope covering every namespace
    pub fn all(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
        }
    }

    /// Scope limited to one namespace
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Whether `reference` falls inside this scope
    pub fn contains(&self, reference: &ObjectRef) -> bool {
        reference.api_version == self.api_version
            && reference.kind == self.kind
            && self
                .namespace
                .as_ref()
                .map_or(true, |ns| reference.namespace.as_ref() == Some(ns))
    }
}

impl fmt::Display for ListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} in {}", self.kind, ns),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Equality-based label selector (`k1=v1,k2=v2`)
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Selector matching everything
    pub fn everything() -> Self {
        Self::default()
    }

    /// Require `key=value`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Parse `k1=v1,k2=v2`; an empty string selects everything
    pub fn parse(selector: &str) -> Result<Self> {
        let mut labels = BTreeMap::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .ok_or_else(|| Error::config("label selector", format!("invalid term '{}'", term)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::config(
                    "label selector",
                    format!("empty key in '{}'", term),
                ));
            }
            labels.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self(labels))
    }

    /// Whether `labels` carries every required pair
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Whether the selector has no terms
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&terms.join(","))
    }
}

/// Capability set shared by every document representation
pub trait Document: fmt::Debug + Send + Sync {
    /// Identity of the document
    fn object_ref(&self) -> ObjectRef;

    /// `metadata.labels`
    fn labels(&self) -> BTreeMap<String, String>;

    /// `status.conditions`, empty when the status has not been populated
    fn conditions(&self) -> Vec<Condition>;

    /// Convert into the JSON-backed form stores operate on
    fn to_dynamic(&self) -> Result<DynamicDocument>;
}

/// JSON-backed document
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicDocument {
    reference: ObjectRef,
    value: Value,
}

impl DynamicDocument {
    /// Wrap a JSON object, reading its identity from `apiVersion`, `kind`,
    /// `metadata.name` and `metadata.namespace`
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::manifest("document missing kind"))?
            .to_string();
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::manifest_for_kind(&kind, "document missing apiVersion"))?
            .to_string();
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::manifest_for_kind(&kind, "document missing metadata.name"))?
            .to_string();
        let namespace = value
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(Self {
            reference: ObjectRef {
                api_version,
                kind,
                namespace,
                name,
            },
            value,
        })
    }

    /// A document carrying only identity fields, used for deletes
    pub fn identity_only(reference: &ObjectRef) -> Self {
        let mut metadata = serde_json::json!({ "name": reference.name });
        if let Some(ns) = &reference.namespace {
            metadata["namespace"] = Value::String(ns.clone());
        }
        Self {
            reference: reference.clone(),
            value: serde_json::json!({
                "apiVersion": reference.api_version,
                "kind": reference.kind,
                "metadata": metadata,
            }),
        }
    }

    /// The underlying JSON
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Merge `labels` into `metadata.labels`, keeping existing keys the
    /// document already sets
    pub fn with_labels(mut self, labels: &BTreeMap<String, String>) -> Self {
        if labels.is_empty() {
            return self;
        }
        let Some(root) = self.value.as_object_mut() else {
            return self;
        };
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            let existing = metadata
                .entry("labels")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(existing) = existing.as_object_mut() {
                for (k, v) in labels {
                    existing
                        .entry(k.clone())
                        .or_insert_with(|| Value::String(v.clone()));
                }
            }
        }
        self
    }

    /// Replace `status.conditions`.
    ///
    /// Stores use this to simulate the system under test; the orchestrator
    /// never writes status.
    pub fn set_conditions(&mut self, conditions: &[Condition]) -> Result<()> {
        let conditions = serde_json::to_value(conditions)
            .map_err(|e| Error::serialization_for_kind(&self.reference.kind, e.to_string()))?;
        let root = self.value.as_object_mut().ok_or_else(|| {
            Error::serialization_for_kind(&self.reference.kind, "document is not an object")
        })?;
        let status = root
            .entry("status")
            .or_insert_with(|| Value::Object(Default::default()));
        match status.as_object_mut() {
            Some(status) => {
                status.insert("conditions".to_string(), conditions);
                Ok(())
            }
            None => Err(Error::serialization_for_kind(
                &self.reference.kind,
                "status is not an object",
            )),
        }
    }

    /// Deserialize into a typed resource
    pub fn try_into_typed<K: DeserializeOwned>(&self) -> Result<K> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| Error::serialization_for_kind(&self.reference.kind, e.to_string()))
    }
}

impl Document for DynamicDocument {
    fn object_ref(&self) -> ObjectRef {
        self.reference.clone()
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.value
            .pointer("/metadata/labels")
            .and_then(|l| serde_json::from_value(l.clone()).ok())
            .unwrap_or_default()
    }

    fn conditions(&self) -> Vec<Condition> {
        conditions_from_value(&self.value)
    }

    fn to_dynamic(&self) -> Result<DynamicDocument> {
        Ok(self.clone())
    }
}

/// Read `status.conditions` from a JSON document.
///
/// Entries that are not condition-shaped are skipped rather than failing the
/// whole read; the status is written by the system under test.
pub fn conditions_from_value(value: &Value) -> Vec<Condition> {
    value
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| serde_json::from_value::<Condition>(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Statically typed document backed by a kube-rs `Resource`
#[derive(Clone, Debug)]
pub struct TypedDocument<K> {
    resource: K,
}

impl<K> TypedDocument<K>
where
    K: Resource<DynamicType = ()> + Serialize + Clone + fmt::Debug + Send + Sync,
{
    /// Wrap a typed resource
    pub fn new(resource: K) -> Self {
        Self { resource }
    }

    /// The wrapped resource
    pub fn resource(&self) -> &K {
        &self.resource
    }

    fn to_json(&self) -> Result<Value> {
        let mut value = serde_json::to_value(&self.resource)
            .map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))?;
        // k8s-openapi types serialize apiVersion/kind; derived CRD types may not
        if let Some(obj) = value.as_object_mut() {
            obj.entry("apiVersion")
                .or_insert_with(|| Value::String(K::api_version(&()).into_owned()));
            obj.entry("kind")
                .or_insert_with(|| Value::String(K::kind(&()).into_owned()));
        }
        Ok(value)
    }
}

impl<K> Document for TypedDocument<K>
where
    K: Resource<DynamicType = ()> + Serialize + Clone + fmt::Debug + Send + Sync,
{
    fn object_ref(&self) -> ObjectRef {
        let meta = self.resource.meta();
        ObjectRef {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            namespace: meta.namespace.clone().filter(|ns| !ns.is_empty()),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.resource.meta().labels.clone().unwrap_or_default()
    }

    fn conditions(&self) -> Vec<Condition> {
        self.to_json()
            .map(|v| conditions_from_value(&v))
            .unwrap_or_default()
    }

    fn to_dynamic(&self) -> Result<DynamicDocument> {
        DynamicDocument::from_value(self.to_json()?)
    }
}
