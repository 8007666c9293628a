//! Object store that shells out to `kubectl`
//!
//! Useful where the harness should exercise exactly the client a human
//! operator uses. Every call runs one `kubectl` process with `-o json` and
//! maps its stderr onto the store error taxonomy.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{with_cancel, ObjectStore};
use crate::document::{Document, DynamicDocument, LabelSelector, ListScope, ObjectRef};
use crate::kube_utils::{parse_api_version, pluralize_kind};
use crate::{Error, Result};

/// Default binary name, resolved through `PATH`
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// stderr fragments that indicate the API server could not be reached
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "i/o timeout",
    "TLS handshake timeout",
    "the server is currently unable to handle the request",
    "etcdserver: request timed out",
    "Unable to connect to the server",
];

/// Object store backed by the `kubectl` CLI
#[derive(Clone, Debug)]
pub struct KubectlStore {
    kubectl: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Default for KubectlStore {
    fn default() -> Self {
        Self::new(DEFAULT_KUBECTL)
    }
}

impl KubectlStore {
    /// Use the given `kubectl` binary against the ambient kubeconfig
    pub fn new(kubectl: impl Into<PathBuf>) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig: None,
        }
    }

    /// Pass `--kubeconfig` on every invocation
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    fn base_args(&self) -> Vec<String> {
        match &self.kubeconfig {
            Some(path) => vec!["--kubeconfig".to_string(), path.display().to_string()],
            None => Vec::new(),
        }
    }

    async fn run(&self, verb: &str, args: Vec<String>, stdin: Option<Vec<u8>>) -> Result<String> {
        let command = format!("kubectl {}", verb);
        let mut full_args = self.base_args();
        full_args.extend(args);
        debug!(command = %command, args = ?full_args, "running kubectl");

        let mut child = Command::new(&self.kubectl)
            .args(&full_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::command(&command, format!("failed to spawn: {}", e)))?;

        if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&payload)
                .await
                .map_err(|e| Error::command(&command, format!("failed to write stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::command(&command, e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(Error::command(
                &command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// `kubectl` resource argument (`plural.version.group`, or `plural` for core)
pub fn resource_arg(api_version: &str, kind: &str) -> String {
    let (group, version) = parse_api_version(api_version);
    let plural = pluralize_kind(kind);
    if group.is_empty() {
        plural
    } else {
        format!("{}.{}.{}", plural, version, group)
    }
}

fn namespace_args(namespace: Option<&str>) -> Vec<String> {
    match namespace {
        Some(ns) => vec!["--namespace".to_string(), ns.to_string()],
        None => Vec::new(),
    }
}

/// Arguments for reading one object
pub fn get_args(reference: &ObjectRef) -> Vec<String> {
    let mut args = vec![
        "get".to_string(),
        resource_arg(&reference.api_version, &reference.kind),
        reference.name.clone(),
    ];
    args.extend(namespace_args(reference.namespace.as_deref()));
    args.extend(["-o".to_string(), "json".to_string()]);
    args
}

/// Arguments for creating the object read from stdin
pub fn create_args() -> Vec<String> {
    ["create", "-f", "-", "-o", "json"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Arguments for deleting one object without waiting for finalizers
pub fn delete_args(reference: &ObjectRef) -> Vec<String> {
    let mut args = vec![
        "delete".to_string(),
        resource_arg(&reference.api_version, &reference.kind),
        reference.name.clone(),
    ];
    args.extend(namespace_args(reference.namespace.as_deref()));
    args.push("--wait=false".to_string());
    args
}

/// Arguments for listing a kind with a label selector
pub fn list_args(scope: &ListScope, selector: &LabelSelector) -> Vec<String> {
    let mut args = vec![
        "get".to_string(),
        resource_arg(&scope.api_version, &scope.kind),
    ];
    match scope.namespace.as_deref() {
        Some(ns) => args.extend(namespace_args(Some(ns))),
        None => args.push("--all-namespaces".to_string()),
    }
    if !selector.is_empty() {
        args.extend(["--selector".to_string(), selector.to_string()]);
    }
    args.extend(["-o".to_string(), "json".to_string()]);
    args
}

/// Reclassify a failed invocation by the server reason kubectl printed.
///
/// Only `Error from server (Reason)` counts; client-side failures such as a
/// missing resource mapping stay `Command` errors.
fn classify(reference: &str, err: Error) -> Error {
    let Error::Command { command, message } = &err else {
        return err;
    };
    if message.contains("(NotFound)") {
        Error::not_found(reference)
    } else if message.contains("(AlreadyExists)") {
        Error::conflict(reference)
    } else if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        Error::unavailable(command.as_str(), message.as_str())
    } else {
        err
    }
}

fn parse_document(stdout: &str, kind: &str) -> Result<DynamicDocument> {
    let value: Value = serde_json::from_str(stdout)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    DynamicDocument::from_value(value)
}

fn parse_list(stdout: &str, kind: &str) -> Result<Vec<DynamicDocument>> {
    let value: Value = serde_json::from_str(stdout)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    value
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().cloned().map(DynamicDocument::from_value).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

#[async_trait]
impl ObjectStore for KubectlStore {
    async fn get(
        &self,
        reference: &ObjectRef,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        let stdout = with_cancel(cancel, "get", async {
            self.run("get", get_args(reference), None)
                .await
                .map_err(|e| classify(&reference.to_string(), e))
        })
        .await?;
        parse_document(&stdout, &reference.kind)
    }

    async fn create(
        &self,
        document: &DynamicDocument,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        let reference = document.object_ref();
        let payload = serde_json::to_vec(document.value())
            .map_err(|e| Error::serialization_for_kind(&reference.kind, e.to_string()))?;
        let stdout = with_cancel(cancel, "create", async {
            self.run("create", create_args(), Some(payload))
                .await
                .map_err(|e| classify(&reference.to_string(), e))
        })
        .await?;
        parse_document(&stdout, &reference.kind)
    }

    async fn delete(&self, reference: &ObjectRef, cancel: &CancellationToken) -> Result<()> {
        with_cancel(cancel, "delete", async {
            self.run("delete", delete_args(reference), None)
                .await
                .map(|_| ())
                .map_err(|e| classify(&reference.to_string(), e))
        })
        .await
    }

    async fn list(
        &self,
        scope: &ListScope,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamicDocument>> {
        let stdout = with_cancel(cancel, "list", async {
            self.run("get", list_args(scope, selector), None)
                .await
                .map_err(|e| classify(&scope.to_string(), e))
        })
        .await?;
        parse_list(&stdout, &scope.kind)
    }
}
