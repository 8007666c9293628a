//! In-process object store for tests and dry runs
//!
//! Records every call it receives, can make documents converge after a
//! number of reads, and can inject failures per verb/kind/name.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{with_cancel, ObjectStore};
use crate::condition::Condition;
use crate::document::{Document, DynamicDocument, LabelSelector, ListScope, ObjectRef};
use crate::{Error, Result};

/// Store operation, used to classify recorded calls and target faults
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `ObjectStore::get`
    Get,
    /// `ObjectStore::create`
    Create,
    /// `ObjectStore::delete`
    Delete,
    /// `ObjectStore::list`
    List,
}

impl Verb {
    /// Lowercase name used in error contexts
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Delete => "delete",
            Verb::List => "list",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call received by a [`MemoryStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// A read of one document
    Get(ObjectRef),
    /// A create, recorded even if it was rejected
    Create(ObjectRef),
    /// A delete, recorded even if the document was absent
    Delete(ObjectRef),
    /// A list over one kind
    List(ListScope),
}

impl Action {
    /// The verb of this call
    pub fn verb(&self) -> Verb {
        match self {
            Action::Get(_) => Verb::Get,
            Action::Create(_) => Verb::Create,
            Action::Delete(_) => Verb::Delete,
            Action::List(_) => Verb::List,
        }
    }

    /// The document addressed, `None` for lists
    pub fn reference(&self) -> Option<&ObjectRef> {
        match self {
            Action::Get(r) | Action::Create(r) | Action::Delete(r) => Some(r),
            Action::List(_) => None,
        }
    }
}

/// Rewrites the status of matching documents once they have been read
/// enough times, standing in for a controller reconciling them.
#[derive(Clone, Debug)]
pub struct ConvergenceRule {
    kind: String,
    name: Option<String>,
    conditions: Vec<Condition>,
    after_reads: u32,
}

impl ConvergenceRule {
    /// Documents of `kind` report `conditions` from their first read on
    pub fn new(kind: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            conditions,
            after_reads: 1,
        }
    }

    /// Restrict the rule to one document name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Apply the conditions on the `reads`-th get; 0 applies them at create
    pub fn after_reads(mut self, reads: u32) -> Self {
        self.after_reads = reads;
        self
    }

    fn matches(&self, reference: &ObjectRef) -> bool {
        self.kind == reference.kind && self.name.as_ref().map_or(true, |n| *n == reference.name)
    }
}

/// Injected failure for calls matching a verb and optionally a kind or name
#[derive(Clone, Debug)]
pub struct Fault {
    verb: Verb,
    kind: Option<String>,
    name: Option<String>,
    transient: bool,
    remaining: Option<u32>,
}

impl Fault {
    /// Fail every matching `verb` call with a permanent error
    pub fn on(verb: Verb) -> Self {
        Self {
            verb,
            kind: None,
            name: None,
            transient: false,
            remaining: None,
        }
    }

    /// Only calls addressing `kind`
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Only calls addressing `name`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Fail with [`Error::Unavailable`] instead of a permanent error
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Fire `count` times, then stop matching
    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }

    fn matches(&self, verb: Verb, kind: &str, name: Option<&str>) -> bool {
        self.verb == verb
            && self.remaining != Some(0)
            && self.kind.as_deref().map_or(true, |k| k == kind)
            && self.name.as_deref().map_or(true, |n| Some(n) == name)
    }

    fn to_error(&self, target: &str) -> Error {
        if self.transient {
            Error::unavailable(self.verb.as_str(), format!("injected fault on {}", target))
        } else {
            Error::internal_with_context(
                self.verb.as_str(),
                format!("injected fault on {}", target),
            )
        }
    }
}

#[derive(Clone, Debug)]
struct StoredObject {
    document: DynamicDocument,
    reads: u32,
}

/// In-memory [`ObjectStore`].
///
/// Documents are keyed by identity. Creating an existing identity returns
/// [`Error::Conflict`]; reading or deleting a missing one returns
/// [`Error::NotFound`].
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<ObjectRef, StoredObject>,
    actions: Mutex<Vec<Action>>,
    rules: Mutex<Vec<ConvergenceRule>>,
    faults: Mutex<Vec<Fault>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` (still subject to cancellation)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add a convergence rule
    pub fn with_rule(self, rule: ConvergenceRule) -> Self {
        self.rules.lock().push(rule);
        self
    }

    /// Add an injected fault
    pub fn with_fault(self, fault: Fault) -> Self {
        self.faults.lock().push(fault);
        self
    }

    /// Seed a document without recording an action
    pub fn insert(&self, document: DynamicDocument) {
        self.objects.insert(
            document.object_ref(),
            StoredObject { document, reads: 0 },
        );
    }

    /// Overwrite the status conditions of a stored document
    pub fn set_conditions(&self, reference: &ObjectRef, conditions: &[Condition]) -> Result<()> {
        let mut stored = self
            .objects
            .get_mut(reference)
            .ok_or_else(|| Error::not_found(reference))?;
        stored.document.set_conditions(conditions)
    }

    /// Whether a document with this identity is stored
    pub fn contains(&self, reference: &ObjectRef) -> bool {
        self.objects.contains_key(reference)
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no documents
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every call received so far, in order
    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    /// Identities passed to `create`, in call order
    pub fn creates(&self) -> Vec<ObjectRef> {
        self.references_for(Verb::Create)
    }

    /// Identities passed to `delete`, in call order
    pub fn deletes(&self) -> Vec<ObjectRef> {
        self.references_for(Verb::Delete)
    }

    fn references_for(&self, verb: Verb) -> Vec<ObjectRef> {
        self.actions
            .lock()
            .iter()
            .filter(|a| a.verb() == verb)
            .filter_map(|a| a.reference().cloned())
            .collect()
    }

    fn record(&self, action: Action) {
        self.actions.lock().push(action);
    }

    fn check_fault(&self, verb: Verb, kind: &str, name: Option<&str>, target: &str) -> Result<()> {
        let mut faults = self.faults.lock();
        if let Some(fault) = faults.iter_mut().find(|f| f.matches(verb, kind, name)) {
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(fault.to_error(target));
        }
        Ok(())
    }

    fn converge(&self, stored: &mut StoredObject) -> Result<()> {
        let reference = stored.document.object_ref();
        let rule = self
            .rules
            .lock()
            .iter()
            .find(|r| r.matches(&reference) && stored.reads >= r.after_reads)
            .cloned();
        if let Some(rule) = rule {
            trace!(reference = %reference, reads = stored.reads, "applying convergence rule");
            stored.document.set_conditions(&rule.conditions)?;
        }
        Ok(())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn get_now(&self, reference: &ObjectRef) -> Result<DynamicDocument> {
        self.check_fault(
            Verb::Get,
            &reference.kind,
            Some(&reference.name),
            &reference.to_string(),
        )?;
        let mut stored = self
            .objects
            .get_mut(reference)
            .ok_or_else(|| Error::not_found(reference))?;
        stored.reads += 1;
        self.converge(&mut stored)?;
        Ok(stored.document.clone())
    }

    fn create_now(&self, document: &DynamicDocument) -> Result<DynamicDocument> {
        let reference = document.object_ref();
        self.check_fault(
            Verb::Create,
            &reference.kind,
            Some(&reference.name),
            &reference.to_string(),
        )?;
        let entry = self.objects.entry(reference.clone());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::conflict(&reference)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = StoredObject {
                    document: document.clone(),
                    reads: 0,
                };
                self.converge(&mut stored)?;
                let persisted = stored.document.clone();
                slot.insert(stored);
                Ok(persisted)
            }
        }
    }

    fn delete_now(&self, reference: &ObjectRef) -> Result<()> {
        self.check_fault(
            Verb::Delete,
            &reference.kind,
            Some(&reference.name),
            &reference.to_string(),
        )?;
        self.objects
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(reference))
    }

    fn list_now(&self, scope: &ListScope, selector: &LabelSelector) -> Result<Vec<DynamicDocument>> {
        self.check_fault(Verb::List, &scope.kind, None, &scope.to_string())?;
        let mut matched = Vec::new();
        for mut entry in self.objects.iter_mut() {
            if !scope.contains(entry.key()) || !selector.matches(&entry.document.labels()) {
                continue;
            }
            // Listing counts as a read for convergence
            let stored = entry.value_mut();
            stored.reads += 1;
            self.converge(stored)?;
            matched.push(stored.document.clone());
        }
        matched.sort_by_key(|d| d.object_ref());
        Ok(matched)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        reference: &ObjectRef,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        self.record(Action::Get(reference.clone()));
        with_cancel(cancel, "get", async {
            self.delay().await;
            self.get_now(reference)
        })
        .await
    }

    async fn create(
        &self,
        document: &DynamicDocument,
        cancel: &CancellationToken,
    ) -> Result<DynamicDocument> {
        self.record(Action::Create(document.object_ref()));
        with_cancel(cancel, "create", async {
            self.delay().await;
            self.create_now(document)
        })
        .await
    }

    async fn delete(&self, reference: &ObjectRef, cancel: &CancellationToken) -> Result<()> {
        self.record(Action::Delete(reference.clone()));
        with_cancel(cancel, "delete", async {
            self.delay().await;
            self.delete_now(reference)
        })
        .await
    }

    async fn list(
        &self,
        scope: &ListScope,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DynamicDocument>> {
        self.record(Action::List(scope.clone()));
        with_cancel(cancel, "list", async {
            self.delay().await;
            self.list_now(scope, selector)
        })
        .await
    }
}
