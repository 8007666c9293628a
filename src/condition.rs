//! Status conditions and expected-condition matching
//!
//! A document reports readiness through `status.conditions`, a list of
//! `{type, status, reason, message}` entries. An [`ExpectedConditionSet`]
//! declares which types must reach which status and whether all of them or
//! any one of them has to hold ([`MatchPolicy`]).
//!
//! Matching is exact: statuses and reasons are compared as case-sensitive
//! strings, so `"true"` never satisfies `True` and `Unknown` never counts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The "Ready" condition type reported by claims and composites
pub const CONDITION_READY: &str = "Ready";
/// The "Synced" condition type reported by claims and composites
pub const CONDITION_SYNCED: &str = "Synced";
/// The "Established" condition type reported by schema definitions
pub const CONDITION_ESTABLISHED: &str = "Established";
/// The "Offered" condition type reported by schema definitions with claims
pub const CONDITION_OFFERED: &str = "Offered";
/// The "Installed" condition type reported by providers
pub const CONDITION_INSTALLED: &str = "Installed";
/// The "Healthy" condition type reported by providers
pub const CONDITION_HEALTHY: &str = "Healthy";
/// Reason attached to a provider's Healthy condition once its revision runs
pub const REASON_HEALTHY_PACKAGE_REVISION: &str = "HealthyPackageRevision";

/// A single status condition as read from a document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type (e.g. "Ready")
    #[serde(rename = "type")]
    pub type_: String,
    /// Raw status string ("True", "False", "Unknown")
    #[serde(default)]
    pub status: String,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Build a condition from its four fields
    pub fn new(
        type_: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// A condition of the given type with status `True` and no reason
    pub fn true_(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True.as_str(), "", "")
    }
}

/// Trait for types that have condition-like fields (type, status, reason)
///
/// Lets typed status structs from `k8s-openapi` be evaluated without first
/// converting them into [`Condition`].
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
    /// Get the condition reason field value, empty when unset
    fn reason_field(&self) -> &str;
}

impl HasConditionFields for Condition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn reason_field(&self) -> &str {
        &self.reason
    }
}

impl HasConditionFields for k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn reason_field(&self) -> &str {
        &self.reason
    }
}

impl HasConditionFields
    for k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionCondition
{
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn reason_field(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

impl HasConditionFields for k8s_openapi::api::core::v1::NamespaceCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
    fn reason_field(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds.iter().any(|c| {
                c.type_field() == condition_type
                    && c.status_field() == ConditionStatus::True.as_str()
            })
        })
        .unwrap_or(false)
}

/// Expected status value for a condition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The controller cannot tell yet
    Unknown,
}

impl ConditionStatus {
    /// The exact wire string for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How multiple expected conditions combine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Every expected condition must hold at the same time
    #[default]
    All,
    /// Any single expected condition is enough
    Any,
}

/// One entry of an [`ExpectedConditionSet`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedCondition {
    /// Condition type to look for
    pub type_: String,
    /// Status it must report
    pub status: ConditionStatus,
    /// Reason it must report, if any
    pub reason: Option<String>,
}

impl ExpectedCondition {
    /// Whether `condition` satisfies this expectation
    pub fn matches<T: HasConditionFields>(&self, condition: &T) -> bool {
        condition.type_field() == self.type_
            && condition.status_field() == self.status.as_str()
            && self
                .reason
                .as_deref()
                .map_or(true, |reason| condition.reason_field() == reason)
    }

    /// Whether any condition in `conditions` satisfies this expectation
    pub fn is_met_by<T: HasConditionFields>(&self, conditions: &[T]) -> bool {
        conditions.iter().any(|c| self.matches(c))
    }
}

impl fmt::Display for ExpectedCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.type_, self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({})", reason)?;
        }
        Ok(())
    }
}

/// A set of expected conditions with an explicit match policy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpectedConditionSet {
    policy: MatchPolicy,
    entries: Vec<ExpectedCondition>,
}

impl ExpectedConditionSet {
    /// Empty set that requires every entry to hold
    pub fn all() -> Self {
        Self::with_policy(MatchPolicy::All)
    }

    /// Empty set that accepts any single entry
    pub fn any() -> Self {
        Self::with_policy(MatchPolicy::Any)
    }

    /// Empty set with the given policy
    pub fn with_policy(policy: MatchPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    /// Expect `type_` to report `status`.
    ///
    /// A later entry for the same type replaces the earlier one.
    pub fn expect(self, type_: impl Into<String>, status: ConditionStatus) -> Self {
        self.insert(ExpectedCondition {
            type_: type_.into(),
            status,
            reason: None,
        })
    }

    /// Expect `type_` to report `status` with exactly `reason`
    pub fn expect_with_reason(
        self,
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
    ) -> Self {
        self.insert(ExpectedCondition {
            type_: type_.into(),
            status,
            reason: Some(reason.into()),
        })
    }

    /// Shorthand for `expect(type_, ConditionStatus::True)`
    pub fn expect_true(self, type_: impl Into<String>) -> Self {
        self.expect(type_, ConditionStatus::True)
    }

    fn insert(mut self, entry: ExpectedCondition) -> Self {
        match self.entries.iter_mut().find(|e| e.type_ == entry.type_) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    /// The declared match policy
    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Expected entries in declaration order
    pub fn entries(&self) -> &[ExpectedCondition] {
        &self.entries
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate against a document's conditions.
    ///
    /// An empty set is trivially satisfied under `All` and never under `Any`.
    pub fn is_satisfied_by<T: HasConditionFields>(&self, conditions: &[T]) -> bool {
        match self.policy {
            MatchPolicy::All => self.entries.iter().all(|e| e.is_met_by(conditions)),
            MatchPolicy::Any => self.entries.iter().any(|e| e.is_met_by(conditions)),
        }
    }

    /// Entries not met by `conditions`, for diagnostics
    pub fn unmet<'a, T: HasConditionFields>(
        &'a self,
        conditions: &[T],
    ) -> Vec<&'a ExpectedCondition> {
        self.entries
            .iter()
            .filter(|e| !e.is_met_by(conditions))
            .collect()
    }
}

impl fmt::Display for ExpectedConditionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joiner = match self.policy {
            MatchPolicy::All => " and ",
            MatchPolicy::Any => " or ",
        };
        let rendered: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        f.write_str(&rendered.join(joiner))
    }
}

/// Schema definitions: `Established=True` and `Offered=True`
pub fn established_and_offered() -> ExpectedConditionSet {
    ExpectedConditionSet::all()
        .expect_true(CONDITION_ESTABLISHED)
        .expect_true(CONDITION_OFFERED)
}

/// Providers: `Installed=True` and `Healthy=True`
pub fn installed_and_healthy() -> ExpectedConditionSet {
    ExpectedConditionSet::all()
        .expect_true(CONDITION_INSTALLED)
        .expect_true(CONDITION_HEALTHY)
}

/// Claims and composites: `Synced=True` and `Ready=True`
pub fn synced_and_ready() -> ExpectedConditionSet {
    ExpectedConditionSet::all()
        .expect_true(CONDITION_SYNCED)
        .expect_true(CONDITION_READY)
}

/// `Ready=True` alone
pub fn ready() -> ExpectedConditionSet {
    ExpectedConditionSet::all().expect_true(CONDITION_READY)
}

/// The conditions last observed on a document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConditionSnapshot(Vec<Condition>);

impl ConditionSnapshot {
    /// Wrap an observed condition list
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }

    /// The observed conditions
    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    /// Whether nothing was observed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConditionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no conditions");
        }
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|c| {
                if c.reason.is_empty() {
                    format!("{}={}", c.type_, c.status)
                } else {
                    format!("{}={} ({})", c.type_, c.status, c.reason)
                }
            })
            .collect();
        f.write_str(&rendered.join(", "))
    }
}
