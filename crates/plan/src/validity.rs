//! Validity trees: the diagnostic result of converging a plan.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of converging one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidityStatus {
    /// Already in the desired state, or successfully applied
    Valid,
    /// Applying failed, or something it depends on did
    Invalid,
    /// Could not tell whether the resource needs applying
    Inconclusive,
}

/// Why a resource ended in its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    None,
    ApplyError,
    QueryError,
    DependencyInvalid,
    DependencyInconclusive,
    ChildInvalid,
}

/// Recursive convergence report.
///
/// `dependencies` mirrors the dependency graph; `children` holds the
/// resources inside a nested plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityTree {
    pub resource_id: String,
    pub status: ValidityStatus,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_error: Option<String>,
    #[serde(default)]
    pub updated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ValidityTree>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ValidityTree>,
}

impl ValidityTree {
    pub fn valid(resource_id: impl Into<String>, updated: bool, dependencies: Vec<Self>) -> Self {
        Self {
            resource_id: resource_id.into(),
            status: ValidityStatus::Valid,
            reason: Reason::None,
            observed_error: None,
            updated,
            dependencies,
            children: Vec::new(),
        }
    }

    pub fn invalid(resource_id: impl Into<String>, reason: Reason, dependencies: Vec<Self>) -> Self {
        Self {
            status: ValidityStatus::Invalid,
            reason,
            ..Self::valid(resource_id, false, dependencies)
        }
    }

    pub fn inconclusive(
        resource_id: impl Into<String>,
        reason: Reason,
        dependencies: Vec<Self>,
    ) -> Self {
        Self {
            status: ValidityStatus::Inconclusive,
            reason,
            ..Self::valid(resource_id, false, dependencies)
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.observed_error = Some(error.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        self.children = children;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidityStatus::Valid
    }

    pub fn is_invalid(&self) -> bool {
        self.status == ValidityStatus::Invalid
    }

    pub fn is_inconclusive(&self) -> bool {
        self.status == ValidityStatus::Inconclusive
    }

    /// First node with this ID, searching children before dependencies
    pub fn find(&self, resource_id: &str) -> Option<&Self> {
        if self.resource_id == resource_id {
            return Some(self);
        }
        self.children
            .iter()
            .chain(&self.dependencies)
            .find_map(|t| t.find(resource_id))
    }

    /// Nodes whose own query or apply failed, deduplicated by ID
    pub fn failures(&self) -> Vec<&Self> {
        let mut out: Vec<&Self> = Vec::new();
        self.collect_failures(&mut out);
        out
    }

    fn collect_failures<'a>(&'a self, out: &mut Vec<&'a Self>) {
        for tree in self.children.iter().chain(&self.dependencies) {
            tree.collect_failures(out);
        }
        let own_failure = matches!(self.reason, Reason::ApplyError | Reason::QueryError);
        if own_failure && !out.iter().any(|t| t.resource_id == self.resource_id) {
            out.push(self);
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for ValidityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ValidityTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is {}", self.resource_id, self.status)?;
        if self.reason != Reason::None {
            write!(f, " ({})", self.reason)?;
        }
        let failures: Vec<&str> = self
            .failures()
            .iter()
            .filter(|t| t.resource_id != self.resource_id)
            .map(|t| t.resource_id.as_str())
            .collect();
        if !failures.is_empty() {
            write!(f, ": failed resources: {}", failures.join(", "))?;
        } else if let Some(err) = &self.observed_error {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidityTree {}
