//! Error types for plan construction, decoding and undo.

use std::fmt::Write as _;
use thiserror::Error;

/// A problem found while building a plan.
///
/// Builders collect these instead of failing on the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("resource id {0} already exists in plan")]
    Duplicate(String),

    #[error("resource id {0} not found in resources")]
    NotFound(String),

    #[error("graph node {0} is not a valid resource")]
    MissingNode(String),

    #[error("dependency cycle between {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// One resource that failed to undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoFailure {
    pub resource_id: String,
    pub error: String,
}

/// Errors returned by plan operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid plan:{}", indent(.0.iter().map(ToString::to_string)))]
    InvalidPlan(Vec<BuildError>),

    #[error("resource {0} not found in plan")]
    UnknownResource(String),

    #[error("undo of plan {plan_id} failed:{}", indent(.failures.iter().map(|f| format!("{}: {}", f.resource_id, f.error))))]
    Undo {
        plan_id: String,
        failures: Vec<UndoFailure>,
    },

    #[error("cannot decode resource {id}: {message}")]
    Decode { id: String, message: String },

    #[error("invalid plan JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from typed [`State`](crate::State) lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no value at {0}")]
    Missing(String),

    #[error("value at {path} is not {expected}")]
    WrongType { path: String, expected: &'static str },

    #[error("cannot set {path}: {segment} is not an object")]
    NotAnObject { path: String, segment: String },

    #[error("state must be a JSON object")]
    NotAMap,
}

/// Result type for plan operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

fn indent(lines: impl Iterator<Item = String>) -> String {
    let mut out = String::new();
    for line in lines {
        let _ = write!(out, "\n  {line}");
    }
    out
}
