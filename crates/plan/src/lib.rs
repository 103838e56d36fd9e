//! # Plan
//!
//! A small engine for converging machines through idempotent steps.
//!
//! Each step is a [`Resource`] that knows its desired [`State`], how to
//! observe the current one, and how to apply or undo the difference. A
//! [`Plan`] orders resources by dependency and converges them one at a
//! time, producing a [`ValidityTree`] that explains what happened.
//!
//! ## Core Concepts
//!
//! - **Graph**: deduplicated dependency edges with a deterministic topological sort
//! - **State**: JSON-like map, compared for equality to decide whether to apply
//! - **Resource**: desired state, query, apply, undo
//! - **Plan**: DAG of resources; itself a resource, so plans nest
//! - **Builder**: collects resources and reports every mistake at once
//! - **Runner**: where commands run (local shell, ssh, sudo, or a mock)
//!
//! ## Convergence
//!
//! ```ignore
//! use plan::{ApplyContext, Builder, Diff, runner::SshRunner};
//!
//! let mut b = Builder::with_id(&["install", "docker"]);
//! b.add_resource("rpm:docker", docker_rpm, &[])
//!     .add_resource("service:docker", docker_service, &["rpm:docker"]);
//! let plan = b.plan()?;
//!
//! let runner = SshRunner::new("root", "10.0.0.1");
//! let result = plan.converge(&ApplyContext::new(), &runner, &Diff::empty());
//! if !result.tree.is_valid() {
//!     eprintln!("{}", result.tree.to_json_pretty());
//! }
//! ```
//!
//! Failures never spread sideways: a resource is skipped only when
//! something it depends on failed.

pub mod builder;
pub mod context;
pub mod error;
pub mod graph;
pub mod param;
pub mod plan;
pub mod resource;
pub mod runner;
pub mod serialize;
pub mod state;
pub mod validity;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use builder::Builder;
pub use context::{ApplyContext, CancelToken};
pub use error::{BuildError, Error, Result, StateError, UndoFailure};
pub use graph::Graph;
pub use param::{Output, ParamString};
pub use plan::{Convergence, Plan, UndoCondition};
pub use resource::{Diff, Resource, ResourceDecoder, visible_state};
pub use runner::{RunError, Runner};
pub use serialize::equal_plans;
pub use state::{State, to_state};
pub use validity::{Reason, ValidityStatus, ValidityTree};
