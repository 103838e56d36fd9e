//! The Resource trait
//!
//! A resource is one piece of desired configuration on a machine: a package,
//! a file, a running service, a command to run. Plans order resources by
//! dependency and converge each one by comparing [`Resource::state`] with
//! [`Resource::query_state`].

use crate::context::ApplyContext;
use crate::plan::Plan;
use crate::runner::Runner;
use crate::state::State;
use anyhow::Result;
use serde_json::Value;
use std::fmt;

/// Convergence context handed to [`Resource::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// Observed state of the resource. For a plan, a map from resource ID
    /// to observed state; entries found there are trusted instead of
    /// re-queried.
    pub current_state: State,
    /// Dependencies that changed in a way their dependents must react to
    pub invalidated_dependencies: Vec<String>,
}

impl Diff {
    /// Diff with no observed state and no invalidated dependencies
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_current_state(current_state: State) -> Self {
        Self {
            current_state,
            invalidated_dependencies: Vec::new(),
        }
    }
}

/// Core trait for plan resources.
///
/// Implementations must keep [`state`](Resource::state) a pure function of
/// their own fields so repeated calls compare equal.
///
/// # Example
///
/// ```
/// use plan::{ApplyContext, Diff, Resource, Runner, State, to_state};
/// use serde::Serialize;
///
/// #[derive(Debug, Serialize)]
/// struct Hostname {
///     name: String,
/// }
///
/// impl Resource for Hostname {
///     fn type_name(&self) -> &'static str {
///         "Hostname"
///     }
///
///     fn state(&self) -> State {
///         to_state(self)
///     }
///
///     fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> anyhow::Result<State> {
///         let name = runner.run_command(ctx, "hostname", None)?;
///         Ok(to_state(&Hostname { name: name.trim().to_string() }))
///     }
///
///     fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, _diff: &Diff) -> anyhow::Result<bool> {
///         runner.run_command(ctx, &format!("hostnamectl set-hostname {}", self.name), None)?;
///         Ok(true)
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Type tag used in serialized plans, e.g. `"RPM"`
    fn type_name(&self) -> &'static str;

    /// Desired state
    fn state(&self) -> State;

    /// Top-level state keys left out of serialized plans.
    ///
    /// Hidden fields still take part in convergence.
    fn hidden_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Observe the machine. The default observes nothing, which makes
    /// every apply run.
    fn query_state(&self, _ctx: &ApplyContext, _runner: &dyn Runner) -> Result<State> {
        Ok(State::empty())
    }

    /// Converge the machine towards [`state`](Resource::state).
    ///
    /// Returns whether dependents should treat this resource as changed.
    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, diff: &Diff) -> Result<bool>;

    /// Revert what [`apply`](Resource::apply) did. `current` is the
    /// observed state.
    fn undo(&self, _ctx: &ApplyContext, _runner: &dyn Runner, _current: &State) -> Result<()> {
        Ok(())
    }

    /// Set for nested plans
    fn as_plan(&self) -> Option<&Plan> {
        None
    }
}

/// Serialized fields of a resource: its state without hidden fields
pub fn visible_state(resource: &dyn Resource) -> State {
    resource.state().without(resource.hidden_fields())
}

/// Rebuilds resources from their serialized form.
///
/// Plans decode nested plans themselves; every other type tag is handed to
/// the decoder.
pub trait ResourceDecoder {
    fn decode(&self, type_name: &str, fields: Value) -> Result<Box<dyn Resource>>;
}

impl<F> ResourceDecoder for F
where
    F: Fn(&str, Value) -> Result<Box<dyn Resource>>,
{
    fn decode(&self, type_name: &str, fields: Value) -> Result<Box<dyn Resource>> {
        self(type_name, fields)
    }
}
