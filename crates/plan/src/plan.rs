//! Plans: dependency-ordered sets of resources.
//!
//! A [`Plan`] is built once by a [`Builder`](crate::Builder) and never changes
//! shape afterwards. Converging it walks the topological order:
//!
//! 1. A resource with an Invalid dependency is Invalid (`DependencyInvalid`)
//!    and is neither queried nor applied.
//! 2. Otherwise, a resource with an Inconclusive dependency is Inconclusive
//!    (`DependencyInconclusive`).
//! 3. The observed state comes from the caller's [`Diff`] if present, else
//!    from [`Resource::query_state`]. A query error is Inconclusive
//!    (`QueryError`).
//! 4. Observed equal to desired, with no invalidated dependency, is Valid and
//!    untouched. Anything else is applied: success is Valid and updated,
//!    failure is Invalid (`ApplyError`).
//!
//! Failures only travel towards dependents. Unrelated branches keep going.

use crate::context::ApplyContext;
use crate::error::{Error, Result, UndoFailure};
use crate::graph::Graph;
use crate::resource::{Diff, Resource, visible_state};
use crate::runner::Runner;
use crate::state::State;
use crate::validity::{Reason, ValidityStatus, ValidityTree};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a plan may be undone at all
pub type UndoCondition = Arc<dyn Fn(&dyn Runner, &State) -> bool + Send + Sync>;

/// A named DAG of resources.
pub struct Plan {
    pub(crate) id: String,
    pub(crate) resources: BTreeMap<String, Box<dyn Resource>>,
    pub(crate) graph: Graph,
    pub(crate) order: Vec<String>,
    pub(crate) undo_condition: Option<UndoCondition>,
}

/// Result of [`Plan::converge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Root tree for the plan, one child per resource in topological order
    pub tree: ValidityTree,
    /// Every resource is Valid and at least one was updated
    pub propagate: bool,
}

struct Outcome {
    tree: ValidityTree,
    propagate: bool,
}

impl Plan {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource(&self, id: &str) -> Option<&dyn Resource> {
        self.resources.get(id).map(Box::as_ref)
    }

    /// Resource IDs in lexicographic order
    pub fn resource_ids(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Direct dependencies of `id`, in the order they were declared
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.graph.sources(id)
    }

    /// Topological order used by apply (and reversed by undo)
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Gate [`undo`](Resource::undo) on a predicate over the observed state
    pub fn set_undo_condition<F>(&mut self, condition: F)
    where
        F: Fn(&dyn Runner, &State) -> bool + Send + Sync + 'static,
    {
        self.undo_condition = Some(Arc::new(condition));
    }

    /// Converge every resource and report the full tree.
    ///
    /// Entries of `diff.current_state` keyed by resource ID are used instead
    /// of querying those resources.
    pub fn converge(&self, ctx: &ApplyContext, runner: &dyn Runner, diff: &Diff) -> Convergence {
        let outcomes = self.resolve(ctx, runner, diff, &self.order);

        let mut children = Vec::with_capacity(self.order.len());
        let mut any_invalid = false;
        let mut any_inconclusive = false;
        let mut any_updated = false;
        for id in &self.order {
            if let Some(outcome) = outcomes.get(id) {
                any_invalid |= outcome.tree.is_invalid();
                any_inconclusive |= outcome.tree.is_inconclusive();
                any_updated |= outcome.tree.updated;
                children.push(outcome.tree.clone());
            }
        }

        let tree = if any_invalid {
            ValidityTree::invalid(&self.id, Reason::ChildInvalid, Vec::new())
        } else if any_inconclusive {
            ValidityTree::inconclusive(&self.id, Reason::DependencyInconclusive, Vec::new())
        } else {
            ValidityTree::valid(&self.id, any_updated, Vec::new())
        }
        .with_children(children);

        let propagate = tree.is_valid() && any_updated;
        Convergence { tree, propagate }
    }

    /// Converge `id` and everything it transitively depends on, nothing else.
    pub fn ensure_resource_valid(
        &self,
        ctx: &ApplyContext,
        runner: &dyn Runner,
        id: &str,
        diff: &Diff,
    ) -> Result<ValidityTree> {
        if !self.resources.contains_key(id) {
            return Err(Error::UnknownResource(id.to_string()));
        }
        let closure = self.dependency_closure(id);
        let order: Vec<String> = self
            .order
            .iter()
            .filter(|n| closure.contains(n.as_str()))
            .cloned()
            .collect();
        let mut outcomes = self.resolve(ctx, runner, diff, &order);
        outcomes
            .remove(id)
            .map(|o| o.tree)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))
    }

    /// Undo every resource in reverse topological order.
    ///
    /// Keeps going past failures and reports all of them. Stops issuing
    /// undos once `ctx` is cancelled.
    pub fn undo_all(&self, ctx: &ApplyContext, runner: &dyn Runner, current: &State) -> Result<()> {
        if let Some(condition) = &self.undo_condition {
            if !condition(runner, current) {
                debug!("{}: undo condition not met, skipping", self.id);
                return Ok(());
            }
        }

        let mut failures = Vec::new();
        for id in self.order.iter().rev() {
            if ctx.is_cancelled() {
                failures.push(UndoFailure {
                    resource_id: id.clone(),
                    error: "cancelled before undo".to_string(),
                });
                break;
            }
            let Some(resource) = self.resources.get(id) else {
                continue;
            };

            let observed = match cached_state(current, id) {
                Some(state) => state,
                None => match resource.query_state(ctx, runner) {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("{id}: cannot query state for undo: {e:#}");
                        failures.push(UndoFailure {
                            resource_id: id.clone(),
                            error: format!("query failed: {e:#}"),
                        });
                        continue;
                    }
                },
            };

            debug!("{id}: undo");
            if let Err(e) = resource.undo(ctx, runner, &observed) {
                warn!("{id}: undo failed: {e:#}");
                failures.push(UndoFailure {
                    resource_id: id.clone(),
                    error: format!("{e:#}"),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Undo {
                plan_id: self.id.clone(),
                failures,
            })
        }
    }

    fn dependency_closure<'a>(&'a self, id: &'a str) -> BTreeSet<&'a str> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.graph.sources(node).iter().map(String::as_str));
            }
        }
        seen
    }

    fn resolve(
        &self,
        ctx: &ApplyContext,
        runner: &dyn Runner,
        diff: &Diff,
        order: &[String],
    ) -> HashMap<String, Outcome> {
        let mut outcomes: HashMap<String, Outcome> = HashMap::with_capacity(order.len());
        for id in order {
            let outcome = self.resolve_one(ctx, runner, diff, id, &outcomes);
            outcomes.insert(id.clone(), outcome);
        }
        outcomes
    }

    fn resolve_one(
        &self,
        ctx: &ApplyContext,
        runner: &dyn Runner,
        diff: &Diff,
        id: &str,
        done: &HashMap<String, Outcome>,
    ) -> Outcome {
        let deps: Vec<(&String, &Outcome)> = self
            .graph
            .sources(id)
            .iter()
            .filter_map(|d| done.get(d).map(|o| (d, o)))
            .collect();
        let dep_trees: Vec<ValidityTree> = deps.iter().map(|(_, o)| o.tree.clone()).collect();

        if deps.iter().any(|(_, o)| o.tree.is_invalid()) {
            debug!("{id}: dependency invalid, skipping");
            return Outcome {
                tree: ValidityTree::invalid(id, Reason::DependencyInvalid, dep_trees),
                propagate: false,
            };
        }
        if deps.iter().any(|(_, o)| o.tree.is_inconclusive()) {
            debug!("{id}: dependency inconclusive, skipping");
            return Outcome {
                tree: ValidityTree::inconclusive(id, Reason::DependencyInconclusive, dep_trees),
                propagate: false,
            };
        }

        let Some(resource) = self.resources.get(id) else {
            return Outcome {
                tree: ValidityTree::invalid(id, Reason::ApplyError, dep_trees)
                    .with_error(format!("resource {id} not found in plan")),
                propagate: false,
            };
        };

        if let Some(inner) = resource.as_plan() {
            return resolve_nested(ctx, runner, diff, id, inner, dep_trees);
        }

        let invalidated: Vec<String> = deps
            .iter()
            .filter(|(_, o)| o.propagate)
            .map(|(d, _)| (*d).clone())
            .collect();

        let current = match cached_state(&diff.current_state, id) {
            Some(state) => state,
            None => match resource.query_state(ctx, runner) {
                Ok(state) => state,
                Err(e) => {
                    warn!("{id}: query failed: {e:#}");
                    return Outcome {
                        tree: ValidityTree::inconclusive(id, Reason::QueryError, dep_trees)
                            .with_error(format!("{e:#}")),
                        propagate: false,
                    };
                }
            },
        };

        let desired = resource.state();
        if current == desired && invalidated.is_empty() {
            debug!("{id}: up to date");
            return Outcome {
                tree: ValidityTree::valid(id, false, dep_trees),
                propagate: false,
            };
        }

        if invalidated.is_empty() {
            let hidden = resource.hidden_fields();
            debug!(
                "{id}: state differs\n{}",
                current.without(hidden).diff(&desired.without(hidden))
            );
        } else {
            debug!("{id}: invalidated by {}", invalidated.join(", "));
        }

        let child_diff = Diff {
            current_state: current,
            invalidated_dependencies: invalidated,
        };
        match resource.apply(ctx, runner, &child_diff) {
            Ok(propagate) => {
                info!("applied {id}");
                Outcome {
                    tree: ValidityTree::valid(id, true, dep_trees),
                    propagate,
                }
            }
            Err(e) => {
                warn!("{id}: apply failed: {e:#}");
                let children = e
                    .downcast_ref::<ValidityTree>()
                    .map(|t| t.children.clone())
                    .unwrap_or_default();
                Outcome {
                    tree: ValidityTree::invalid(id, Reason::ApplyError, dep_trees)
                        .with_error(format!("{e:#}"))
                        .with_children(children),
                    propagate: false,
                }
            }
        }
    }
}

/// Converge a nested plan in place so its children land in the parent's
/// tree. Invalid children make the node Invalid (`ApplyError`), inconclusive
/// ones make it Inconclusive and hold back its dependents.
fn resolve_nested(
    ctx: &ApplyContext,
    runner: &dyn Runner,
    diff: &Diff,
    id: &str,
    inner: &Plan,
    dep_trees: Vec<ValidityTree>,
) -> Outcome {
    let inner_diff = cached_state(&diff.current_state, id)
        .map_or_else(Diff::empty, Diff::with_current_state);
    let Convergence { tree: inner_tree, propagate } = inner.converge(ctx, runner, &inner_diff);

    let tree = match inner_tree.status {
        ValidityStatus::Valid => {
            if inner_tree.updated {
                info!("applied {id}");
            }
            ValidityTree::valid(id, inner_tree.updated, dep_trees)
        }
        ValidityStatus::Invalid => {
            warn!("{id}: nested plan failed");
            ValidityTree::invalid(id, Reason::ApplyError, dep_trees)
                .with_error(inner_tree.to_string())
        }
        ValidityStatus::Inconclusive => {
            warn!("{id}: nested plan inconclusive");
            ValidityTree::inconclusive(id, inner_tree.reason, dep_trees)
        }
    };
    Outcome {
        tree: tree.with_children(inner_tree.children),
        propagate,
    }
}

/// Cached observed state for `id`, if the caller supplied one
fn cached_state(current: &State, id: &str) -> Option<State> {
    match current.entry(id) {
        Some(Value::Object(map)) => Some(State::from(map.clone())),
        _ => None,
    }
}

impl Resource for Plan {
    fn type_name(&self) -> &'static str {
        "Plan"
    }

    /// Desired state of every resource, keyed by ID
    fn state(&self) -> State {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), r.state().into_value()))
            .collect()
    }

    /// Observed state of every resource that could be queried. Failed
    /// queries are left out, so only those resources are re-queried later.
    fn query_state(&self, ctx: &ApplyContext, runner: &dyn Runner) -> anyhow::Result<State> {
        let mut state = State::new();
        for id in &self.order {
            let Some(resource) = self.resources.get(id) else {
                continue;
            };
            match resource.query_state(ctx, runner) {
                Ok(observed) => state.insert(id.clone(), observed.into_value()),
                Err(e) => warn!("{}: cannot query {id}: {e:#}", self.id),
            }
        }
        Ok(state)
    }

    /// Converge the nested plan. Anything short of Valid is an error
    /// carrying the plan's [`ValidityTree`].
    fn apply(&self, ctx: &ApplyContext, runner: &dyn Runner, diff: &Diff) -> anyhow::Result<bool> {
        let Convergence { tree, propagate } = self.converge(ctx, runner, diff);
        match tree.status {
            ValidityStatus::Valid => Ok(propagate),
            ValidityStatus::Invalid | ValidityStatus::Inconclusive => {
                Err(anyhow::Error::new(tree))
            }
        }
    }

    fn undo(&self, ctx: &ApplyContext, runner: &dyn Runner, current: &State) -> anyhow::Result<()> {
        Ok(self.undo_all(ctx, runner, current)?)
    }

    fn as_plan(&self) -> Option<&Plan> {
        Some(self)
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("undo_condition", &self.undo_condition.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan {}", self.id)?;
        for id in &self.order {
            let kind = self.resources.get(id).map_or("?", |r| r.type_name());
            let deps = self.dependencies(id);
            if deps.is_empty() {
                writeln!(f, "  {id} [{kind}]")?;
            } else {
                writeln!(f, "  {id} [{kind}] <- {}", deps.join(", "))?;
            }
        }
        Ok(())
    }
}

/// Serialized fields of `resource`, recursing into nested plans
pub(crate) fn resource_fields(resource: &dyn Resource) -> Value {
    match resource.as_plan() {
        Some(plan) => plan.to_value(),
        None => visible_state(resource).into_value(),
    }
}
