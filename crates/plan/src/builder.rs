//! Fluent plan construction.
//!
//! Mistakes are collected as they happen and reported together by
//! [`Builder::plan`], so long chains of `add_resource` calls need no error
//! handling in between.

use crate::error::{BuildError, Error, Result};
use crate::graph::Graph;
use crate::plan::{Plan, UndoCondition};
use crate::resource::Resource;
use crate::runner::Runner;
use crate::state::State;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Accumulates resources and dependency edges.
///
/// ```
/// use plan::Builder;
/// # use plan::{ApplyContext, Diff, Resource, Runner, State};
/// # #[derive(Debug)]
/// # struct Noop;
/// # impl Resource for Noop {
/// #     fn type_name(&self) -> &'static str { "Noop" }
/// #     fn state(&self) -> State { State::empty() }
/// #     fn apply(&self, _: &ApplyContext, _: &dyn Runner, _: &Diff) -> anyhow::Result<bool> { Ok(false) }
/// # }
///
/// let mut b = Builder::with_id(&["install", "docker"]);
/// b.add_resource("rpm:docker", Noop, &[])
///     .add_resource("file:daemon.json", Noop, &["rpm:docker"])
///     .add_resource("service:docker", Noop, &["rpm:docker", "file:daemon.json"]);
///
/// let plan = b.plan().unwrap();
/// assert_eq!(plan.id(), "install-docker");
/// assert_eq!(plan.order(), ["rpm:docker", "file:daemon.json", "service:docker"]);
/// ```
#[derive(Debug)]
pub struct Builder {
    plan: Plan,
    errors: Vec<BuildError>,
}

impl Builder {
    /// Builder for a plan with a generated `plan-<uuid>` ID
    pub fn new() -> Self {
        Self::with_raw_id(format!("plan-{}", Uuid::new_v4()))
    }

    /// Builder for a plan whose ID is `segments` joined with `-`.
    /// No segments gives a generated ID.
    pub fn with_id<S: AsRef<str>>(segments: &[S]) -> Self {
        if segments.is_empty() {
            return Self::new();
        }
        let id = segments
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("-");
        Self::with_raw_id(id)
    }

    fn with_raw_id(id: String) -> Self {
        Self {
            plan: Plan {
                id,
                resources: BTreeMap::new(),
                graph: Graph::new(),
                order: Vec::new(),
                undo_condition: None,
            },
            errors: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.plan.id
    }

    /// Register `resource` under `id`, depending on `deps`
    pub fn add_resource<R: Resource + 'static>(
        &mut self,
        id: impl Into<String>,
        resource: R,
        deps: &[&str],
    ) -> &mut Self {
        self.add_boxed(id, Box::new(resource), deps)
    }

    /// Register an already boxed resource
    pub fn add_boxed(
        &mut self,
        id: impl Into<String>,
        resource: Box<dyn Resource>,
        deps: &[&str],
    ) -> &mut Self {
        let id = id.into();
        if self.plan.resources.contains_key(&id) {
            self.errors.push(BuildError::Duplicate(id));
            return self;
        }
        self.plan.graph.add_node(&id);
        for dep in deps {
            self.plan.graph.add_edge(dep, &id);
        }
        self.plan.resources.insert(id, resource);
        self
    }

    /// Move the resource stored under `id` in `resources` into the plan
    pub fn add_resource_from(
        &mut self,
        id: &str,
        resources: &mut BTreeMap<String, Box<dyn Resource>>,
        deps: &[&str],
    ) -> &mut Self {
        match resources.remove(id) {
            Some(resource) => self.add_boxed(id, resource, deps),
            None => {
                self.errors.push(BuildError::NotFound(id.to_string()));
                self
            }
        }
    }

    /// Gate undo of the built plan, see [`Plan::set_undo_condition`]
    pub fn set_undo_condition<F>(&mut self, condition: F) -> &mut Self
    where
        F: Fn(&dyn Runner, &State) -> bool + Send + Sync + 'static,
    {
        let condition: UndoCondition = Arc::new(condition);
        self.plan.undo_condition = Some(condition);
        self
    }

    /// Errors collected so far, not including final validation
    pub fn errors(&self) -> &[BuildError] {
        &self.errors
    }

    /// Validate and return the plan.
    ///
    /// Fails if any error was collected, if a dependency names a resource
    /// that was never added, or if the dependencies form a cycle.
    pub fn plan(self) -> Result<Plan> {
        let Self {
            mut plan,
            mut errors,
        } = self;

        for node in plan.graph.nodes() {
            if !plan.resources.contains_key(node) {
                errors.push(BuildError::MissingNode(node.to_string()));
            }
        }

        let (order, acyclic) = plan.graph.toposort();
        if !acyclic {
            errors.push(BuildError::Cycle(plan.graph.unsorted()));
        }

        if !errors.is_empty() {
            return Err(Error::InvalidPlan(errors));
        }
        plan.order = order;
        Ok(plan)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fake;

    #[test]
    fn test_generated_and_segmented_ids() {
        let generated = Builder::new();
        assert!(generated.id().starts_with("plan-"));
        assert_eq!(generated.id().len(), "plan-".len() + 36);
        assert_ne!(Builder::new().id(), generated.id());

        assert_eq!(Builder::with_id(&["upgrade", "node", "1"]).id(), "upgrade-node-1");
        let none: [&str; 0] = [];
        assert!(Builder::with_id(&none).id().starts_with("plan-"));
    }

    #[test]
    fn test_docker_plan_order() {
        let mut b = Builder::new();
        b.add_resource("rpm:docker", Fake::new("docker-rpm"), &[])
            .add_resource("file:daemon.json", Fake::new("daemon"), &["rpm:docker"])
            .add_resource(
                "service:docker",
                Fake::new("docker-svc"),
                &["rpm:docker", "file:daemon.json"],
            );
        assert!(b.errors().is_empty());

        let plan = b.plan().unwrap();
        assert_eq!(plan.order(), ["rpm:docker", "file:daemon.json", "service:docker"]);
        assert_eq!(plan.dependencies("service:docker"), ["rpm:docker", "file:daemon.json"]);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_missing_dependencies_are_all_reported() {
        let mut b = Builder::new();
        b.add_resource("service:kubelet", Fake::new("kubelet"), &["rpm:k8s", "file:conf"]);

        let err = b.plan().unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("invalid plan:\n"));
        assert!(msg.contains("graph node rpm:k8s is not a valid resource"));
        assert!(msg.contains("graph node file:conf is not a valid resource"));
        assert!(matches!(err, Error::InvalidPlan(ref errs) if errs.len() == 2));
    }

    #[test]
    fn test_duplicate_id_is_collected() {
        let mut b = Builder::new();
        b.add_resource("a", Fake::new("a"), &[])
            .add_resource("a", Fake::new("again"), &[]);
        assert_eq!(b.errors(), [BuildError::Duplicate("a".into())]);
        assert!(b.plan().is_err());
    }

    #[test]
    fn test_cycle_is_a_build_error() {
        let mut b = Builder::new();
        b.add_resource("a", Fake::new("a"), &["b"])
            .add_resource("b", Fake::new("b"), &["a"]);
        let Err(Error::InvalidPlan(errs)) = b.plan() else {
            panic!("expected invalid plan");
        };
        assert_eq!(errs, vec![BuildError::Cycle(vec!["a".into(), "b".into()])]);
    }

    #[test]
    fn test_add_resource_from() {
        let mut pool: BTreeMap<String, Box<dyn Resource>> = BTreeMap::new();
        pool.insert("rpm:docker".into(), Box::new(Fake::new("docker")));

        let mut b = Builder::new();
        b.add_resource_from("rpm:docker", &mut pool, &[])
            .add_resource_from("rpm:k8s", &mut pool, &["rpm:docker"]);

        assert!(pool.is_empty());
        assert_eq!(b.errors(), [BuildError::NotFound("rpm:k8s".into())]);
        assert_eq!(b.errors()[0].to_string(), "resource id rpm:k8s not found in resources");
    }
}
