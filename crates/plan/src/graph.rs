//! Directed graph over resource IDs.
//!
//! Edges are deduplicated and keep the order in which they were discovered.
//! [`Graph::toposort`] always picks the lexicographically smallest ready
//! node, so the order depends on the graph alone, not on insertion order.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    /// Outgoing edges, in discovery order
    outputs: Vec<String>,
    /// Incoming edges, in discovery order
    inputs: Vec<String>,
}

/// Adjacency structure keyed by node ID.
///
/// An edge `from -> to` means `to` depends on `from`: `from` must be
/// resolved first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: BTreeMap<String, Node>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Returns `true` if it was not already present.
    pub fn add_node(&mut self, id: &str) -> bool {
        if self.nodes.contains_key(id) {
            return false;
        }
        self.nodes.insert(id.to_string(), Node::default());
        true
    }

    /// Add several nodes at once
    pub fn add_nodes<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.add_node(id.as_ref());
        }
    }

    /// Register `from -> to`, adding both nodes if needed.
    ///
    /// Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        self.add_node(to);
        let source = self.nodes.entry(from.to_string()).or_default();
        if source.outputs.iter().any(|t| t == to) {
            return false;
        }
        source.outputs.push(to.to_string());
        self.nodes
            .entry(to.to_string())
            .or_default()
            .inputs
            .push(from.to_string());
        true
    }

    /// Remove `from -> to`. Returns `false` if there was no such edge.
    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let Some(source) = self.nodes.get_mut(from) else {
            return false;
        };
        let before = source.outputs.len();
        source.outputs.retain(|t| t != to);
        if source.outputs.len() == before {
            return false;
        }
        if let Some(target) = self.nodes.get_mut(to) {
            target.inputs.retain(|s| s != from);
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node IDs in lexicographic order
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Nodes that depend on `id`, in discovery order
    pub fn targets(&self, id: &str) -> &[String] {
        self.nodes.get(id).map_or(&[], |n| n.outputs.as_slice())
    }

    /// Nodes `id` depends on, in discovery order
    pub fn sources(&self, id: &str) -> &[String] {
        self.nodes.get(id).map_or(&[], |n| n.inputs.as_slice())
    }

    /// All edges as `(from, to)` pairs
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .iter()
            .flat_map(|(from, node)| node.outputs.iter().map(move |to| (from.as_str(), to.as_str())))
            .collect()
    }

    /// Return a copy of this graph with every edge reversed
    pub fn invert(&self) -> Self {
        let mut inverted = Self::new();
        inverted.add_nodes(self.nodes.keys());
        for (from, to) in self.edges() {
            inverted.add_edge(to, from);
        }
        inverted
    }

    /// Kahn's algorithm, smallest ready ID first.
    ///
    /// Returns the order and `true` when the graph is acyclic. On a cycle the
    /// partial order is returned with `false`; nodes on or behind the cycle
    /// are missing from it.
    pub fn toposort(&self) -> (Vec<String>, bool) {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (id.as_str(), node.inputs.len()))
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for target in self.targets(id) {
                if let Some(degree) = in_degree.get_mut(target.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(target.as_str());
                    }
                }
            }
        }

        let acyclic = order.len() == self.nodes.len();
        (order, acyclic)
    }

    /// Nodes that never made it into the topological order
    pub fn unsorted(&self) -> Vec<String> {
        let (order, _) = self.toposort();
        self.nodes
            .keys()
            .filter(|id| !order.contains(id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|n| n == id).unwrap()
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut g = Graph::new();
        assert!(g.add_node("a"));
        assert!(!g.add_node("a"));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_add_edge_dedupes() {
        let mut g = Graph::new();
        assert!(g.add_edge("a", "b"));
        assert!(!g.add_edge("a", "b"));
        assert_eq!(g.edges(), vec![("a", "b")]);
        assert_eq!(g.sources("b"), ["a".to_string()]);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_remove_edge() {
        let mut g = Graph::new();
        g.add_edge("a", "b");
        assert!(g.remove_edge("a", "b"));
        assert!(!g.remove_edge("a", "b"));
        assert!(g.sources("b").is_empty());
        assert!(g.contains("a") && g.contains("b"));
    }

    #[test]
    fn test_toposort_respects_every_edge() {
        let mut g = Graph::new();
        g.add_edge("bottom", "middle1");
        g.add_edge("bottom", "middle2");
        g.add_edge("middle1", "top");
        g.add_edge("middle2", "top");
        g.add_edge("other", "top");
        g.add_node("lonely");

        let (order, ok) = g.toposort();
        assert!(ok);
        assert_eq!(order.len(), g.len());
        for (from, to) in g.edges() {
            assert!(position(&order, from) < position(&order, to), "{from} -> {to}");
        }
    }

    #[test]
    fn test_toposort_docker_example() {
        let mut g = Graph::new();
        g.add_node("rpm:docker");
        g.add_edge("rpm:docker", "file:daemon.json");
        g.add_edge("rpm:docker", "service:docker");
        g.add_edge("file:daemon.json", "service:docker");

        let (order, ok) = g.toposort();
        assert!(ok);
        assert_eq!(order, vec!["rpm:docker", "file:daemon.json", "service:docker"]);
    }

    #[test]
    fn test_toposort_ties_are_lexicographic() {
        let mut g = Graph::new();
        g.add_nodes(["c", "a", "b"]);
        let (order, _) = g.toposort();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_toposort_ignores_insertion_order() {
        let mut first = Graph::new();
        first.add_edge("install:docker", "kubectl:weave");
        first.add_edge("install:docker", "kubeadm:join");
        first.add_edge("deb:kubelet", "kubeadm:join");

        let mut second = Graph::new();
        second.add_edge("deb:kubelet", "kubeadm:join");
        second.add_edge("install:docker", "kubeadm:join");
        second.add_edge("install:docker", "kubectl:weave");

        let (order, ok) = first.toposort();
        assert!(ok);
        assert_eq!(
            order,
            vec!["deb:kubelet", "install:docker", "kubeadm:join", "kubectl:weave"]
        );
        assert_eq!(second.toposort().0, order);
    }

    #[test]
    fn test_toposort_detects_cycle() {
        let mut g = Graph::new();
        g.add_edge("start", "a");
        g.add_edge("a", "b");
        g.add_edge("b", "a");

        let (order, ok) = g.toposort();
        assert!(!ok);
        assert_eq!(order, vec!["start"]);
        assert_eq!(g.unsorted(), vec!["a", "b"]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut g = Graph::new();
        g.add_edge("a", "a");
        assert!(!g.toposort().1);
    }

    #[test]
    fn test_invert() {
        let mut g = Graph::new();
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        let inv = g.invert();

        assert_eq!(inv.edges(), vec![("b", "a"), ("c", "b")]);
        assert_eq!(inv.toposort().0, vec!["c", "b", "a"]);
        // original untouched
        assert_eq!(g.toposort().0, vec!["a", "b", "c"]);
    }
}
