//! Directed graph describing a composed flow of flows.
//!
//! The composer only adds nodes and edges; the finished graph is handed to a
//! registry which translates it into the scheduler's own primitives.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::FlowError;

/// Identifier of a node in the composition graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Id of the node creating the run of `flow_name`
    pub fn run(flow_name: &str) -> Self {
        NodeId(format!("{}-run", flow_name))
    }

    /// Id of the node waiting on the run of `flow_name`
    pub fn wait(flow_name: &str) -> Self {
        NodeId(format!("{}-wait", flow_name))
    }

    /// Get the string representation of the id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of a value passed to a flow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterBinding {
    /// Literal supplied through a parameter of the composed flow
    Parameter {
        /// Name of the parameter on the composed flow
        name: String,
    },

    /// Deferred reference to a task result, resolved once the task completes
    TaskResult {
        /// Run node producing the result
        run: NodeId,
        /// Slug of the task within that run's flow
        task_slug: String,
    },
}

impl ParameterBinding {
    /// Whether the binding is a deferred task result
    pub fn is_deferred(&self) -> bool {
        matches!(self, ParameterBinding::TaskResult { .. })
    }
}

/// What a node does when the composed flow executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Create a run of a registered flow
    CreateFlowRun {
        /// Registered flow name
        flow_name: String,
        /// Project the flow is registered under
        project_name: String,
        /// Run parameters keyed by the flow's own parameter names
        parameters: IndexMap<String, ParameterBinding>,
    },

    /// Wait for a run to finish
    WaitForFlowRun {
        /// Flow whose run is awaited
        flow_name: String,
        /// Fail the composed flow when the run fails
        raise_final_state: bool,
    },
}

/// A node of the composition graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node id
    pub id: NodeId,
    /// Node behaviour
    pub kind: NodeKind,
}

/// Kind of dependency between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// A wait node consumes the run it waits on
    Data,
    /// Explicit ordering: `to` may not start before `from` completes
    Upstream,
}

/// A directed edge `from` -> `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Node that must complete first
    pub from: NodeId,
    /// Dependent node
    pub to: NodeId,
    /// Dependency kind
    pub kind: EdgeKind,
}

/// Graph of run/wait nodes built during composition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl CompositionGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id
    pub fn add_node(&mut self, id: NodeId, kind: NodeKind) -> NodeId {
        self.nodes.push(Node { id: id.clone(), kind });
        id
    }

    /// Add an edge
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.edges.push(Edge { from, to, kind });
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges, in insertion order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Look up a node by id
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Nodes creating flow runs
    pub fn run_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::CreateFlowRun { .. }))
    }

    /// Nodes waiting on flow runs
    pub fn wait_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::WaitForFlowRun { .. }))
    }

    /// Explicit ordering edges
    pub fn upstream_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Upstream)
    }

    /// Sources of the upstream edges ending in `id`
    pub fn upstream_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.upstream_edges()
            .filter(|edge| &edge.to == id)
            .map(|edge| &edge.from)
            .collect()
    }

    /// Structural check of the graph.
    ///
    /// Node ids are unique, edges and deferred references point at existing
    /// nodes (references at run nodes), and the dependency graph is acyclic.
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut ids = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(FlowError::InvalidGraph(format!("Duplicate node id: {}", node.id)));
            }
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !ids.contains(end.as_str()) {
                    return Err(FlowError::InvalidGraph(format!(
                        "Edge {} -> {} references unknown node: {}",
                        edge.from, edge.to, end
                    )));
                }
            }
        }

        for node in &self.nodes {
            if let NodeKind::CreateFlowRun { parameters, .. } = &node.kind {
                for binding in parameters.values() {
                    if let ParameterBinding::TaskResult { run, .. } = binding {
                        match self.node(run).map(|n| &n.kind) {
                            Some(NodeKind::CreateFlowRun { .. }) => {}
                            _ => {
                                return Err(FlowError::InvalidGraph(format!(
                                    "Node {} references a task result of {} which is not a flow run",
                                    node.id, run
                                )))
                            }
                        }
                    }
                }
            }
        }

        self.check_for_cycles()
    }

    /// Map from node id to the ids it depends on
    fn dependency_map(&self) -> HashMap<&str, Vec<&str>> {
        let mut deps: HashMap<&str, Vec<&str>> = HashMap::with_capacity(self.nodes.len());

        for edge in &self.edges {
            deps.entry(edge.to.as_str()).or_default().push(edge.from.as_str());
        }

        // Deferred references are implicit dependencies on the producing run
        for node in &self.nodes {
            if let NodeKind::CreateFlowRun { parameters, .. } = &node.kind {
                for binding in parameters.values() {
                    if let ParameterBinding::TaskResult { run, .. } = binding {
                        deps.entry(node.id.as_str()).or_default().push(run.as_str());
                    }
                }
            }
        }

        deps
    }

    fn check_for_cycles(&self) -> Result<(), FlowError> {
        let dep_map = self.dependency_map();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.nodes {
            if Self::is_cyclic(node.id.as_str(), &dep_map, &mut visited, &mut rec_stack) {
                return Err(FlowError::InvalidGraph(format!(
                    "Cycle detected in node dependencies involving node: {}",
                    node.id
                )));
            }
        }

        Ok(())
    }

    fn is_cyclic<'a>(
        node_id: &'a str,
        dep_map: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if !visited.contains(node_id) {
            visited.insert(node_id);
            rec_stack.insert(node_id);

            if let Some(deps) = dep_map.get(node_id) {
                for &dep in deps {
                    if (!visited.contains(dep) && Self::is_cyclic(dep, dep_map, visited, rec_stack))
                        || rec_stack.contains(dep)
                    {
                        return true;
                    }
                }
            }
        }

        rec_stack.remove(node_id);
        false
    }
}
