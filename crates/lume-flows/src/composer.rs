//! Flow-of-flows composer.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::error::FlowError;
use crate::graph::{CompositionGraph, EdgeKind, NodeId, NodeKind, ParameterBinding};
use crate::parser::CompositionDocument;
use crate::registry::FlowRegistry;
use crate::schema::{Flow, FlowDescriptor, Parameter};
use crate::validation::{validate_flows, ComposingFlows};

/// The merged flow produced by [`FlowOfFlows::compose`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedFlow {
    /// Name of the composed flow
    pub name: String,

    /// Project the composed flow is registered under
    pub project_name: String,

    /// Parameters of the composed flow, named `{flow_name}-{parameter_name}`
    pub parameters: IndexMap<String, Parameter>,

    /// Run/wait graph wiring the composing flows
    pub graph: CompositionGraph,
}

/// A composed flow after registration
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredFlow {
    /// Identifier assigned by the registry
    pub flow_id: String,

    /// The registered composition
    pub flow: ComposedFlow,
}

/// An ordered composition of registered flows
#[derive(Debug, Clone)]
pub struct FlowOfFlows {
    name: String,
    project_name: String,
    flows: ComposingFlows,
}

impl FlowOfFlows {
    /// Build a composition from already resolved flows.
    ///
    /// Fails on the first mapped parameter that does not resolve.
    pub fn new(
        name: impl Into<String>,
        project_name: impl Into<String>,
        flows: Vec<Flow>,
    ) -> Result<Self, FlowError> {
        Ok(Self {
            name: name.into(),
            project_name: project_name.into(),
            flows: validate_flows(flows)?,
        })
    }

    /// Resolve each descriptor against the registry, then validate
    #[instrument(skip(descriptors, registry), fields(flows = descriptors.len()))]
    pub async fn from_descriptors(
        name: &str,
        project_name: &str,
        descriptors: Vec<FlowDescriptor>,
        registry: &dyn FlowRegistry,
    ) -> Result<Self, FlowError> {
        let mut flows = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let view = registry
                .load_flow(&descriptor.name, &descriptor.project_name)
                .await?;
            debug!(flow = %view.name, flow_id = %view.flow_id, "Resolved composing flow");
            flows.push(Flow::from_view(view, descriptor.mapped_parameters));
        }

        Self::new(name, project_name, flows)
    }

    /// Resolve a parsed composition document
    pub async fn from_document(
        document: CompositionDocument,
        registry: &dyn FlowRegistry,
    ) -> Result<Self, FlowError> {
        Self::from_descriptors(
            &document.name,
            &document.project_name,
            document.flows,
            registry,
        )
        .await
    }

    /// Name of the composed flow
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project of the composed flow
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Composing flows, in order
    pub fn flows(&self) -> &ComposingFlows {
        &self.flows
    }

    /// Look up a composing flow
    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }

    /// Wire the composing flows into one graph.
    ///
    /// Every flow gets a run node and a wait node. Mapped parameters become
    /// deferred task-result references on the parent's run, and the parent's
    /// wait node is declared upstream of the consuming run.
    pub fn compose(&self) -> Result<ComposedFlow, FlowError> {
        let mut graph = CompositionGraph::new();
        let mut parameters = IndexMap::new();
        let mut flow_runs: HashMap<&str, NodeId> = HashMap::with_capacity(self.flows.len());
        let mut flow_waits: HashMap<&str, NodeId> = HashMap::with_capacity(self.flows.len());

        for (flow_name, flow) in &self.flows {
            let mut run_parameters = IndexMap::with_capacity(flow.parameters.len());

            for (parameter_name, parameter) in &flow.parameters {
                if flow.is_mapped(parameter_name) {
                    continue;
                }

                let merged_name = format!("{}-{}", flow_name, parameter_name);
                parameters.insert(merged_name.clone(), parameter.renamed(merged_name.as_str()));
                run_parameters.insert(
                    parameter_name.clone(),
                    ParameterBinding::Parameter { name: merged_name },
                );
            }

            let mut upstream_flows: IndexSet<&str> = IndexSet::new();

            if let Some(mapped_parameters) = &flow.mapped_parameters {
                for (parameter_name, mapped) in mapped_parameters {
                    let parent_name = mapped.parent_flow_name.as_str();
                    let task_slug = self.parent_task_slug(flow_name, parent_name, &mapped.parent_task_name)?;

                    let parent_run = flow_runs.get(parent_name).ok_or_else(|| {
                        FlowError::ParentFlowNotUpstream {
                            flow: flow_name.clone(),
                            parent: parent_name.to_string(),
                        }
                    })?;

                    run_parameters.insert(
                        parameter_name.clone(),
                        ParameterBinding::TaskResult {
                            run: parent_run.clone(),
                            task_slug: task_slug.to_string(),
                        },
                    );
                    upstream_flows.insert(parent_name);
                }
            }

            let run = graph.add_node(
                NodeId::run(flow_name),
                NodeKind::CreateFlowRun {
                    flow_name: flow_name.clone(),
                    project_name: flow.project_name.clone(),
                    parameters: run_parameters,
                },
            );

            for upstream in &upstream_flows {
                if let Some(upstream_wait) = flow_waits.get(upstream) {
                    graph.add_edge(upstream_wait.clone(), run.clone(), EdgeKind::Upstream);
                }
            }

            let wait = graph.add_node(
                NodeId::wait(flow_name),
                NodeKind::WaitForFlowRun {
                    flow_name: flow_name.clone(),
                    raise_final_state: true,
                },
            );
            graph.add_edge(run.clone(), wait.clone(), EdgeKind::Data);

            debug!(
                flow = %flow_name,
                upstream = ?upstream_flows,
                "Wired flow run"
            );

            flow_runs.insert(flow_name.as_str(), run);
            flow_waits.insert(flow_name.as_str(), wait);
        }

        graph.validate()?;

        info!(
            flow = %self.name,
            runs = flow_runs.len(),
            parameters = parameters.len(),
            "Composed flow of flows"
        );

        Ok(ComposedFlow {
            name: self.name.clone(),
            project_name: self.project_name.clone(),
            parameters,
            graph,
        })
    }

    /// Compose, validate and register the merged flow.
    ///
    /// Consumes the composition so a flow of flows is registered at most once.
    #[instrument(skip(self, registry), fields(flow = %self.name, project = %self.project_name))]
    pub async fn compose_and_register(
        self,
        registry: &dyn FlowRegistry,
    ) -> Result<RegisteredFlow, FlowError> {
        let composed = self.compose()?;
        let flow_id = registry
            .register_composed_flow(&composed, &self.project_name)
            .await?;

        info!(flow_id = %flow_id, "Registered flow of flows");

        Ok(RegisteredFlow {
            flow_id,
            flow: composed,
        })
    }

    fn parent_task_slug(
        &self,
        flow_name: &str,
        parent_name: &str,
        task_name: &str,
    ) -> Result<&str, FlowError> {
        let parent = self.flows.get(parent_name).ok_or_else(|| FlowError::ParentFlowNotInFlows {
            flow: parent_name.to_string(),
            flows: self.flows.keys().cloned().collect(),
        })?;

        parent.task_slug(task_name).ok_or_else(|| {
            debug!(flow = %flow_name, parent = %parent_name, task = %task_name, "Parent task missing");
            FlowError::TaskNotInFlow {
                flow: parent_name.to_string(),
                task: task_name.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FlowView, MappedParameter, TaskView};
    use pretty_assertions::assert_eq;

    fn flow(name: &str, params: &[&str], tasks: &[&str], mapped: Vec<MappedParameter>) -> Flow {
        Flow::from_view(
            FlowView {
                flow_id: format!("{}-id", name),
                name: name.to_string(),
                project_name: "proj".to_string(),
                parameters: params.iter().map(|p| Parameter::new(*p)).collect(),
                tasks: tasks.iter().map(|t| TaskView::new(*t, format!("{}-1", t))).collect(),
            },
            if mapped.is_empty() { None } else { Some(mapped) },
        )
    }

    #[test]
    fn test_independent_flows_have_no_upstream_edges() {
        let fof = FlowOfFlows::new(
            "fof",
            "proj",
            vec![
                flow("a", &["x"], &["t"], vec![]),
                flow("b", &["y"], &["t"], vec![]),
                flow("c", &[], &["t"], vec![]),
            ],
        )
        .unwrap();

        let composed = fof.compose().unwrap();
        assert_eq!(composed.graph.run_nodes().count(), 3);
        assert_eq!(composed.graph.wait_nodes().count(), 3);
        assert_eq!(composed.graph.upstream_edges().count(), 0);
    }

    #[test]
    fn test_parameters_are_prefixed() {
        let fof = FlowOfFlows::new(
            "fof",
            "proj",
            vec![
                flow("a", &["x", "y"], &["t"], vec![]),
                flow("b", &["x", "z"], &["u"], vec![MappedParameter::new("z", "a", "t")]),
            ],
        )
        .unwrap();

        let composed = fof.compose().unwrap();
        assert_eq!(
            composed.parameters.keys().cloned().collect::<Vec<_>>(),
            vec!["a-x".to_string(), "a-y".to_string(), "b-x".to_string()]
        );
        assert_eq!(composed.parameters["b-x"].name, "b-x");

        // The run request keeps the unprefixed names
        let run_b = composed.graph.node(&NodeId::run("b")).unwrap();
        match &run_b.kind {
            NodeKind::CreateFlowRun { parameters, .. } => {
                assert_eq!(
                    parameters["x"],
                    ParameterBinding::Parameter { name: "b-x".to_string() }
                );
                assert_eq!(
                    parameters["z"],
                    ParameterBinding::TaskResult { run: NodeId::run("a"), task_slug: "t-1".to_string() }
                );
            }
            other => panic!("Expected CreateFlowRun, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_mappings_from_same_parent_create_one_edge() {
        let fof = FlowOfFlows::new(
            "fof",
            "proj",
            vec![
                flow("a", &[], &["t", "u"], vec![]),
                flow("b", &["p", "q"], &["v"], vec![
                    MappedParameter::new("p", "a", "t"),
                    MappedParameter::new("q", "a", "u"),
                ]),
            ],
        )
        .unwrap();

        let composed = fof.compose().unwrap();
        assert_eq!(composed.graph.upstream_edges().count(), 1);
        assert!(composed.parameters.is_empty());
    }
}
