use indexmap::IndexMap;
use tracing::debug;

use crate::error::FlowError;
use crate::schema::Flow;

/// Composing flows keyed by name, in composition order
pub type ComposingFlows = IndexMap<String, Flow>;

/// Validate resolved flows and return them as an ordered, name-keyed map.
///
/// Checks run flow by flow in composition order and stop at the first failure.
/// For every mapped parameter:
/// 1. the parameter is declared by its own flow
/// 2. the parent flow is one of the composing flows
/// 3. the parent task exists in the parent flow
/// 4. the parent flow comes before the owning flow
pub fn validate_flows(flows: Vec<Flow>) -> Result<ComposingFlows, FlowError> {
    let mut composing = IndexMap::with_capacity(flows.len());

    for flow in flows {
        if composing.contains_key(&flow.name) {
            return Err(FlowError::DuplicateFlow(flow.name));
        }
        composing.insert(flow.name.clone(), flow);
    }

    for (position, flow) in composing.values().enumerate() {
        validate_mapped_parameters(flow, position, &composing)?;
    }

    Ok(composing)
}

fn validate_mapped_parameters(
    flow: &Flow,
    position: usize,
    flows: &ComposingFlows,
) -> Result<(), FlowError> {
    let Some(mapped_parameters) = &flow.mapped_parameters else {
        return Ok(());
    };

    for (parameter_name, mapped) in mapped_parameters {
        if !flow.parameters.contains_key(parameter_name) {
            return Err(FlowError::ParameterNotInFlow {
                parameter: parameter_name.clone(),
                flow: flow.name.clone(),
            });
        }

        let Some((parent_position, _, parent)) = flows.get_full(&mapped.parent_flow_name) else {
            return Err(FlowError::ParentFlowNotInFlows {
                flow: mapped.parent_flow_name.clone(),
                flows: flows.keys().cloned().collect(),
            });
        };

        if parent.task_slug(&mapped.parent_task_name).is_none() {
            return Err(FlowError::TaskNotInFlow {
                flow: mapped.parent_flow_name.clone(),
                task: mapped.parent_task_name.clone(),
            });
        }

        if parent_position >= position {
            return Err(FlowError::ParentFlowNotUpstream {
                flow: flow.name.clone(),
                parent: mapped.parent_flow_name.clone(),
            });
        }

        debug!(
            flow = %flow.name,
            parameter = %parameter_name,
            parent_flow = %mapped.parent_flow_name,
            parent_task = %mapped.parent_task_name,
            "Mapped parameter resolved"
        );
    }

    Ok(())
}
