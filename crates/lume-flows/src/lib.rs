//! # Lume Flows
//!
//! Composition of independently registered flows into one parent flow
//! ("flow of flows"). Output values of upstream flow tasks are wired into the
//! input parameters of downstream flows; execution itself stays with the
//! external scheduler.
//!
//! ## Example
//!
//! ```
//! use lume_flows::{Flow, FlowOfFlows, FlowView, MappedParameter, Parameter, TaskView};
//!
//! let load = Flow::from_view(
//!     FlowView {
//!         flow_id: "1".to_string(),
//!         name: "load".to_string(),
//!         project_name: "demo".to_string(),
//!         parameters: vec![Parameter::required("path")],
//!         tasks: vec![TaskView::new("read", "read-1")],
//!     },
//!     None,
//! );
//! let model = Flow::from_view(
//!     FlowView {
//!         flow_id: "2".to_string(),
//!         name: "model".to_string(),
//!         project_name: "demo".to_string(),
//!         parameters: vec![Parameter::required("data")],
//!         tasks: vec![TaskView::new("run", "run-1")],
//!     },
//!     Some(vec![MappedParameter::new("data", "load", "read")]),
//! );
//!
//! let fof = FlowOfFlows::new("pipeline", "demo", vec![load, model]).unwrap();
//! let composed = fof.compose().unwrap();
//! assert_eq!(composed.graph.upstream_edges().count(), 1);
//! assert!(composed.parameters.contains_key("load-path"));
//! ```

mod error;
mod parser;
mod schema;
mod validation;

pub mod composer;
pub mod graph;
pub mod registry;

pub use composer::{ComposedFlow, FlowOfFlows, RegisteredFlow};
pub use error::FlowError;
pub use graph::{CompositionGraph, Edge, EdgeKind, Node, NodeId, NodeKind, ParameterBinding};
pub use parser::{parse_composition_json, parse_composition_yaml, CompositionDocument};
pub use registry::{FlowRegistry, InMemoryFlowRegistry, RegistryError};
pub use schema::{Flow, FlowDescriptor, FlowView, MappedParameter, Parameter, TaskView};
pub use validation::{validate_flows, ComposingFlows};

/// Returns a version string for the crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
