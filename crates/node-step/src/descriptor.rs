//! Metadata the orchestration engine reads about the `dockerNode` step.

use serde::Serialize;

use crate::connector::{ConnectorDescriptor, ConnectorRegistry};

pub const FUNCTION_NAME: &str = "dockerNode";
pub const DISPLAY_NAME: &str = "Docker Node (Experimental)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RequiredContext {
    OutputSink,
    FlowNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ProvidedContext {
    Computer,
    FileSystem,
    Node,
    Launcher,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepDescriptor;

impl StepDescriptor {
    pub fn function_name(&self) -> &'static str {
        FUNCTION_NAME
    }

    pub fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    /// The step wraps a nested block that runs on the node.
    pub fn takes_implicit_block_argument(&self) -> bool {
        true
    }

    pub fn required_context(&self) -> &'static [RequiredContext] {
        &[RequiredContext::OutputSink, RequiredContext::FlowNode]
    }

    pub fn provided_context(&self) -> &'static [ProvidedContext] {
        &[
            ProvidedContext::Computer,
            ProvidedContext::FileSystem,
            ProvidedContext::Node,
            ProvidedContext::Launcher,
        ]
    }

    pub fn acceptable_connector_descriptors(
        &self,
        registry: &ConnectorRegistry,
    ) -> Vec<ConnectorDescriptor> {
        registry.admissible_descriptors()
    }
}
