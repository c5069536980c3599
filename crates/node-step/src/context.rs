use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connector::{Launcher, NodeHandle};

/// Where a step writes human-readable progress for the calling workflow.
pub trait OutputSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Sink that forwards every line to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, line: &str) {
        info!(target: "dockernode::output", "{line}");
    }
}

/// Identifies the workflow node that invoked the step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowNodeId(pub String);

impl fmt::Display for FlowNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context the orchestration engine supplies when binding a step.
#[derive(Clone, Default)]
pub struct BindContext {
    pub sink: Option<Arc<dyn OutputSink>>,
    pub flow_node: Option<FlowNodeId>,
}

impl fmt::Debug for BindContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindContext")
            .field("sink", &self.sink.is_some())
            .field("flow_node", &self.flow_node)
            .finish()
    }
}

impl BindContext {
    pub fn new(sink: Arc<dyn OutputSink>, flow_node: FlowNodeId) -> Self {
        Self {
            sink: Some(sink),
            flow_node: Some(flow_node),
        }
    }
}

/// A path on the provisioned node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn child(&self, name: &str) -> RemotePath {
        let base = self.0.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        RemotePath(format!("{base}/{name}"))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live compute handle for the attached node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerHandle {
    pub name: String,
    pub connector: String,
}

/// What the workload receives while the node is attached.
#[derive(Clone)]
pub struct NodeContext {
    pub computer: ComputerHandle,
    pub workspace: RemotePath,
    pub node: NodeHandle,
    pub launcher: Arc<dyn Launcher>,
    pub sink: Option<Arc<dyn OutputSink>>,
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("computer", &self.computer)
            .field("workspace", &self.workspace)
            .field("node", &self.node)
            .finish()
    }
}

impl NodeContext {
    pub fn log(&self, line: &str) {
        if let Some(sink) = &self.sink {
            sink.line(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_join_with_single_separator() {
        let root = RemotePath::new("/home/dockernode/agent/");
        assert_eq!(root.child("/workspace").as_str(), "/home/dockernode/agent/workspace");
        assert_eq!(root.child("a").child("b").as_str(), "/home/dockernode/agent/a/b");
    }
}
