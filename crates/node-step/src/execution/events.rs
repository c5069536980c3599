use serde::{Deserialize, Serialize};

use super::state::{BodyStatus, LifecyclePhase};
use crate::connector::{ConnectorRef, NodeHandle};
use crate::context::FlowNodeId;
use crate::spec::DockerNodeStep;

/// One persisted lifecycle transition. A run's checkpoint is the ordered list of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    #[serde(rename = "node.started:v1", rename_all = "camelCase")]
    Started {
        run_id: String,
        ts: String,
        step: DockerNodeStep,
        connector: ConnectorRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flow_node: Option<FlowNodeId>,
    },
    #[serde(rename = "node.provisioned:v1", rename_all = "camelCase")]
    Provisioned {
        run_id: String,
        ts: String,
        node: NodeHandle,
    },
    #[serde(rename = "node.body.started:v1", rename_all = "camelCase")]
    BodyStarted { run_id: String, ts: String },
    #[serde(rename = "node.body.completed:v1", rename_all = "camelCase")]
    BodyCompleted {
        run_id: String,
        ts: String,
        status: BodyStatus,
    },
    #[serde(rename = "node.teardown.started:v1", rename_all = "camelCase")]
    TeardownStarted { run_id: String, ts: String },
    #[serde(rename = "node.teardown.completed:v1", rename_all = "camelCase")]
    TeardownCompleted { run_id: String, ts: String },
    #[serde(rename = "node.failed:v1", rename_all = "camelCase")]
    Failed {
        run_id: String,
        ts: String,
        stage: LifecyclePhase,
        message: String,
    },
}

impl LifecycleEvent {
    pub fn run_id(&self) -> &str {
        match self {
            LifecycleEvent::Started { run_id, .. }
            | LifecycleEvent::Provisioned { run_id, .. }
            | LifecycleEvent::BodyStarted { run_id, .. }
            | LifecycleEvent::BodyCompleted { run_id, .. }
            | LifecycleEvent::TeardownStarted { run_id, .. }
            | LifecycleEvent::TeardownCompleted { run_id, .. }
            | LifecycleEvent::Failed { run_id, .. } => run_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Started { .. } => "node.started:v1",
            LifecycleEvent::Provisioned { .. } => "node.provisioned:v1",
            LifecycleEvent::BodyStarted { .. } => "node.body.started:v1",
            LifecycleEvent::BodyCompleted { .. } => "node.body.completed:v1",
            LifecycleEvent::TeardownStarted { .. } => "node.teardown.started:v1",
            LifecycleEvent::TeardownCompleted { .. } => "node.teardown.completed:v1",
            LifecycleEvent::Failed { .. } => "node.failed:v1",
        }
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
