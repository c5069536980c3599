use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::events::LifecycleEvent;
use crate::connector::{ConnectorRef, NodeHandle};
use crate::context::FlowNodeId;
use crate::spec::DockerNodeStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    Pending,
    Provisioning,
    Attached,
    RunningBody,
    TearingDown,
    Done,
    Failed,
}

impl LifecyclePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecyclePhase::Done | LifecyclePhase::Failed)
    }

    pub fn can_transition_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Attached)
                | (Provisioning, Failed)
                | (Attached, RunningBody)
                | (Attached, TearingDown)
                | (RunningBody, TearingDown)
                | (TearingDown, Done)
                | (TearingDown, Failed)
        )
    }
}

/// How the enclosed block ended, as recorded in a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BodyStatus {
    Succeeded,
    Failed { message: String },
    Cancelled,
}

/// Controller state rebuilt from lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub run_id: String,
    pub phase: LifecyclePhase,
    pub step: Option<DockerNodeStep>,
    pub connector: Option<ConnectorRef>,
    pub flow_node: Option<FlowNodeId>,
    pub node: Option<NodeHandle>,
    pub body: Option<BodyStatus>,
    pub failure: Option<String>,
    pub teardown_attempts: u32,
    pub event_count: u64,
}

impl ExecutionState {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            phase: LifecyclePhase::Pending,
            step: None,
            connector: None,
            flow_node: None,
            node: None,
            body: None,
            failure: None,
            teardown_attempts: 0,
            event_count: 0,
        }
    }

    fn transition(&mut self, next: LifecyclePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            anyhow::bail!(
                "run {}: invalid transition {:?} -> {:?}",
                self.run_id,
                self.phase,
                next
            );
        }
        self.phase = next;
        Ok(())
    }

    pub fn apply_event(&mut self, event: &LifecycleEvent) -> Result<()> {
        if event.run_id() != self.run_id {
            anyhow::bail!(
                "event {} belongs to run {}, not {}",
                event.name(),
                event.run_id(),
                self.run_id
            );
        }

        match event {
            LifecycleEvent::Started {
                step,
                connector,
                flow_node,
                ..
            } => {
                self.transition(LifecyclePhase::Provisioning)?;
                self.step = Some(step.clone());
                self.connector = Some(connector.clone());
                self.flow_node = flow_node.clone();
            }
            LifecycleEvent::Provisioned { node, .. } => {
                self.transition(LifecyclePhase::Attached)?;
                self.node = Some(node.clone());
            }
            LifecycleEvent::BodyStarted { .. } => {
                self.transition(LifecyclePhase::RunningBody)?;
            }
            LifecycleEvent::BodyCompleted { status, .. } => {
                if self.phase != LifecyclePhase::RunningBody {
                    anyhow::bail!(
                        "run {}: body completed while {:?}",
                        self.run_id,
                        self.phase
                    );
                }
                self.body = Some(status.clone());
            }
            LifecycleEvent::TeardownStarted { .. } => {
                // A resumed run may retry a teardown that was already under way.
                if self.phase != LifecyclePhase::TearingDown {
                    self.transition(LifecyclePhase::TearingDown)?;
                }
                self.teardown_attempts += 1;
            }
            LifecycleEvent::TeardownCompleted { .. } => {
                self.transition(LifecyclePhase::Done)?;
            }
            LifecycleEvent::Failed { stage, message, .. } => {
                debug!(run_id = %self.run_id, ?stage, "applying failure");
                self.transition(LifecyclePhase::Failed)?;
                self.failure = Some(message.clone());
            }
        }

        self.event_count += 1;
        Ok(())
    }

    pub fn replay(events: &[LifecycleEvent]) -> Result<Self> {
        let run_id = match events.first() {
            Some(LifecycleEvent::Started { run_id, .. }) => run_id.clone(),
            Some(_) => anyhow::bail!("First event must be a node.started event"),
            None => anyhow::bail!("Cannot replay empty event list"),
        };

        let mut state = Self::new(run_id);
        for event in events {
            state.apply_event(event)?;
        }

        debug!(
            "Replayed {} events, final phase: {:?}",
            events.len(),
            state.phase
        );
        Ok(state)
    }
}
