//! Lifecycle controller: provision, run the scoped workload, release.
//!
//! Every transition is appended to a [`CheckpointStore`] before the controller
//! moves on, so a crashed run can be picked up again with [`resume`].

mod checkpoint;
mod events;
mod lease;
mod state;
mod workload;

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use events::LifecycleEvent;
pub use state::{BodyStatus, ExecutionState, LifecyclePhase};
pub use workload::{BodyOutcome, ScopedWorkload, StepOutcome};

use crate::connector::{
    Connector, ConnectorRef, ConnectorRegistry, NodeHandle, ProvisionFailure, ProvisionRequest,
};
use crate::context::{BindContext, ComputerHandle, FlowNodeId, NodeContext, OutputSink, RemotePath};
use crate::error::{ConfigurationError, ProvisioningError, StepError, TeardownError};
use crate::spec::DockerNodeStep;
use events::now;
use lease::{release_node, NodeLease, ProvisionGuard};
use workload::panic_message;

pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// In-memory state plus the store it is mirrored to.
///
/// Events the store refused stay queued and are appended, in order, ahead of
/// the next event, so the persisted journal is always a replayable prefix.
struct Journal {
    state: ExecutionState,
    store: Arc<dyn CheckpointStore>,
    unpersisted: VecDeque<LifecycleEvent>,
}

impl Journal {
    fn new(run_id: &str, store: Arc<dyn CheckpointStore>) -> Self {
        Self::resumed(ExecutionState::new(run_id.to_string()), store)
    }

    fn resumed(state: ExecutionState, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            state,
            store,
            unpersisted: VecDeque::new(),
        }
    }

    fn run_id(&self) -> &str {
        &self.state.run_id
    }

    fn phase(&self) -> LifecyclePhase {
        self.state.phase
    }

    async fn record(&mut self, event: LifecycleEvent) -> anyhow::Result<()> {
        self.state.apply_event(&event)?;
        debug!(run_id = %self.state.run_id, event = event.name(), "recording lifecycle event");
        self.unpersisted.push_back(event);
        self.flush().await
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        while let Some(event) = self.unpersisted.front() {
            self.store.append(event).await?;
            self.unpersisted.pop_front();
        }
        Ok(())
    }

    /// Records an event whose loss only weakens crash recovery, never the running step.
    async fn record_or_warn(&mut self, event: LifecycleEvent) {
        let name = event.name();
        if let Err(err) = self.record(event).await {
            warn!(run_id = %self.state.run_id, event = name, error = %err, "failed to record lifecycle event");
        }
    }
}

/// A bound node step, ready to provision and run one workload.
pub struct NodeStepExecution {
    run_id: String,
    step: DockerNodeStep,
    connector_ref: ConnectorRef,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn OutputSink>,
    flow_node: FlowNodeId,
    store: Arc<dyn CheckpointStore>,
    teardown_timeout: Duration,
}

impl fmt::Debug for NodeStepExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStepExecution")
            .field("run_id", &self.run_id)
            .field("step", &self.step)
            .field("connector", &self.connector_ref)
            .field("flow_node", &self.flow_node)
            .field("teardown_timeout", &self.teardown_timeout)
            .finish()
    }
}

impl NodeStepExecution {
    pub(crate) fn new(
        step: DockerNodeStep,
        context: BindContext,
        registry: &ConnectorRegistry,
    ) -> Result<Self, ConfigurationError> {
        let sink = context
            .sink
            .ok_or(ConfigurationError::MissingContext { name: "output sink" })?;
        let flow_node = context
            .flow_node
            .ok_or(ConfigurationError::MissingContext { name: "flow node" })?;
        let connector_ref = registry.resolve_ref(&step)?;
        let connector = registry.instantiate(&connector_ref)?;

        Ok(Self {
            run_id: Uuid::new_v4().to_string(),
            step,
            connector_ref,
            connector,
            sink,
            flow_node,
            store: Arc::new(MemoryCheckpointStore::new()),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        })
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn connector_ref(&self) -> &ConnectorRef {
        &self.connector_ref
    }

    /// Provisions the node, runs `workload` on it and releases it.
    ///
    /// Once a node exists it is released exactly once, whether the workload
    /// succeeds, fails, panics or `cancel` fires.
    pub async fn run<W: ScopedWorkload>(
        self,
        workload: W,
        cancel: CancellationToken,
    ) -> StepOutcome<W::Output> {
        let mut journal = Journal::new(&self.run_id, self.store.clone());

        info!(
            run_id = %self.run_id,
            image = %self.step.image(),
            connector = %self.connector_ref.kind(),
            "provisioning node"
        );
        self.sink
            .line(&format!("Provisioning node from image {}", self.step.image()));

        let started = LifecycleEvent::Started {
            run_id: self.run_id.clone(),
            ts: now(),
            step: self.step.clone(),
            connector: self.connector_ref.clone(),
            flow_node: Some(self.flow_node.clone()),
        };
        if let Err(err) = journal.record(started).await {
            error!(run_id = %self.run_id, error = %err, "cannot checkpoint run, refusing to provision");
            return StepOutcome {
                run_id: self.run_id.clone(),
                phase: LifecyclePhase::Failed,
                result: Err(StepError::Provisioning(ProvisioningError::Checkpoint {
                    run_id: self.run_id.clone(),
                    source: err,
                })),
                teardown_warning: None,
            };
        }

        let request = ProvisionRequest::for_step(&self.run_id, &self.step);
        let guard = ProvisionGuard::arm(
            self.connector.clone(),
            request.clone(),
            self.teardown_timeout,
        );
        let provisioned = if cancel.is_cancelled() {
            Err(ProvisionFailure::clean(ProvisioningError::Cancelled))
        } else {
            tokio::select! {
                result = self.connector.provision(&request, &cancel) => result,
                _ = cancel.cancelled() => Err(ProvisionFailure::clean(ProvisioningError::Cancelled)),
            }
        };
        guard.disarm();
        let node = match provisioned {
            Ok(node) => node,
            Err(failure) => return self.abandon(journal, &request, failure).await,
        };

        let lease = NodeLease::new(self.connector.clone(), node.clone(), self.teardown_timeout);
        journal
            .record_or_warn(LifecycleEvent::Provisioned {
                run_id: self.run_id.clone(),
                ts: now(),
                node: node.clone(),
            })
            .await;
        info!(run_id = %self.run_id, container = %node.container_id, "node attached");
        self.sink
            .line(&format!("Running on {} ({})", node.node_name, node.image));

        let outcome = if cancel.is_cancelled() {
            BodyOutcome::Cancelled
        } else {
            journal
                .record_or_warn(LifecycleEvent::BodyStarted {
                    run_id: self.run_id.clone(),
                    ts: now(),
                })
                .await;
            let context = node_context(self.connector.as_ref(), &node, Some(self.sink.clone()));
            run_body(workload, context, &cancel).await
        };

        conclude(journal, lease, outcome, Some(&self.sink)).await
    }

    async fn abandon<T>(
        &self,
        mut journal: Journal,
        request: &ProvisionRequest,
        failure: ProvisionFailure,
    ) -> StepOutcome<T> {
        let ProvisionFailure { error, partial } = failure;

        if let Some(partial) = partial {
            if let Err(err) =
                release_node(self.connector.as_ref(), &partial, self.teardown_timeout).await
            {
                warn!(run_id = %self.run_id, container = %partial.container_id, error = %err, "failed to release partially provisioned container");
            }
        }
        match self.connector.reclaim(request).await {
            Ok(0) => {}
            Ok(count) => info!(run_id = %self.run_id, count, "reclaimed containers left by provisioning"),
            Err(err) => warn!(run_id = %self.run_id, error = %err, "failed to reclaim containers"),
        }

        warn!(run_id = %self.run_id, error = %error, "provisioning failed");
        self.sink.line(&format!("Provisioning failed: {error}"));
        journal
            .record_or_warn(LifecycleEvent::Failed {
                run_id: self.run_id.clone(),
                ts: now(),
                stage: LifecyclePhase::Provisioning,
                message: error.to_string(),
            })
            .await;

        StepOutcome {
            run_id: self.run_id.clone(),
            phase: journal.phase(),
            result: Err(StepError::Provisioning(error)),
            teardown_warning: None,
        }
    }
}

fn node_context(
    connector: &dyn Connector,
    node: &NodeHandle,
    sink: Option<Arc<dyn OutputSink>>,
) -> NodeContext {
    NodeContext {
        computer: ComputerHandle {
            name: node.node_name.clone(),
            connector: connector.kind().to_string(),
        },
        workspace: RemotePath::new(node.remote_fs.clone()),
        node: node.clone(),
        launcher: connector.launcher(node),
        sink,
    }
}

async fn run_body<W: ScopedWorkload>(
    workload: W,
    context: NodeContext,
    cancel: &CancellationToken,
) -> BodyOutcome<W::Output> {
    let body = AssertUnwindSafe(async move { workload.run(context).await }).catch_unwind();
    tokio::select! {
        result = body => match result {
            Ok(Ok(value)) => BodyOutcome::Succeeded(value),
            Ok(Err(err)) => BodyOutcome::Failed(err),
            Err(panic) => BodyOutcome::Failed(anyhow!("workload panicked: {}", panic_message(panic.as_ref()))),
        },
        _ = cancel.cancelled() => BodyOutcome::Cancelled,
    }
}

/// Single exit for every run that reached `Attached`: record the body outcome,
/// release the node, and fold both into one outcome.
async fn conclude<T>(
    mut journal: Journal,
    lease: NodeLease,
    outcome: BodyOutcome<T>,
    sink: Option<&Arc<dyn OutputSink>>,
) -> StepOutcome<T> {
    let run_id = journal.run_id().to_string();

    if journal.phase() == LifecyclePhase::RunningBody && journal.state.body.is_none() {
        journal
            .record_or_warn(LifecycleEvent::BodyCompleted {
                run_id: run_id.clone(),
                ts: now(),
                status: outcome.status(),
            })
            .await;
    }

    journal
        .record_or_warn(LifecycleEvent::TeardownStarted {
            run_id: run_id.clone(),
            ts: now(),
        })
        .await;
    if let Some(sink) = sink {
        sink.line("Releasing node");
    }

    let teardown_warning = match lease.release().await {
        Ok(()) => {
            journal
                .record_or_warn(LifecycleEvent::TeardownCompleted {
                    run_id: run_id.clone(),
                    ts: now(),
                })
                .await;
            None
        }
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "teardown failed");
            if let Some(sink) = sink {
                sink.line(&format!("Teardown failed: {err}"));
            }
            journal
                .record_or_warn(LifecycleEvent::Failed {
                    run_id: run_id.clone(),
                    ts: now(),
                    stage: LifecyclePhase::TearingDown,
                    message: err.to_string(),
                })
                .await;
            Some(err)
        }
    };

    let result = match outcome {
        BodyOutcome::Succeeded(value) => Ok(value),
        BodyOutcome::Failed(err) => Err(StepError::Workload(err)),
        BodyOutcome::Cancelled => Err(StepError::Cancelled),
    };

    if !journal.unpersisted.is_empty() {
        warn!(run_id = %run_id, pending = journal.unpersisted.len(), "checkpoint is behind the finished run");
    }
    info!(run_id = %run_id, phase = ?journal.phase(), success = result.is_ok(), "node step finished");
    StepOutcome {
        run_id,
        phase: journal.phase(),
        result,
        teardown_warning,
    }
}

/// What [`resume`] found for a run.
#[derive(Debug)]
pub enum Resumption {
    /// The workload was attached when the process stopped; its outcome is still owed.
    AwaitingBody(ResumedExecution),
    /// Leftover resources were released (or releasing them failed).
    Released {
        run_id: String,
        result: Result<(), TeardownError>,
    },
    /// Nothing to do.
    Settled {
        run_id: String,
        phase: LifecyclePhase,
    },
}

/// A run rebuilt from its checkpoint while its node is still attached.
///
/// Dropping it without calling [`ResumedExecution::complete`] releases the node
/// in the background.
pub struct ResumedExecution {
    journal: Journal,
    lease: NodeLease,
    connector: Arc<dyn Connector>,
    node: NodeHandle,
    sink: Option<Arc<dyn OutputSink>>,
}

impl fmt::Debug for ResumedExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumedExecution")
            .field("run_id", &self.journal.run_id())
            .field("phase", &self.journal.phase())
            .field("node", &self.node)
            .finish()
    }
}

impl ResumedExecution {
    pub fn run_id(&self) -> &str {
        self.journal.run_id()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.journal.phase()
    }

    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub fn state(&self) -> &ExecutionState {
        &self.journal.state
    }

    /// Body outcome recorded before the restart, if the body had already finished.
    pub fn recorded_outcome(&self) -> Option<&BodyStatus> {
        self.journal.state.body.as_ref()
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.lease.set_timeout(timeout);
        self
    }

    /// Context for re-attaching to the node; the launcher is rebuilt from the handle.
    pub fn node_context(&self) -> NodeContext {
        node_context(self.connector.as_ref(), &self.node, self.sink.clone())
    }

    pub async fn complete<T>(self, outcome: BodyOutcome<T>) -> StepOutcome<T> {
        let Self {
            journal,
            lease,
            sink,
            ..
        } = self;
        conclude(journal, lease, outcome, sink.as_ref()).await
    }
}

/// Rebuilds run `run_id` from `store` and drives it to a safe point.
pub async fn resume(
    run_id: &str,
    store: Arc<dyn CheckpointStore>,
    registry: &ConnectorRegistry,
    teardown_timeout: Duration,
) -> Result<Resumption, StepError> {
    let invalid = |message: String| ConfigurationError::InvalidCheckpoint {
        run_id: run_id.to_string(),
        message,
    };

    let events = store
        .load(run_id)
        .await
        .map_err(|err| invalid(format!("{err:#}")))?;
    let state = ExecutionState::replay(&events).map_err(|err| invalid(format!("{err:#}")))?;
    info!(run_id, phase = ?state.phase, events = events.len(), "resuming node step");

    let phase = state.phase;
    if phase.is_terminal() || phase == LifecyclePhase::Pending {
        return Ok(Resumption::Settled {
            run_id: run_id.to_string(),
            phase,
        });
    }

    let connector_ref = state
        .connector
        .clone()
        .ok_or_else(|| invalid("no connector recorded".into()))?;
    let mut journal = Journal::resumed(state, store);

    match phase {
        LifecyclePhase::Provisioning => {
            let step = journal
                .state
                .step
                .clone()
                .ok_or_else(|| invalid("no step recorded".into()))?;
            let connector = match registry.instantiate(&connector_ref) {
                Ok(connector) => connector,
                Err(err) => {
                    return Ok(Resumption::Released {
                        run_id: run_id.to_string(),
                        result: Err(TeardownError::ConnectorUnavailable {
                            container: format!("run {run_id}"),
                            message: err.to_string(),
                        }),
                    })
                }
            };
            let request = ProvisionRequest::for_step(run_id, &step);
            let result = match connector.reclaim(&request).await {
                Ok(count) => {
                    info!(run_id, count, "reclaimed containers from interrupted provisioning");
                    journal
                        .record_or_warn(LifecycleEvent::Failed {
                            run_id: run_id.to_string(),
                            ts: now(),
                            stage: LifecyclePhase::Provisioning,
                            message: "provisioning interrupted by restart".into(),
                        })
                        .await;
                    Ok(())
                }
                Err(err) => Err(err),
            };
            Ok(Resumption::Released {
                run_id: run_id.to_string(),
                result,
            })
        }
        LifecyclePhase::TearingDown => {
            let node = journal
                .state
                .node
                .clone()
                .ok_or_else(|| invalid("no node recorded".into()))?;
            let connector = match registry.instantiate(&connector_ref) {
                Ok(connector) => connector,
                Err(err) => {
                    return Ok(Resumption::Released {
                        run_id: run_id.to_string(),
                        result: Err(TeardownError::ConnectorUnavailable {
                            container: node.container_id.clone(),
                            message: err.to_string(),
                        }),
                    })
                }
            };
            journal
                .record_or_warn(LifecycleEvent::TeardownStarted {
                    run_id: run_id.to_string(),
                    ts: now(),
                })
                .await;
            let result = NodeLease::new(connector, node, teardown_timeout)
                .release()
                .await;
            let event = match &result {
                Ok(()) => LifecycleEvent::TeardownCompleted {
                    run_id: run_id.to_string(),
                    ts: now(),
                },
                Err(err) => LifecycleEvent::Failed {
                    run_id: run_id.to_string(),
                    ts: now(),
                    stage: LifecyclePhase::TearingDown,
                    message: err.to_string(),
                },
            };
            journal.record_or_warn(event).await;
            Ok(Resumption::Released {
                run_id: run_id.to_string(),
                result,
            })
        }
        _ => {
            let node = journal
                .state
                .node
                .clone()
                .ok_or_else(|| invalid("no node recorded".into()))?;
            let connector = registry.instantiate(&connector_ref)?;
            let lease = NodeLease::new(connector.clone(), node.clone(), teardown_timeout);
            Ok(Resumption::AwaitingBody(ResumedExecution {
                journal,
                lease,
                connector,
                node,
                sink: None,
            }))
        }
    }
}
