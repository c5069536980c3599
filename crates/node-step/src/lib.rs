//! One-shot, container-backed execution nodes for a scoped block of work.
//!
//! A [`DockerNodeStep`] describes what to provision. Binding it with
//! [`DockerNodeStep::start`] yields a [`NodeStepExecution`], which provisions a
//! container through a [`Connector`], hands the resulting node to the caller's
//! workload and releases the container on every exit path.

pub mod connector;
pub mod context;
pub mod credentials;
pub mod descriptor;
pub mod error;
pub mod execution;
pub mod spec;

pub use connector::{
    admissibility::Admissibility, default_connector, Connector, ConnectorDescriptor, ConnectorRef,
    ConnectorRegistry, ConnectorShape, ConnectorType, FieldSpec, FieldType, LaunchCommand,
    LaunchOutput, Launcher, NodeHandle, ProvisionFailure, ProvisionRequest,
};
pub use context::{BindContext, FlowNodeId, NodeContext, OutputSink, RemotePath};
pub use error::{ConfigurationError, ProvisioningError, StepError, TeardownError};
pub use execution::{
    resume, BodyOutcome, CheckpointStore, ExecutionState, FileCheckpointStore, LifecycleEvent,
    LifecyclePhase, MemoryCheckpointStore, NodeStepExecution, ResumedExecution, Resumption,
    ScopedWorkload, StepOutcome,
};
pub use spec::DockerNodeStep;
