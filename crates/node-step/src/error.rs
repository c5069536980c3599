use std::time::Duration;

use thiserror::Error;

/// The node step definition is malformed or names a connector that cannot be used.
///
/// Never retryable: the caller has to fix the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("image must not be blank")]
    BlankImage,

    #[error("connector '{kind}' is not registered")]
    UnknownConnector { kind: String },

    #[error("connector '{kind}' cannot be used by dockerNode: {reason}")]
    InadmissibleConnector { kind: String, reason: String },

    #[error("invalid settings for connector '{kind}': {message}")]
    InvalidSettings { kind: String, message: String },

    #[error("missing required context: {name}")]
    MissingContext { name: &'static str },

    #[error("checkpoint for run {run_id} cannot be resumed: {message}")]
    InvalidCheckpoint { run_id: String, message: String },
}

/// The container runtime could not produce a live node.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("container runtime at {endpoint} is unreachable: {message}")]
    RuntimeUnavailable { endpoint: String, message: String },

    #[error("image {image} is not available: {message}")]
    ImageUnavailable { image: String, message: String },

    #[error("credentials '{id}' were rejected or could not be resolved: {message}")]
    Credentials { id: String, message: String },

    #[error("container for image {image} failed to start: {message}")]
    ContainerStart { image: String, message: String },

    #[error("provisioning was cancelled")]
    Cancelled,

    #[error("failed to record checkpoint for run {run_id}: {source}")]
    Checkpoint {
        run_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Releasing the node after the workload finished failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeardownError {
    #[error("failed to release container {container}: {message}")]
    Release { container: String, message: String },

    #[error("release of container {container} timed out after {timeout:?}")]
    TimedOut { container: String, timeout: Duration },

    #[error("connector for container {container} could not be restored: {message}")]
    ConnectorUnavailable { container: String, message: String },
}

/// The single primary result of a node step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// The enclosed block failed; the error is passed through unchanged.
    #[error(transparent)]
    Workload(anyhow::Error),

    #[error("node step was cancelled")]
    Cancelled,

    /// A primary failure with a teardown failure layered on top.
    #[error("{primary} (additionally, teardown failed: {teardown})")]
    Composite {
        primary: Box<StepError>,
        teardown: TeardownError,
    },
}

impl StepError {
    /// The error that decided the outcome, looking through teardown annotations.
    pub fn primary(&self) -> &StepError {
        match self {
            StepError::Composite { primary, .. } => primary.primary(),
            other => other,
        }
    }

    pub fn teardown_failure(&self) -> Option<&TeardownError> {
        match self {
            StepError::Composite { teardown, .. } => Some(teardown),
            _ => None,
        }
    }

    pub fn workload_error(&self) -> Option<&anyhow::Error> {
        match self.primary() {
            StepError::Workload(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.primary(),
            StepError::Cancelled | StepError::Provisioning(ProvisioningError::Cancelled)
        )
    }

    pub(crate) fn with_teardown(self, teardown: Option<TeardownError>) -> StepError {
        match teardown {
            Some(teardown) => StepError::Composite {
                primary: Box::new(self),
                teardown,
            },
            None => self,
        }
    }
}
