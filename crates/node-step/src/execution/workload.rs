use std::any::Any;
use std::future::Future;

use super::state::{BodyStatus, LifecyclePhase};
use crate::context::NodeContext;
use crate::error::{StepError, TeardownError};

/// The block of work that runs while a node is attached.
///
/// Any `FnOnce(NodeContext) -> impl Future<Output = anyhow::Result<T>>` qualifies.
pub trait ScopedWorkload: Send {
    type Output: Send;
    type Future: Future<Output = anyhow::Result<Self::Output>> + Send;

    fn run(self, node: NodeContext) -> Self::Future;
}

impl<F, Fut, T> ScopedWorkload for F
where
    F: FnOnce(NodeContext) -> Fut + Send,
    Fut: Future<Output = anyhow::Result<T>> + Send,
    T: Send,
{
    type Output = T;
    type Future = Fut;

    fn run(self, node: NodeContext) -> Fut {
        self(node)
    }
}

/// How the workload ended.
#[derive(Debug)]
pub enum BodyOutcome<T> {
    Succeeded(T),
    Failed(anyhow::Error),
    Cancelled,
}

impl<T> BodyOutcome<T> {
    pub fn status(&self) -> BodyStatus {
        match self {
            BodyOutcome::Succeeded(_) => BodyStatus::Succeeded,
            BodyOutcome::Failed(err) => BodyStatus::Failed {
                message: format!("{err:#}"),
            },
            BodyOutcome::Cancelled => BodyStatus::Cancelled,
        }
    }
}

impl<T> From<anyhow::Result<T>> for BodyOutcome<T> {
    fn from(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => BodyOutcome::Succeeded(value),
            Err(err) => BodyOutcome::Failed(err),
        }
    }
}

/// Final report of one node step: a single primary result plus an optional teardown warning.
#[derive(Debug)]
pub struct StepOutcome<T> {
    pub run_id: String,
    pub phase: LifecyclePhase,
    pub result: Result<T, StepError>,
    pub teardown_warning: Option<TeardownError>,
}

impl<T> StepOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Collapses the outcome into one `Result`.
    ///
    /// A teardown failure is attached to a primary error as `StepError::Composite`;
    /// after a successful workload it stays a warning and the value is returned.
    pub fn into_result(self) -> Result<T, StepError> {
        match self.result {
            Ok(value) => Ok(value),
            Err(err) => Err(err.with_teardown(self.teardown_warning)),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
