use thiserror::Error;

use super::state::StateError;
use crate::cloudprovider::CloudError;
use crate::context::ContextError;
use crate::models::ParamError;
use crate::polling::LoopError;
use crate::resolver::ResolveError;
use crate::store::StoreError;

/// Failure of one step function invocation
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    MissingParam(#[from] ParamError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("cloud call failed: {0}")]
    Cloud(#[from] CloudError),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("step cancelled")]
    Cancelled,

    #[error("task force terminated")]
    ForceTerminated,

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl From<ContextError> for StepError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::Timeout("step deadline exceeded".to_string()),
        }
    }
}

impl From<LoopError<CloudError>> for StepError {
    fn from(err: LoopError<CloudError>) -> Self {
        match err {
            LoopError::Aborted(e) => Self::Cloud(e),
            LoopError::Cancelled => Self::Cancelled,
            LoopError::DeadlineExceeded => Self::Timeout("polling deadline exceeded".to_string()),
            LoopError::AttemptsExhausted(n) => Self::Timeout(format!("gave up after {n} polls")),
        }
    }
}

/// Failure of the executor itself, as opposed to the step it ran
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("step method {method} of step {step_name} is not registered")]
    UnregisteredStep { method: String, step_name: String },

    #[error("step {step_name} not found in task {task_id}")]
    StepNotFound { task_id: String, step_name: String },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecutorError {
    /// Engine misconfiguration that retrying cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnregisteredStep { .. } | Self::StepNotFound { .. })
    }
}
