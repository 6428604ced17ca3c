use thiserror::Error;

/// Rejected status change on a task or step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("transition blocked: {0}")]
    Blocked(#[from] GuardError),

    #[error("cannot apply {event} to a {from} record")]
    InvalidTransition { from: String, event: String },
}

/// Precondition a transition needs that the task does not meet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("task {task_id} still has unfinished steps: {}", steps.join(", "))]
    StepsUnfinished { task_id: String, steps: Vec<String> },

    #[error("task {task_id} already runs step {step_name}")]
    StepAlreadyRunning { task_id: String, step_name: String },

    #[error("task {task_id} was force terminated")]
    Terminated { task_id: String },

    #[error("task {task_id} current step {step_name} already succeeded")]
    NothingToRetry { task_id: String, step_name: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
