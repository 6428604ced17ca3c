//! Crate-level error, wrapping the per-module error enums for callers that
//! drive the engine as a whole.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::resolver::ResolveError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;
use crate::task::{ExecutorError, RegistryError, StateError, TaskBuildError, WorkerError};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Task build error: {0}")]
    Build(#[from] TaskBuildError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Task state error: {0}")]
    State(#[from] StateError),

    #[error("State transition error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("No task manager registered for provider {0}")]
    UnknownProvider(String),
}

impl LifecycleError {
    /// The task (or one of its records) does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) => e.is_not_found(),
            Self::State(StateError::Store(e)) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
