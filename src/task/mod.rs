//! # Task Layer
//!
//! Building tasks, registering the functions that execute their steps, the
//! single writer of task state and the pool that drives tasks to completion.

pub mod builder;
pub mod error;
pub mod executor;
pub mod manager;
pub mod registry;
pub mod state;
pub mod worker;

pub use builder::{step_for, TaskBuildError, TaskBuilder};
pub use error::{ExecutorError, StepError};
pub use executor::{StepExecutor, StepOutcome};
pub use manager::{
    CleanNodesOptions, CreateClusterOptions, CreateNodeGroupOptions, DeleteClusterOptions,
    DeleteNodeGroupOptions, TaskManager, TaskManagerRegistry, TaskTarget,
    UpdateDesiredNodesOptions,
};
pub use registry::{
    FnStep, RegistryError, StepFunc, StepIdentity, StepInvocation, StepRegistry, StepTable,
};
pub use state::{StateError, TaskState, TaskStateController};
pub use worker::{RunExit, TaskWorkerPool, WorkerError};
