//! # Task Builder
//!
//! Fluent assembly of a [`Task`] shared by every provider's operation
//! builders. The builder owns the invariants a freshly built task must
//! satisfy: a fresh UUID, operator and job type in `common_params`, a
//! non-empty sequence of uniquely named steps, and `current_step` pointing
//! at the first step.

use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::constants::{JobType, TaskOperation};
use crate::models::{ParamError, ParamKey, Params, Step, Task};
use crate::state_machine::TaskStatus;
use crate::task::registry::StepIdentity;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskBuildError {
    #[error("task {task_type} assembled with an empty step sequence")]
    EmptyStepSequence { task_type: String },

    #[error("step {0} added twice")]
    DuplicateStep(String),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: TaskOperation,
    },

    #[error(transparent)]
    Param(#[from] ParamError),
}

impl TaskBuildError {
    pub fn invalid_option(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            field,
            reason: reason.into(),
        }
    }
}

/// Fluent builder for one task
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task_type: String,
    task_name: String,
    cluster_id: String,
    project_id: String,
    node_group_id: String,
    operator: String,
    job_type: Option<JobType>,
    common_params: Params,
    steps: Vec<Step>,
}

impl TaskBuilder {
    pub fn new(provider: &str, operation: TaskOperation) -> Self {
        Self {
            task_type: operation.task_type(provider),
            task_name: operation.as_str().to_string(),
            cluster_id: String::new(),
            project_id: String::new(),
            node_group_id: String::new(),
            operator: String::new(),
            job_type: Some(operation.job_type()),
            common_params: Params::new(),
            steps: Vec::new(),
        }
    }

    pub fn task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    pub fn cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn node_group_id(mut self, node_group_id: impl Into<String>) -> Self {
        self.node_group_id = node_group_id.into();
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn common_param(mut self, key: ParamKey, value: impl Into<String>) -> Self {
        self.common_params.insert(key, value);
        self
    }

    /// Append a step; order of calls is execution order
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a step only when `condition` holds
    pub fn step_if(self, condition: bool, step: impl FnOnce() -> Step) -> Self {
        if condition {
            self.step(step())
        } else {
            self
        }
    }

    pub fn build(self) -> Result<Task, TaskBuildError> {
        if self.cluster_id.is_empty() {
            return Err(TaskBuildError::MissingField("cluster_id"));
        }
        if self.operator.is_empty() {
            return Err(TaskBuildError::MissingField("operator"));
        }

        let mut steps = HashMap::with_capacity(self.steps.len());
        let mut step_sequence = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            if steps.contains_key(&step.name) {
                return Err(TaskBuildError::DuplicateStep(step.name));
            }
            step_sequence.push(step.name.clone());
            steps.insert(step.name.clone(), step);
        }

        let Some(first) = step_sequence.first().cloned() else {
            error!(task_type = %self.task_type, "Task assembled with no steps");
            return Err(TaskBuildError::EmptyStepSequence {
                task_type: self.task_type,
            });
        };

        let mut common_params = self.common_params;
        common_params.insert(ParamKey::ClusterId, &self.cluster_id);
        common_params.insert(ParamKey::Operator, &self.operator);
        if let Some(job_type) = self.job_type {
            common_params.insert(ParamKey::JobType, job_type.as_str());
        }
        if !self.node_group_id.is_empty() {
            common_params.insert(ParamKey::NodeGroupId, &self.node_group_id);
        }
        if !self.project_id.is_empty() {
            common_params.insert(ParamKey::ProjectId, &self.project_id);
        }
        common_params.insert(ParamKey::TaskName, &self.task_name);

        let now = Utc::now();
        Ok(Task {
            task_id: Uuid::new_v4().to_string(),
            task_type: self.task_type,
            task_name: self.task_name,
            status: TaskStatus::Init,
            message: String::new(),
            steps,
            step_sequence,
            current_step: first,
            common_params,
            cluster_id: self.cluster_id,
            project_id: self.project_id,
            node_group_id: self.node_group_id,
            creator: self.operator.clone(),
            updater: self.operator,
            start: now,
            last_update: now,
            end: None,
            force_terminate: false,
            retry_count: 0,
        })
    }
}

/// Start a step for a typed identity; the persisted method is its string form
pub fn step_for<S: StepIdentity>(identity: S) -> Step {
    let mut step = Step::new(identity.step_name(), identity.method());
    step.timeout_secs = identity.default_timeout_secs();
    step
}
