//! # Step Executor
//!
//! Runs exactly one step per invocation: loads the task, resolves the step
//! function by the persisted `step_method`, invokes it under the step's
//! timeout and reports what happened. Errors a step function returns without
//! recording are recorded here so none are lost.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use super::error::{ExecutorError, StepError};
use super::registry::{StepInvocation, StepRegistry};
use super::state::TaskStateController;
use crate::context::OpContext;
use crate::models::Params;
use crate::state_machine::{StepStatus, TaskStatus};

/// What one execution attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step recorded `SUCCESS`
    Succeeded,
    /// Step recorded `FAILURE` with the given message
    Failed(String),
    /// Step was not current or already done; nothing happened
    Skipped,
    /// Another executor owns the step
    InProgressElsewhere,
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    registry: Arc<StepRegistry>,
    controller: TaskStateController,
    default_timeout: Duration,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<StepRegistry>,
        controller: TaskStateController,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            default_timeout,
        }
    }

    #[instrument(skip(self, ctx), fields(task_id = %task_id, step_name = %step_name))]
    pub async fn execute_step(
        &self,
        task_id: &str,
        step_name: &str,
        ctx: &OpContext,
    ) -> Result<StepOutcome, ExecutorError> {
        let task = self.controller.load(task_id).await?;
        let step = task.step(step_name).ok_or_else(|| ExecutorError::StepNotFound {
            task_id: task_id.to_string(),
            step_name: step_name.to_string(),
        })?;

        let Some(func) = self.registry.get(&step.step_method) else {
            error!(step_method = %step.step_method, "Step method is not registered");
            return Err(ExecutorError::UnregisteredStep {
                method: step.step_method.clone(),
                step_name: step_name.to_string(),
            });
        };

        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let step_ctx = ctx.with_timeout(timeout);
        let started = Utc::now();
        // Every claim, reclaims included, bumps the counter by one
        let attempt = step.retry + 1;

        info!(step_method = %step.step_method, timeout_secs = timeout.as_secs(), "▶️ EXECUTOR: running step");

        let invocation = StepInvocation {
            task_id: task_id.to_string(),
            step_name: step_name.to_string(),
            ctx: step_ctx.clone(),
        };

        // The step owns its deadline through the context; the outer race
        // only stops functions that never check it.
        let result = tokio::select! {
            result = func.execute(invocation) => result,
            err = step_ctx.done() => Err(StepError::from(err)),
        };

        let elapsed_ms = (Utc::now() - started).num_milliseconds();
        self.settle(task_id, step_name, attempt, result, elapsed_ms).await
    }

    /// Translate the step's result and the persisted status into an outcome,
    /// recording a failure the step left unrecorded
    async fn settle(
        &self,
        task_id: &str,
        step_name: &str,
        attempt: u32,
        result: Result<(), StepError>,
        elapsed_ms: i64,
    ) -> Result<StepOutcome, ExecutorError> {
        if let Err(StepError::State(state_err)) = &result {
            use super::state::StateError;
            match state_err {
                StateError::StepInProgress { .. } | StateError::StaleAttempt { .. } => {
                    return Ok(StepOutcome::InProgressElsewhere)
                }
                StateError::TaskHalted { .. } | StateError::ForceTerminated { .. } => {
                    let task = self.controller.halt_if_terminated(task_id).await?;
                    return Ok(StepOutcome::Failed(task.message));
                }
                _ => {}
            }
        }

        let task = self.controller.load(task_id).await?;
        let Some(step) = task.step(step_name) else {
            return Err(ExecutorError::StepNotFound {
                task_id: task_id.to_string(),
                step_name: step_name.to_string(),
            });
        };

        match (step.status, result) {
            (StepStatus::Success, _) => {
                info!(elapsed_ms, "✅ EXECUTOR: step succeeded");
                Ok(StepOutcome::Succeeded)
            }
            (StepStatus::Failure, _) => Ok(StepOutcome::Failed(step.message.clone())),
            (StepStatus::Running, Err(_)) if step.retry != attempt => {
                warn!(attempt, current = step.retry, "Step was reclaimed by a newer attempt");
                Ok(StepOutcome::InProgressElsewhere)
            }
            (StepStatus::Running, Err(e)) => {
                let reason = e.to_string();
                warn!(error = %reason, elapsed_ms, "Recording failure the step did not record");
                match self
                    .controller
                    .fail_step(task_id, step_name, Some(attempt), &reason, &Params::new())
                    .await
                {
                    Ok(_) => Ok(StepOutcome::Failed(reason)),
                    Err(super::state::StateError::StaleAttempt { .. }) => {
                        Ok(StepOutcome::InProgressElsewhere)
                    }
                    Err(other) => Err(other.into()),
                }
            }
            (StepStatus::Running, Ok(())) => {
                // Returned success without recording it: leave the lease to expire
                warn!(elapsed_ms, "Step returned without recording an outcome");
                Ok(StepOutcome::Skipped)
            }
            (StepStatus::NotStarted, Err(e)) if task.status == TaskStatus::Failure => {
                Ok(StepOutcome::Failed(e.to_string()))
            }
            (StepStatus::NotStarted, _) => Ok(StepOutcome::Skipped),
        }
    }
}
