//! # Task State Controller
//!
//! The only writer of task and step status. Every operation is a
//! read-modify-write on the persisted task guarded by the store's version:
//! a conflicting writer re-reads and re-applies, so two executors can never
//! both claim the same step and no update is lost.
//!
//! Step functions interact through [`TaskState`], obtained from
//! [`TaskStateController::get_task_state_and_current_step`].

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::StateConfig;
use crate::constants::events;
use crate::events::EventPublisher;
use crate::logging::{log_step_operation, log_task_operation};
use crate::models::params::parse_value;
use crate::models::{split_list, ParamError, ParamKey, Params, Step, Task};
use crate::state_machine::{
    StateMachineError, StepEvent, StepStateMachine, StepStatus, TaskEvent, TaskStateMachine,
    TaskStatus,
};
use crate::state_machine::guards::{NoActiveStepGuard, StateGuard};
use crate::store::{StoreError, TaskStore};

#[derive(Error, Debug)]
pub enum StateError {
    #[error("step {step_name} of task {task_id} is already running")]
    StepInProgress { task_id: String, step_name: String },

    #[error("attempt {attempt} of step {step_name} in task {task_id} was superseded by attempt {current}")]
    StaleAttempt {
        task_id: String,
        step_name: String,
        attempt: u32,
        current: u32,
    },

    #[error("step {step_name} not found in task {task_id}")]
    StepNotFound { task_id: String, step_name: String },

    #[error("step {step_name} is not the current step {current} of task {task_id}")]
    NotCurrentStep {
        task_id: String,
        step_name: String,
        current: String,
    },

    #[error("task {task_id} is halted in status {status}")]
    TaskHalted { task_id: String, status: TaskStatus },

    #[error("task {task_id} was force terminated")]
    ForceTerminated { task_id: String },

    #[error(transparent)]
    Machine(#[from] StateMachineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("gave up writing task {task_id} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { task_id: String, attempts: u32 },
}

/// Event to publish once a write lands
struct PendingEvent {
    name: &'static str,
    context: Value,
}

impl PendingEvent {
    fn new(name: &'static str, context: Value) -> Self {
        Self { name, context }
    }
}

/// Result of applying a change to a freshly read task
enum Outcome<T> {
    /// Nothing to persist
    Unchanged(T),
    /// Persist the task, then publish the events
    Changed(T, Vec<PendingEvent>),
}

#[derive(Clone)]
pub struct TaskStateController {
    store: Arc<dyn TaskStore>,
    publisher: EventPublisher,
    config: StateConfig,
}

impl std::fmt::Debug for TaskStateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStateController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskStateController {
    pub fn new(store: Arc<dyn TaskStore>, publisher: EventPublisher, config: StateConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Age after which a `RUNNING` step may be reclaimed
    pub fn stale_step_lease(&self) -> std::time::Duration {
        self.config.stale_step_lease()
    }

    pub async fn load(&self, task_id: &str) -> Result<Task, StateError> {
        Ok(self.store.get_task(task_id).await?.into_inner())
    }

    /// Claim `step_name` for execution
    ///
    /// Returns `None` when the step is not the task's current step or has
    /// already succeeded; the caller must then do nothing. Otherwise the step
    /// is persisted as `RUNNING` (and the task as `RUNNING` on its first
    /// step) before this returns.
    #[instrument(skip(self), fields(task_id = %task_id, step_name = %step_name))]
    pub async fn get_task_state_and_current_step(
        &self,
        task_id: &str,
        step_name: &str,
    ) -> Result<Option<(TaskState, Step)>, StateError> {
        let lease = chrono::Duration::from_std(self.config.stale_step_lease())
            .unwrap_or(chrono::Duration::MAX);

        let claimed = self
            .mutate(task_id, |task| {
                if task.current_step != step_name {
                    debug!(current = %task.current_step, "Step is not current, skipping");
                    return Ok(Outcome::Unchanged(None));
                }
                let step = task.step(step_name).ok_or_else(|| StateError::StepNotFound {
                    task_id: task.task_id.clone(),
                    step_name: step_name.to_string(),
                })?;
                if step.status == StepStatus::Success {
                    debug!("Step already succeeded, skipping");
                    return Ok(Outcome::Unchanged(None));
                }
                if task.force_terminate {
                    return Err(StateError::ForceTerminated {
                        task_id: task.task_id.clone(),
                    });
                }
                if !task.status.is_runnable() {
                    return Err(StateError::TaskHalted {
                        task_id: task.task_id.clone(),
                        status: task.status,
                    });
                }

                let mut pending = Vec::new();
                if step.status == StepStatus::Running {
                    let stale = step
                        .start
                        .map(|started| Utc::now() - started > lease)
                        .unwrap_or(true);
                    if !stale {
                        return Err(StateError::StepInProgress {
                            task_id: task.task_id.clone(),
                            step_name: step_name.to_string(),
                        });
                    }
                    warn!(started = ?step.start, "Reclaiming step with expired lease");
                    let step = task.step_mut(step_name).ok_or_else(|| StateError::StepNotFound {
                        task_id: task_id.to_string(),
                        step_name: step_name.to_string(),
                    })?;
                    StepStateMachine::new(step).transition(StepEvent::Reset)?;
                }

                NoActiveStepGuard { claiming: step_name }
                    .check(task)
                    .map_err(StateMachineError::from)?;

                if task.status == TaskStatus::Init {
                    TaskStateMachine::new(task).transition(TaskEvent::Start)?;
                    pending.push(PendingEvent::new(
                        events::TASK_STARTED,
                        json!({ "task_type": task.task_type, "cluster_id": task.cluster_id }),
                    ));
                }

                let step = task.step_mut(step_name).ok_or_else(|| StateError::StepNotFound {
                    task_id: task_id.to_string(),
                    step_name: step_name.to_string(),
                })?;
                StepStateMachine::new(step).transition(StepEvent::Start)?;
                let step = step.clone();
                pending.push(PendingEvent::new(
                    events::STEP_STARTED,
                    json!({ "step_name": step.name, "step_method": step.step_method, "attempt": step.retry }),
                ));

                Ok(Outcome::Changed(Some((task.clone(), step)), pending))
            })
            .await?;

        Ok(claimed.map(|(task, step)| {
            log_step_operation(
                "claim",
                &task.task_id,
                &step.name,
                Some(&step.step_method),
                step.status.as_str(),
                None,
            );
            (TaskState::new(self.clone(), task, &step), step)
        }))
    }

    /// Mark the running step `SUCCESS`, merge staged params and advance
    ///
    /// Idempotent for a step that already succeeded. With `attempt` set, a
    /// write from an attempt whose lease was reclaimed is rejected.
    #[instrument(skip(self, staged), fields(task_id = %task_id, step_name = %step_name))]
    pub async fn complete_step(
        &self,
        task_id: &str,
        step_name: &str,
        attempt: Option<u32>,
        staged: &Params,
    ) -> Result<Task, StateError> {
        self.mutate(task_id, |task| {
            let step = require_current(task, step_name)?;
            require_attempt(task, step, attempt)?;
            if step.status == StepStatus::Success {
                return Ok(Outcome::Unchanged(task.clone()));
            }

            task.common_params.merge(staged);
            StepStateMachine::new(task_step_mut(task, step_name)?).transition(StepEvent::Complete)?;

            let mut pending = vec![PendingEvent::new(
                events::STEP_COMPLETED,
                json!({ "step_name": step_name }),
            )];
            pending.extend(advance(task, step_name)?);
            Ok(Outcome::Changed(task.clone(), pending))
        })
        .await
    }

    /// Mark the running step `FAILURE` and halt the task
    ///
    /// Staged params are still merged so partial progress survives. A step
    /// flagged `skip_on_failure` records the failure and lets the task advance.
    #[instrument(skip(self, staged), fields(task_id = %task_id, step_name = %step_name))]
    pub async fn fail_step(
        &self,
        task_id: &str,
        step_name: &str,
        attempt: Option<u32>,
        reason: &str,
        staged: &Params,
    ) -> Result<Task, StateError> {
        self.mutate(task_id, |task| {
            let step = require_current(task, step_name)?;
            require_attempt(task, step, attempt)?;
            match step.status {
                StepStatus::Failure | StepStatus::Success => {
                    return Ok(Outcome::Unchanged(task.clone()))
                }
                _ => {}
            }
            let skip = step.skip_on_failure;

            task.common_params.merge(staged);
            StepStateMachine::new(task_step_mut(task, step_name)?)
                .transition(StepEvent::fail_with_error(reason))?;

            let mut pending = vec![PendingEvent::new(
                events::STEP_FAILED,
                json!({ "step_name": step_name, "error": reason, "skipped": skip }),
            )];

            if skip {
                pending.extend(advance(task, step_name)?);
            } else if task.status.is_runnable() {
                let message = format!("step {step_name} failed: {reason}");
                TaskStateMachine::new(task).transition(TaskEvent::Fail(message.clone()))?;
                pending.push(PendingEvent::new(
                    events::TASK_FAILED,
                    json!({ "step_name": step_name, "error": message }),
                ));
            }
            Ok(Outcome::Changed(task.clone(), pending))
        })
        .await
    }

    /// Persist staged params while the step is still running
    pub async fn save_common_params(
        &self,
        task_id: &str,
        step_name: &str,
        attempt: Option<u32>,
        staged: &Params,
    ) -> Result<Task, StateError> {
        if staged.is_empty() {
            return self.load(task_id).await;
        }
        self.mutate(task_id, |task| {
            let step = require_current(task, step_name)?;
            require_attempt(task, step, attempt)?;
            if step.status != StepStatus::Running {
                return Err(StateMachineError::InvalidTransition {
                    from: step.status.to_string(),
                    event: "save_params".to_string(),
                }
                .into());
            }
            task.common_params.merge(staged);
            Ok(Outcome::Changed(task.clone(), Vec::new()))
        })
        .await
    }

    /// Operator retry of a failed task: re-arm the failed step and resume
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn retry_task(&self, task_id: &str) -> Result<Task, StateError> {
        let task = self
            .mutate(task_id, |task| {
                let current = task.current_step.clone();
                let step = task_step_mut(task, &current)?;
                if matches!(step.status, StepStatus::Failure | StepStatus::Running) {
                    StepStateMachine::new(step).transition(StepEvent::Reset)?;
                }
                TaskStateMachine::new(task).transition(TaskEvent::Retry)?;
                let retry_count = task.retry_count;
                Ok(Outcome::Changed(
                    task.clone(),
                    vec![PendingEvent::new(
                        events::TASK_RETRIED,
                        json!({ "step_name": current, "retry_count": retry_count }),
                    )],
                ))
            })
            .await?;

        log_task_operation(
            "retry",
            &task.task_id,
            Some(&task.task_type),
            Some(&task.cluster_id),
            task.status.as_str(),
            Some(&task.current_step),
        );
        Ok(task)
    }

    /// Request termination; a task with no step in flight fails immediately
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn force_terminate(&self, task_id: &str) -> Result<Task, StateError> {
        self.mutate(task_id, |task| {
            if task.status.is_terminal() && task.force_terminate {
                return Ok(Outcome::Unchanged(task.clone()));
            }
            task.force_terminate = true;
            let mut pending = vec![PendingEvent::new(
                events::TASK_TERMINATED,
                json!({ "status": task.status }),
            )];
            pending.extend(fail_if_idle_and_terminated(task)?);
            Ok(Outcome::Changed(task.clone(), pending))
        })
        .await
    }

    /// Fail a terminated task at a step boundary; no-op otherwise
    pub async fn halt_if_terminated(&self, task_id: &str) -> Result<Task, StateError> {
        self.mutate(task_id, |task| {
            let pending = fail_if_idle_and_terminated(task)?;
            if pending.is_empty() {
                Ok(Outcome::Unchanged(task.clone()))
            } else {
                Ok(Outcome::Changed(task.clone(), pending))
            }
        })
        .await
    }

    /// Fail a task whose current step can never run, e.g. an unregistered method
    pub async fn abort_task(&self, task_id: &str, reason: &str) -> Result<Task, StateError> {
        self.mutate(task_id, |task| {
            if !task.status.is_runnable() || task.running_steps().next().is_some() {
                return Ok(Outcome::Unchanged(task.clone()));
            }
            TaskStateMachine::new(task).transition(TaskEvent::Fail(reason.to_string()))?;
            Ok(Outcome::Changed(
                task.clone(),
                vec![PendingEvent::new(
                    events::TASK_FAILED,
                    json!({ "step_name": task.current_step, "error": reason }),
                )],
            ))
        })
        .await
    }

    /// Compare-and-swap loop: read, apply, write, re-apply on conflict
    async fn mutate<T, F>(&self, task_id: &str, mut apply: F) -> Result<T, StateError>
    where
        F: FnMut(&mut Task) -> Result<Outcome<T>, StateError>,
    {
        let attempts = self.config.cas_retry_limit.max(1);
        for attempt in 1..=attempts {
            let versioned = self.store.get_task(task_id).await?;
            let mut task = versioned.value;

            match apply(&mut task)? {
                Outcome::Unchanged(value) => return Ok(value),
                Outcome::Changed(value, pending) => {
                    task.last_update = Utc::now();
                    match self.store.update_task(&task, versioned.version).await {
                        Ok(_) => {
                            for event in pending {
                                self.publisher.publish(event.name, task_id, event.context);
                            }
                            return Ok(value);
                        }
                        Err(e) if e.is_conflict() => {
                            debug!(task_id = %task_id, attempt, "Task write conflicted, re-reading");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        Err(StateError::ConflictRetriesExhausted {
            task_id: task_id.to_string(),
            attempts,
        })
    }
}

fn task_step_mut<'a>(task: &'a mut Task, step_name: &str) -> Result<&'a mut Step, StateError> {
    let task_id = task.task_id.clone();
    task.step_mut(step_name).ok_or_else(|| StateError::StepNotFound {
        task_id,
        step_name: step_name.to_string(),
    })
}

fn require_current<'a>(task: &'a Task, step_name: &str) -> Result<&'a Step, StateError> {
    let step = task.step(step_name).ok_or_else(|| StateError::StepNotFound {
        task_id: task.task_id.clone(),
        step_name: step_name.to_string(),
    })?;
    if task.current_step != step_name {
        return Err(StateError::NotCurrentStep {
            task_id: task.task_id.clone(),
            step_name: step_name.to_string(),
            current: task.current_step.clone(),
        });
    }
    Ok(step)
}

/// The step's attempt counter moves on every claim, reclaims included
fn require_attempt(task: &Task, step: &Step, attempt: Option<u32>) -> Result<(), StateError> {
    match attempt {
        Some(attempt) if attempt != step.retry => Err(StateError::StaleAttempt {
            task_id: task.task_id.clone(),
            step_name: step.name.clone(),
            attempt,
            current: step.retry,
        }),
        _ => Ok(()),
    }
}

/// Move `current_step` past a finished step, or complete the task after the last
fn advance(task: &mut Task, finished: &str) -> Result<Vec<PendingEvent>, StateError> {
    if task.status != TaskStatus::Running {
        return Ok(Vec::new());
    }
    match task.next_step_after(finished).map(str::to_string) {
        Some(next) => {
            task.current_step = next;
            Ok(Vec::new())
        }
        None => {
            TaskStateMachine::new(task).transition(TaskEvent::Complete)?;
            log_task_operation(
                "complete",
                &task.task_id,
                Some(&task.task_type),
                Some(&task.cluster_id),
                task.status.as_str(),
                None,
            );
            Ok(vec![PendingEvent::new(
                events::TASK_COMPLETED,
                json!({ "task_type": task.task_type }),
            )])
        }
    }
}

fn fail_if_idle_and_terminated(task: &mut Task) -> Result<Vec<PendingEvent>, StateError> {
    if !task.force_terminate
        || !task.status.is_runnable()
        || task.running_steps().next().is_some()
    {
        return Ok(Vec::new());
    }
    let message = "task force terminated".to_string();
    TaskStateMachine::new(task).transition(TaskEvent::Fail(message.clone()))?;
    info!(task_id = %task.task_id, "Task force terminated");
    Ok(vec![PendingEvent::new(
        events::TASK_FAILED,
        json!({ "error": message }),
    )])
}

/// A claimed step's view of its task
///
/// Params set here are staged and persisted with the next write, or
/// explicitly through [`TaskState::flush_common_params`].
#[derive(Debug)]
pub struct TaskState {
    controller: TaskStateController,
    task: Task,
    step_name: String,
    /// `step.retry` as claimed; writes from a reclaimed attempt are refused
    attempt: u32,
    staged: Params,
}

impl TaskState {
    fn new(controller: TaskStateController, task: Task, step: &Step) -> Self {
        Self {
            controller,
            task,
            step_name: step.name.clone(),
            attempt: step.retry,
            staged: Params::new(),
        }
    }

    /// Task snapshot as of the last write made through this handle
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Lookup order: staged, step params, task common params
    pub fn param(&self, key: ParamKey) -> Option<&str> {
        self.staged
            .get(key)
            .or_else(|| self.task.step(&self.step_name).and_then(|s| s.params.get(key)))
            .or_else(|| self.task.common_params.get(key))
    }

    pub fn require_param(&self, key: ParamKey) -> Result<&str, ParamError> {
        self.param(key).ok_or(ParamError::Missing { key: key.as_str() })
    }

    pub fn param_list(&self, key: ParamKey) -> Vec<String> {
        self.param(key).map(split_list).unwrap_or_default()
    }

    pub fn require_parsed<T>(&self, key: ParamKey) -> Result<T, ParamError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        parse_value(key, self.require_param(key)?)
    }

    pub fn set_common_param(&mut self, key: ParamKey, value: impl Into<String>) {
        self.staged.insert(key, value);
    }

    pub fn set_common_param_list<S: AsRef<str>>(&mut self, key: ParamKey, values: &[S]) {
        self.staged.insert_list(key, values);
    }

    pub fn extend_common_params(&mut self, params: &Params) {
        self.staged.merge(params);
    }

    /// Persist staged params now, keeping the step running
    pub async fn flush_common_params(&mut self) -> Result<(), StateError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        self.task = self
            .controller
            .save_common_params(
                &self.task.task_id,
                &self.step_name,
                Some(self.attempt),
                &self.staged,
            )
            .await?;
        self.staged = Params::new();
        Ok(())
    }

    pub async fn update_step_succ(
        &mut self,
        start: DateTime<Utc>,
        step_name: &str,
    ) -> Result<(), StateError> {
        self.task = self
            .controller
            .complete_step(&self.task.task_id, step_name, Some(self.attempt), &self.staged)
            .await?;
        self.staged = Params::new();
        let elapsed = (Utc::now() - start).num_milliseconds().to_string();
        log_step_operation(
            "complete",
            &self.task.task_id,
            step_name,
            None,
            StepStatus::Success.as_str(),
            Some(&format!("elapsed_ms={elapsed}")),
        );
        Ok(())
    }

    pub async fn update_step_failure(
        &mut self,
        start: DateTime<Utc>,
        step_name: &str,
        err: &(dyn std::fmt::Display + Sync),
    ) -> Result<(), StateError> {
        let reason = err.to_string();
        self.task = self
            .controller
            .fail_step(
                &self.task.task_id,
                step_name,
                Some(self.attempt),
                &reason,
                &self.staged,
            )
            .await?;
        self.staged = Params::new();
        warn!(
            task_id = %self.task.task_id,
            step_name = %step_name,
            elapsed_ms = (Utc::now() - start).num_milliseconds(),
            error = %reason,
            "Step failed"
        );
        Ok(())
    }

    /// Re-read the termination flag from the store
    pub async fn is_force_terminated(&self) -> Result<bool, StateError> {
        Ok(self.controller.load(&self.task.task_id).await?.force_terminate)
    }
}
