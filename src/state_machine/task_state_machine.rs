use chrono::Utc;
use tracing::debug;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    guards::{AllStepsCompleteGuard, StateGuard, TaskCanBeRetriedGuard},
    states::TaskStatus,
};
use crate::models::Task;

/// Status machine for a task record held in memory
///
/// Transitions mutate the borrowed task only; persisting the result is the
/// caller's job.
pub struct TaskStateMachine<'a> {
    task: &'a mut Task,
}

impl<'a> TaskStateMachine<'a> {
    pub fn new(task: &'a mut Task) -> Self {
        Self { task }
    }

    pub fn current_state(&self) -> TaskStatus {
        self.task.status
    }

    /// Attempt to transition the task state
    pub fn transition(&mut self, event: TaskEvent) -> StateMachineResult<TaskStatus> {
        let current_state = self.current_state();
        let target_state = Self::determine_target_state(current_state, &event)?;

        self.check_guards(current_state, target_state, &event)?;
        self.apply(target_state, &event);

        debug!(
            task_id = %self.task.task_id,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            "Task transitioned"
        );
        Ok(target_state)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskStatus,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskStatus> {
        let target = match (current_state, event) {
            (TaskStatus::Init, TaskEvent::Start) => TaskStatus::Running,
            (TaskStatus::Running, TaskEvent::Complete) => TaskStatus::Success,
            (TaskStatus::Init | TaskStatus::Running, TaskEvent::Fail(_)) => TaskStatus::Failure,
            (TaskStatus::Failure, TaskEvent::Retry) => TaskStatus::Running,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn check_guards(
        &self,
        current_state: TaskStatus,
        target_state: TaskStatus,
        event: &TaskEvent,
    ) -> StateMachineResult<()> {
        let guard: &dyn StateGuard<Task> = match (current_state, target_state, event) {
            (TaskStatus::Running, TaskStatus::Success, TaskEvent::Complete) => &AllStepsCompleteGuard,
            (TaskStatus::Failure, TaskStatus::Running, TaskEvent::Retry) => &TaskCanBeRetriedGuard,
            _ => return Ok(()),
        };
        guard.check(self.task).map_err(|err| {
            debug!(task_id = %self.task.task_id, guard = guard.description(), error = %err, "Guard rejected transition");
            StateMachineError::from(err)
        })
    }

    fn apply(&mut self, target_state: TaskStatus, event: &TaskEvent) {
        let now = Utc::now();
        let task = &mut *self.task;
        task.status = target_state;
        task.last_update = now;

        match event {
            TaskEvent::Start => task.message = "running".to_string(),
            TaskEvent::Complete => task.message = "success".to_string(),
            TaskEvent::Fail(reason) => task.message = reason.clone(),
            TaskEvent::Retry => {
                task.retry_count += 1;
                task.message = format!("retry #{}", task.retry_count);
            }
        }

        task.end = target_state.is_terminal().then_some(now);
    }
}
