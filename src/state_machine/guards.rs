use super::errors::{GuardError, GuardResult};
use super::states::StepStatus;
use crate::models::Task;

/// Precondition checked before a transition is applied
pub trait StateGuard<T> {
    fn check(&self, entity: &T) -> GuardResult<()>;

    /// Short label used in transition logs
    fn description(&self) -> &'static str;
}

/// Guard to check that every step finished before completing a task
pub struct AllStepsCompleteGuard;

impl StateGuard<Task> for AllStepsCompleteGuard {
    fn check(&self, task: &Task) -> GuardResult<()> {
        let unfinished: Vec<String> = task
            .ordered_steps()
            .filter(|step| match step.status {
                StepStatus::Success => false,
                StepStatus::Failure => !step.skip_on_failure,
                _ => true,
            })
            .map(|step| step.name.clone())
            .collect();

        if unfinished.is_empty() {
            Ok(())
        } else {
            Err(GuardError::StepsUnfinished {
                task_id: task.task_id.clone(),
                steps: unfinished,
            })
        }
    }

    fn description(&self) -> &'static str {
        "All steps must be complete"
    }
}

/// Guard to check no other step of the task is running before claiming one
pub struct NoActiveStepGuard<'a> {
    pub claiming: &'a str,
}

impl StateGuard<Task> for NoActiveStepGuard<'_> {
    fn check(&self, task: &Task) -> GuardResult<()> {
        if let Some(other) = task.running_steps().find(|s| s.name != self.claiming) {
            return Err(GuardError::StepAlreadyRunning {
                task_id: task.task_id.clone(),
                step_name: other.name.clone(),
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "At most one step may be running"
    }
}

/// Guard to check a task is halted on a failed step before a retry
pub struct TaskCanBeRetriedGuard;

impl StateGuard<Task> for TaskCanBeRetriedGuard {
    fn check(&self, task: &Task) -> GuardResult<()> {
        if task.force_terminate {
            return Err(GuardError::Terminated {
                task_id: task.task_id.clone(),
            });
        }
        if task.current().map(|s| s.status) == Some(StepStatus::Success) {
            return Err(GuardError::NothingToRetry {
                task_id: task.task_id.clone(),
                step_name: task.current_step.clone(),
            });
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Task must be halted on an unfinished step"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::test_support::task_with_steps;

    #[test]
    fn test_all_steps_complete_guard() {
        let mut task = task_with_steps(&["a", "b"]);
        assert!(AllStepsCompleteGuard.check(&task).is_err());

        task.step_mut("a").unwrap().status = StepStatus::Success;
        task.step_mut("b").unwrap().status = StepStatus::Failure;
        assert!(AllStepsCompleteGuard.check(&task).is_err());

        task.step_mut("b").unwrap().skip_on_failure = true;
        assert!(AllStepsCompleteGuard.check(&task).is_ok());
    }

    #[test]
    fn test_no_active_step_guard() {
        let mut task = task_with_steps(&["a", "b"]);
        task.step_mut("a").unwrap().status = StepStatus::Running;

        let reclaim = NoActiveStepGuard { claiming: "a" };
        assert!(reclaim.check(&task).is_ok());

        let other = NoActiveStepGuard { claiming: "b" };
        assert_eq!(
            other.check(&task),
            Err(GuardError::StepAlreadyRunning {
                task_id: task.task_id.clone(),
                step_name: "a".to_string(),
            })
        );
    }

    #[test]
    fn test_retry_guard_rejects_terminated() {
        let mut task = task_with_steps(&["a"]);
        task.step_mut("a").unwrap().status = StepStatus::Failure;
        assert!(TaskCanBeRetriedGuard.check(&task).is_ok());

        task.force_terminate = true;
        assert!(TaskCanBeRetriedGuard.check(&task).is_err());
    }
}
