use chrono::Utc;
use tracing::debug;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::StepEvent,
    states::StepStatus,
};
use crate::models::Step;

/// Status machine for one step record held in memory
pub struct StepStateMachine<'a> {
    step: &'a mut Step,
}

impl<'a> StepStateMachine<'a> {
    pub fn new(step: &'a mut Step) -> Self {
        Self { step }
    }

    pub fn current_state(&self) -> StepStatus {
        self.step.status
    }

    /// Attempt to transition the step state
    pub fn transition(&mut self, event: StepEvent) -> StateMachineResult<StepStatus> {
        let current_state = self.current_state();
        let target_state = Self::determine_target_state(current_state, &event)?;
        self.apply(target_state, &event);

        debug!(
            step_name = %self.step.name,
            from = %current_state,
            to = %target_state,
            event = event.event_type(),
            "Step transitioned"
        );
        Ok(target_state)
    }

    pub fn determine_target_state(
        current_state: StepStatus,
        event: &StepEvent,
    ) -> StateMachineResult<StepStatus> {
        let target = match (current_state, event) {
            (StepStatus::NotStarted, StepEvent::Start) => StepStatus::Running,
            (StepStatus::Running, StepEvent::Complete) => StepStatus::Success,
            (StepStatus::Running, StepEvent::Fail(_)) => StepStatus::Failure,
            // Operator retry, or reclaim of a lease left behind by a dead worker
            (StepStatus::Failure | StepStatus::Running, StepEvent::Reset) => StepStatus::NotStarted,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    fn apply(&mut self, target_state: StepStatus, event: &StepEvent) {
        let now = Utc::now();
        let step = &mut *self.step;
        step.status = target_state;

        match event {
            StepEvent::Start => {
                step.start = Some(now);
                step.end = None;
                step.retry += 1;
                step.message = "running".to_string();
            }
            StepEvent::Complete => {
                step.end = Some(now);
                step.message = "success".to_string();
            }
            StepEvent::Fail(reason) => {
                step.end = Some(now);
                step.message = reason.clone();
            }
            StepEvent::Reset => {
                step.end = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_lifecycle() {
        let mut step = Step::new("create", "aws-CreateClusterTask");

        StepStateMachine::new(&mut step)
            .transition(StepEvent::Start)
            .unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert_eq!(step.retry, 1);
        assert!(step.start.is_some());

        StepStateMachine::new(&mut step)
            .transition(StepEvent::fail_with_error("throttled"))
            .unwrap();
        assert_eq!(step.status, StepStatus::Failure);
        assert_eq!(step.message, "throttled");
        assert!(step.end.is_some());

        StepStateMachine::new(&mut step)
            .transition(StepEvent::Reset)
            .unwrap();
        StepStateMachine::new(&mut step)
            .transition(StepEvent::Start)
            .unwrap();
        assert_eq!(step.retry, 2);
        assert!(step.end.is_none());
    }

    #[test]
    fn test_success_is_final() {
        for event in [StepEvent::Start, StepEvent::Reset, StepEvent::Complete] {
            assert!(StepStateMachine::determine_target_state(StepStatus::Success, &event).is_err());
        }
        assert!(
            StepStateMachine::determine_target_state(StepStatus::NotStarted, &StepEvent::Complete)
                .is_err()
        );
    }
}
