use serde::{Deserialize, Serialize};

/// Inputs to the task status machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// First step of the task was claimed by an executor
    Start,
    /// Last step of the sequence succeeded
    Complete,
    /// A step failed or the task was terminated, with the reason
    Fail(String),
    /// Operator retry of a failed task
    Retry,
}

impl TaskEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
        }
    }

    pub fn fail_with_error(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }
}

/// Inputs to the step status machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepEvent {
    /// An executor claimed the step
    Start,
    /// Step function reported success
    Complete,
    /// Step function reported failure
    Fail(String),
    /// Step returns to NOT_STARTED (operator retry or stale lease reclaim)
    Reset,
}

impl StepEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Reset => "reset",
        }
    }

    /// Failure reason carried by a `Fail` event
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn fail_with_error(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_shape() {
        let json = serde_json::to_value(TaskEvent::fail_with_error("boom")).unwrap();
        assert_eq!(json["type"], "Fail");
        assert_eq!(json["data"], "boom");
        assert_eq!(StepEvent::Reset.event_type(), "reset");
        assert_eq!(StepEvent::Start.reason(), None);
        assert_eq!(StepEvent::fail_with_error("throttled").reason(), Some("throttled"));
    }
}
