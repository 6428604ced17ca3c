//! # Task Model
//!
//! One persisted orchestration run for a single high-level operation.
//!
//! ## Overview
//!
//! A `Task` owns an ordered `step_sequence` and an unordered `steps` lookup
//! table. Execution order comes exclusively from `step_sequence`;
//! `current_step` names the next step an executor may claim. Steps pass data
//! forward through `common_params`.
//!
//! ## Invariants
//!
//! - `step_sequence` is non-empty and every entry is a key of `steps`
//! - `current_step` is a key of `steps`
//! - at most one step is `RUNNING`
//!
//! Status changes never happen by assigning fields directly from outside the
//! crate's state controller; see [`crate::state_machine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::params::Params;
use crate::state_machine::{StepStatus, TaskStatus};

/// Execution system tag for steps run directly against cloud APIs
pub const SYSTEM_API: &str = "api";

/// One unit of work within a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Registry key of the function that executes this step
    pub step_method: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub status: StepStatus,
    pub system: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: String,
    /// Number of attempts started for this step
    #[serde(default)]
    pub retry: u32,
    /// Execution budget overriding the worker default
    pub timeout_secs: Option<u64>,
    /// Record a failure on the step but let the task advance
    #[serde(default)]
    pub skip_on_failure: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, step_method: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_method: step_method.into(),
            params: Params::new(),
            status: StepStatus::NotStarted,
            system: SYSTEM_API.to_string(),
            start: None,
            end: None,
            message: String::new(),
            retry: 0,
            timeout_secs: None,
            skip_on_failure: false,
        }
    }

    /// Wall clock time spent in the most recent attempt
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// One orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    /// Provider and operation, e.g. `aws-CreateCluster`
    pub task_type: String,
    pub task_name: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub message: String,
    pub steps: HashMap<String, Step>,
    pub step_sequence: Vec<String>,
    pub current_step: String,
    #[serde(default)]
    pub common_params: Params,
    pub cluster_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub node_group_id: String,
    pub creator: String,
    #[serde(default)]
    pub updater: String,
    pub start: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub force_terminate: bool,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.get_mut(name)
    }

    /// The step an executor may claim next
    pub fn current(&self) -> Option<&Step> {
        self.steps.get(&self.current_step)
    }

    /// Name of the step following `name` in the sequence
    pub fn next_step_after(&self, name: &str) -> Option<&str> {
        let position = self.step_sequence.iter().position(|s| s == name)?;
        self.step_sequence.get(position + 1).map(String::as_str)
    }

    /// Steps in execution order
    pub fn ordered_steps(&self) -> impl Iterator<Item = &Step> {
        self.step_sequence.iter().filter_map(|name| self.steps.get(name))
    }

    pub fn running_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values().filter(|s| s.status == StepStatus::Running)
    }

    pub fn is_last_step(&self, name: &str) -> bool {
        self.step_sequence.last().map(String::as_str) == Some(name)
    }

    /// Check the structural invariants of the task record
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.step_sequence.is_empty() {
            return Err(format!("task {} has an empty step sequence", self.task_id));
        }
        if let Some(missing) = self
            .step_sequence
            .iter()
            .find(|name| !self.steps.contains_key(*name))
        {
            return Err(format!(
                "task {} sequences step {missing} which is not defined",
                self.task_id
            ));
        }
        if !self.steps.contains_key(&self.current_step) {
            return Err(format!(
                "task {} current step {} is not defined",
                self.task_id, self.current_step
            ));
        }
        Ok(())
    }
}

/// Query filter for listing tasks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub cluster_id: Option<String>,
    pub node_group_id: Option<String>,
    pub task_type: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn for_cluster(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.cluster_id
            .as_ref()
            .map_or(true, |c| c == &task.cluster_id)
            && self
                .node_group_id
                .as_ref()
                .map_or(true, |n| n == &task.node_group_id)
            && self
                .task_type
                .as_ref()
                .map_or(true, |t| t == &task.task_type)
            && self.status.map_or(true, |s| s == task.status)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::task_with_steps;
    use super::*;

    #[test]
    fn test_sequence_navigation() {
        let task = task_with_steps(&["a", "b", "c"]);
        assert_eq!(task.next_step_after("a"), Some("b"));
        assert_eq!(task.next_step_after("c"), None);
        assert!(task.is_last_step("c"));
        let order: Vec<_> = task.ordered_steps().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_structure() {
        let mut task = task_with_steps(&["a", "b"]);
        assert!(task.validate_structure().is_ok());

        task.current_step = "zzz".to_string();
        assert!(task.validate_structure().is_err());

        let empty = task_with_steps(&[]);
        assert!(empty.validate_structure().unwrap_err().contains("empty"));
    }

    #[test]
    fn test_filter_matches() {
        let task = task_with_steps(&["a"]);
        assert!(TaskFilter::default().matches(&task));
        assert!(TaskFilter::for_cluster("cluster-1").matches(&task));
        assert!(!TaskFilter::for_cluster("cluster-2").matches(&task));
        assert!(!TaskFilter::default()
            .with_status(TaskStatus::Success)
            .matches(&task));
    }
}
