//! # System Constants
//!
//! Event names, operation identifiers and job types shared by the engine,
//! the task builders and every cloud provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle events published after each persisted transition
pub mod events {
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_RETRIED: &str = "task.retried";
    pub const TASK_TERMINATED: &str = "task.terminated";

    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
}

/// High-level operations a task manager can build tasks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOperation {
    CreateCluster,
    DeleteCluster,
    CreateNodeGroup,
    DeleteNodeGroup,
    UpdateDesiredNodes,
    CleanNodesInGroup,
}

impl TaskOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateCluster => "CreateCluster",
            Self::DeleteCluster => "DeleteCluster",
            Self::CreateNodeGroup => "CreateNodeGroup",
            Self::DeleteNodeGroup => "DeleteNodeGroup",
            Self::UpdateDesiredNodes => "UpdateDesiredNodes",
            Self::CleanNodesInGroup => "CleanNodesInGroup",
        }
    }

    /// Persisted `task_type` for this operation on a provider, e.g. `aws-CreateCluster`
    pub fn task_type(&self, provider: &str) -> String {
        format!("{provider}-{}", self.as_str())
    }

    /// Default job type recorded in common params
    pub fn job_type(&self) -> JobType {
        match self {
            Self::CreateCluster => JobType::CreateCluster,
            Self::DeleteCluster => JobType::DeleteCluster,
            Self::CreateNodeGroup | Self::DeleteNodeGroup => JobType::NodeGroup,
            Self::UpdateDesiredNodes => JobType::AddNode,
            Self::CleanNodesInGroup => JobType::DeleteNode,
        }
    }
}

impl fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job type tag recorded under the `jobType` common param
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    CreateCluster,
    DeleteCluster,
    NodeGroup,
    AddNode,
    DeleteNode,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateCluster => "create-cluster",
            Self::DeleteCluster => "delete-cluster",
            Self::NodeGroup => "node-group",
            Self::AddNode => "add-node",
            Self::DeleteNode => "delete-node",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_naming() {
        assert_eq!(
            TaskOperation::UpdateDesiredNodes.task_type("aws"),
            "aws-UpdateDesiredNodes"
        );
        assert_eq!(TaskOperation::CleanNodesInGroup.job_type().as_str(), "delete-node");
        assert_eq!(
            serde_json::to_string(&JobType::AddNode).unwrap(),
            "\"add-node\""
        );
    }
}
