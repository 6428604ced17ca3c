//! # Task Managers
//!
//! One [`TaskManager`] per cloud provider builds tasks for the high-level
//! operations and contributes the step functions those tasks reference. The
//! bootstrap hands every provider to a [`TaskManagerRegistry`] explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::builder::TaskBuildError;
use super::registry::{RegistryError, StepRegistry, StepTable};
use crate::constants::TaskOperation;
use crate::models::Task;

/// Who asked and what to act on; shared by every operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskTarget {
    pub cluster_id: String,
    pub cloud_id: String,
    pub project_id: String,
    pub operator: String,
}

impl TaskTarget {
    pub fn new(
        cluster_id: impl Into<String>,
        cloud_id: impl Into<String>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cloud_id: cloud_id.into(),
            project_id: String::new(),
            operator: operator.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateClusterOptions {
    pub target: TaskTarget,
    /// Script run on the new cluster once it is active
    pub post_init_script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteClusterOptions {
    pub target: TaskTarget,
    /// Only clean up records, leave cloud resources alone
    pub skip_cloud_delete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateNodeGroupOptions {
    pub target: TaskTarget,
    pub node_group_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteNodeGroupOptions {
    pub target: TaskTarget,
    pub node_group_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateDesiredNodesOptions {
    pub target: TaskTarget,
    pub node_group_id: String,
    /// Desired size after the scale out
    pub desired_nodes: u32,
    /// Nodes being added by this operation
    pub scale_out_nodes: u32,
    pub post_init_script: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanNodesOptions {
    pub target: TaskTarget,
    pub node_group_id: String,
    pub instance_ids: Vec<String>,
    pub node_ips: Vec<String>,
}

fn unsupported(provider: &str, operation: TaskOperation) -> TaskBuildError {
    TaskBuildError::Unsupported {
        provider: provider.to_string(),
        operation,
    }
}

/// Per-provider task construction and step function table
pub trait TaskManager: Send + Sync {
    /// Provider key, matches `Cloud::provider`
    fn provider(&self) -> &'static str;

    fn build_create_cluster_task(&self, _opts: &CreateClusterOptions) -> Result<Task, TaskBuildError> {
        Err(unsupported(self.provider(), TaskOperation::CreateCluster))
    }

    fn build_delete_cluster_task(&self, _opts: &DeleteClusterOptions) -> Result<Task, TaskBuildError> {
        Err(unsupported(self.provider(), TaskOperation::DeleteCluster))
    }

    fn build_create_node_group_task(
        &self,
        _opts: &CreateNodeGroupOptions,
    ) -> Result<Task, TaskBuildError> {
        Err(unsupported(self.provider(), TaskOperation::CreateNodeGroup))
    }

    fn build_delete_node_group_task(
        &self,
        _opts: &DeleteNodeGroupOptions,
    ) -> Result<Task, TaskBuildError> {
        Err(unsupported(self.provider(), TaskOperation::DeleteNodeGroup))
    }

    fn build_update_desired_nodes_task(
        &self,
        _opts: &UpdateDesiredNodesOptions,
    ) -> Result<Task, TaskBuildError> {
        Err(unsupported(self.provider(), TaskOperation::UpdateDesiredNodes))
    }

    fn build_clean_nodes_in_group_task(
        &self,
        _opts: &CleanNodesOptions,
    ) -> Result<Task, TaskBuildError> {
        Err(unsupported(self.provider(), TaskOperation::CleanNodesInGroup))
    }

    /// Every step function this provider's tasks reference
    fn get_all_task(&self) -> StepTable;
}

#[derive(Default, Clone)]
pub struct TaskManagerRegistry {
    managers: HashMap<&'static str, Arc<dyn TaskManager>>,
}

impl std::fmt::Debug for TaskManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&&str> = self.managers.keys().collect();
        providers.sort();
        f.debug_struct("TaskManagerRegistry")
            .field("providers", &providers)
            .finish()
    }
}

impl TaskManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manager: Arc<dyn TaskManager>) -> Result<(), RegistryError> {
        let provider = manager.provider();
        if self.managers.contains_key(provider) {
            return Err(RegistryError::DuplicateProvider(provider.to_string()));
        }
        self.managers.insert(provider, manager);
        info!(provider = %provider, "📚 REGISTRY: task manager registered");
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn TaskManager>> {
        self.managers.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<&'static str> {
        let mut providers: Vec<&'static str> = self.managers.keys().copied().collect();
        providers.sort_unstable();
        providers
    }

    /// Merge every provider's step table; a method claimed twice is fatal
    pub fn build_step_registry(&self) -> Result<StepRegistry, RegistryError> {
        let mut registry = StepRegistry::new();
        for provider in self.providers() {
            if let Some(manager) = self.managers.get(provider) {
                registry.merge(provider, manager.get_all_task())?;
            }
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::error::StepError;
    use crate::task::registry::{FnStep, StepInvocation};

    struct StubManager {
        provider: &'static str,
        methods: Vec<&'static str>,
    }

    impl TaskManager for StubManager {
        fn provider(&self) -> &'static str {
            self.provider
        }

        fn get_all_task(&self) -> StepTable {
            self.methods
                .iter()
                .map(|m| {
                    let func: Arc<dyn crate::task::registry::StepFunc> =
                        Arc::new(FnStep(|_inv: StepInvocation| async { Ok::<(), StepError>(()) }));
                    (*m, func)
                })
                .collect()
        }
    }

    #[test]
    fn test_unimplemented_operations_are_unsupported() {
        let manager = StubManager {
            provider: "stub",
            methods: vec![],
        };
        let err = manager
            .build_clean_nodes_in_group_task(&CleanNodesOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            TaskBuildError::Unsupported {
                provider: "stub".to_string(),
                operation: TaskOperation::CleanNodesInGroup,
            }
        );
    }

    #[test]
    fn test_registry_merges_providers_and_rejects_collisions() {
        let mut registry = TaskManagerRegistry::new();
        registry
            .register(Arc::new(StubManager {
                provider: "a",
                methods: vec!["a-One", "a-Two"],
            }))
            .unwrap();
        registry
            .register(Arc::new(StubManager {
                provider: "b",
                methods: vec!["b-One"],
            }))
            .unwrap();
        assert_eq!(registry.build_step_registry().unwrap().len(), 3);

        assert!(registry
            .register(Arc::new(StubManager {
                provider: "a",
                methods: vec![],
            }))
            .is_err());

        registry
            .register(Arc::new(StubManager {
                provider: "c",
                methods: vec!["a-One"],
            }))
            .unwrap();
        assert_eq!(
            registry.build_step_registry().unwrap_err(),
            RegistryError::DuplicateStepMethod("a-One".to_string())
        );
    }
}
