use std::sync::Arc;

use super::steps::{AwsStep, AwsStepDeps, AwsStepFunc};
use super::{tasks, PROVIDER};
use crate::models::Task;
use crate::task::builder::TaskBuildError;
use crate::task::manager::{
    CleanNodesOptions, CreateClusterOptions, CreateNodeGroupOptions, DeleteClusterOptions,
    DeleteNodeGroupOptions, TaskManager, UpdateDesiredNodesOptions,
};
use crate::task::registry::{StepFunc, StepIdentity, StepTable};

/// Task manager for EKS clusters and their managed nodegroups
#[derive(Debug, Clone)]
pub struct AwsTaskManager {
    deps: Arc<AwsStepDeps>,
}

impl AwsTaskManager {
    pub fn new(deps: Arc<AwsStepDeps>) -> Self {
        Self { deps }
    }
}

impl TaskManager for AwsTaskManager {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn build_create_cluster_task(&self, opts: &CreateClusterOptions) -> Result<Task, TaskBuildError> {
        tasks::build_create_cluster_task(&self.deps.polling, opts)
    }

    fn build_delete_cluster_task(&self, opts: &DeleteClusterOptions) -> Result<Task, TaskBuildError> {
        tasks::build_delete_cluster_task(&self.deps.polling, opts)
    }

    fn build_create_node_group_task(
        &self,
        opts: &CreateNodeGroupOptions,
    ) -> Result<Task, TaskBuildError> {
        tasks::build_create_node_group_task(&self.deps.polling, opts)
    }

    fn build_delete_node_group_task(
        &self,
        opts: &DeleteNodeGroupOptions,
    ) -> Result<Task, TaskBuildError> {
        tasks::build_delete_node_group_task(&self.deps.polling, opts)
    }

    fn build_update_desired_nodes_task(
        &self,
        opts: &UpdateDesiredNodesOptions,
    ) -> Result<Task, TaskBuildError> {
        tasks::build_update_desired_nodes_task(&self.deps.polling, opts)
    }

    fn build_clean_nodes_in_group_task(
        &self,
        opts: &CleanNodesOptions,
    ) -> Result<Task, TaskBuildError> {
        tasks::build_clean_nodes_in_group_task(&self.deps.polling, opts)
    }

    fn get_all_task(&self) -> StepTable {
        AwsStep::ALL
            .iter()
            .map(|step| {
                let func: Arc<dyn StepFunc> = Arc::new(AwsStepFunc::new(self.deps.clone(), *step));
                (step.method(), func)
            })
            .collect()
    }
}
