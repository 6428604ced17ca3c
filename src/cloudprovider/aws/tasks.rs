//! # AWS Task Builders
//!
//! One builder per operation. Each validates its options, then appends the
//! steps in the exact order they must run. Steps that wait on the cloud get
//! a budget derived from their polling timeout so the wait, not the step
//! deadline, decides when to give up and salvage.

use super::steps::AwsStep;
use super::PROVIDER;
use crate::config::{poll_step_budget_secs, PollingConfig};
use crate::constants::TaskOperation;
use crate::models::{join_list, ParamKey, Step, Task};
use crate::task::builder::{step_for, TaskBuildError, TaskBuilder};
use crate::task::manager::{
    CleanNodesOptions, CreateClusterOptions, CreateNodeGroupOptions, DeleteClusterOptions,
    DeleteNodeGroupOptions, TaskTarget, UpdateDesiredNodesOptions,
};

fn polled_step(identity: AwsStep, poll_timeout_ms: u64) -> Step {
    let mut step = step_for(identity);
    step.timeout_secs = Some(poll_step_budget_secs(poll_timeout_ms));
    step
}

fn require(value: &str, field: &'static str) -> Result<(), TaskBuildError> {
    if value.trim().is_empty() {
        return Err(TaskBuildError::MissingField(field));
    }
    Ok(())
}

fn base_builder(
    operation: TaskOperation,
    target: &TaskTarget,
    task_name: String,
) -> Result<TaskBuilder, TaskBuildError> {
    require(&target.cluster_id, "cluster_id")?;
    require(&target.cloud_id, "cloud_id")?;
    require(&target.operator, "operator")?;

    Ok(TaskBuilder::new(PROVIDER, operation)
        .task_name(task_name)
        .cluster_id(&target.cluster_id)
        .project_id(&target.project_id)
        .operator(&target.operator)
        .common_param(ParamKey::CloudId, &target.cloud_id))
}

pub fn build_create_cluster_task(
    polling: &PollingConfig,
    opts: &CreateClusterOptions,
) -> Result<Task, TaskBuildError> {
    let script = opts.post_init_script.as_deref().filter(|s| !s.trim().is_empty());

    let mut builder = base_builder(
        TaskOperation::CreateCluster,
        &opts.target,
        format!("create cluster {}", opts.target.cluster_id),
    )?
    .step(step_for(AwsStep::CreateEksCluster))
    .step(polled_step(
        AwsStep::CheckEksClusterStatus,
        polling.cluster_active_timeout_ms,
    ))
    .step_if(script.is_some(), || {
        polled_step(AwsStep::RunPostInitScript, polling.script_timeout_ms)
    })
    .step(step_for(AwsStep::UpdateCreateClusterDb));

    if let Some(script) = script {
        builder = builder.common_param(ParamKey::PostInitScript, script);
    }
    builder.build()
}

pub fn build_delete_cluster_task(
    polling: &PollingConfig,
    opts: &DeleteClusterOptions,
) -> Result<Task, TaskBuildError> {
    let cloud = !opts.skip_cloud_delete;
    base_builder(
        TaskOperation::DeleteCluster,
        &opts.target,
        format!("delete cluster {}", opts.target.cluster_id),
    )?
    .step_if(cloud, || {
        polled_step(
            AwsStep::DeleteClusterNodeGroups,
            polling.node_group_delete_timeout_ms,
        )
    })
    .step_if(cloud, || {
        polled_step(AwsStep::DeleteEksCluster, polling.cluster_delete_timeout_ms)
    })
    .step(step_for(AwsStep::CleanClusterDb))
    .build()
}

pub fn build_create_node_group_task(
    polling: &PollingConfig,
    opts: &CreateNodeGroupOptions,
) -> Result<Task, TaskBuildError> {
    require(&opts.node_group_id, "node_group_id")?;
    base_builder(
        TaskOperation::CreateNodeGroup,
        &opts.target,
        format!(
            "create nodegroup {} in cluster {}",
            opts.node_group_id, opts.target.cluster_id
        ),
    )?
    .node_group_id(&opts.node_group_id)
    .step(step_for(AwsStep::CreateCloudNodeGroup))
    .step(polled_step(
        AwsStep::CheckCloudNodeGroupStatus,
        polling.node_group_active_timeout_ms,
    ))
    .step(step_for(AwsStep::UpdateCreateNodeGroupDb))
    .build()
}

pub fn build_delete_node_group_task(
    polling: &PollingConfig,
    opts: &DeleteNodeGroupOptions,
) -> Result<Task, TaskBuildError> {
    require(&opts.node_group_id, "node_group_id")?;
    base_builder(
        TaskOperation::DeleteNodeGroup,
        &opts.target,
        format!(
            "delete nodegroup {} in cluster {}",
            opts.node_group_id, opts.target.cluster_id
        ),
    )?
    .node_group_id(&opts.node_group_id)
    .step(polled_step(
        AwsStep::DeleteCloudNodeGroup,
        polling.node_group_delete_timeout_ms,
    ))
    .step(step_for(AwsStep::UpdateDeleteNodeGroupDb))
    .build()
}

pub fn build_update_desired_nodes_task(
    polling: &PollingConfig,
    opts: &UpdateDesiredNodesOptions,
) -> Result<Task, TaskBuildError> {
    require(&opts.node_group_id, "node_group_id")?;
    if opts.scale_out_nodes == 0 {
        return Err(TaskBuildError::invalid_option(
            "scale_out_nodes",
            "must add at least one node",
        ));
    }
    if opts.scale_out_nodes > opts.desired_nodes {
        return Err(TaskBuildError::invalid_option(
            "scale_out_nodes",
            format!(
                "cannot add {} nodes with a desired size of {}",
                opts.scale_out_nodes, opts.desired_nodes
            ),
        ));
    }
    let script = opts.post_init_script.as_deref().filter(|s| !s.trim().is_empty());

    let mut builder = base_builder(
        TaskOperation::UpdateDesiredNodes,
        &opts.target,
        format!(
            "scale nodegroup {} to {} nodes",
            opts.node_group_id, opts.desired_nodes
        ),
    )?
    .node_group_id(&opts.node_group_id)
    .common_param(ParamKey::DesiredNodes, opts.desired_nodes.to_string())
    .common_param(ParamKey::ScaleOutNodes, opts.scale_out_nodes.to_string())
    .step(step_for(AwsStep::ApplyDesiredNodes))
    .step(polled_step(
        AwsStep::CheckClusterNodesStatus,
        polling.instances_ready_timeout_ms,
    ))
    .step_if(script.is_some(), || {
        polled_step(AwsStep::RunPostInitScript, polling.script_timeout_ms)
    })
    .step(step_for(AwsStep::UpdateDesiredNodesDb));

    if let Some(script) = script {
        builder = builder.common_param(ParamKey::PostInitScript, script);
    }
    builder.build()
}

pub fn build_clean_nodes_in_group_task(
    polling: &PollingConfig,
    opts: &CleanNodesOptions,
) -> Result<Task, TaskBuildError> {
    require(&opts.node_group_id, "node_group_id")?;
    if opts.instance_ids.iter().all(|id| id.trim().is_empty()) {
        return Err(TaskBuildError::MissingField("instance_ids"));
    }

    base_builder(
        TaskOperation::CleanNodesInGroup,
        &opts.target,
        format!(
            "remove {} nodes from nodegroup {}",
            opts.instance_ids.len(),
            opts.node_group_id
        ),
    )?
    .node_group_id(&opts.node_group_id)
    .common_param(ParamKey::InstanceIds, join_list(&opts.instance_ids))
    .common_param(ParamKey::NodeIps, join_list(&opts.node_ips))
    .step(step_for(AwsStep::RemoveNodesFromGroup))
    .step(polled_step(
        AwsStep::CheckCleanNodesStatus,
        polling.instances_terminated_timeout_ms,
    ))
    .step(step_for(AwsStep::UpdateCleanNodesDb))
    .build()
}
