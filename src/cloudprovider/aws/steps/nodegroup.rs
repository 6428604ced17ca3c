//! Nodegroup create and delete steps.

use chrono::Utc;
use tracing::{info, warn};

use super::{ignore_not_found, take_node_group, transient_as_continue, AwsStepDeps};
use crate::cloudprovider::aws::api::{CreateEksNodegroupInput, EksNodegroupStatus};
use crate::cloudprovider::CloudError;
use crate::context::OpContext;
use crate::models::{NodeGroup, ParamKey, ResourceStatus};
use crate::polling::{loop_do_func, LoopState};
use crate::task::error::StepError;
use crate::task::state::TaskState;

fn cloud_node_group_name(node_group: &NodeGroup) -> String {
    if node_group.cloud_node_group_id.is_empty() {
        node_group.name.clone()
    } else {
        node_group.cloud_node_group_id.clone()
    }
}

pub(super) async fn create_cloud_node_group(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let mut node_group = take_node_group(&mut info, state)?;
    let cluster_name = info.cluster.system_id.clone();
    if cluster_name.is_empty() {
        return Err(StepError::failed(format!(
            "cluster {} has no cloud cluster to attach nodegroup {} to",
            info.cluster.cluster_id, node_group.node_group_id
        )));
    }
    let name = cloud_node_group_name(&node_group);
    let eks = deps.clients.eks(&info.cmd_option)?;

    let existing = match deps
        .cloud_call(ctx, || eks.describe_nodegroup(&cluster_name, &name))
        .await
    {
        Ok(existing) => Some(existing),
        Err(StepError::Cloud(e)) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    if existing.is_some() {
        info!(cluster_name = %cluster_name, nodegroup = %name, "EKS nodegroup already exists, adopting it");
    } else {
        let scaling = &node_group.auto_scaling;
        let input = CreateEksNodegroupInput {
            cluster_name: cluster_name.clone(),
            nodegroup_name: name.clone(),
            node_role_arn: node_group.node_role_arn.clone(),
            subnet_ids: scaling.subnet_ids.clone(),
            instance_types: vec![node_group.launch_template.instance_type.clone()],
            disk_size_gb: node_group.launch_template.disk_size_gb,
            min_size: scaling.min_size,
            max_size: scaling.max_size,
            desired_size: scaling.desired_size,
            labels: node_group.labels.clone(),
        };
        deps.cloud_call(ctx, || eks.create_nodegroup(&input)).await?;
        info!(cluster_name = %cluster_name, nodegroup = %name, "EKS nodegroup creation started");
    }

    state.set_common_param(ParamKey::CloudClusterName, cluster_name);
    state.set_common_param(ParamKey::CloudNodeGroupName, name.clone());

    node_group.cloud_node_group_id = name;
    node_group.status = ResourceStatus::Initializing;
    node_group.updated_at = Some(Utc::now());
    deps.store.update_node_group(&node_group).await?;
    Ok(())
}

pub(super) async fn check_cloud_node_group_status(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, true).await?;
    let cluster_name = state.require_param(ParamKey::CloudClusterName)?.to_string();
    let name = state.require_param(ParamKey::CloudNodeGroupName)?.to_string();
    let eks = deps.clients.eks(&info.cmd_option)?;

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.node_group_active_timeout_ms);
    loop_do_func(
        &poll_ctx,
        || async {
            let Some(nodegroup) =
                transient_as_continue(eks.describe_nodegroup(&cluster_name, &name).await)?
            else {
                return Ok(LoopState::Continue);
            };
            match nodegroup.status {
                EksNodegroupStatus::Active => Ok(LoopState::EndLoop),
                EksNodegroupStatus::CreateFailed | EksNodegroupStatus::Degraded => {
                    Err(CloudError::other(format!(
                        "EKS nodegroup {name} entered {}",
                        nodegroup.status
                    )))
                }
                status => {
                    info!(nodegroup = %name, status = %status, "Waiting for EKS nodegroup to become ACTIVE");
                    Ok(LoopState::Continue)
                }
            }
        },
        opts,
    )
    .await?;

    let active = deps
        .cloud_call(ctx, || eks.describe_nodegroup(&cluster_name, &name))
        .await?;
    if let Some(asg_name) = active.asg_names.first() {
        state.set_common_param(ParamKey::AsgName, asg_name.clone());
    } else {
        warn!(nodegroup = %name, "Active nodegroup reports no auto scaling group");
    }
    Ok(())
}

pub(super) async fn update_create_node_group_db(
    deps: &AwsStepDeps,
    state: &mut TaskState,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let mut node_group = take_node_group(&mut info, state)?;

    if let Some(asg_name) = state.param(ParamKey::AsgName) {
        node_group.auto_scaling.asg_name = asg_name.to_string();
    }
    node_group.status = ResourceStatus::Running;
    node_group.updated_at = Some(Utc::now());
    deps.store.update_node_group(&node_group).await?;
    Ok(())
}

pub(super) async fn delete_cloud_node_group(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let node_group = take_node_group(&mut info, state)?;
    let cluster_name = info.cluster.system_id.clone();
    if cluster_name.is_empty() || node_group.cloud_node_group_id.is_empty() {
        warn!(node_group_id = %node_group.node_group_id, "Nodegroup was never created on the cloud");
        state.set_common_param(ParamKey::SkipCloudOperation, "true");
        return Ok(());
    }
    let name = node_group.cloud_node_group_id.clone();
    let eks = deps.clients.eks(&info.cmd_option)?;

    deps.cloud_call(ctx, || async {
        ignore_not_found(eks.delete_nodegroup(&cluster_name, &name).await)
    })
    .await?;
    info!(cluster_name = %cluster_name, nodegroup = %name, "EKS nodegroup deletion started");

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.node_group_delete_timeout_ms);
    loop_do_func(
        &poll_ctx,
        || async {
            match eks.describe_nodegroup(&cluster_name, &name).await {
                Err(e) if e.is_not_found() => Ok(LoopState::EndLoop),
                Ok(nodegroup) if nodegroup.status == EksNodegroupStatus::DeleteFailed => Err(
                    CloudError::other(format!("EKS nodegroup {name} failed to delete")),
                ),
                Ok(_) => Ok(LoopState::Continue),
                Err(e) => transient_as_continue::<()>(Err(e)).map(|_| LoopState::Continue),
            }
        },
        opts,
    )
    .await?;
    Ok(())
}

pub(super) async fn update_delete_node_group_db(
    deps: &AwsStepDeps,
    state: &mut TaskState,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let mut node_group = take_node_group(&mut info, state)?;
    node_group.status = ResourceStatus::Deleted;
    node_group.updated_at = Some(Utc::now());
    deps.store.update_node_group(&node_group).await?;
    Ok(())
}
