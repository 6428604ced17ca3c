//! Cluster create and delete steps.

use chrono::Utc;
use tracing::{info, warn};

use super::{ignore_not_found, transient_as_continue, AwsStepDeps};
use crate::cloudprovider::aws::api::{CreateEksClusterInput, EksClusterStatus};
use crate::cloudprovider::CloudError;
use crate::context::OpContext;
use crate::models::{ParamKey, ResourceStatus};
use crate::polling::{loop_do_func, LoopState};
use crate::task::error::StepError;
use crate::task::state::TaskState;

/// Cloud-side cluster name for a cluster record
fn cloud_cluster_name(system_id: &str, cluster_id: &str) -> String {
    if system_id.is_empty() {
        cluster_id.to_lowercase()
    } else {
        system_id.to_string()
    }
}

pub(super) async fn create_eks_cluster(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, false).await?;
    let eks = deps.clients.eks(&info.cmd_option)?;
    let name = cloud_cluster_name(&info.cluster.system_id, &info.cluster.cluster_id);

    // A previous attempt may have created it before failing to record
    let existing = match deps.cloud_call(ctx, || eks.describe_cluster(&name)).await {
        Ok(cluster) => Some(cluster),
        Err(StepError::Cloud(e)) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    match existing {
        Some(cluster) => {
            info!(cluster_name = %name, status = %cluster.status, "EKS cluster already exists, adopting it");
        }
        None => {
            let input = CreateEksClusterInput {
                name: name.clone(),
                version: info.cluster.version.clone(),
                role_arn: info.cluster.cluster_role_arn.clone(),
                subnet_ids: info.cluster.network.subnet_ids.clone(),
                security_group_ids: info.cluster.network.security_group_ids.clone(),
                tags: info.cluster.labels.clone(),
            };
            let created = deps.cloud_call(ctx, || eks.create_cluster(&input)).await?;
            info!(cluster_name = %created.name, arn = %created.arn, "EKS cluster creation started");
        }
    }

    state.set_common_param(ParamKey::CloudClusterName, name.clone());

    let mut cluster = info.cluster;
    cluster.system_id = name;
    cluster.status = ResourceStatus::Initializing;
    cluster.updated_at = Some(Utc::now());
    deps.store.update_cluster(&cluster).await?;
    Ok(())
}

pub(super) async fn check_eks_cluster_status(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, false).await?;
    let name = state.require_param(ParamKey::CloudClusterName)?.to_string();
    let eks = deps.clients.eks(&info.cmd_option)?;

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.cluster_active_timeout_ms);
    loop_do_func(
        &poll_ctx,
        || async {
            let Some(cluster) = transient_as_continue(eks.describe_cluster(&name).await)? else {
                return Ok(LoopState::Continue);
            };
            match cluster.status {
                EksClusterStatus::Active => Ok(LoopState::EndLoop),
                EksClusterStatus::Failed => Err(CloudError::other(format!(
                    "EKS cluster {name} entered FAILED"
                ))),
                status => {
                    info!(cluster_name = %name, status = %status, "Waiting for EKS cluster to become ACTIVE");
                    Ok(LoopState::Continue)
                }
            }
        },
        opts,
    )
    .await?;

    info!(cluster_name = %name, "EKS cluster is ACTIVE");
    Ok(())
}

pub(super) async fn update_create_cluster_db(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, false).await?;
    let name = state.require_param(ParamKey::CloudClusterName)?.to_string();
    let eks = deps.clients.eks(&info.cmd_option)?;
    let described = deps.cloud_call(ctx, || eks.describe_cluster(&name)).await?;

    let mut cluster = info.cluster;
    cluster.system_id = described.name;
    cluster.endpoint = described.endpoint;
    if !described.version.is_empty() {
        cluster.version = described.version;
    }
    cluster.status = ResourceStatus::Running;
    cluster.updated_at = Some(Utc::now());
    deps.store.update_cluster(&cluster).await?;
    Ok(())
}

pub(super) async fn delete_cluster_node_groups(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, false).await?;
    if info.cluster.system_id.is_empty() {
        warn!(cluster_id = %info.cluster.cluster_id, "Cluster was never created on the cloud");
        state.set_common_param(ParamKey::SkipCloudOperation, "true");
        return Ok(());
    }
    let name = info.cluster.system_id.clone();
    let eks = deps.clients.eks(&info.cmd_option)?;

    let nodegroups = match deps.cloud_call(ctx, || eks.list_nodegroups(&name)).await {
        Ok(nodegroups) => nodegroups,
        Err(StepError::Cloud(e)) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e),
    };
    for nodegroup in &nodegroups {
        deps.cloud_call(ctx, || async {
            ignore_not_found(eks.delete_nodegroup(&name, nodegroup).await)
        })
        .await?;
        info!(cluster_name = %name, nodegroup = %nodegroup, "EKS nodegroup deletion started");
    }
    if nodegroups.is_empty() {
        return Ok(());
    }

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.node_group_delete_timeout_ms);
    loop_do_func(
        &poll_ctx,
        || async {
            match eks.list_nodegroups(&name).await {
                Ok(remaining) if remaining.is_empty() => Ok(LoopState::EndLoop),
                Ok(remaining) => {
                    info!(cluster_name = %name, remaining = remaining.len(), "Waiting for nodegroups to be deleted");
                    Ok(LoopState::Continue)
                }
                Err(e) if e.is_not_found() => Ok(LoopState::EndLoop),
                Err(e) => transient_as_continue::<()>(Err(e)).map(|_| LoopState::Continue),
            }
        },
        opts,
    )
    .await?;
    Ok(())
}

pub(super) async fn delete_eks_cluster(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, false).await?;
    if info.cluster.system_id.is_empty() {
        state.set_common_param(ParamKey::SkipCloudOperation, "true");
        return Ok(());
    }
    let name = info.cluster.system_id.clone();
    let eks = deps.clients.eks(&info.cmd_option)?;

    deps.cloud_call(ctx, || async { ignore_not_found(eks.delete_cluster(&name).await) })
        .await?;
    info!(cluster_name = %name, "EKS cluster deletion started");

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.cluster_delete_timeout_ms);
    loop_do_func(
        &poll_ctx,
        || async {
            match eks.describe_cluster(&name).await {
                Err(e) if e.is_not_found() => Ok(LoopState::EndLoop),
                Ok(cluster) if cluster.status == EksClusterStatus::Failed => Err(
                    CloudError::other(format!("EKS cluster {name} failed while deleting")),
                ),
                Ok(_) => Ok(LoopState::Continue),
                Err(e) => transient_as_continue::<()>(Err(e)).map(|_| LoopState::Continue),
            }
        },
        opts,
    )
    .await?;

    info!(cluster_name = %name, "EKS cluster deleted");
    Ok(())
}

pub(super) async fn clean_cluster_db(
    deps: &AwsStepDeps,
    state: &mut TaskState,
) -> Result<(), StepError> {
    let info = deps.resolve(state, false).await?;
    let now = Utc::now();

    for mut node_group in deps.store.list_node_groups(&info.cluster.cluster_id).await? {
        node_group.status = ResourceStatus::Deleted;
        node_group.updated_at = Some(now);
        deps.store.update_node_group(&node_group).await?;
    }

    let mut cluster = info.cluster;
    cluster.status = ResourceStatus::Deleted;
    cluster.updated_at = Some(now);
    deps.store.update_cluster(&cluster).await?;
    Ok(())
}
