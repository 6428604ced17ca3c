//! Scale out and node removal steps.
//!
//! Both long waits salvage partial results on timeout: instances that made
//! it are recorded in `successNodeIDs`, the rest in `failedNodeIDs`, and a
//! step only fails outright when nothing succeeded.

use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};

use super::{ignore_not_found, take_node_group, transient_as_continue, AwsStepDeps};
use crate::cloudprovider::aws::api::{AsgLifecycleState, AutoScalingGroup, InstanceState};
use crate::context::OpContext;
use crate::models::{NodeGroup, ParamKey};
use crate::polling::{loop_do_func, LoopError, LoopState};
use crate::task::error::StepError;
use crate::task::state::TaskState;

fn require_asg(node_group: &NodeGroup) -> Result<String, StepError> {
    if node_group.auto_scaling.asg_name.is_empty() {
        return Err(StepError::failed(format!(
            "nodegroup {} has no auto scaling group",
            node_group.node_group_id
        )));
    }
    Ok(node_group.auto_scaling.asg_name.clone())
}

/// Split the group's new members into in-service and everything else
fn partition_new_instances(
    group: &AutoScalingGroup,
    baseline: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut ready = Vec::new();
    let mut pending = Vec::new();
    for instance in group
        .instances
        .iter()
        .filter(|i| !baseline.contains(&i.instance_id))
    {
        if instance.lifecycle_state == AsgLifecycleState::InService {
            ready.push(instance.instance_id.clone());
        } else {
            pending.push(instance.instance_id.clone());
        }
    }
    (ready, pending)
}

pub(super) async fn apply_desired_nodes(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let node_group = take_node_group(&mut info, state)?;
    let asg_name = require_asg(&node_group)?;
    let desired: u32 = state.require_parsed(ParamKey::DesiredNodes)?;
    let asg = deps.clients.autoscaling(&info.cmd_option)?;

    let group = deps.cloud_call(ctx, || asg.describe_group(&asg_name)).await?;

    // A retried step keeps the baseline of its first attempt
    if state.param(ParamKey::BaselineInstanceIds).is_none() {
        state.set_common_param_list(ParamKey::BaselineInstanceIds, &group.instance_ids());
        state.flush_common_params().await?;
    }

    if group.desired_capacity == desired {
        info!(asg = %asg_name, desired, "Desired capacity already applied");
        return Ok(());
    }

    let max_size = group.max_size.max(desired);
    let min_size = group.min_size.min(desired);
    deps.cloud_call(ctx, || asg.update_group_capacity(&asg_name, min_size, max_size, desired))
        .await?;
    info!(asg = %asg_name, from = group.desired_capacity, to = desired, "Desired capacity updated");
    Ok(())
}

pub(super) async fn check_cluster_nodes_status(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let node_group = take_node_group(&mut info, state)?;
    let asg_name = require_asg(&node_group)?;
    let expected: usize = state.require_parsed(ParamKey::ScaleOutNodes)?;
    let baseline: HashSet<String> = state
        .param_list(ParamKey::BaselineInstanceIds)
        .into_iter()
        .collect();
    let asg = deps.clients.autoscaling(&info.cmd_option)?;
    let ec2 = deps.clients.ec2(&info.cmd_option)?;

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.instances_ready_timeout_ms);
    let waited = loop_do_func(
        &poll_ctx,
        || async {
            let Some(group) = transient_as_continue(asg.describe_group(&asg_name).await)? else {
                return Ok(LoopState::Continue);
            };
            let (ready, pending) = partition_new_instances(&group, &baseline);
            if ready.len() >= expected {
                return Ok(LoopState::EndLoop);
            }
            info!(asg = %asg_name, ready = ready.len(), pending = pending.len(), expected, "Waiting for new instances");
            Ok(LoopState::Continue)
        },
        opts,
    )
    .await;

    let timed_out = match waited {
        Ok(()) => false,
        Err(e) if e.is_timeout() => true,
        Err(e) => return Err(e.into()),
    };

    let group = deps.cloud_call(ctx, || asg.describe_group(&asg_name)).await?;
    let (ready, pending) = partition_new_instances(&group, &baseline);

    let node_ips: Vec<String> = if ready.is_empty() {
        Vec::new()
    } else {
        deps.cloud_call(ctx, || ec2.describe_instances(&ready))
            .await?
            .into_iter()
            .filter(|i| i.state == InstanceState::Running && !i.private_ip.is_empty())
            .map(|i| i.private_ip)
            .collect()
    };

    state.set_common_param_list(ParamKey::SuccessNodeIds, &ready);
    state.set_common_param_list(ParamKey::FailedNodeIds, &pending);
    state.set_common_param_list(ParamKey::InstanceIds, &ready);
    state.set_common_param_list(ParamKey::NodeIps, &node_ips);

    if timed_out {
        if ready.is_empty() {
            return Err(StepError::Timeout(format!(
                "no new instance of {asg_name} became ready, {} still pending",
                pending.len()
            )));
        }
        warn!(
            asg = %asg_name,
            ready = ready.len(),
            pending = pending.len(),
            expected,
            "Timed out waiting for instances, keeping the ones that came up"
        );
    }
    Ok(())
}

pub(super) async fn update_desired_nodes_db(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let mut node_group = take_node_group(&mut info, state)?;
    let asg_name = require_asg(&node_group)?;
    let asg = deps.clients.autoscaling(&info.cmd_option)?;

    let group = deps.cloud_call(ctx, || asg.describe_group(&asg_name)).await?;
    let in_service = group
        .instances
        .iter()
        .filter(|i| i.lifecycle_state == AsgLifecycleState::InService)
        .count();

    node_group.auto_scaling.desired_size = u32::try_from(in_service).unwrap_or(u32::MAX);
    node_group.auto_scaling.max_size = node_group.auto_scaling.max_size.max(group.max_size);
    node_group.updated_at = Some(Utc::now());
    deps.store.update_node_group(&node_group).await?;
    Ok(())
}

pub(super) async fn remove_nodes_from_group(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, true).await?;
    state.require_param(ParamKey::InstanceIds)?;
    let instance_ids = state.param_list(ParamKey::InstanceIds);
    let asg = deps.clients.autoscaling(&info.cmd_option)?;

    let mut removed = Vec::new();
    let mut failed = Vec::new();
    for instance_id in &instance_ids {
        let result = deps
            .cloud_call(ctx, || async {
                ignore_not_found(asg.terminate_instance_in_group(instance_id, true).await)
            })
            .await;
        match result {
            Ok(()) => removed.push(instance_id.clone()),
            Err(StepError::Cloud(e)) => {
                warn!(instance_id = %instance_id, error = %e, "Failed to remove instance from group");
                failed.push(instance_id.clone());
            }
            Err(e) => {
                state.set_common_param_list(ParamKey::SuccessNodeIds, &removed);
                return Err(e);
            }
        }
    }

    state.set_common_param_list(ParamKey::SuccessNodeIds, &removed);
    state.set_common_param_list(ParamKey::FailedNodeIds, &failed);

    if removed.is_empty() {
        return Err(StepError::failed(format!(
            "none of {} instances could be removed",
            instance_ids.len()
        )));
    }
    info!(removed = removed.len(), failed = failed.len(), "Instances removed from group");
    Ok(())
}

pub(super) async fn check_clean_nodes_status(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let info = deps.resolve(state, true).await?;
    let removed = state.param_list(ParamKey::SuccessNodeIds);
    if removed.is_empty() {
        return Ok(());
    }
    let ec2 = deps.clients.ec2(&info.cmd_option)?;

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.instances_terminated_timeout_ms);
    let waited = loop_do_func(
        &poll_ctx,
        || async {
            let Some(instances) = transient_as_continue(ec2.describe_instances(&removed).await)?
            else {
                return Ok(LoopState::Continue);
            };
            let alive = instances
                .iter()
                .filter(|i| i.state != InstanceState::Terminated)
                .count();
            if alive == 0 {
                Ok(LoopState::EndLoop)
            } else {
                info!(alive, "Waiting for instances to terminate");
                Ok(LoopState::Continue)
            }
        },
        opts,
    )
    .await;

    match waited {
        Ok(()) => Ok(()),
        Err(LoopError::DeadlineExceeded) | Err(LoopError::AttemptsExhausted(_)) => {
            let still_alive: Vec<String> = deps
                .cloud_call(ctx, || ec2.describe_instances(&removed))
                .await?
                .into_iter()
                .filter(|i| i.state != InstanceState::Terminated)
                .map(|i| i.instance_id)
                .collect();
            let terminated: Vec<String> = removed
                .iter()
                .filter(|id| !still_alive.contains(id))
                .cloned()
                .collect();

            let mut failed = state.param_list(ParamKey::FailedNodeIds);
            failed.extend(still_alive.iter().cloned());
            state.set_common_param_list(ParamKey::SuccessNodeIds, &terminated);
            state.set_common_param_list(ParamKey::FailedNodeIds, &failed);

            if terminated.is_empty() {
                return Err(StepError::Timeout(format!(
                    "none of {} instances terminated in time",
                    removed.len()
                )));
            }
            warn!(
                terminated = terminated.len(),
                still_alive = still_alive.len(),
                "Timed out waiting for termination, keeping the instances that are gone"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub(super) async fn update_clean_nodes_db(
    deps: &AwsStepDeps,
    state: &mut TaskState,
) -> Result<(), StepError> {
    let mut info = deps.resolve(state, true).await?;
    let mut node_group = take_node_group(&mut info, state)?;
    let removed = u32::try_from(state.param_list(ParamKey::SuccessNodeIds).len()).unwrap_or(u32::MAX);

    let scaling = &mut node_group.auto_scaling;
    scaling.desired_size = scaling.desired_size.saturating_sub(removed);
    scaling.min_size = scaling.min_size.min(scaling.desired_size);
    node_group.updated_at = Some(Utc::now());
    deps.store.update_node_group(&node_group).await?;
    Ok(())
}
