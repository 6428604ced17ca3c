mod common;

use common::strategies::*;
use proptest::prelude::*;

use cluster_lifecycle::cloudprovider::aws::tasks;
use cluster_lifecycle::cloudprovider::aws::AwsStep;
use cluster_lifecycle::config::PollingConfig;
use cluster_lifecycle::models::Task;
use cluster_lifecycle::task::{TaskBuildError, TaskTarget, UpdateDesiredNodesOptions};
use cluster_lifecycle::{ParamKey, StepIdentity, StepStatus, TaskStatus};

fn step_names(steps: &[AwsStep]) -> Vec<String> {
    steps.iter().map(|s| s.step_name().to_string()).collect()
}

fn has_script(script: &Option<String>) -> bool {
    script.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Invariants every freshly built task must satisfy
fn assert_fresh(task: &Task, target: &TaskTarget, job_type: &str) -> Result<(), TestCaseError> {
    prop_assert_eq!(task.status, TaskStatus::Init);
    prop_assert_eq!(&task.current_step, &task.step_sequence[0]);
    prop_assert!(task.validate_structure().is_ok());
    prop_assert!(task.ordered_steps().all(|s| s.status == StepStatus::NotStarted));
    prop_assert_eq!(task.common_params.get(ParamKey::Operator), Some(target.operator.as_str()));
    prop_assert_eq!(task.common_params.get(ParamKey::ClusterId), Some(target.cluster_id.as_str()));
    prop_assert_eq!(task.common_params.get(ParamKey::CloudId), Some(target.cloud_id.as_str()));
    prop_assert_eq!(task.common_params.get(ParamKey::JobType), Some(job_type));
    Ok(())
}

proptest! {
    /// Property: create cluster runs create, wait, optional script, record
    #[test]
    fn create_cluster_steps_in_canonical_order(opts in create_cluster_strategy()) {
        let task = tasks::build_create_cluster_task(&PollingConfig::default(), &opts).unwrap();

        let mut expected = vec![AwsStep::CreateEksCluster, AwsStep::CheckEksClusterStatus];
        if has_script(&opts.post_init_script) {
            expected.push(AwsStep::RunPostInitScript);
        }
        expected.push(AwsStep::UpdateCreateClusterDb);

        prop_assert_eq!(task.step_sequence.clone(), step_names(&expected));
        prop_assert_eq!(
            task.common_params.contains(ParamKey::PostInitScript),
            has_script(&opts.post_init_script)
        );
        assert_fresh(&task, &opts.target, "create-cluster")?;
    }

    /// Property: delete cluster always ends by cleaning records
    #[test]
    fn delete_cluster_steps_in_canonical_order(opts in delete_cluster_strategy()) {
        let task = tasks::build_delete_cluster_task(&PollingConfig::default(), &opts).unwrap();

        let expected = if opts.skip_cloud_delete {
            vec![AwsStep::CleanClusterDb]
        } else {
            vec![
                AwsStep::DeleteClusterNodeGroups,
                AwsStep::DeleteEksCluster,
                AwsStep::CleanClusterDb,
            ]
        };
        prop_assert_eq!(task.step_sequence.clone(), step_names(&expected));
        assert_fresh(&task, &opts.target, "delete-cluster")?;
    }

    /// Property: scale out applies, waits, optionally scripts, then records
    #[test]
    fn update_desired_nodes_steps_in_canonical_order(opts in update_desired_nodes_strategy()) {
        let task = tasks::build_update_desired_nodes_task(&PollingConfig::default(), &opts).unwrap();

        let mut expected = vec![AwsStep::ApplyDesiredNodes, AwsStep::CheckClusterNodesStatus];
        if has_script(&opts.post_init_script) {
            expected.push(AwsStep::RunPostInitScript);
        }
        expected.push(AwsStep::UpdateDesiredNodesDb);

        prop_assert_eq!(task.step_sequence.clone(), step_names(&expected));
        prop_assert_eq!(
            task.common_params.get_parsed::<u32>(ParamKey::DesiredNodes).unwrap(),
            Some(opts.desired_nodes)
        );
        prop_assert_eq!(task.node_group_id.as_str(), opts.node_group_id.as_str());
        assert_fresh(&task, &opts.target, "add-node")?;
    }

    /// Property: scale out never accepts more new nodes than the desired size
    #[test]
    fn update_desired_nodes_rejects_oversized_scale_out(
        target in target_strategy(),
        desired_nodes in 0u32..20,
        extra in 1u32..5,
    ) {
        let opts = UpdateDesiredNodesOptions {
            target,
            node_group_id: "BCS-ng-1".to_string(),
            desired_nodes,
            scale_out_nodes: desired_nodes + extra,
            post_init_script: None,
        };
        let result = tasks::build_update_desired_nodes_task(&PollingConfig::default(), &opts);
        let is_invalid_option = matches!(result, Err(TaskBuildError::InvalidOption { .. }));
        prop_assert!(is_invalid_option);
    }

    /// Property: node removal carries every instance id through common params
    #[test]
    fn clean_nodes_steps_in_canonical_order(opts in clean_nodes_strategy()) {
        let task = tasks::build_clean_nodes_in_group_task(&PollingConfig::default(), &opts).unwrap();

        let expected = vec![
            AwsStep::RemoveNodesFromGroup,
            AwsStep::CheckCleanNodesStatus,
            AwsStep::UpdateCleanNodesDb,
        ];
        prop_assert_eq!(task.step_sequence.clone(), step_names(&expected));
        prop_assert_eq!(task.common_params.get_list(ParamKey::InstanceIds), opts.instance_ids.clone());
        assert_fresh(&task, &opts.target, "delete-node")?;
    }

    /// Property: every built task gets its own id
    #[test]
    fn built_tasks_have_unique_ids(opts in create_cluster_strategy()) {
        let polling = PollingConfig::default();
        let first = tasks::build_create_cluster_task(&polling, &opts).unwrap();
        let second = tasks::build_create_cluster_task(&polling, &opts).unwrap();
        prop_assert_ne!(first.task_id, second.task_id);
    }
}

#[cfg(test)]
mod polled_step_budgets {
    use super::*;

    #[test]
    fn test_wait_steps_outlive_their_poll_timeout() {
        let polling = PollingConfig::default();
        let task = tasks::build_create_cluster_task(
            &polling,
            &cluster_lifecycle::task::CreateClusterOptions {
                target: TaskTarget::new("BCS-K8S-1", "aws-cloud", "alice"),
                post_init_script: None,
            },
        )
        .unwrap();

        let wait = task
            .step(AwsStep::CheckEksClusterStatus.step_name())
            .unwrap();
        let budget_ms = wait.timeout_secs.unwrap() * 1000;
        assert!(budget_ms > polling.cluster_active_timeout_ms);
    }
}
