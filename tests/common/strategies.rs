use proptest::prelude::*;

use cluster_lifecycle::task::{
    CleanNodesOptions, CreateClusterOptions, DeleteClusterOptions, TaskTarget,
    UpdateDesiredNodesOptions,
};

/// Strategy for cluster and nodegroup ids as the control plane issues them
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    "BCS-[A-Z0-9]{3,8}-[0-9]{1,5}"
}

pub fn operator_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{2,15}"
}

/// Optional user script; blank scripts count as absent
pub fn script_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some(String::new())),
        Just(Some("   ".to_string())),
        "[a-z ]{1,40}".prop_map(Some),
    ]
}

pub fn target_strategy() -> impl Strategy<Value = TaskTarget> {
    (entity_id_strategy(), operator_strategy())
        .prop_map(|(cluster_id, operator)| TaskTarget::new(cluster_id, "aws-cloud", operator))
}

pub fn create_cluster_strategy() -> impl Strategy<Value = CreateClusterOptions> {
    (target_strategy(), script_strategy()).prop_map(|(target, post_init_script)| {
        CreateClusterOptions {
            target,
            post_init_script,
        }
    })
}

pub fn delete_cluster_strategy() -> impl Strategy<Value = DeleteClusterOptions> {
    (target_strategy(), any::<bool>()).prop_map(|(target, skip_cloud_delete)| DeleteClusterOptions {
        target,
        skip_cloud_delete,
    })
}

/// Valid scale-out requests: at least one node added, never more than desired
pub fn update_desired_nodes_strategy() -> impl Strategy<Value = UpdateDesiredNodesOptions> {
    (target_strategy(), entity_id_strategy(), 1u32..50, script_strategy()).prop_flat_map(
        |(target, node_group_id, desired_nodes, post_init_script)| {
            (1u32..=desired_nodes).prop_map(move |scale_out_nodes| UpdateDesiredNodesOptions {
                target: target.clone(),
                node_group_id: node_group_id.clone(),
                desired_nodes,
                scale_out_nodes,
                post_init_script: post_init_script.clone(),
            })
        },
    )
}

pub fn clean_nodes_strategy() -> impl Strategy<Value = CleanNodesOptions> {
    (
        target_strategy(),
        entity_id_strategy(),
        prop::collection::vec("i-[0-9a-f]{8}", 1..10),
    )
        .prop_map(|(target, node_group_id, instance_ids)| CleanNodesOptions {
            target,
            node_group_id,
            instance_ids,
            node_ips: Vec::new(),
        })
}
