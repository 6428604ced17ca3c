#![allow(dead_code)]

pub mod mock_aws;
pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use cluster_lifecycle::cloudprovider::aws::PROVIDER;
use cluster_lifecycle::config::LifecycleConfig;
use cluster_lifecycle::models::{
    AutoScalingSettings, Cloud, Cluster, ClusterNetwork, Credential, LaunchTemplate, NodeGroup,
    ResourceStatus,
};
use cluster_lifecycle::store::{ClusterStore, InMemoryStore, TaskStore};
use cluster_lifecycle::task::TaskTarget;
use cluster_lifecycle::{LifecycleEngine, PublishedEvent, Task, TaskStatus};

pub use mock_aws::{MockAws, MockAwsFactory, MockScripts};

pub const CLOUD_ID: &str = "aws-cloud";
pub const CLUSTER_ID: &str = "BCS-K8S-1";
pub const EKS_CLUSTER: &str = "bcs-k8s-1";
pub const NODE_GROUP_ID: &str = "BCS-ng-1";
pub const OPERATOR: &str = "alice";

/// Engine configuration with millisecond polling
pub fn fast_config() -> LifecycleConfig {
    let mut config = LifecycleConfig::default();
    config.worker.max_concurrent_tasks = 4;
    config.worker.default_step_timeout_seconds = 10;
    config.worker.shutdown_timeout_seconds = 2;
    config.polling.default_interval_ms = 10;
    config.polling.cloud_retry_attempts = 3;
    config.polling.cloud_retry_delay_ms = 1;
    config.polling.cluster_active_timeout_ms = 2_000;
    config.polling.cluster_delete_timeout_ms = 2_000;
    config.polling.node_group_active_timeout_ms = 2_000;
    config.polling.node_group_delete_timeout_ms = 2_000;
    config.polling.instances_ready_timeout_ms = 300;
    config.polling.instances_terminated_timeout_ms = 300;
    config.polling.script_timeout_ms = 2_000;
    config
}

pub fn target() -> TaskTarget {
    TaskTarget::new(CLUSTER_ID, CLOUD_ID, OPERATOR)
}

pub fn cloud() -> Cloud {
    Cloud {
        cloud_id: CLOUD_ID.to_string(),
        name: "AWS".to_string(),
        provider: PROVIDER.to_string(),
        default_region: "us-east-1".to_string(),
        credential: Some(Credential {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            assume_role_arn: String::new(),
        }),
    }
}

pub fn cluster(system_id: &str) -> Cluster {
    Cluster {
        cluster_id: CLUSTER_ID.to_string(),
        cluster_name: "prod".to_string(),
        provider: CLOUD_ID.to_string(),
        region: "us-west-2".to_string(),
        project_id: "project-1".to_string(),
        cloud_account_id: String::new(),
        system_id: system_id.to_string(),
        version: "1.29".to_string(),
        cluster_role_arn: "arn:aws:iam::000000000000:role/eks".to_string(),
        network: ClusterNetwork {
            vpc_id: "vpc-1".to_string(),
            subnet_ids: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            security_group_ids: vec!["sg-1".to_string()],
            service_cidr: String::new(),
        },
        status: if system_id.is_empty() {
            ResourceStatus::Initializing
        } else {
            ResourceStatus::Running
        },
        endpoint: String::new(),
        labels: Default::default(),
        updated_at: None,
    }
}

pub fn node_group(cloud_name: &str, asg_name: &str, desired: u32) -> NodeGroup {
    NodeGroup {
        node_group_id: NODE_GROUP_ID.to_string(),
        name: "workers".to_string(),
        cluster_id: CLUSTER_ID.to_string(),
        provider: CLOUD_ID.to_string(),
        region: "us-west-2".to_string(),
        status: ResourceStatus::Initializing,
        cloud_node_group_id: cloud_name.to_string(),
        auto_scaling: AutoScalingSettings {
            min_size: 0,
            max_size: 10,
            desired_size: desired,
            asg_name: asg_name.to_string(),
            subnet_ids: vec!["subnet-a".to_string()],
        },
        launch_template: LaunchTemplate {
            instance_type: "m5.large".to_string(),
            image_id: String::new(),
            key_pair: String::new(),
            disk_size_gb: 50,
        },
        node_role_arn: "arn:aws:iam::000000000000:role/node".to_string(),
        labels: Default::default(),
        updated_at: None,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub aws: Arc<MockAws>,
    pub factory: Arc<MockAwsFactory>,
    pub scripts: Arc<MockScripts>,
    pub engine: LifecycleEngine,
}

impl Harness {
    /// Engine over an empty store; seed records with the helpers below
    pub async fn start() -> Self {
        Self::start_with(fast_config()).await
    }

    pub async fn start_with(config: LifecycleConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.insert_cloud(cloud()).await;
        let aws = MockAws::new();
        let factory = MockAwsFactory::new(aws.clone());
        let scripts = MockScripts::new();
        let engine = LifecycleEngine::builder(config, store.clone(), store.clone())
            .with_aws(factory.clone(), Some(scripts.clone()))
            .start()
            .expect("engine starts");
        Self {
            store,
            aws,
            factory,
            scripts,
            engine,
        }
    }

    /// Cluster record with no cloud side yet
    pub async fn seed_new_cluster(&self) {
        self.store.update_cluster(&cluster("")).await.unwrap();
    }

    /// Cluster that already exists on EKS
    pub async fn seed_existing_cluster(&self) {
        self.aws.add_cluster(EKS_CLUSTER);
        self.store.update_cluster(&cluster(EKS_CLUSTER)).await.unwrap();
    }

    /// Nodegroup record not yet created on the cloud
    pub async fn seed_new_node_group(&self) {
        self.store
            .update_node_group(&node_group("", "", 2))
            .await
            .unwrap();
    }

    /// Nodegroup running on EKS with `size` in-service instances
    pub async fn seed_running_node_group(&self, size: usize) -> String {
        let asg = self.aws.add_nodegroup(EKS_CLUSTER, "workers", size);
        let mut record = node_group("workers", &asg, size as u32);
        record.status = ResourceStatus::Running;
        self.store.update_node_group(&record).await.unwrap();
        asg
    }

    pub async fn task(&self, task_id: &str) -> Task {
        self.store.get_task(task_id).await.unwrap().value
    }

    pub async fn node_group(&self) -> NodeGroup {
        self.store.get_node_group(NODE_GROUP_ID).await.unwrap()
    }

    pub async fn cluster(&self) -> Cluster {
        self.store.get_cluster(CLUSTER_ID).await.unwrap()
    }

    /// Wait until the task stops in `SUCCESS` or `FAILURE`
    pub async fn wait_terminal(&self, task_id: &str) -> Task {
        for _ in 0..500 {
            let task = self.task(task_id).await;
            if task.status.is_terminal() && !self.engine.is_running(task_id) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} did not finish");
    }

    pub async fn wait_status(&self, task_id: &str, status: TaskStatus) -> Task {
        let task = self.wait_terminal(task_id).await;
        assert_eq!(
            task.status, status,
            "task ended in {} with message {:?}",
            task.status, task.message
        );
        task
    }
}

/// Drain whatever events are buffered on a receiver
pub fn drain(receiver: &mut tokio::sync::broadcast::Receiver<PublishedEvent>) -> Vec<PublishedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
