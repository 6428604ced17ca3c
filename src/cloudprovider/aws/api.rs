//! # AWS Client Contracts
//!
//! The subset of EKS, EC2 Auto Scaling and EC2 the step functions use,
//! expressed as traits over plain structs so the engine does not depend on a
//! particular SDK. Wrappers classify every failure into a [`CloudError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::cloudprovider::CloudError;
use crate::models::CommonOption;

/// EKS control plane status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EksClusterStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Failed,
    Pending,
}

impl fmt::Display for EksClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Failed => "FAILED",
            Self::Pending => "PENDING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksCluster {
    pub name: String,
    pub arn: String,
    pub status: EksClusterStatus,
    pub endpoint: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateEksClusterInput {
    pub name: String,
    pub version: String,
    pub role_arn: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EksNodegroupStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    CreateFailed,
    DeleteFailed,
    Degraded,
}

impl fmt::Display for EksNodegroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::CreateFailed => "CREATE_FAILED",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::Degraded => "DEGRADED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksNodegroup {
    pub name: String,
    pub cluster_name: String,
    pub status: EksNodegroupStatus,
    /// Auto scaling groups EKS created for the nodegroup
    pub asg_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateEksNodegroupInput {
    pub cluster_name: String,
    pub nodegroup_name: String,
    pub node_role_arn: String,
    pub subnet_ids: Vec<String>,
    pub instance_types: Vec<String>,
    pub disk_size_gb: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait EksApi: Send + Sync {
    async fn create_cluster(&self, input: &CreateEksClusterInput) -> Result<EksCluster, CloudError>;

    /// `NotFound` when the cluster does not exist
    async fn describe_cluster(&self, name: &str) -> Result<EksCluster, CloudError>;

    async fn delete_cluster(&self, name: &str) -> Result<(), CloudError>;

    async fn create_nodegroup(
        &self,
        input: &CreateEksNodegroupInput,
    ) -> Result<EksNodegroup, CloudError>;

    /// `NotFound` when the nodegroup does not exist
    async fn describe_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<EksNodegroup, CloudError>;

    async fn delete_nodegroup(&self, cluster_name: &str, nodegroup_name: &str)
        -> Result<(), CloudError>;

    async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>, CloudError>;
}

/// Lifecycle state of an instance inside an auto scaling group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsgLifecycleState {
    Pending,
    InService,
    Terminating,
    Terminated,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsgInstance {
    pub instance_id: String,
    pub lifecycle_state: AsgLifecycleState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub instances: Vec<AsgInstance>,
}

impl AutoScalingGroup {
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.instance_id.clone()).collect()
    }
}

#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    async fn describe_group(&self, name: &str) -> Result<AutoScalingGroup, CloudError>;

    /// Set min, max and desired together so desired never leaves the bounds
    async fn update_group_capacity(
        &self,
        name: &str,
        min_size: u32,
        max_size: u32,
        desired: u32,
    ) -> Result<(), CloudError>;

    /// Terminate one member, optionally lowering desired capacity with it
    async fn terminate_instance_in_group(
        &self,
        instance_id: &str,
        decrement_desired: bool,
    ) -> Result<(), CloudError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ec2Instance {
    pub instance_id: String,
    pub state: InstanceState,
    #[serde(default)]
    pub private_ip: String,
}

#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Instances that no longer exist are omitted from the result
    async fn describe_instances(&self, instance_ids: &[String])
        -> Result<Vec<Ec2Instance>, CloudError>;
}

/// Builds clients bound to one credential and region
pub trait AwsClientFactory: Send + Sync {
    fn eks(&self, option: &CommonOption) -> Result<Arc<dyn EksApi>, CloudError>;

    fn autoscaling(&self, option: &CommonOption) -> Result<Arc<dyn AutoScalingApi>, CloudError>;

    fn ec2(&self, option: &CommonOption) -> Result<Arc<dyn Ec2Api>, CloudError>;
}
