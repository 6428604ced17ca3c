//! # Cluster Records
//!
//! Business records the dependency resolver loads for step functions:
//! clusters, nodegroups, clouds and the cloud accounts holding credentials.
//! Step functions that change these records persist them explicitly through
//! [`crate::store::ClusterStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status shared by clusters and nodegroups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    #[default]
    Initializing,
    Running,
    Updating,
    Deleting,
    Deleted,
    CreateFailure,
    DeleteFailure,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
            Self::CreateFailure => "CREATE-FAILURE",
            Self::DeleteFailure => "DELETE-FAILURE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNetwork {
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub service_cidr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub cluster_name: String,
    /// Cloud id the cluster runs on
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub project_id: String,
    /// Cloud account holding the credential; empty means the cloud default
    #[serde(default)]
    pub cloud_account_id: String,
    /// Cluster name on the cloud side, filled once created
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub version: String,
    /// IAM role assumed by the control plane
    #[serde(default)]
    pub cluster_role_arn: String,
    #[serde(default)]
    pub network: ClusterNetwork,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingSettings {
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
    /// Autoscaling group backing the cloud nodegroup, filled once created
    #[serde(default)]
    pub asg_name: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTemplate {
    pub instance_type: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub key_pair: String,
    #[serde(default)]
    pub disk_size_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub node_group_id: String,
    pub name: String,
    pub cluster_id: String,
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub status: ResourceStatus,
    /// Nodegroup name on the cloud side, filled once created
    #[serde(default)]
    pub cloud_node_group_id: String,
    #[serde(default)]
    pub auto_scaling: AutoScalingSettings,
    #[serde(default)]
    pub launch_template: LaunchTemplate,
    #[serde(default)]
    pub node_role_arn: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Static access credential for a cloud API
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub assume_role_arn: String,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.access_key_id.is_empty() || self.secret_access_key.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("assume_role_arn", &self.assume_role_arn)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    pub cloud_id: String,
    pub name: String,
    /// Provider engine key, matches a registered task manager (`aws`)
    pub provider: String,
    #[serde(default)]
    pub default_region: String,
    /// Fallback credential when the cluster names no cloud account
    #[serde(default)]
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAccount {
    pub account_id: String,
    pub cloud_id: String,
    #[serde(default)]
    pub project_id: String,
    pub credential: Credential,
}

/// Credential and region handed to cloud client constructors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonOption {
    pub credential: Credential,
    pub region: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_masks_secret() {
        let credential = Credential {
            access_key_id: "AKIA123".to_string(),
            secret_access_key: "topsecret".to_string(),
            assume_role_arn: String::new(),
        };
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("AKIA123"));
        assert!(!rendered.contains("topsecret"));
        assert!(!credential.is_empty());
        assert!(Credential::default().is_empty());
    }

    #[test]
    fn test_resource_status_serde() {
        let json = serde_json::to_string(&ResourceStatus::CreateFailure).unwrap();
        assert_eq!(json, "\"CREATE_FAILURE\"");
        assert_eq!(ResourceStatus::CreateFailure.to_string(), "CREATE-FAILURE");
    }
}
