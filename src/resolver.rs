//! # Dependency Resolver
//!
//! Rebuilds the context a step function needs from the ids carried in task
//! params: the cluster, its cloud, an optional nodegroup, and the credential
//! plus region to build cloud clients with. Read-only.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::models::{Cloud, Cluster, CommonOption, Credential, NodeGroup};
use crate::store::{ClusterStore, StoreError};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cluster {0} not found")]
    ClusterNotFound(String),

    #[error("cloud {0} not found")]
    CloudNotFound(String),

    #[error("node group {0} not found")]
    NodeGroupNotFound(String),

    #[error("cloud account {0} not found")]
    CloudAccountNotFound(String),

    #[error("no credential available for cluster {cluster_id} on cloud {cloud_id}")]
    MissingCredential { cluster_id: String, cloud_id: String },

    #[error("store error while resolving dependencies: {0}")]
    Store(#[source] StoreError),
}

/// Ids identifying what a step operates on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependRequest {
    pub cluster_id: String,
    pub cloud_id: String,
    pub node_group_id: Option<String>,
}

impl DependRequest {
    pub fn new(cluster_id: impl Into<String>, cloud_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cloud_id: cloud_id.into(),
            node_group_id: None,
        }
    }

    pub fn with_node_group(mut self, node_group_id: impl Into<String>) -> Self {
        self.node_group_id = Some(node_group_id.into()).filter(|id: &String| !id.is_empty());
        self
    }
}

/// Everything a cloud step needs about its target
#[derive(Debug, Clone)]
pub struct CloudDependBasicInfo {
    pub cluster: Cluster,
    pub cloud: Cloud,
    pub node_group: Option<NodeGroup>,
    pub cmd_option: CommonOption,
}

#[derive(Clone)]
pub struct DependencyResolver {
    store: Arc<dyn ClusterStore>,
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver").finish_non_exhaustive()
    }
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(cluster_id = %req.cluster_id, cloud_id = %req.cloud_id))]
    pub async fn get_cluster_depend_basic_info(
        &self,
        req: &DependRequest,
    ) -> Result<CloudDependBasicInfo, ResolveError> {
        let cluster = self
            .store
            .get_cluster(&req.cluster_id)
            .await
            .map_err(|e| not_found_as(e, || ResolveError::ClusterNotFound(req.cluster_id.clone())))?;

        let cloud = self
            .store
            .get_cloud(&req.cloud_id)
            .await
            .map_err(|e| not_found_as(e, || ResolveError::CloudNotFound(req.cloud_id.clone())))?;

        let node_group = match req.node_group_id.as_deref() {
            Some(id) => Some(
                self.store
                    .get_node_group(id)
                    .await
                    .map_err(|e| not_found_as(e, || ResolveError::NodeGroupNotFound(id.to_string())))?,
            ),
            None => None,
        };

        let credential = self.select_credential(&cluster, &cloud).await?;
        let region = if cluster.region.is_empty() {
            cloud.default_region.clone()
        } else {
            cluster.region.clone()
        };

        debug!(region = %region, has_node_group = node_group.is_some(), "Resolved step dependencies");

        Ok(CloudDependBasicInfo {
            cluster,
            cloud,
            node_group,
            cmd_option: CommonOption { credential, region },
        })
    }

    async fn select_credential(
        &self,
        cluster: &Cluster,
        cloud: &Cloud,
    ) -> Result<Credential, ResolveError> {
        if !cluster.cloud_account_id.is_empty() {
            let account = self
                .store
                .get_cloud_account(&cluster.cloud_account_id)
                .await
                .map_err(|e| {
                    not_found_as(e, || {
                        ResolveError::CloudAccountNotFound(cluster.cloud_account_id.clone())
                    })
                })?;
            if !account.credential.is_empty() {
                return Ok(account.credential);
            }
        }

        cloud
            .credential
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ResolveError::MissingCredential {
                cluster_id: cluster.cluster_id.clone(),
                cloud_id: cloud.cloud_id.clone(),
            })
    }
}

fn not_found_as(err: StoreError, on_missing: impl FnOnce() -> ResolveError) -> ResolveError {
    if err.is_not_found() {
        on_missing()
    } else {
        ResolveError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloudAccount, ClusterNetwork, ResourceStatus};
    use crate::store::InMemoryStore;
    use std::collections::BTreeMap;

    fn credential(key: &str) -> Credential {
        Credential {
            access_key_id: key.to_string(),
            secret_access_key: "secret".to_string(),
            assume_role_arn: String::new(),
        }
    }

    fn cluster(account: &str, region: &str) -> Cluster {
        Cluster {
            cluster_id: "BCS-K8S-1".to_string(),
            cluster_name: "prod".to_string(),
            provider: "aws-cloud".to_string(),
            region: region.to_string(),
            project_id: String::new(),
            cloud_account_id: account.to_string(),
            system_id: String::new(),
            version: "1.29".to_string(),
            cluster_role_arn: String::new(),
            network: ClusterNetwork::default(),
            status: ResourceStatus::Running,
            endpoint: String::new(),
            labels: BTreeMap::new(),
            updated_at: None,
        }
    }

    async fn store_with(cluster: Cluster, default_credential: Option<Credential>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.update_cluster(&cluster).await.unwrap();
        store
            .insert_cloud(Cloud {
                cloud_id: "aws-cloud".to_string(),
                name: "AWS".to_string(),
                provider: "aws".to_string(),
                default_region: "us-east-1".to_string(),
                credential: default_credential,
            })
            .await;
        store
    }

    #[tokio::test]
    async fn test_account_credential_wins_over_cloud_default() {
        let store = store_with(cluster("acct-1", ""), Some(credential("DEFAULT"))).await;
        store
            .insert_cloud_account(CloudAccount {
                account_id: "acct-1".to_string(),
                cloud_id: "aws-cloud".to_string(),
                project_id: String::new(),
                credential: credential("ACCOUNT"),
            })
            .await;

        let resolver = DependencyResolver::new(store);
        let info = resolver
            .get_cluster_depend_basic_info(&DependRequest::new("BCS-K8S-1", "aws-cloud"))
            .await
            .unwrap();
        assert_eq!(info.cmd_option.credential.access_key_id, "ACCOUNT");
        assert_eq!(info.cmd_option.region, "us-east-1");
        assert!(info.node_group.is_none());
    }

    #[tokio::test]
    async fn test_typed_not_found_errors() {
        let store = store_with(cluster("", "eu-west-1"), Some(credential("DEFAULT"))).await;
        let resolver = DependencyResolver::new(store);

        let err = resolver
            .get_cluster_depend_basic_info(&DependRequest::new("missing", "aws-cloud"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ClusterNotFound(id) if id == "missing"));

        let err = resolver
            .get_cluster_depend_basic_info(
                &DependRequest::new("BCS-K8S-1", "aws-cloud").with_node_group("ng-x"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NodeGroupNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let store = store_with(cluster("", "eu-west-1"), None).await;
        let resolver = DependencyResolver::new(store);
        let err = resolver
            .get_cluster_depend_basic_info(&DependRequest::new("BCS-K8S-1", "aws-cloud"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingCredential { .. }));
    }
}
