//! # In-Memory Store
//!
//! Thread-safe implementation of both storage contracts for tests and
//! embedded use.
//!
//! - **Versioned tasks**: each task carries a counter bumped on every update
//! - **Thread-Safe**: `tokio::sync::RwLock` per table
//! - **Seeding**: clouds and accounts have inherent insert helpers since the
//!   engine never writes them

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ClusterStore, StoreError, StoreResult, TaskStore, Version, Versioned};
use crate::models::{Cloud, CloudAccount, Cluster, NodeGroup, Task, TaskFilter};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tasks: RwLock<HashMap<String, Versioned<Task>>>,
    clusters: RwLock<HashMap<String, Cluster>>,
    node_groups: RwLock<HashMap<String, NodeGroup>>,
    clouds: RwLock<HashMap<String, Cloud>>,
    cloud_accounts: RwLock<HashMap<String, CloudAccount>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_cloud(&self, cloud: Cloud) {
        self.clouds.write().await.insert(cloud.cloud_id.clone(), cloud);
    }

    pub async fn insert_cloud_account(&self, account: CloudAccount) {
        self.cloud_accounts
            .write()
            .await
            .insert(account.account_id.clone(), account);
    }

    /// Number of stored tasks (for testing)
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Current version of a task (for testing)
    pub async fn task_version(&self, task_id: &str) -> Option<Version> {
        self.tasks.read().await.get(task_id).map(|v| v.version)
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &Task) -> StoreResult<Version> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::AlreadyExists {
                kind: "task",
                id: task.task_id.clone(),
            });
        }
        tasks.insert(
            task.task_id.clone(),
            Versioned {
                value: task.clone(),
                version: 1,
            },
        );
        Ok(1)
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Versioned<Task>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("task", task_id))
    }

    async fn update_task(&self, task: &Task, expected_version: Version) -> StoreResult<Version> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(&task.task_id)
            .ok_or_else(|| StoreError::not_found("task", &task.task_id))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                task_id: task.task_id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        stored.value = task.clone();
        stored.version += 1;
        Ok(stored.version)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|v| filter.matches(&v.value))
            .map(|v| v.value.clone())
            .collect();
        matched.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(matched)
    }

    async fn delete_task(&self, task_id: &str) -> StoreResult<()> {
        self.tasks
            .write()
            .await
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("task", task_id))
    }
}

#[async_trait]
impl ClusterStore for InMemoryStore {
    async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster> {
        self.clusters
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("cluster", cluster_id))
    }

    async fn update_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        self.clusters
            .write()
            .await
            .insert(cluster.cluster_id.clone(), cluster.clone());
        Ok(())
    }

    async fn get_node_group(&self, node_group_id: &str) -> StoreResult<NodeGroup> {
        self.node_groups
            .read()
            .await
            .get(node_group_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("node group", node_group_id))
    }

    async fn update_node_group(&self, node_group: &NodeGroup) -> StoreResult<()> {
        self.node_groups
            .write()
            .await
            .insert(node_group.node_group_id.clone(), node_group.clone());
        Ok(())
    }

    async fn list_node_groups(&self, cluster_id: &str) -> StoreResult<Vec<NodeGroup>> {
        let mut groups: Vec<NodeGroup> = self
            .node_groups
            .read()
            .await
            .values()
            .filter(|g| g.cluster_id == cluster_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.node_group_id.cmp(&b.node_group_id));
        Ok(groups)
    }

    async fn get_cloud(&self, cloud_id: &str) -> StoreResult<Cloud> {
        self.clouds
            .read()
            .await
            .get(cloud_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("cloud", cloud_id))
    }

    async fn get_cloud_account(&self, account_id: &str) -> StoreResult<CloudAccount> {
        self.cloud_accounts
            .read()
            .await
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("cloud account", account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::test_support::task_with_steps;

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = InMemoryStore::new();
        let mut task = task_with_steps(&["a"]);
        let v1 = store.create_task(&task).await.unwrap();

        task.message = "first".to_string();
        let v2 = store.update_task(&task, v1).await.unwrap();
        assert_eq!(v2, v1 + 1);

        task.message = "stale".to_string();
        let err = store.update_task(&task, v1).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get_task(&task.task_id).await.unwrap();
        assert_eq!(stored.value.message, "first");
        assert_eq!(stored.version, v2);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = InMemoryStore::new();
        let task = task_with_steps(&["a"]);
        store.create_task(&task).await.unwrap();
        assert!(matches!(
            store.create_task(&task).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let store = InMemoryStore::new();
        assert!(store.get_task("nope").await.unwrap_err().is_not_found());
        assert!(store.get_cluster("nope").await.unwrap_err().is_not_found());
        assert!(store.delete_task("nope").await.unwrap_err().is_not_found());
    }
}
