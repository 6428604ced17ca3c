//! # Persistence Contract
//!
//! Two storage seams the engine depends on:
//!
//! - [`TaskStore`]: task records with optimistic concurrency. Every read
//!   returns a [`Versioned`] value and every update names the version it was
//!   derived from. A stale version yields [`StoreError::VersionConflict`] and
//!   the caller re-reads.
//! - [`ClusterStore`]: the business records step functions read through the
//!   dependency resolver and update once the cloud side has changed.
//!
//! Implementations: [`InMemoryStore`] always, `PgStore` behind the
//! `postgres` feature.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Cloud, CloudAccount, Cluster, NodeGroup, Task, TaskFilter};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Monotonic record version managed by the store
pub type Version = i64;

/// A record together with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Version conflict on task {task_id}: expected {expected}, found {actual}")]
    VersionConflict {
        task_id: String,
        expected: Version,
        actual: Version,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Task persistence with compare-and-swap updates
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a freshly built task; fails if the id is taken
    async fn create_task(&self, task: &Task) -> StoreResult<Version>;

    async fn get_task(&self, task_id: &str) -> StoreResult<Versioned<Task>>;

    /// Replace the task if its stored version still equals `expected_version`
    ///
    /// Returns the new version.
    async fn update_task(&self, task: &Task, expected_version: Version) -> StoreResult<Version>;

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;

    async fn delete_task(&self, task_id: &str) -> StoreResult<()>;
}

/// Business records consumed and updated by step functions
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster>;

    /// Insert or replace a cluster record
    async fn update_cluster(&self, cluster: &Cluster) -> StoreResult<()>;

    async fn get_node_group(&self, node_group_id: &str) -> StoreResult<NodeGroup>;

    /// Insert or replace a nodegroup record
    async fn update_node_group(&self, node_group: &NodeGroup) -> StoreResult<()>;

    async fn list_node_groups(&self, cluster_id: &str) -> StoreResult<Vec<NodeGroup>>;

    async fn get_cloud(&self, cloud_id: &str) -> StoreResult<Cloud>;

    async fn get_cloud_account(&self, account_id: &str) -> StoreResult<CloudAccount>;
}
