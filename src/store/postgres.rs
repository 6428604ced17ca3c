//! # PostgreSQL Store
//!
//! Both storage contracts over PostgreSQL. Records are stored as JSONB
//! documents next to the columns used for filtering; task updates are
//! compare-and-swap on an integer `version` column.
//!
//! Queries are built at runtime so the crate compiles without a database.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

use super::{ClusterStore, StoreError, StoreResult, TaskStore, Version, Versioned};
use crate::config::DatabaseConfig;
use crate::models::{Cloud, CloudAccount, Cluster, NodeGroup, Task, TaskFilter};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_tasks (
        task_id        TEXT PRIMARY KEY,
        task_type      TEXT NOT NULL,
        status         TEXT NOT NULL,
        cluster_id     TEXT NOT NULL,
        node_group_id  TEXT NOT NULL DEFAULT '',
        started_at     TIMESTAMPTZ NOT NULL,
        version        BIGINT NOT NULL,
        document       JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_lifecycle_tasks_cluster ON lifecycle_tasks (cluster_id, started_at)",
    "CREATE INDEX IF NOT EXISTS idx_lifecycle_tasks_status ON lifecycle_tasks (status)",
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_clusters (
        cluster_id  TEXT PRIMARY KEY,
        document    JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_node_groups (
        node_group_id  TEXT PRIMARY KEY,
        cluster_id     TEXT NOT NULL,
        document       JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_lifecycle_node_groups_cluster ON lifecycle_node_groups (cluster_id)",
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_clouds (
        cloud_id  TEXT PRIMARY KEY,
        document  JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lifecycle_cloud_accounts (
        account_id  TEXT PRIMARY KEY,
        cloud_id    TEXT NOT NULL,
        document    JSONB NOT NULL
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration, creating tables when enabled
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(true)
            .connect(&config.url)
            .await?;

        let store = Self::new(pool);
        if config.run_migrations {
            store.migrate().await?;
        }
        info!(
            max_connections = config.max_connections,
            "🏊 POOL: PostgreSQL store connected"
        );
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create every table and index if missing
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("✅ Lifecycle schema is up to date");
        Ok(())
    }

    pub async fn upsert_cloud(&self, cloud: &Cloud) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle_clouds (cloud_id, document) VALUES ($1, $2)
             ON CONFLICT (cloud_id) DO UPDATE SET document = EXCLUDED.document",
        )
        .bind(&cloud.cloud_id)
        .bind(Json(cloud))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_cloud_account(&self, account: &CloudAccount) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle_cloud_accounts (account_id, cloud_id, document) VALUES ($1, $2, $3)
             ON CONFLICT (account_id) DO UPDATE
             SET cloud_id = EXCLUDED.cloud_id, document = EXCLUDED.document",
        )
        .bind(&account.account_id)
        .bind(&account.cloud_id)
        .bind(Json(account))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_version(&self, task_id: &str) -> StoreResult<Option<Version>> {
        let version = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM lifecycle_tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn create_task(&self, task: &Task) -> StoreResult<Version> {
        let inserted = sqlx::query(
            "INSERT INTO lifecycle_tasks
                (task_id, task_type, status, cluster_id, node_group_id, started_at, version, document)
             VALUES ($1, $2, $3, $4, $5, $6, 1, $7)
             ON CONFLICT (task_id) DO NOTHING",
        )
        .bind(&task.task_id)
        .bind(&task.task_type)
        .bind(task.status.as_str())
        .bind(&task.cluster_id)
        .bind(&task.node_group_id)
        .bind(task.start)
        .bind(Json(task))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: "task",
                id: task.task_id.clone(),
            });
        }
        Ok(1)
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Versioned<Task>> {
        let row = sqlx::query_as::<_, (Json<Task>, i64)>(
            "SELECT document, version FROM lifecycle_tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("task", task_id))?;

        Ok(Versioned {
            value: row.0 .0,
            version: row.1,
        })
    }

    async fn update_task(&self, task: &Task, expected_version: Version) -> StoreResult<Version> {
        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE lifecycle_tasks
             SET status = $2, document = $3, version = version + 1
             WHERE task_id = $1 AND version = $4
             RETURNING version",
        )
        .bind(&task.task_id)
        .bind(task.status.as_str())
        .bind(Json(task))
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(version) => Ok(version),
            None => match self.current_version(&task.task_id).await? {
                Some(actual) => Err(StoreError::VersionConflict {
                    task_id: task.task_id.clone(),
                    expected: expected_version,
                    actual,
                }),
                None => Err(StoreError::not_found("task", &task.task_id)),
            },
        }
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_scalar::<_, Json<Task>>(
            "SELECT document FROM lifecycle_tasks
             WHERE ($1::TEXT IS NULL OR cluster_id = $1)
               AND ($2::TEXT IS NULL OR node_group_id = $2)
               AND ($3::TEXT IS NULL OR task_type = $3)
               AND ($4::TEXT IS NULL OR status = $4)
             ORDER BY started_at, task_id",
        )
        .bind(filter.cluster_id.as_deref())
        .bind(filter.node_group_id.as_deref())
        .bind(filter.task_type.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    async fn delete_task(&self, task_id: &str) -> StoreResult<()> {
        let deleted = sqlx::query("DELETE FROM lifecycle_tasks WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::not_found("task", task_id));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for PgStore {
    async fn get_cluster(&self, cluster_id: &str) -> StoreResult<Cluster> {
        sqlx::query_scalar::<_, Json<Cluster>>(
            "SELECT document FROM lifecycle_clusters WHERE cluster_id = $1",
        )
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.0)
        .ok_or_else(|| StoreError::not_found("cluster", cluster_id))
    }

    async fn update_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle_clusters (cluster_id, document) VALUES ($1, $2)
             ON CONFLICT (cluster_id) DO UPDATE SET document = EXCLUDED.document",
        )
        .bind(&cluster.cluster_id)
        .bind(Json(cluster))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_node_group(&self, node_group_id: &str) -> StoreResult<NodeGroup> {
        sqlx::query_scalar::<_, Json<NodeGroup>>(
            "SELECT document FROM lifecycle_node_groups WHERE node_group_id = $1",
        )
        .bind(node_group_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.0)
        .ok_or_else(|| StoreError::not_found("node group", node_group_id))
    }

    async fn update_node_group(&self, node_group: &NodeGroup) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO lifecycle_node_groups (node_group_id, cluster_id, document) VALUES ($1, $2, $3)
             ON CONFLICT (node_group_id) DO UPDATE
             SET cluster_id = EXCLUDED.cluster_id, document = EXCLUDED.document",
        )
        .bind(&node_group.node_group_id)
        .bind(&node_group.cluster_id)
        .bind(Json(node_group))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_node_groups(&self, cluster_id: &str) -> StoreResult<Vec<NodeGroup>> {
        let rows = sqlx::query_scalar::<_, Json<NodeGroup>>(
            "SELECT document FROM lifecycle_node_groups WHERE cluster_id = $1 ORDER BY node_group_id",
        )
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    async fn get_cloud(&self, cloud_id: &str) -> StoreResult<Cloud> {
        sqlx::query_scalar::<_, Json<Cloud>>(
            "SELECT document FROM lifecycle_clouds WHERE cloud_id = $1",
        )
        .bind(cloud_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.0)
        .ok_or_else(|| StoreError::not_found("cloud", cloud_id))
    }

    async fn get_cloud_account(&self, account_id: &str) -> StoreResult<CloudAccount> {
        sqlx::query_scalar::<_, Json<CloudAccount>>(
            "SELECT document FROM lifecycle_cloud_accounts WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.0)
        .ok_or_else(|| StoreError::not_found("cloud account", account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::test_support::task_with_steps;
    use crate::state_machine::TaskStatus;

    async fn test_store() -> PgStore {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/cluster_lifecycle_test".to_string());
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        PgStore::connect(&config).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL instance"]
    async fn test_task_compare_and_swap() {
        let store = test_store().await;
        let mut task = task_with_steps(&["a", "b"]);
        task.task_id = uuid::Uuid::new_v4().to_string();

        let v1 = store.create_task(&task).await.unwrap();
        task.status = TaskStatus::Running;
        let v2 = store.update_task(&task, v1).await.unwrap();
        assert_eq!(v2, v1 + 1);

        let err = store.update_task(&task, v1).await.unwrap_err();
        assert!(err.is_conflict());

        let listed = store
            .list_tasks(&TaskFilter::for_cluster("cluster-1").with_status(TaskStatus::Running))
            .await
            .unwrap();
        assert!(listed.iter().any(|t| t.task_id == task.task_id));

        store.delete_task(&task.task_id).await.unwrap();
        assert!(store.get_task(&task.task_id).await.unwrap_err().is_not_found());
    }
}
