//! # Lifecycle Configuration
//!
//! Typed configuration for the engine, loaded by [`ConfigManager`] from
//! `config/lifecycle.yaml`, an optional `config/lifecycle.{env}.yaml`
//! override and `LIFECYCLE__SECTION__KEY` environment variables. Every field
//! has a default so a missing file section never fails loading.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::polling::LoopOptions;

/// Headroom between a poll deadline and the step deadline around it
pub const POLL_STEP_MARGIN_SECS: u64 = 120;

/// Execution budget for a step whose body is one poll bounded by `poll_timeout_ms`
pub fn poll_step_budget_secs(poll_timeout_ms: u64) -> u64 {
    poll_timeout_ms / 1000 + POLL_STEP_MARGIN_SECS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub state: StateConfig,
    pub polling: PollingConfig,
    pub events: EventsConfig,
}

impl LifecycleConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker.max_concurrent_tasks == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.max_concurrent_tasks",
                0,
                "at least one task must be allowed to run",
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.queue_capacity",
                0,
                "queue must hold at least one task",
            ));
        }
        if self.worker.default_step_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.default_step_timeout_seconds",
                0,
                "steps need a positive execution budget",
            ));
        }
        if self.state.cas_retry_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "state.cas_retry_limit",
                0,
                "at least one write attempt is required",
            ));
        }
        let longest_step = self
            .worker
            .default_step_timeout_seconds
            .max(poll_step_budget_secs(self.polling.longest_poll_timeout_ms()));
        if self.state.stale_step_lease_seconds <= longest_step {
            return Err(ConfigurationError::invalid_value(
                "state.stale_step_lease_seconds",
                self.state.stale_step_lease_seconds,
                format!("lease must outlive the longest step budget ({longest_step}s)"),
            ));
        }
        if self.polling.default_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "polling.default_interval_ms",
                0,
                "polling interval must be positive",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "broadcast channel needs capacity",
            ));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.database.max_connections,
                format!("must be >= min_connections ({})", self.database.min_connections),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Create tables on connect when missing
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/cluster_lifecycle_development".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_tasks: usize,
    pub queue_capacity: usize,
    /// Budget for steps that carry no timeout of their own
    pub default_step_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 20,
            queue_capacity: 1000,
            default_step_timeout_seconds: 3600,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_secs(self.default_step_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Attempts for one compare-and-swap write before giving up
    pub cas_retry_limit: u32,
    /// A RUNNING step older than this may be reclaimed by a new executor
    pub stale_step_lease_seconds: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            cas_retry_limit: 10,
            stale_step_lease_seconds: 7200,
        }
    }
}

impl StateConfig {
    pub fn stale_step_lease(&self) -> Duration {
        Duration::from_secs(self.stale_step_lease_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub default_interval_ms: u64,
    pub cluster_active_timeout_ms: u64,
    pub cluster_delete_timeout_ms: u64,
    pub node_group_active_timeout_ms: u64,
    pub node_group_delete_timeout_ms: u64,
    pub instances_ready_timeout_ms: u64,
    pub instances_terminated_timeout_ms: u64,
    pub script_timeout_ms: u64,
    /// Local retries for throttled or conflicting cloud calls
    pub cloud_retry_attempts: u32,
    pub cloud_retry_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 20_000,
            cluster_active_timeout_ms: 30 * 60 * 1000,
            cluster_delete_timeout_ms: 20 * 60 * 1000,
            node_group_active_timeout_ms: 20 * 60 * 1000,
            node_group_delete_timeout_ms: 20 * 60 * 1000,
            instances_ready_timeout_ms: 20 * 60 * 1000,
            instances_terminated_timeout_ms: 10 * 60 * 1000,
            script_timeout_ms: 10 * 60 * 1000,
            cloud_retry_attempts: 3,
            cloud_retry_delay_ms: 3000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions::with_interval(self.interval())
    }

    pub fn cloud_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cloud_retry_delay_ms)
    }

    pub fn longest_poll_timeout_ms(&self) -> u64 {
        [
            self.cluster_active_timeout_ms,
            self.cluster_delete_timeout_ms,
            self.node_group_active_timeout_ms,
            self.node_group_delete_timeout_ms,
            self.instances_ready_timeout_ms,
            self.instances_terminated_timeout_ms,
            self.script_timeout_ms,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}
