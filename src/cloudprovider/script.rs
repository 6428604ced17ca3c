//! Post-init scripts run on a cluster or its new nodes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CloudError;
use crate::models::{Cluster, CommonOption};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptJobStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// Dispatches scripts to an execution backend and reports on them
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Start `script` against `target_ips`, or the cluster itself when
    /// empty; returns the backend job id
    async fn run_script(
        &self,
        option: &CommonOption,
        cluster: &Cluster,
        script: &str,
        target_ips: &[String],
    ) -> Result<String, CloudError>;

    async fn job_status(&self, job_id: &str) -> Result<ScriptJobStatus, CloudError>;
}
