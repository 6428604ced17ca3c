//! # AWS Step Functions
//!
//! Every step kind the AWS provider can put in a task, identified by
//! [`AwsStep`]. All of them share one shape: claim the step through the
//! state controller (a `None` claim means an earlier attempt finished it),
//! check for termination, run the body, then record success or failure. A
//! body stages results into `common_params`; they are persisted with the
//! outcome either way so partial progress survives a failure.

mod cluster;
mod nodegroup;
mod nodes;
mod script;

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::api::AwsClientFactory;
use crate::cloudprovider::{CloudError, ScriptRunner};
use crate::config::PollingConfig;
use crate::context::OpContext;
use crate::models::{NodeGroup, ParamKey, Step};
use crate::polling::{retry_fixed, LoopOptions};
use crate::resolver::{CloudDependBasicInfo, DependRequest, DependencyResolver, ResolveError};
use crate::store::ClusterStore;
use crate::task::error::StepError;
use crate::task::registry::{StepFunc, StepIdentity, StepInvocation};
use crate::task::state::{TaskState, TaskStateController};

/// Typed identity of every AWS step kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwsStep {
    CreateEksCluster,
    CheckEksClusterStatus,
    UpdateCreateClusterDb,
    DeleteClusterNodeGroups,
    DeleteEksCluster,
    CleanClusterDb,
    CreateCloudNodeGroup,
    CheckCloudNodeGroupStatus,
    UpdateCreateNodeGroupDb,
    DeleteCloudNodeGroup,
    UpdateDeleteNodeGroupDb,
    ApplyDesiredNodes,
    CheckClusterNodesStatus,
    UpdateDesiredNodesDb,
    RemoveNodesFromGroup,
    CheckCleanNodesStatus,
    UpdateCleanNodesDb,
    RunPostInitScript,
}

impl AwsStep {
    pub const ALL: [AwsStep; 18] = [
        Self::CreateEksCluster,
        Self::CheckEksClusterStatus,
        Self::UpdateCreateClusterDb,
        Self::DeleteClusterNodeGroups,
        Self::DeleteEksCluster,
        Self::CleanClusterDb,
        Self::CreateCloudNodeGroup,
        Self::CheckCloudNodeGroupStatus,
        Self::UpdateCreateNodeGroupDb,
        Self::DeleteCloudNodeGroup,
        Self::UpdateDeleteNodeGroupDb,
        Self::ApplyDesiredNodes,
        Self::CheckClusterNodesStatus,
        Self::UpdateDesiredNodesDb,
        Self::RemoveNodesFromGroup,
        Self::CheckCleanNodesStatus,
        Self::UpdateCleanNodesDb,
        Self::RunPostInitScript,
    ];
}

impl StepIdentity for AwsStep {
    fn method(&self) -> &'static str {
        match self {
            Self::CreateEksCluster => "aws-CreateEKSClusterTask",
            Self::CheckEksClusterStatus => "aws-CheckEKSClusterStatusTask",
            Self::UpdateCreateClusterDb => "aws-UpdateCreateClusterDBInfoTask",
            Self::DeleteClusterNodeGroups => "aws-DeleteClusterNodeGroupsTask",
            Self::DeleteEksCluster => "aws-DeleteEKSClusterTask",
            Self::CleanClusterDb => "aws-CleanClusterDBInfoTask",
            Self::CreateCloudNodeGroup => "aws-CreateCloudNodeGroupTask",
            Self::CheckCloudNodeGroupStatus => "aws-CheckCloudNodeGroupStatusTask",
            Self::UpdateCreateNodeGroupDb => "aws-UpdateCreateNodeGroupDBInfoTask",
            Self::DeleteCloudNodeGroup => "aws-DeleteCloudNodeGroupTask",
            Self::UpdateDeleteNodeGroupDb => "aws-UpdateDeleteNodeGroupDBInfoTask",
            Self::ApplyDesiredNodes => "aws-UpdateDesiredNodesTask",
            Self::CheckClusterNodesStatus => "aws-CheckClusterNodesStatusTask",
            Self::UpdateDesiredNodesDb => "aws-UpdateDesiredNodesDBInfoTask",
            Self::RemoveNodesFromGroup => "aws-CleanNodeGroupNodesTask",
            Self::CheckCleanNodesStatus => "aws-CheckCleanNodeGroupNodesStatusTask",
            Self::UpdateCleanNodesDb => "aws-UpdateCleanNodeGroupNodesDBInfoTask",
            Self::RunPostInitScript => "aws-RunPostInitScriptTask",
        }
    }

    fn step_name(&self) -> &'static str {
        match self {
            Self::CreateEksCluster => "createEKSCluster",
            Self::CheckEksClusterStatus => "checkEKSClusterStatus",
            Self::UpdateCreateClusterDb => "updateCreateClusterDBInfo",
            Self::DeleteClusterNodeGroups => "deleteClusterNodeGroups",
            Self::DeleteEksCluster => "deleteEKSCluster",
            Self::CleanClusterDb => "cleanClusterDBInfo",
            Self::CreateCloudNodeGroup => "createCloudNodeGroup",
            Self::CheckCloudNodeGroupStatus => "checkCloudNodeGroupStatus",
            Self::UpdateCreateNodeGroupDb => "updateCreateNodeGroupDBInfo",
            Self::DeleteCloudNodeGroup => "deleteCloudNodeGroup",
            Self::UpdateDeleteNodeGroupDb => "updateDeleteNodeGroupDBInfo",
            Self::ApplyDesiredNodes => "updateDesiredNodes",
            Self::CheckClusterNodesStatus => "checkClusterNodesStatus",
            Self::UpdateDesiredNodesDb => "updateDesiredNodesDBInfo",
            Self::RemoveNodesFromGroup => "cleanNodeGroupNodes",
            Self::CheckCleanNodesStatus => "checkCleanNodeGroupNodesStatus",
            Self::UpdateCleanNodesDb => "updateCleanNodeGroupNodesDBInfo",
            Self::RunPostInitScript => "runPostInitScript",
        }
    }

    fn default_timeout_secs(&self) -> Option<u64> {
        match self {
            Self::CreateEksCluster | Self::CreateCloudNodeGroup | Self::ApplyDesiredNodes => {
                Some(600)
            }
            Self::RemoveNodesFromGroup => Some(900),
            _ => None,
        }
    }
}

/// Collaborators shared by every AWS step function
pub struct AwsStepDeps {
    pub controller: TaskStateController,
    pub store: Arc<dyn ClusterStore>,
    pub resolver: DependencyResolver,
    pub clients: Arc<dyn AwsClientFactory>,
    pub scripts: Option<Arc<dyn ScriptRunner>>,
    pub polling: PollingConfig,
}

impl std::fmt::Debug for AwsStepDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsStepDeps")
            .field("polling", &self.polling)
            .field("scripts", &self.scripts.is_some())
            .finish_non_exhaustive()
    }
}

impl AwsStepDeps {
    /// Resolve the cluster, cloud and (optionally) nodegroup named by the
    /// task's params
    pub(crate) async fn resolve(
        &self,
        state: &TaskState,
        with_node_group: bool,
    ) -> Result<CloudDependBasicInfo, StepError> {
        let mut req = DependRequest::new(
            state.require_param(ParamKey::ClusterId)?,
            state.require_param(ParamKey::CloudId)?,
        );
        if with_node_group {
            req = req.with_node_group(state.require_param(ParamKey::NodeGroupId)?);
        }
        Ok(self.resolver.get_cluster_depend_basic_info(&req).await?)
    }

    /// One cloud call with bounded retry of transient failures
    pub(crate) async fn cloud_call<F, Fut, T>(&self, ctx: &OpContext, f: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        retry_fixed(
            ctx,
            self.polling.cloud_retry_attempts,
            self.polling.cloud_retry_delay(),
            f,
            CloudError::is_retryable,
        )
        .await
        .map_err(StepError::from)
    }

    /// Polling context bounded by `timeout_ms`, inside the step's own budget
    pub(crate) fn poll_context(&self, ctx: &OpContext, timeout_ms: u64) -> (OpContext, LoopOptions) {
        (
            ctx.with_timeout(Duration::from_millis(timeout_ms)),
            self.polling.loop_options(),
        )
    }
}

/// Executes one [`AwsStep`] kind
pub struct AwsStepFunc {
    deps: Arc<AwsStepDeps>,
    step: AwsStep,
}

impl AwsStepFunc {
    pub fn new(deps: Arc<AwsStepDeps>, step: AwsStep) -> Self {
        Self { deps, step }
    }

    async fn run_body(
        &self,
        state: &mut TaskState,
        step: &Step,
        ctx: &OpContext,
    ) -> Result<(), StepError> {
        let deps = self.deps.as_ref();
        match self.step {
            AwsStep::CreateEksCluster => cluster::create_eks_cluster(deps, state, ctx).await,
            AwsStep::CheckEksClusterStatus => cluster::check_eks_cluster_status(deps, state, ctx).await,
            AwsStep::UpdateCreateClusterDb => cluster::update_create_cluster_db(deps, state, ctx).await,
            AwsStep::DeleteClusterNodeGroups => {
                cluster::delete_cluster_node_groups(deps, state, ctx).await
            }
            AwsStep::DeleteEksCluster => cluster::delete_eks_cluster(deps, state, ctx).await,
            AwsStep::CleanClusterDb => cluster::clean_cluster_db(deps, state).await,
            AwsStep::CreateCloudNodeGroup => nodegroup::create_cloud_node_group(deps, state, ctx).await,
            AwsStep::CheckCloudNodeGroupStatus => {
                nodegroup::check_cloud_node_group_status(deps, state, ctx).await
            }
            AwsStep::UpdateCreateNodeGroupDb => nodegroup::update_create_node_group_db(deps, state).await,
            AwsStep::DeleteCloudNodeGroup => nodegroup::delete_cloud_node_group(deps, state, ctx).await,
            AwsStep::UpdateDeleteNodeGroupDb => nodegroup::update_delete_node_group_db(deps, state).await,
            AwsStep::ApplyDesiredNodes => nodes::apply_desired_nodes(deps, state, ctx).await,
            AwsStep::CheckClusterNodesStatus => nodes::check_cluster_nodes_status(deps, state, ctx).await,
            AwsStep::UpdateDesiredNodesDb => nodes::update_desired_nodes_db(deps, state, ctx).await,
            AwsStep::RemoveNodesFromGroup => nodes::remove_nodes_from_group(deps, state, ctx).await,
            AwsStep::CheckCleanNodesStatus => nodes::check_clean_nodes_status(deps, state, ctx).await,
            AwsStep::UpdateCleanNodesDb => nodes::update_clean_nodes_db(deps, state).await,
            AwsStep::RunPostInitScript => script::run_post_init_script(deps, state, step, ctx).await,
        }
    }
}

#[async_trait]
impl StepFunc for AwsStepFunc {
    #[instrument(skip(self, invocation), fields(task_id = %invocation.task_id, step_name = %invocation.step_name))]
    async fn execute(&self, invocation: StepInvocation) -> Result<(), StepError> {
        let start = Utc::now();
        let Some((mut state, step)) = self
            .deps
            .controller
            .get_task_state_and_current_step(&invocation.task_id, &invocation.step_name)
            .await?
        else {
            debug!("Step already handled, nothing to do");
            return Ok(());
        };

        let result = if state.is_force_terminated().await? {
            Err(StepError::ForceTerminated)
        } else {
            self.run_body(&mut state, &step, &invocation.ctx).await
        };

        match result {
            Ok(()) => {
                state.update_step_succ(start, &step.name).await?;
                info!(step_method = %step.step_method, "✅ AWS: step finished");
                Ok(())
            }
            Err(e) => {
                state.update_step_failure(start, &step.name, &e).await?;
                Err(e)
            }
        }
    }
}

/// The nodegroup the resolver loaded for a nodegroup-scoped step
pub(crate) fn take_node_group(
    info: &mut CloudDependBasicInfo,
    state: &TaskState,
) -> Result<NodeGroup, StepError> {
    info.node_group.take().ok_or_else(|| {
        StepError::Resolve(ResolveError::NodeGroupNotFound(
            state.param(ParamKey::NodeGroupId).unwrap_or_default().to_string(),
        ))
    })
}

/// Treat "already gone" as success for delete calls
pub(crate) fn ignore_not_found(result: Result<(), CloudError>) -> Result<(), CloudError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Transient errors during polling mean "ask again later"
pub(crate) fn transient_as_continue<T>(
    result: Result<T, CloudError>,
) -> Result<Option<T>, CloudError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_retryable() => {
            debug!(error = %e, "Transient error while polling");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
