//! User supplied post-init script, shared by cluster creation and scale out.

use tracing::info;

use super::{transient_as_continue, AwsStepDeps};
use crate::cloudprovider::{CloudError, ScriptJobStatus};
use crate::context::OpContext;
use crate::models::{ParamKey, Step};
use crate::polling::{loop_do_func, LoopError, LoopState};
use crate::task::error::StepError;
use crate::task::state::TaskState;

pub(super) async fn run_post_init_script(
    deps: &AwsStepDeps,
    state: &mut TaskState,
    step: &Step,
    ctx: &OpContext,
) -> Result<(), StepError> {
    let runner = deps
        .scripts
        .clone()
        .ok_or_else(|| StepError::failed("no script runner configured"))?;
    let script = state.require_param(ParamKey::PostInitScript)?.to_string();
    let info = deps.resolve(state, false).await?;

    // Only the nodes this task added; empty targets the whole cluster
    let targets = state.param_list(ParamKey::NodeIps);

    let job_id = match state.param(ParamKey::ScriptJobId) {
        Some(job_id) => {
            info!(job_id = %job_id, attempt = step.retry, "Resuming script job from an earlier attempt");
            job_id.to_string()
        }
        None => {
            let job_id = deps
                .cloud_call(ctx, || {
                    runner.run_script(&info.cmd_option, &info.cluster, &script, &targets)
                })
                .await?;
            state.set_common_param(ParamKey::ScriptJobId, job_id.clone());
            state.flush_common_params().await?;
            info!(job_id = %job_id, targets = targets.len(), "Post-init script started");
            job_id
        }
    };

    let (poll_ctx, opts) = deps.poll_context(ctx, deps.polling.script_timeout_ms);
    let waited = loop_do_func(
        &poll_ctx,
        || async {
            let Some(status) = transient_as_continue(runner.job_status(&job_id).await)? else {
                return Ok(LoopState::Continue);
            };
            match status {
                ScriptJobStatus::Succeeded => Ok(LoopState::EndLoop),
                ScriptJobStatus::Running => Ok(LoopState::Continue),
                ScriptJobStatus::Failed(reason) => Err(CloudError::other(format!(
                    "post-init script job {job_id} failed: {reason}"
                ))),
            }
        },
        opts,
    )
    .await;

    // A failed job is not resumed; the next attempt starts a fresh one
    if let Err(LoopError::Aborted(_)) = &waited {
        state.set_common_param(ParamKey::ScriptJobId, "");
    }
    waited?;

    info!(job_id = %job_id, "Post-init script finished");
    Ok(())
}
