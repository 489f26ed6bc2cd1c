//! `deployment create`

use anyhow::{Context, Result};

use super::{CommandContext, CommandEnv, run_locked};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::remote_config::{build_create_task, build_load_task};

#[derive(Debug, Clone, Default)]
pub struct DeploymentCreateOptions {
    pub deployment: String,
}

type CreateContext = CommandContext<DeploymentCreateOptions>;

fn create_pipeline(ctx: &CreateContext) -> Pipeline<CreateContext> {
    Pipeline::new("deployment create")
        .show_progress(ctx.settings.behavior.show_progress)
        .phase(build_create_task())
        .phase(build_load_task())
}

/// Write the remote config for a deployment declared in the local config.
///
/// Fails if the deployment already has one.
pub async fn create(env: &CommandEnv, options: DeploymentCreateOptions) -> Result<PipelineReport> {
    let command = format!("deployment create --deployment {}", options.deployment);
    let deployment = options.deployment.clone();
    let mut ctx = env
        .context(&deployment, &command, options)
        .await
        .context("Failed to prepare deployment create")?;

    let pipeline = create_pipeline(&ctx);
    let namespace = ctx.namespace.clone();
    let report = run_locked(&env.lease_manager(&ctx), &namespace, &pipeline, &mut ctx, false)
        .await
        .with_context(|| format!("Failed to create deployment '{}'", deployment))?;

    crate::log_info!("Deployment {} created in namespace {}", deployment, namespace);
    Ok(report)
}
