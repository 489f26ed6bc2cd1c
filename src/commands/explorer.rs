//! `explorer deploy` and `explorer destroy`

use anyhow::{Context, Result};
use tracing::info;

use super::{ClusterTarget, CommandContext, CommandEnv, run_locked};
use crate::helm::ChartRelease;
use crate::k8s::pods::{EXPLORER_LABEL, labels};
use crate::k8s::wait_for_pods_ready;
use crate::pipeline::{Phase, PhaseFuture, Pipeline, PipelineReport};
use crate::remote_config::{BaseComponent, Component, ComponentType, build_load_task};
use crate::utils::{SoloError, SoloResult};

#[derive(Debug, Clone, Default)]
pub struct ExplorerDeployOptions {
    pub deployment: String,
    /// Cluster to install on; the deployment's first cluster when unset
    pub cluster_ref: Option<String>,
    pub values: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExplorerDestroyOptions {
    pub deployment: String,
    pub cluster_ref: Option<String>,
}

/// Resolved before the lease is taken so a bad `--cluster-ref` changes nothing
fn target_cluster<O>(
    ctx: &CommandContext<O>,
    cluster_ref: Option<&str>,
) -> SoloResult<ClusterTarget> {
    match cluster_ref {
        None => Ok(ctx.primary.clone()),
        Some(wanted) => ctx
            .clusters
            .iter()
            .find(|c| c.cluster_ref == wanted)
            .cloned()
            .ok_or_else(|| SoloError::InvalidValue {
                field: "cluster-ref".to_string(),
                value: wanted.to_string(),
            }),
    }
}

fn explorer_release<O>(ctx: &CommandContext<O>) -> ChartRelease {
    let chart = &ctx.settings.charts.explorer;
    ChartRelease::new(&chart.release, &chart.chart, &chart.version, &ctx.namespace)
}

#[derive(Clone)]
pub struct ExplorerDeployState {
    pub options: ExplorerDeployOptions,
    pub cluster: ClusterTarget,
}

type DeployContext = CommandContext<ExplorerDeployState>;

async fn install_explorer(ctx: &DeployContext) -> SoloResult<()> {
    let cluster = &ctx.options.cluster;
    let release = explorer_release(ctx).with_values(ctx.options.options.values.clone());

    if ctx
        .helm
        .is_chart_installed(&cluster.context, &ctx.namespace, &release.release)
        .await?
    {
        ctx.helm.upgrade(&cluster.context, &release, false).await
    } else {
        ctx.helm.install(&cluster.context, &release).await
    }
}

async fn check_explorer_ready(ctx: &DeployContext) -> SoloResult<()> {
    let cluster = &ctx.options.cluster;
    wait_for_pods_ready(
        cluster.k8s.as_ref(),
        &ctx.namespace,
        &labels(EXPLORER_LABEL),
        1,
        ctx.settings.waits.pod_policy(),
    )
    .await?;
    Ok(())
}

async fn record_explorer(ctx: &mut DeployContext) -> SoloResult<()> {
    let cluster_ref = ctx.options.cluster.cluster_ref.clone();
    let component = Component::MirrorNodeExplorer(BaseComponent::new(
        &ctx.settings.charts.explorer.release,
        cluster_ref,
        &ctx.namespace,
    ));
    ctx.remote
        .modify(move |config| config.components.upsert(component))
        .await
}

fn install_phase(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(install_explorer(ctx))
}

fn ready_phase(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(check_explorer_ready(ctx))
}

fn record_phase(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(record_explorer(ctx))
}

fn deploy_pipeline(ctx: &DeployContext) -> Pipeline<DeployContext> {
    Pipeline::new("explorer deploy")
        .show_progress(ctx.settings.behavior.show_progress)
        .phase(build_load_task())
        .phase(Phase::new("Install explorer chart", install_phase))
        .phase(Phase::new("Check explorer pod is ready", ready_phase))
        .phase(Phase::new("Add explorer to remote config", record_phase))
}

/// Install the explorer chart into an existing deployment
pub async fn deploy(env: &CommandEnv, options: ExplorerDeployOptions) -> Result<PipelineReport> {
    let command = format!("explorer deploy --deployment {}", options.deployment);
    let deployment = options.deployment.clone();
    let ctx = env
        .context(&deployment, &command, options)
        .await
        .context("Failed to prepare explorer deploy")?;
    let cluster = target_cluster(&ctx, ctx.options.cluster_ref.as_deref())?;
    let mut ctx = ctx.map_options(|options| ExplorerDeployState { options, cluster });

    let pipeline = deploy_pipeline(&ctx);
    let namespace = ctx.namespace.clone();
    let report = run_locked(&env.lease_manager(&ctx), &namespace, &pipeline, &mut ctx, false)
        .await
        .with_context(|| format!("Explorer deploy failed for deployment '{}'", deployment))?;

    crate::log_info!("Explorer deployed to namespace {}", namespace);
    Ok(report)
}

#[derive(Clone)]
pub struct ExplorerDestroyState {
    pub options: ExplorerDestroyOptions,
    pub cluster: ClusterTarget,
    pub installed: bool,
}

type DestroyContext = CommandContext<ExplorerDestroyState>;

async fn check_installed(ctx: &mut DestroyContext) -> SoloResult<()> {
    let release = &ctx.settings.charts.explorer.release;
    let installed = ctx
        .helm
        .is_chart_installed(&ctx.options.cluster.context, &ctx.namespace, release)
        .await?;
    if !installed {
        info!(namespace = %ctx.namespace, release = %release, "Explorer chart is not installed");
    }
    ctx.options.installed = installed;
    Ok(())
}

async fn uninstall_explorer(ctx: &DestroyContext) -> SoloResult<()> {
    ctx.helm
        .uninstall(
            &ctx.options.cluster.context,
            &ctx.namespace,
            &ctx.settings.charts.explorer.release,
        )
        .await
}

fn has_explorer_component(ctx: &DestroyContext) -> bool {
    ctx.remote.get().is_ok_and(|config| {
        config
            .components
            .get(&ctx.settings.charts.explorer.release)
            .is_some_and(|c| c.component_type() == ComponentType::MirrorNodeExplorer)
    })
}

async fn remove_explorer(ctx: &mut DestroyContext) -> SoloResult<()> {
    let name = ctx.settings.charts.explorer.release.clone();
    ctx.remote
        .modify(move |config| {
            config
                .components
                .remove(&name, ComponentType::MirrorNodeExplorer)
                .map(|_| ())
        })
        .await
}

fn check_phase(ctx: &mut DestroyContext) -> PhaseFuture<'_> {
    Box::pin(check_installed(ctx))
}

fn uninstall_phase(ctx: &mut DestroyContext) -> PhaseFuture<'_> {
    Box::pin(uninstall_explorer(ctx))
}

fn remove_phase(ctx: &mut DestroyContext) -> PhaseFuture<'_> {
    Box::pin(remove_explorer(ctx))
}

fn destroy_pipeline(ctx: &DestroyContext) -> Pipeline<DestroyContext> {
    Pipeline::new("explorer destroy")
        .show_progress(ctx.settings.behavior.show_progress)
        .phase(build_load_task())
        .phase(Phase::new("Check explorer installation", check_phase))
        .phase(
            Phase::new("Uninstall explorer chart", uninstall_phase)
                .skip_if(|ctx: &DestroyContext| !ctx.options.installed),
        )
        .phase(
            Phase::new("Remove explorer from remote config", remove_phase)
                .skip_if(|ctx: &DestroyContext| !has_explorer_component(ctx)),
        )
}

/// Uninstall the explorer and drop it from the remote config
pub async fn destroy(env: &CommandEnv, options: ExplorerDestroyOptions) -> Result<PipelineReport> {
    let command = format!("explorer destroy --deployment {}", options.deployment);
    let deployment = options.deployment.clone();
    let ctx = env
        .context(&deployment, &command, options)
        .await
        .context("Failed to prepare explorer destroy")?;
    let cluster = target_cluster(&ctx, ctx.options.cluster_ref.as_deref())?;
    let mut ctx = ctx.map_options(|options| ExplorerDestroyState {
        options,
        cluster,
        installed: false,
    });

    let pipeline = destroy_pipeline(&ctx);
    let namespace = ctx.namespace.clone();
    let report = run_locked(&env.lease_manager(&ctx), &namespace, &pipeline, &mut ctx, false)
        .await
        .with_context(|| format!("Explorer destroy failed for deployment '{}'", deployment))?;
    Ok(report)
}
