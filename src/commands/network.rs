//! `network deploy`, `network destroy` and `network refresh`

use anyhow::{Context, Result};
use futures::future::join_all;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{ClusterTarget, CommandContext, CommandEnv, run_locked};
use crate::helm::{ChartRelease, Helm};
use crate::k8s::pods::{ENVOY_PROXY_LABEL, HAPROXY_LABEL, NETWORK_NODE_LABEL, labels};
use crate::k8s::{wait_for_pods, wait_for_pods_ready};
use crate::pipeline::{
    ConcurrentPhase, DeadlineOutcome, Phase, PhaseFuture, Pipeline, PipelineReport, PollPolicy,
    race_deadline,
};
use crate::remote_config::{
    BaseComponent, Component, ComponentsDataWrapper, ConsensusNodeComponent, ConsensusNodeState,
    RemoteConfigContext, RemoteConfigManager, build_create_task, build_load_task,
    build_probe_task,
};
use crate::utils::{SoloError, SoloResult};

/// Secrets created by the deployment chart carry this label
pub const SECRET_SELECTOR: &str = "solo.hedera.com/type";

/// Node states a refresh may start from
pub const REFRESH_ACCEPTED_STATES: [ConsensusNodeState; 3] = [
    ConsensusNodeState::Initialized,
    ConsensusNodeState::Setup,
    ConsensusNodeState::Started,
];

static NODE_ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("valid node alias regex"));

fn validate_aliases(aliases: &[String]) -> SoloResult<()> {
    let mut seen = BTreeSet::new();
    for alias in aliases {
        if !NODE_ALIAS_RE.is_match(alias) || !seen.insert(alias.as_str()) {
            return Err(SoloError::InvalidValue {
                field: "node-aliases".to_string(),
                value: alias.clone(),
            });
        }
    }
    Ok(())
}

/// Where a consensus node runs
#[derive(Debug, Clone, PartialEq)]
pub struct NodePlacement {
    pub alias: String,
    pub node_id: u64,
    pub cluster_index: usize,
    pub cluster_ref: String,
}

/// Place nodes on the deployment's clusters.
///
/// Nodes already in `known` keep their node id and cluster. New nodes take
/// the lowest id no recorded node uses and are spread round robin by their
/// position in `aliases`.
pub fn place_nodes(
    aliases: &[String],
    clusters: &[ClusterTarget],
    known: &ComponentsDataWrapper,
) -> SoloResult<Vec<NodePlacement>> {
    if clusters.is_empty() {
        return Ok(Vec::new());
    }
    let mut taken: BTreeSet<u64> = known.consensus_nodes().map(|n| n.node_id).collect();
    let mut next_id = 0;
    let mut placements = Vec::with_capacity(aliases.len());

    for (index, alias) in aliases.iter().enumerate() {
        let stored = match known.get(alias) {
            Some(_) => Some(known.consensus_node(alias)?),
            None => None,
        };
        let cluster_index = stored
            .and_then(|node| clusters.iter().position(|c| c.cluster_ref == node.cluster))
            .unwrap_or(index % clusters.len());
        let node_id = match stored {
            Some(node) => node.node_id,
            None => {
                while taken.contains(&next_id) {
                    next_id += 1;
                }
                taken.insert(next_id);
                next_id
            }
        };
        placements.push(NodePlacement {
            alias: alias.clone(),
            node_id,
            cluster_index,
            cluster_ref: clusters[cluster_index].cluster_ref.clone(),
        });
    }
    Ok(placements)
}

fn deployment_release<O>(ctx: &CommandContext<O>, version: Option<&str>) -> ChartRelease {
    let chart = &ctx.settings.charts.deployment;
    ChartRelease::new(
        &chart.release,
        &chart.chart,
        version.unwrap_or(&chart.version),
        &ctx.namespace,
    )
}

// ---------------------------------------------------------------------------
// deploy

#[derive(Debug, Clone, Default)]
pub struct NetworkDeployOptions {
    pub deployment: String,
    pub node_aliases: Vec<String>,
    /// Extra helm arguments passed through to the chart
    pub values: String,
    pub chart_version: Option<String>,
}

impl NetworkDeployOptions {
    fn validate(&self) -> SoloResult<()> {
        if self.node_aliases.is_empty() {
            return Err(SoloError::MissingArgument("node-aliases".to_string()));
        }
        validate_aliases(&self.node_aliases)
    }
}

/// Deploy options plus the placements worked out from the stored inventory
#[derive(Debug, Clone, Default)]
pub struct NetworkDeployState {
    pub options: NetworkDeployOptions,
    pub placements: Vec<NodePlacement>,
}

type DeployContext = CommandContext<NetworkDeployState>;

async fn assign_node_ids(ctx: &mut DeployContext) -> SoloResult<()> {
    let placements = place_nodes(
        &ctx.options.options.node_aliases,
        &ctx.clusters,
        &ctx.remote.get()?.components,
    )?;
    for node in &placements {
        info!(node = %node.alias, node_id = node.node_id, cluster = %node.cluster_ref, "Node placed");
    }
    ctx.options.placements = placements;
    Ok(())
}

fn assign_phase(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(assign_node_ids(ctx))
}

fn node_values(nodes: &[&NodePlacement], extra: &str) -> String {
    let mut parts: Vec<String> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            format!(
                "--set hedera.nodes[{i}].name={} --set hedera.nodes[{i}].nodeId={}",
                node.alias, node.node_id
            )
        })
        .collect();
    if !extra.trim().is_empty() {
        parts.push(extra.trim().to_string());
    }
    parts.join(" ")
}

async fn install_on_cluster(ctx: &DeployContext, index: usize) -> SoloResult<()> {
    let cluster = ctx.clusters.get(index).ok_or_else(|| SoloError::InvalidValue {
        field: "cluster".to_string(),
        value: index.to_string(),
    })?;
    let local_nodes: Vec<&NodePlacement> = ctx
        .options
        .placements
        .iter()
        .filter(|p| p.cluster_index == index)
        .collect();

    let options = &ctx.options.options;
    let release = deployment_release(ctx, options.chart_version.as_deref())
        .with_values(node_values(&local_nodes, &options.values));

    if ctx
        .helm
        .is_chart_installed(&cluster.context, &ctx.namespace, &release.release)
        .await?
    {
        info!(cluster = %cluster.cluster_ref, release = %release.release, "Chart already installed, upgrading");
        ctx.helm.upgrade(&cluster.context, &release, false).await
    } else {
        ctx.helm.install(&cluster.context, &release).await
    }
}

fn install_chart(ctx: &DeployContext, index: usize) -> PhaseFuture<'_> {
    Box::pin(install_on_cluster(ctx, index))
}

async fn check_nodes_running(
    clusters: &[ClusterTarget],
    namespace: &str,
    expected_per_cluster: &[usize],
    policy: PollPolicy,
) -> SoloResult<()> {
    for (cluster, &expected) in clusters.iter().zip(expected_per_cluster) {
        if expected == 0 {
            continue;
        }
        wait_for_pods(
            cluster.k8s.as_ref(),
            namespace,
            &labels(NETWORK_NODE_LABEL),
            expected,
            &["Running"],
            policy,
        )
        .await?;
    }
    Ok(())
}

fn nodes_per_cluster(placements: &[NodePlacement], clusters: usize) -> Vec<usize> {
    let mut counts = vec![0; clusters];
    for placement in placements {
        if let Some(count) = counts.get_mut(placement.cluster_index) {
            *count += 1;
        }
    }
    counts
}

fn wait_for_deployed_nodes(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(async move {
        let expected = nodes_per_cluster(&ctx.options.placements, ctx.clusters.len());
        check_nodes_running(
            &ctx.clusters,
            &ctx.namespace,
            &expected,
            ctx.settings.waits.pod_policy(),
        )
        .await
    })
}

async fn check_proxies_ready(ctx: &DeployContext) -> SoloResult<()> {
    let expected = nodes_per_cluster(&ctx.options.placements, ctx.clusters.len());
    let policy = ctx.settings.waits.pod_policy();

    for (cluster, &count) in ctx.clusters.iter().zip(&expected) {
        if count == 0 {
            continue;
        }
        for label in [HAPROXY_LABEL, ENVOY_PROXY_LABEL] {
            wait_for_pods_ready(
                cluster.k8s.as_ref(),
                &ctx.namespace,
                &labels(label),
                count,
                policy,
            )
            .await?;
        }
    }
    Ok(())
}

fn wait_for_proxies(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(check_proxies_ready(ctx))
}

async fn record_components(ctx: &mut DeployContext) -> SoloResult<()> {
    let placements = ctx.options.placements.clone();
    let namespace = ctx.namespace.clone();

    ctx.remote
        .modify(move |config| {
            for node in &placements {
                config
                    .components
                    .upsert(Component::ConsensusNode(ConsensusNodeComponent {
                        name: node.alias.clone(),
                        cluster: node.cluster_ref.clone(),
                        namespace: namespace.clone(),
                        node_id: node.node_id,
                        state: ConsensusNodeState::Initialized,
                    }))?;
                config.components.upsert(Component::EnvoyProxy(BaseComponent::new(
                    format!("envoy-proxy-{}", node.alias),
                    &node.cluster_ref,
                    &namespace,
                )))?;
                config.components.upsert(Component::HaProxy(BaseComponent::new(
                    format!("haproxy-{}", node.alias),
                    &node.cluster_ref,
                    &namespace,
                )))?;
            }
            Ok(())
        })
        .await
}

fn add_components(ctx: &mut DeployContext) -> PhaseFuture<'_> {
    Box::pin(record_components(ctx))
}

fn deploy_pipeline(ctx: &DeployContext) -> Pipeline<DeployContext> {
    let installs = ctx
        .clusters
        .iter()
        .enumerate()
        .map(|(index, cluster)| {
            ConcurrentPhase::new(
                format!("Install chart on cluster {}", cluster.cluster_ref),
                move |ctx: &DeployContext| install_chart(ctx, index),
            )
        })
        .collect();

    Pipeline::new("network deploy")
        .show_progress(ctx.settings.behavior.show_progress)
        .phase(build_probe_task())
        .phase(build_create_task())
        .phase(build_load_task())
        .phase(Phase::new("Assign node ids", assign_phase))
        .phase(Phase::concurrent("Install network chart", installs))
        .phase(Phase::new("Check node pods are running", wait_for_deployed_nodes))
        .phase(Phase::new("Check proxies are ready", wait_for_proxies))
        .phase(Phase::new("Add components to remote config", add_components))
}

/// Install or upgrade the network and record its components
pub async fn deploy(env: &CommandEnv, options: NetworkDeployOptions) -> Result<PipelineReport> {
    options.validate()?;

    let command = format!(
        "network deploy --deployment {} --node-aliases {}",
        options.deployment,
        options.node_aliases.join(",")
    );
    let deployment = options.deployment.clone();
    let mut ctx = env
        .context(&deployment, &command, options)
        .await
        .context("Failed to prepare network deploy")?
        .map_options(|options| NetworkDeployState {
            options,
            placements: Vec::new(),
        });

    let pipeline = deploy_pipeline(&ctx);
    let namespace = ctx.namespace.clone();
    let report = run_locked(&env.lease_manager(&ctx), &namespace, &pipeline, &mut ctx, false)
        .await
        .with_context(|| format!("Network deploy failed for deployment '{}'", deployment))?;

    crate::log_info!("Network deployed to namespace {}", namespace);
    Ok(report)
}

// ---------------------------------------------------------------------------
// destroy

#[derive(Debug, Clone, Default)]
pub struct NetworkDestroyOptions {
    pub deployment: String,
    pub force: bool,
    pub delete_pvcs: bool,
    pub delete_secrets: bool,
    /// Overrides `timeouts.destroy_secs`
    pub timeout: Option<Duration>,
}

impl NetworkDestroyOptions {
    /// A completed teardown removes the namespace
    fn deletes_namespace(&self) -> bool {
        self.delete_pvcs && self.delete_secrets
    }

    /// A timed out teardown falls back to deleting the namespace
    fn compensates_with_namespace_delete(&self) -> bool {
        self.force && self.delete_pvcs && self.delete_secrets
    }
}

/// Whether the teardown finished before its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOutcome {
    pub success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DestroyState {
    pub options: NetworkDestroyOptions,
    pub success: bool,
}

type DestroyContext = CommandContext<DestroyState>;

async fn uninstall_if_present(
    cluster: &ClusterTarget,
    helm: &dyn Helm,
    namespace: &str,
    release: &str,
) -> SoloResult<()> {
    if helm
        .is_chart_installed(&cluster.context, namespace, release)
        .await?
    {
        helm.uninstall(&cluster.context, namespace, release).await
    } else {
        info!(cluster = %cluster.cluster_ref, release, "Chart not installed, nothing to uninstall");
        Ok(())
    }
}

async fn teardown(
    clusters: &[ClusterTarget],
    helm: &dyn Helm,
    namespace: &str,
    release: &str,
    options: &NetworkDestroyOptions,
) -> SoloResult<()> {
    let results = join_all(
        clusters
            .iter()
            .map(|cluster| uninstall_if_present(cluster, helm, namespace, release)),
    )
    .await;
    for result in results {
        result?;
    }

    for cluster in clusters {
        if options.delete_pvcs {
            let deleted = cluster.k8s.delete_pvcs(namespace).await?;
            info!(cluster = %cluster.cluster_ref, deleted, "Deleted persistent volume claims");
        }
        if options.delete_secrets {
            let deleted = cluster.k8s.delete_secrets(namespace, SECRET_SELECTOR).await?;
            info!(cluster = %cluster.cluster_ref, deleted, "Deleted secrets");
        }
    }

    if options.deletes_namespace() {
        for cluster in clusters {
            cluster.k8s.delete_namespace(namespace).await?;
            info!(cluster = %cluster.cluster_ref, namespace, "Deleted namespace");
        }
    }
    Ok(())
}

async fn compensate(
    clusters: &[ClusterTarget],
    namespace: &str,
    remote: &mut RemoteConfigManager,
    delete_namespace: bool,
) -> SoloResult<()> {
    if delete_namespace {
        warn!(namespace, "Deleting namespace after destroy deadline");
        for cluster in clusters {
            cluster.k8s.delete_namespace(namespace).await?;
        }
        Ok(())
    } else if remote.is_loaded() {
        warn!(namespace, "Clearing remote config components after destroy deadline");
        remote.clear_components().await
    } else {
        warn!(namespace, "Destroy deadline reached and there is no remote config to clear");
        Ok(())
    }
}

async fn destroy_under_deadline(ctx: &mut DestroyContext) -> SoloResult<()> {
    let options = ctx.options.options.clone();
    let deadline = options
        .timeout
        .unwrap_or_else(|| ctx.settings.timeouts.destroy());
    let release = ctx.settings.charts.deployment.release.clone();

    let clusters: &[ClusterTarget] = &ctx.clusters;
    let helm: &dyn Helm = ctx.helm.as_ref();
    let namespace: &str = &ctx.namespace;
    let remote = &mut ctx.remote;
    let by_namespace = options.compensates_with_namespace_delete();

    let outcome = race_deadline(
        deadline,
        teardown(clusters, helm, namespace, &release, &options),
        move || async move { compensate(clusters, namespace, remote, by_namespace).await },
    )
    .await;

    match outcome {
        DeadlineOutcome::Completed(Ok(())) => {
            if !options.deletes_namespace() && ctx.remote.is_loaded() {
                ctx.remote.clear_components().await?;
            }
            ctx.options.success = true;
            info!(namespace = %ctx.namespace, "Network destroyed");
            Ok(())
        }
        DeadlineOutcome::Completed(Err(e)) => Err(e),
        DeadlineOutcome::Expired { compensation, .. } => {
            warn!(
                namespace = %ctx.namespace,
                ?deadline,
                "Network destroy timed out; compensating action was dispatched"
            );
            if let Err(e) = compensation {
                error!(namespace = %ctx.namespace, error = %e, "Compensating action failed");
            }
            ctx.options.success = false;
            Ok(())
        }
    }
}

fn destroy_resources(ctx: &mut DestroyContext) -> PhaseFuture<'_> {
    Box::pin(destroy_under_deadline(ctx))
}

fn destroy_pipeline(ctx: &DestroyContext) -> Pipeline<DestroyContext> {
    Pipeline::new("network destroy")
        .show_progress(ctx.settings.behavior.show_progress)
        .phase(build_probe_task())
        .phase(build_load_task().skip_if(|ctx: &DestroyContext| !ctx.remote_config().is_loaded()))
        .phase(Phase::new("Destroy network resources", destroy_resources))
}

/// Tear the network down. A timeout is reported through `success`, not as an error.
pub async fn destroy(env: &CommandEnv, options: NetworkDestroyOptions) -> Result<DestroyOutcome> {
    let command = format!("network destroy --deployment {}", options.deployment);
    let deployment = options.deployment.clone();
    let namespace_may_vanish = options.deletes_namespace();
    let state = DestroyState {
        options,
        success: false,
    };

    let mut ctx = env
        .context(&deployment, &command, state)
        .await
        .context("Failed to prepare network destroy")?;

    let pipeline = destroy_pipeline(&ctx);
    let namespace = ctx.namespace.clone();
    run_locked(
        &env.lease_manager(&ctx),
        &namespace,
        &pipeline,
        &mut ctx,
        namespace_may_vanish,
    )
    .await
    .with_context(|| format!("Network destroy failed for deployment '{}'", deployment))?;

    let outcome = DestroyOutcome {
        success: ctx.options.success,
    };
    if !outcome.success {
        crate::log_warn!(
            "Network destroy for '{}' did not finish in time; cleanup was dispatched",
            deployment
        );
    }
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// refresh

#[derive(Debug, Clone, Default)]
pub struct NetworkRefreshOptions {
    pub deployment: String,
    /// Nodes to refresh; every consensus node when empty
    pub node_aliases: Vec<String>,
    pub values: String,
}

type RefreshContext = CommandContext<NetworkRefreshOptions>;

fn targeted_nodes(ctx: &RefreshContext) -> SoloResult<Vec<ConsensusNodeComponent>> {
    let config = ctx.remote.get()?;
    if ctx.options.node_aliases.is_empty() {
        return Ok(config.components.consensus_nodes().cloned().collect());
    }
    ctx.options
        .node_aliases
        .iter()
        .map(|alias| config.components.consensus_node(alias).cloned())
        .collect()
}

fn validate_node_states(ctx: &RefreshContext) -> SoloResult<()> {
    for node in targeted_nodes(ctx)? {
        ctx.remote
            .ensure_node_state(&node.name, &REFRESH_ACCEPTED_STATES, &[])?;
    }
    Ok(())
}

fn check_node_states(ctx: &mut RefreshContext) -> PhaseFuture<'_> {
    Box::pin(async move { validate_node_states(ctx) })
}

async fn upgrade_on_cluster(ctx: &RefreshContext, index: usize) -> SoloResult<()> {
    let cluster = ctx.clusters.get(index).ok_or_else(|| SoloError::InvalidValue {
        field: "cluster".to_string(),
        value: index.to_string(),
    })?;
    let release = deployment_release(ctx, None).with_values(ctx.options.values.clone());
    ctx.helm.upgrade(&cluster.context, &release, true).await
}

fn upgrade_chart(ctx: &RefreshContext, index: usize) -> PhaseFuture<'_> {
    Box::pin(upgrade_on_cluster(ctx, index))
}

async fn check_refreshed_nodes(ctx: &RefreshContext) -> SoloResult<()> {
    let nodes = targeted_nodes(ctx)?;
    let expected: Vec<usize> = ctx
        .clusters
        .iter()
        .map(|cluster| {
            nodes
                .iter()
                .filter(|node| node.cluster == cluster.cluster_ref)
                .count()
        })
        .collect();
    check_nodes_running(
        &ctx.clusters,
        &ctx.namespace,
        &expected,
        ctx.settings.waits.pod_policy(),
    )
    .await
}

fn wait_for_refreshed_nodes(ctx: &mut RefreshContext) -> PhaseFuture<'_> {
    Box::pin(check_refreshed_nodes(ctx))
}

fn refresh_pipeline(ctx: &RefreshContext) -> Pipeline<RefreshContext> {
    let upgrades = ctx
        .clusters
        .iter()
        .enumerate()
        .map(|(index, cluster)| {
            ConcurrentPhase::new(
                format!("Upgrade chart on cluster {}", cluster.cluster_ref),
                move |ctx: &RefreshContext| upgrade_chart(ctx, index),
            )
        })
        .collect();

    Pipeline::new("network refresh")
        .show_progress(ctx.settings.behavior.show_progress)
        .phase(build_load_task())
        .phase(Phase::new("Validate node states", check_node_states))
        .phase(Phase::concurrent("Upgrade network chart", upgrades))
        .phase(Phase::new("Check node pods are running", wait_for_refreshed_nodes))
}

/// Re-apply the network chart with the values of the last release
pub async fn refresh(env: &CommandEnv, options: NetworkRefreshOptions) -> Result<PipelineReport> {
    validate_aliases(&options.node_aliases)?;

    let command = format!("network refresh --deployment {}", options.deployment);
    let deployment = options.deployment.clone();
    let mut ctx = env
        .context(&deployment, &command, options)
        .await
        .context("Failed to prepare network refresh")?;

    let pipeline = refresh_pipeline(&ctx);
    let namespace = ctx.namespace.clone();
    let report = run_locked(&env.lease_manager(&ctx), &namespace, &pipeline, &mut ctx, false)
        .await
        .with_context(|| format!("Network refresh failed for deployment '{}'", deployment))?;
    Ok(report)
}
