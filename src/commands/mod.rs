//! Command pipelines for the solo CLI

pub mod deployment;
pub mod explorer;
pub mod network;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{LocalConfig, Settings};
use crate::helm::Helm;
use crate::k8s::{K8s, KubeClient};
use crate::lease::LeaseManager;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::remote_config::{RemoteConfigContext, RemoteConfigManager};
use crate::utils::{SoloError, SoloResult};

/// Opens a Kubernetes handle for a kube context
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, context: &str) -> SoloResult<Arc<dyn K8s>>;
}

/// Connects through the user's kubeconfig
#[derive(Debug, Clone, Default)]
pub struct KubeConnector {
    kubeconfig: Option<PathBuf>,
}

impl KubeConnector {
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, context: &str) -> SoloResult<Arc<dyn K8s>> {
        let client = KubeClient::connect(self.kubeconfig.as_deref(), Some(context)).await?;
        let k8s: Arc<dyn K8s> = Arc::new(client);
        Ok(k8s)
    }
}

/// One cluster of a deployment
#[derive(Clone)]
pub struct ClusterTarget {
    pub cluster_ref: String,
    pub context: String,
    pub k8s: Arc<dyn K8s>,
}

/// Everything a command needs, passed in rather than looked up
pub struct CommandEnv {
    pub settings: Settings,
    pub local_config: Option<LocalConfig>,
    pub helm: Arc<dyn Helm>,
    pub connector: Arc<dyn ClusterConnector>,
}

impl CommandEnv {
    /// Resolve `deployment` against the local config and connect to its clusters.
    ///
    /// The first cluster is primary: it holds the lease and the remote config.
    pub async fn context<O>(
        &self,
        deployment: &str,
        command: &str,
        options: O,
    ) -> SoloResult<CommandContext<O>> {
        let local = self
            .local_config
            .as_ref()
            .ok_or_else(|| SoloError::LocalConfigMissing {
                path: self
                    .settings
                    .local_config_path(None)
                    .display()
                    .to_string(),
            })?;
        let namespace = local.namespace_of(deployment)?;
        let entry = local.deployment(deployment)?;

        let mut clusters = Vec::with_capacity(entry.clusters.len());
        for cluster_ref in &entry.clusters {
            let context = local.context_of(cluster_ref)?.to_string();
            let k8s = self.connector.connect(&context).await?;
            clusters.push(ClusterTarget {
                cluster_ref: cluster_ref.clone(),
                context,
                k8s,
            });
        }
        let primary = clusters
            .first()
            .cloned()
            .ok_or_else(|| SoloError::LocalConfigInvalid(format!(
                "deployment '{}' has no clusters",
                deployment
            )))?;

        Ok(CommandContext {
            deployment: deployment.to_string(),
            namespace: namespace.clone(),
            command: command.to_string(),
            local_config: Some(local.clone()),
            remote: RemoteConfigManager::new(primary.k8s.clone(), namespace),
            primary,
            clusters,
            helm: self.helm.clone(),
            settings: self.settings.clone(),
            options,
        })
    }

    pub fn lease_manager<O>(&self, ctx: &CommandContext<O>) -> LeaseManager {
        LeaseManager::new(ctx.primary.k8s.clone(), self.settings.lease.clone())
    }
}

/// Shared state of a running command; `O` carries command specific options
pub struct CommandContext<O> {
    pub deployment: String,
    pub namespace: String,
    pub command: String,
    pub local_config: Option<LocalConfig>,
    pub primary: ClusterTarget,
    pub clusters: Vec<ClusterTarget>,
    pub remote: RemoteConfigManager,
    pub helm: Arc<dyn Helm>,
    pub settings: Settings,
    pub options: O,
}

impl<O> CommandContext<O> {
    /// Swap the command options for state derived from them
    pub fn map_options<P>(self, f: impl FnOnce(O) -> P) -> CommandContext<P> {
        CommandContext {
            deployment: self.deployment,
            namespace: self.namespace,
            command: self.command,
            local_config: self.local_config,
            primary: self.primary,
            clusters: self.clusters,
            remote: self.remote,
            helm: self.helm,
            settings: self.settings,
            options: f(self.options),
        }
    }
}

impl<O: Send + Sync + 'static> RemoteConfigContext for CommandContext<O> {
    fn remote_config(&self) -> &RemoteConfigManager {
        &self.remote
    }

    fn remote_config_mut(&mut self) -> &mut RemoteConfigManager {
        &mut self.remote
    }

    fn local_config(&self) -> Option<&LocalConfig> {
        self.local_config.as_ref()
    }

    fn deployment(&self) -> &str {
        &self.deployment
    }

    fn command(&self) -> &str {
        &self.command
    }
}

/// Run `pipeline` while holding the namespace lease.
///
/// The lease is released on every exit path. With `namespace_may_vanish`
/// the release only logs failures, since the pipeline may have deleted the
/// namespace the lease lives in.
pub async fn run_locked<C: Send + Sync>(
    lease_manager: &LeaseManager,
    namespace: &str,
    pipeline: &Pipeline<C>,
    ctx: &mut C,
    namespace_may_vanish: bool,
) -> SoloResult<PipelineReport> {
    let lease = lease_manager.create(namespace).await?;
    let guard = lease_manager.acquire(lease).await?;

    info!(pipeline = %pipeline.title(), namespace, "Running under lease");
    let result = pipeline.run_watched(ctx, &guard).await;

    if namespace_may_vanish {
        guard.release_best_effort().await;
    } else if let Err(release_err) = guard.release().await {
        if result.is_ok() {
            return Err(release_err);
        }
        warn!(namespace, error = %release_err, "Failed to release lease after pipeline failure");
    }

    result
}
