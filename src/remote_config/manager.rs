//! Load, create and modify the remote config stored in the cluster

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::components::ConsensusNodeState;
use super::model::{RemoteConfig, RemoteConfigMetadata};
use crate::config::LocalConfig;
use crate::k8s::{ConfigMapData, K8s};
use crate::pipeline::{Phase, PhaseFuture};
use crate::utils::{SoloError, SoloResult};

pub const CONFIG_MAP_NAME: &str = "solo-remote-config";
pub const DATA_KEY: &str = "remote-config-data";
pub const TYPE_LABEL: &str = "solo.hedera.com/type";
pub const TYPE_LABEL_VALUE: &str = "remote-config";

/// Owns the in-memory copy of one namespace's remote config.
///
/// All mutation goes through [`RemoteConfigManager::modify`]. Writes are
/// conditional on the resource version seen at load time.
pub struct RemoteConfigManager {
    k8s: Arc<dyn K8s>,
    namespace: String,
    config: Option<RemoteConfig>,
    resource_version: Option<String>,
}

impl RemoteConfigManager {
    pub fn new(k8s: Arc<dyn K8s>, namespace: impl Into<String>) -> Self {
        Self {
            k8s,
            namespace: namespace.into(),
            config: None,
            resource_version: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_loaded(&self) -> bool {
        self.config.is_some()
    }

    pub fn get(&self) -> SoloResult<&RemoteConfig> {
        self.config.as_ref().ok_or(SoloError::RemoteConfigNotLoaded)
    }

    fn config_map(&self, config: &RemoteConfig) -> SoloResult<ConfigMapData> {
        Ok(ConfigMapData {
            name: CONFIG_MAP_NAME.to_string(),
            labels: BTreeMap::from([(TYPE_LABEL.to_string(), TYPE_LABEL_VALUE.to_string())]),
            data: BTreeMap::from([(DATA_KEY.to_string(), config.to_yaml()?)]),
            resource_version: self.resource_version.clone(),
        })
    }

    /// Create the remote config for `deployment` from the local config
    pub async fn create(
        &mut self,
        local_config: Option<&LocalConfig>,
        deployment: &str,
    ) -> SoloResult<()> {
        let local = local_config.ok_or_else(|| SoloError::LocalConfigMissing {
            path: "local configuration".to_string(),
        })?;
        let entry = local.deployment(deployment)?;
        let namespace = local.namespace_of(deployment)?;
        if namespace != self.namespace {
            return Err(SoloError::InvalidValue {
                field: "namespace".to_string(),
                value: format!(
                    "deployment '{}' targets '{}', not '{}'",
                    deployment, namespace, self.namespace
                ),
            });
        }

        if self
            .k8s
            .read_config_map(&self.namespace, CONFIG_MAP_NAME)
            .await?
            .is_some()
        {
            return Err(SoloError::RemoteConfigAlreadyExists {
                namespace: self.namespace.clone(),
            });
        }

        let mut config = RemoteConfig::new(RemoteConfigMetadata {
            namespace: self.namespace.clone(),
            deployment: deployment.to_string(),
            created_at: Utc::now(),
            created_by: local.user_email_address.clone(),
            solo_version: env!("CARGO_PKG_VERSION").to_string(),
        });
        for cluster in &entry.clusters {
            config.add_cluster(cluster, &self.namespace)?;
        }
        config.validate()?;

        let mut data = self.config_map(&config)?;
        data.resource_version = None;
        let stored = match self.k8s.create_config_map(&self.namespace, &data).await {
            Ok(stored) => stored,
            Err(SoloError::Conflict { .. }) => {
                return Err(SoloError::RemoteConfigAlreadyExists {
                    namespace: self.namespace.clone(),
                });
            }
            Err(e) => return Err(e),
        };

        info!(namespace = %self.namespace, deployment, clusters = config.clusters.len(), "Remote config created");
        self.resource_version = stored.resource_version;
        self.config = Some(config);
        Ok(())
    }

    /// Read the remote config. Returns `false` when none exists yet.
    pub async fn load(&mut self) -> SoloResult<bool> {
        let found = match self
            .k8s
            .read_config_map(&self.namespace, CONFIG_MAP_NAME)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                error!(namespace = %self.namespace, error = %e, "Failed to read remote config");
                return Err(e);
            }
        };

        let Some(config_map) = found else {
            debug!(namespace = %self.namespace, "No remote config found");
            return Ok(false);
        };

        let yaml = config_map.data.get(DATA_KEY).ok_or_else(|| {
            SoloError::RemoteConfigInvalid(format!("ConfigMap has no '{}' key", DATA_KEY))
        })?;
        let config = RemoteConfig::from_yaml(yaml)?;

        debug!(
            namespace = %self.namespace,
            components = config.components.len(),
            "Remote config loaded"
        );
        self.resource_version = config_map.resource_version;
        self.config = Some(config);
        Ok(true)
    }

    /// Load and record `command` in the command history
    pub async fn load_for_command(&mut self, command: &str) -> SoloResult<()> {
        if !self.load().await? {
            return Err(SoloError::RemoteConfigNotFound {
                namespace: self.namespace.clone(),
            });
        }

        let command = command.to_string();
        self.modify(move |config| {
            config.add_command_to_history(&command);
            Ok(())
        })
        .await
    }

    /// Apply `mutate` to a working copy, validate it, write it, then keep it.
    ///
    /// The working copy may not touch the metadata or drop and remap
    /// clusters. Nothing is written and the loaded copy is untouched if
    /// `mutate` or validation fails.
    pub async fn modify<F>(&mut self, mutate: F) -> SoloResult<()>
    where
        F: FnOnce(&mut RemoteConfig) -> SoloResult<()> + Send,
    {
        let current = self.get()?;
        let mut working = current.clone();
        mutate(&mut working)?;
        working.validate_update_of(current)?;
        working.validate()?;

        let data = self.config_map(&working)?;
        let stored = match self.k8s.replace_config_map(&self.namespace, &data).await {
            Ok(stored) => stored,
            Err(SoloError::Conflict { .. }) => {
                return Err(SoloError::RemoteConfigConflict {
                    namespace: self.namespace.clone(),
                });
            }
            Err(e) => return Err(e),
        };

        self.resource_version = stored.resource_version;
        self.config = Some(working);
        Ok(())
    }

    /// Check a consensus node's state against accepted and excluded sets.
    /// An empty accepted set accepts every state.
    pub fn ensure_node_state(
        &self,
        node: &str,
        accepted: &[ConsensusNodeState],
        excluded: &[ConsensusNodeState],
    ) -> SoloResult<()> {
        let state = self.get()?.components.consensus_node(node)?.state;

        if !accepted.is_empty() && !accepted.contains(&state) {
            return Err(SoloError::NodeStateNotAccepted {
                node: node.to_string(),
                accepted: join_states(accepted),
                actual: state.to_string(),
            });
        }
        if excluded.contains(&state) {
            return Err(SoloError::NodeStateExcluded {
                node: node.to_string(),
                excluded: join_states(excluded),
                actual: state.to_string(),
            });
        }
        Ok(())
    }

    /// Empty the component inventory
    pub async fn clear_components(&mut self) -> SoloResult<()> {
        info!(namespace = %self.namespace, "Clearing remote config components");
        self.modify(|config| {
            config.components.clear();
            Ok(())
        })
        .await
    }
}

fn join_states(states: &[ConsensusNodeState]) -> String {
    states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// What a command context exposes to the remote config phases
pub trait RemoteConfigContext: Send + Sync + 'static {
    fn remote_config(&self) -> &RemoteConfigManager;

    fn remote_config_mut(&mut self) -> &mut RemoteConfigManager;

    fn local_config(&self) -> Option<&LocalConfig>;

    fn deployment(&self) -> &str;

    /// Command line recorded in the command history
    fn command(&self) -> &str;
}

fn probe<C: RemoteConfigContext>(ctx: &mut C) -> PhaseFuture<'_> {
    Box::pin(async move { ctx.remote_config_mut().load().await.map(|_| ()) })
}

fn create<C: RemoteConfigContext>(ctx: &mut C) -> PhaseFuture<'_> {
    Box::pin(async move {
        let local = ctx.local_config().cloned();
        let deployment = ctx.deployment().to_string();
        ctx.remote_config_mut()
            .create(local.as_ref(), &deployment)
            .await
    })
}

fn load<C: RemoteConfigContext>(ctx: &mut C) -> PhaseFuture<'_> {
    Box::pin(async move {
        let command = ctx.command().to_string();
        ctx.remote_config_mut().load_for_command(&command).await
    })
}

/// Load the remote config if there is one; never fails on absence
pub fn build_probe_task<C: RemoteConfigContext>() -> Phase<C> {
    Phase::new("Check for existing remote config", probe::<C>)
}

/// Create the remote config; skipped when one was already loaded
pub fn build_create_task<C: RemoteConfigContext>() -> Phase<C> {
    Phase::new("Create remote config", create::<C>)
        .skip_if(|ctx: &C| ctx.remote_config().is_loaded())
}

/// Load the remote config for the running command
pub fn build_load_task<C: RemoteConfigContext>() -> Phase<C> {
    Phase::new("Load remote config", load::<C>)
}
