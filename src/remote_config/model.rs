//! The remote config document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::components::ComponentsDataWrapper;
use crate::utils::{SoloError, SoloResult};

pub const SCHEMA_VERSION: &str = "v1";

/// Oldest entries are evicted beyond this many
pub const COMMAND_HISTORY_CAP: usize = 50;

/// Written once when the remote config is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigMetadata {
    pub namespace: String,
    pub deployment: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub solo_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub schema_version: String,
    pub metadata: RemoteConfigMetadata,
    /// Cluster reference -> namespace
    #[serde(default)]
    pub clusters: BTreeMap<String, String>,
    #[serde(default)]
    pub components: ComponentsDataWrapper,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_command: Option<String>,
    #[serde(default)]
    pub command_history: Vec<String>,
}

impl RemoteConfig {
    pub fn new(metadata: RemoteConfigMetadata) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            metadata,
            clusters: BTreeMap::new(),
            components: ComponentsDataWrapper::new(),
            last_executed_command: None,
            command_history: Vec::new(),
        }
    }

    /// Register a cluster. Clusters are never removed or remapped.
    pub fn add_cluster(&mut self, cluster_ref: &str, namespace: &str) -> SoloResult<()> {
        match self.clusters.get(cluster_ref) {
            Some(existing) if existing == namespace => Ok(()),
            Some(existing) => Err(SoloError::RemoteConfigInvalid(format!(
                "cluster '{}' is already mapped to namespace '{}', not '{}'",
                cluster_ref, existing, namespace
            ))),
            None => {
                self.clusters
                    .insert(cluster_ref.to_string(), namespace.to_string());
                Ok(())
            }
        }
    }

    /// Record `command` as the latest one run against this deployment
    pub fn add_command_to_history(&mut self, command: &str) {
        self.last_executed_command = Some(command.to_string());
        self.command_history.push(command.to_string());
        if self.command_history.len() > COMMAND_HISTORY_CAP {
            let excess = self.command_history.len() - COMMAND_HISTORY_CAP;
            self.command_history.drain(..excess);
        }
    }

    pub fn validate(&self) -> SoloResult<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(SoloError::RemoteConfigInvalid(format!(
                "unsupported schema version '{}', expected '{}'",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        if self.clusters.is_empty() {
            return Err(SoloError::RemoteConfigInvalid(
                "no clusters registered".to_string(),
            ));
        }
        for component in self.components.iter() {
            if !self.clusters.contains_key(component.cluster()) {
                return Err(SoloError::RemoteConfigInvalid(format!(
                    "component '{}' references unknown cluster '{}'",
                    component.name(),
                    component.cluster()
                )));
            }
        }
        self.components.validate()
    }

    /// Check that this document may replace `previous`: metadata is fixed
    /// at creation and clusters are only ever added.
    pub fn validate_update_of(&self, previous: &RemoteConfig) -> SoloResult<()> {
        if self.metadata != previous.metadata {
            return Err(SoloError::RemoteConfigInvalid(
                "metadata cannot change after creation".to_string(),
            ));
        }
        for (cluster_ref, namespace) in &previous.clusters {
            match self.clusters.get(cluster_ref) {
                Some(current) if current == namespace => {}
                Some(current) => {
                    return Err(SoloError::RemoteConfigInvalid(format!(
                        "cluster '{}' cannot be remapped from namespace '{}' to '{}'",
                        cluster_ref, namespace, current
                    )));
                }
                None => {
                    return Err(SoloError::RemoteConfigInvalid(format!(
                        "cluster '{}' cannot be removed",
                        cluster_ref
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> SoloResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> SoloResult<Self> {
        let config: RemoteConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SoloError::RemoteConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) fn sample_remote_config() -> RemoteConfig {
    let mut config = RemoteConfig::new(RemoteConfigMetadata {
        namespace: "solo".to_string(),
        deployment: "solo".to_string(),
        created_at: Utc::now(),
        created_by: "john@doe.com".to_string(),
        solo_version: "0.1.0".to_string(),
    });
    config.clusters.insert("c1".to_string(), "solo".to_string());
    config
}
