//! Local (per-user) configuration: who is running solo and which clusters
//! each deployment spans.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::utils::{SoloError, SoloResult};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// A deployment: a namespace spread across one or more clusters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEntry {
    /// Namespace the deployment lives in; defaults to the deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub clusters: Vec<String>,
}

/// Contents of `local-config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    pub user_email_address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solo_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_deployment_name: Option<String>,

    #[serde(default)]
    pub deployments: BTreeMap<String, DeploymentEntry>,

    /// Cluster reference -> kube context
    #[serde(default)]
    pub cluster_refs: BTreeMap<String, String>,
}

impl LocalConfig {
    /// Load and validate the local config. Returns `None` when the file is absent.
    pub fn load(path: &Path) -> SoloResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        let config: LocalConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Load the local config, failing if it does not exist
    pub fn load_required(path: &Path) -> SoloResult<Self> {
        Self::load(path)?.ok_or_else(|| SoloError::LocalConfigMissing {
            path: path.display().to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> SoloResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Structural checks: email shape, every deployment cluster has a context
    pub fn validate(&self) -> SoloResult<()> {
        if !EMAIL_RE.is_match(&self.user_email_address) {
            return Err(SoloError::LocalConfigInvalid(format!(
                "userEmailAddress '{}' is not an email address",
                self.user_email_address
            )));
        }

        for (name, deployment) in &self.deployments {
            if deployment.clusters.is_empty() {
                return Err(SoloError::LocalConfigInvalid(format!(
                    "deployment '{}' has no clusters",
                    name
                )));
            }
            for cluster in &deployment.clusters {
                if !self.cluster_refs.contains_key(cluster) {
                    return Err(SoloError::LocalConfigInvalid(format!(
                        "deployment '{}' references cluster '{}' which has no entry in clusterRefs",
                        name, cluster
                    )));
                }
            }
        }

        if let Some(current) = &self.current_deployment_name
            && !self.deployments.contains_key(current)
        {
            return Err(SoloError::LocalConfigInvalid(format!(
                "currentDeploymentName '{}' is not a known deployment",
                current
            )));
        }

        Ok(())
    }

    pub fn deployment(&self, name: &str) -> SoloResult<&DeploymentEntry> {
        self.deployments.get(name).ok_or_else(|| SoloError::InvalidValue {
            field: "deployment".to_string(),
            value: name.to_string(),
        })
    }

    /// Namespace a deployment targets
    pub fn namespace_of(&self, deployment: &str) -> SoloResult<String> {
        let entry = self.deployment(deployment)?;
        Ok(entry
            .namespace
            .clone()
            .unwrap_or_else(|| deployment.to_string()))
    }

    /// Kube context for a cluster reference
    pub fn context_of(&self, cluster_ref: &str) -> SoloResult<&str> {
        self.cluster_refs
            .get(cluster_ref)
            .map(String::as_str)
            .ok_or_else(|| SoloError::InvalidValue {
                field: "cluster-ref".to_string(),
                value: cluster_ref.to_string(),
            })
    }
}

#[cfg(test)]
pub(crate) fn sample_local_config() -> LocalConfig {
    LocalConfig {
        user_email_address: "john@doe.com".to_string(),
        solo_version: None,
        current_deployment_name: Some("solo".to_string()),
        deployments: BTreeMap::from([(
            "solo".to_string(),
            DeploymentEntry {
                namespace: None,
                clusters: vec!["c1".to_string()],
            },
        )]),
        cluster_refs: BTreeMap::from([("c1".to_string(), "kind-solo".to_string())]),
    }
}
