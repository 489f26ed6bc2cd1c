//! Configuration file support for solo

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::PollPolicy;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub lease: LeaseSettings,

    #[serde(default)]
    pub waits: WaitSettings,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub charts: Charts,

    #[serde(default)]
    pub behavior: Behavior,
}

/// Default values for common operations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Defaults {
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// Optional path to the local configuration file.
    /// If not set, ~/.solo/local-config.yaml is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_config_path: Option<String>,

    /// Optional kubeconfig path; the standard lookup applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<String>,
}

/// Lease timing
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LeaseSettings {
    #[serde(default = "default_lease_duration_secs")]
    pub duration_secs: i32,

    #[serde(default = "default_renew_interval_secs")]
    pub renew_interval_secs: u64,

    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Readiness polling
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WaitSettings {
    #[serde(default = "default_pod_max_attempts")]
    pub pod_max_attempts: u32,

    #[serde(default = "default_pod_delay_ms")]
    pub pod_delay_ms: u64,
}

/// Deadlines for destructive operations
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Timeouts {
    #[serde(default = "default_destroy_timeout_secs")]
    pub destroy_secs: u64,
}

/// A chart and the release it is installed as
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChartSettings {
    pub release: String,
    pub chart: String,
    pub version: String,
}

/// Chart coordinates
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Charts {
    #[serde(default = "default_deployment_chart")]
    pub deployment: ChartSettings,

    #[serde(default = "default_explorer_chart")]
    pub explorer: ChartSettings,
}

/// Behavior settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Behavior {
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

// Default value functions
fn default_deployment() -> String {
    "solo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_lease_duration_secs() -> i32 {
    20
}

fn default_renew_interval_secs() -> u64 {
    10
}

fn default_acquire_attempts() -> u32 {
    10
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_pod_max_attempts() -> u32 {
    300
}

fn default_pod_delay_ms() -> u64 {
    2_000
}

fn default_destroy_timeout_secs() -> u64 {
    120
}

fn default_deployment_chart() -> ChartSettings {
    ChartSettings {
        release: "solo-deployment".to_string(),
        chart: "oci://ghcr.io/hashgraph/solo-charts/solo-deployment".to_string(),
        version: "0.44.0".to_string(),
    }
}

fn default_explorer_chart() -> ChartSettings {
    ChartSettings {
        release: "hedera-explorer".to_string(),
        chart: "oci://ghcr.io/hashgraph/hedera-mirror-node-explorer/hedera-explorer-chart"
            .to_string(),
        version: "24.12.1".to_string(),
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            deployment: default_deployment(),
            local_config_path: None,
            kubeconfig_path: None,
        }
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            duration_secs: default_lease_duration_secs(),
            renew_interval_secs: default_renew_interval_secs(),
            acquire_attempts: default_acquire_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            pod_max_attempts: default_pod_max_attempts(),
            pod_delay_ms: default_pod_delay_ms(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            destroy_secs: default_destroy_timeout_secs(),
        }
    }
}

impl Default for Charts {
    fn default() -> Self {
        Self {
            deployment: default_deployment_chart(),
            explorer: default_explorer_chart(),
        }
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            show_progress: default_true(),
        }
    }
}

impl WaitSettings {
    /// Polling policy for pod readiness checks
    pub fn pod_policy(&self) -> PollPolicy {
        PollPolicy::new(self.pod_max_attempts, Duration::from_millis(self.pod_delay_ms))
    }
}

impl LeaseSettings {
    /// The lease must outlive at least one renewal interval, or it can
    /// expire between renewals and be taken over mid-command.
    pub fn validate(&self) -> Result<()> {
        if self.duration_secs <= 0 {
            bail!(
                "lease.duration_secs must be positive, got {}",
                self.duration_secs
            );
        }
        if self.renew_interval_secs >= self.duration_secs as u64 {
            bail!(
                "lease.renew_interval_secs ({}) must be shorter than lease.duration_secs ({})",
                self.renew_interval_secs,
                self.duration_secs
            );
        }
        Ok(())
    }
}

impl Timeouts {
    pub fn destroy(&self) -> Duration {
        Duration::from_secs(self.destroy_secs)
    }
}

impl Settings {
    /// Load settings from an explicit file, the standard locations, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        settings
            .lease
            .validate()
            .with_context(|| format!("Invalid lease settings in {}", path.display()))?;

        Ok(settings)
    }

    /// Find config file in standard locations
    /// Priority:
    /// 1. .solo.toml in current directory
    /// 2. ~/.config/solo/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".solo.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("solo").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Resolve the local config path: flag > settings > ~/.solo/local-config.yaml
    pub fn local_config_path(&self, flag: Option<&Path>) -> PathBuf {
        if let Some(path) = flag {
            return path.to_path_buf();
        }
        if let Some(path) = &self.defaults.local_config_path {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".solo")
            .join("local-config.yaml")
    }

    /// Generate example config file content
    pub fn example_config() -> Result<String> {
        let header = "# solo configuration file\n\
                      # Place this file at ~/.config/solo/config.toml or .solo.toml in your project\n\n";
        let body = toml::to_string_pretty(&Settings::default())
            .context("Failed to serialize settings")?;
        Ok(format!("{}{}", header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.defaults.deployment, "solo");
        assert_eq!(settings.lease.duration_secs, 20);
        assert_eq!(settings.charts.deployment.release, "solo-deployment");
        assert!(settings.behavior.show_progress);
    }

    #[test]
    fn test_settings_deserialization() {
        let toml_str = r#"
[defaults]
deployment = "testnet"

[lease]
duration_secs = 15
renew_interval_secs = 5
acquire_attempts = 2

[waits]
pod_delay_ms = 10

[behavior]
show_progress = false
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.defaults.deployment, "testnet");
        assert_eq!(settings.lease.duration_secs, 15);
        assert_eq!(settings.lease.acquire_attempts, 2);
        assert_eq!(settings.lease.renew_interval_secs, 5);
        assert!(settings.lease.validate().is_ok());
        assert_eq!(settings.waits.pod_policy().delay, Duration::from_millis(10));
        assert!(!settings.behavior.show_progress);
        assert_eq!(settings.charts.explorer.release, "hedera-explorer");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"[timeouts]\ndestroy_secs = 7\n").unwrap();

        let settings = Settings::load(Some(temp.path())).unwrap();
        assert_eq!(settings.timeouts.destroy(), Duration::from_secs(7));
    }

    #[test]
    fn test_lease_shorter_than_renewal_is_rejected() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"[lease]\nduration_secs = 5\n").unwrap();

        let err = Settings::load(Some(temp.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("must be shorter than lease.duration_secs"));

        let mut lease = Settings::default().lease;
        assert!(lease.validate().is_ok());
        lease.renew_interval_secs = lease.duration_secs as u64;
        assert!(lease.validate().is_err());
        lease.duration_secs = 0;
        assert!(lease.validate().is_err());
    }

    #[test]
    fn test_local_config_path_priority() {
        let mut settings = Settings::default();
        settings.defaults.local_config_path = Some("/tmp/from-settings.yaml".to_string());

        assert_eq!(
            settings.local_config_path(Some(Path::new("/tmp/flag.yaml"))),
            PathBuf::from("/tmp/flag.yaml")
        );
        assert_eq!(
            settings.local_config_path(None),
            PathBuf::from("/tmp/from-settings.yaml")
        );
    }

    #[test]
    fn test_example_config() {
        let example = Settings::example_config().unwrap();
        assert!(example.contains("solo configuration"));
        assert!(example.contains("[lease]"));
        assert!(example.contains("[charts.deployment]"));
    }
}
