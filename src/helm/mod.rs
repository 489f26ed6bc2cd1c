//! Helm chart operations
//!
//! Charts are managed through the `helm` binary. Every call names the kube
//! context explicitly so installs across several clusters can run side by side.

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::utils::{SoloError, SoloResult};

/// A chart release to install or upgrade
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRelease {
    pub release: String,
    pub chart: String,
    pub version: String,
    pub namespace: String,
    /// Extra helm arguments, e.g. `--set a=b --values file.yaml`
    pub values: String,
}

impl ChartRelease {
    pub fn new(
        release: impl Into<String>,
        chart: impl Into<String>,
        version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            release: release.into(),
            chart: chart.into(),
            version: version.into(),
            namespace: namespace.into(),
            values: String::new(),
        }
    }

    pub fn with_values(mut self, values: impl Into<String>) -> Self {
        self.values = values.into();
        self
    }

    fn value_args(&self) -> SoloResult<Vec<String>> {
        shell_words::split(&self.values).map_err(|e| SoloError::InvalidValue {
            field: "values".to_string(),
            value: format!("{} ({})", self.values, e),
        })
    }
}

#[async_trait]
pub trait Helm: Send + Sync {
    async fn install(&self, context: &str, release: &ChartRelease) -> SoloResult<()>;

    /// Upgrade an installed release; `reuse_values` keeps the values of the last release
    async fn upgrade(
        &self,
        context: &str,
        release: &ChartRelease,
        reuse_values: bool,
    ) -> SoloResult<()>;

    async fn uninstall(&self, context: &str, namespace: &str, release: &str) -> SoloResult<()>;

    /// Whether a release whose name starts with `release_prefix` is installed
    async fn is_chart_installed(
        &self,
        context: &str,
        namespace: &str,
        release_prefix: &str,
    ) -> SoloResult<bool>;
}

/// [`Helm`] backed by the `helm` binary
#[derive(Debug, Clone, Default)]
pub struct HelmCli {
    kubeconfig: Option<PathBuf>,
}

impl HelmCli {
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }

    async fn run(&self, context: &str, release: &str, args: &[String]) -> SoloResult<String> {
        let mut cmd = Command::new("helm");
        if let Some(kc) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kc);
        }
        cmd.args(args).args(["--kube-context", context]);

        debug!(context, args = ?args, "Running helm");
        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(SoloError::Helm {
                command: args.first().cloned().unwrap_or_default(),
                release: release.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

#[async_trait]
impl Helm for HelmCli {
    async fn install(&self, context: &str, release: &ChartRelease) -> SoloResult<()> {
        info!(release = %release.release, chart = %release.chart, context, "Installing chart");
        let mut args = strings(&[
            "install",
            &release.release,
            &release.chart,
            "--version",
            &release.version,
            "--namespace",
            &release.namespace,
            "--create-namespace",
        ]);
        args.extend(release.value_args()?);
        self.run(context, &release.release, &args).await?;
        Ok(())
    }

    async fn upgrade(
        &self,
        context: &str,
        release: &ChartRelease,
        reuse_values: bool,
    ) -> SoloResult<()> {
        info!(release = %release.release, chart = %release.chart, context, "Upgrading chart");
        let mut args = strings(&[
            "upgrade",
            &release.release,
            &release.chart,
            "--version",
            &release.version,
            "--namespace",
            &release.namespace,
        ]);
        if reuse_values {
            args.push("--reuse-values".to_string());
        }
        args.extend(release.value_args()?);
        self.run(context, &release.release, &args).await?;
        Ok(())
    }

    async fn uninstall(&self, context: &str, namespace: &str, release: &str) -> SoloResult<()> {
        info!(release, namespace, context, "Uninstalling chart");
        let args = strings(&["uninstall", release, "--namespace", namespace]);
        self.run(context, release, &args).await?;
        Ok(())
    }

    async fn is_chart_installed(
        &self,
        context: &str,
        namespace: &str,
        release_prefix: &str,
    ) -> SoloResult<bool> {
        let args = strings(&["list", "--namespace", namespace, "--short"]);
        let stdout = self.run(context, release_prefix, &args).await?;
        Ok(has_release(&stdout, release_prefix))
    }
}

/// Prefix match over `helm list --short` output
fn has_release(list_output: &str, release_prefix: &str) -> bool {
    list_output
        .lines()
        .map(str::trim)
        .any(|name| !name.is_empty() && name.starts_with(release_prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_args_are_shell_split() {
        let release = ChartRelease::new("solo-deployment", "chart", "0.44.0", "solo")
            .with_values("--set a=b --set 'name=two words' --values /tmp/x.yaml");
        assert_eq!(
            release.value_args().unwrap(),
            vec![
                "--set",
                "a=b",
                "--set",
                "name=two words",
                "--values",
                "/tmp/x.yaml"
            ]
        );
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        let release =
            ChartRelease::new("r", "c", "1", "ns").with_values("--set 'unterminated");
        assert!(matches!(
            release.value_args(),
            Err(SoloError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_release_prefix_match() {
        let output = "solo-deployment\nhedera-explorer-1\n";
        assert!(has_release(output, "solo-deployment"));
        assert!(has_release(output, "hedera-explorer"));
        assert!(!has_release(output, "relay"));
        assert!(!has_release("", ""));
    }
}
