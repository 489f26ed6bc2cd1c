//! Recording [`Helm`] for tests

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use super::{ChartRelease, Helm};
use crate::utils::{SoloError, SoloResult};

#[derive(Debug, Clone, PartialEq)]
pub enum HelmCall {
    Install { context: String, release: String },
    Upgrade {
        context: String,
        release: String,
        values: String,
        reuse_values: bool,
    },
    Uninstall { context: String, release: String },
}

#[derive(Default)]
struct State {
    /// (context, namespace, release)
    installed: BTreeSet<(String, String, String)>,
    calls: Vec<HelmCall>,
    failing_release: Option<String>,
}

#[derive(Default)]
pub struct FakeHelm {
    state: Mutex<State>,
    delay: Duration,
}

impl FakeHelm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every install, upgrade and uninstall sleeps this long first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Operations on `release` fail with a helm error
    pub fn failing_on(self, release: &str) -> Self {
        self.lock().failing_release = Some(release.to_string());
        self
    }

    pub fn mark_installed(&self, context: &str, namespace: &str, release: &str) {
        self.lock().installed.insert((
            context.to_string(),
            namespace.to_string(),
            release.to_string(),
        ));
    }

    pub fn calls(&self) -> Vec<HelmCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake helm state poisoned")
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn check_failure(&self, command: &str, release: &str) -> SoloResult<()> {
        if self.lock().failing_release.as_deref() == Some(release) {
            return Err(SoloError::Helm {
                command: command.to_string(),
                release: release.to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Helm for FakeHelm {
    async fn install(&self, context: &str, release: &ChartRelease) -> SoloResult<()> {
        self.pause().await;
        self.check_failure("install", &release.release)?;
        let mut state = self.lock();
        state.calls.push(HelmCall::Install {
            context: context.to_string(),
            release: release.release.clone(),
        });
        state.installed.insert((
            context.to_string(),
            release.namespace.clone(),
            release.release.clone(),
        ));
        Ok(())
    }

    async fn upgrade(
        &self,
        context: &str,
        release: &ChartRelease,
        reuse_values: bool,
    ) -> SoloResult<()> {
        self.pause().await;
        self.check_failure("upgrade", &release.release)?;
        self.lock().calls.push(HelmCall::Upgrade {
            context: context.to_string(),
            release: release.release.clone(),
            values: release.values.clone(),
            reuse_values,
        });
        Ok(())
    }

    async fn uninstall(&self, context: &str, namespace: &str, release: &str) -> SoloResult<()> {
        self.pause().await;
        self.check_failure("uninstall", release)?;
        let mut state = self.lock();
        state.calls.push(HelmCall::Uninstall {
            context: context.to_string(),
            release: release.to_string(),
        });
        state.installed.remove(&(
            context.to_string(),
            namespace.to_string(),
            release.to_string(),
        ));
        Ok(())
    }

    async fn is_chart_installed(
        &self,
        context: &str,
        namespace: &str,
        release_prefix: &str,
    ) -> SoloResult<bool> {
        Ok(self
            .lock()
            .installed
            .iter()
            .any(|(ctx, ns, release)| {
                ctx == context && ns == namespace && release.starts_with(release_prefix)
            }))
    }
}
