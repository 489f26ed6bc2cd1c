//! Creates per-namespace leases and hands out guards for held leases

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::holder::LeaseHolder;
use super::lease::{BackoffPolicy, Lease};
use super::renewal::{RenewalHandle, RenewalService};
use crate::config::settings::LeaseSettings;
use crate::k8s::K8s;
use crate::pipeline::Watchdog;
use crate::utils::{SoloError, SoloResult};

pub struct LeaseManager {
    k8s: Arc<dyn K8s>,
    settings: LeaseSettings,
    holder: LeaseHolder,
}

impl LeaseManager {
    pub fn new(k8s: Arc<dyn K8s>, settings: LeaseSettings) -> Self {
        Self {
            k8s,
            settings,
            holder: LeaseHolder::current(),
        }
    }

    pub fn with_holder(mut self, holder: LeaseHolder) -> Self {
        self.holder = holder;
        self
    }

    /// Bind a lease to `namespace`, creating the namespace when it is missing
    pub async fn create(&self, namespace: &str) -> SoloResult<Lease> {
        if !self.k8s.has_namespace(namespace).await? {
            info!(namespace, "Namespace does not exist, creating it for the lease");
            self.k8s.create_namespace(namespace).await?;

            if !self.k8s.has_namespace(namespace).await? {
                return Err(SoloError::LeaseAcquisition {
                    namespace: namespace.to_string(),
                    reason: "namespace could not be created".to_string(),
                });
            }
        }

        Lease::new(
            self.k8s.clone(),
            namespace,
            self.holder.clone(),
            self.settings.duration_secs,
        )
    }

    /// Acquire `lease` with backoff and keep it renewed until released
    pub async fn acquire(&self, lease: Lease) -> SoloResult<LeaseGuard> {
        lease
            .acquire_with_retry(BackoffPolicy::from(&self.settings))
            .await?;

        let interval = Duration::from_secs(self.settings.renew_interval_secs.max(1));
        let renewal = RenewalService::new(interval).schedule(lease.clone());
        info!(namespace = %lease.namespace(), holder = %lease.holder(), "Lease acquired");

        Ok(LeaseGuard {
            lease,
            renewal: Some(renewal),
        })
    }
}

/// A held lease; renewal runs until the guard is released
pub struct LeaseGuard {
    lease: Lease,
    renewal: Option<RenewalHandle>,
}

impl LeaseGuard {
    pub fn namespace(&self) -> &str {
        self.lease.namespace()
    }

    pub fn is_lost(&self) -> bool {
        self.renewal.as_ref().is_some_and(RenewalHandle::is_lost)
    }

    /// Stop renewal and delete the lease if it is still ours
    pub async fn release(mut self) -> SoloResult<()> {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }
        self.lease.release().await
    }

    /// Release, logging instead of failing. Used after the namespace itself
    /// may have been deleted.
    pub async fn release_best_effort(self) {
        let namespace = self.namespace().to_string();
        if let Err(e) = self.release().await {
            warn!(%namespace, error = %e, "Failed to release lease");
        }
    }
}

impl Watchdog for LeaseGuard {
    fn check(&self) -> SoloResult<()> {
        if self.is_lost() {
            return Err(SoloError::LeaseLost {
                namespace: self.namespace().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeK8s;
    use crate::lease::lease::LEASE_NAME;

    fn settings() -> LeaseSettings {
        LeaseSettings {
            duration_secs: 20,
            renew_interval_secs: 10,
            acquire_attempts: 2,
            backoff_initial_ms: 1,
            backoff_max_ms: 2,
        }
    }

    fn manager(fake: &Arc<FakeK8s>) -> LeaseManager {
        let k8s: Arc<dyn K8s> = fake.clone();
        LeaseManager::new(k8s, settings())
    }

    #[tokio::test]
    async fn test_create_makes_missing_namespace() {
        let fake = Arc::new(FakeK8s::new());
        let lease = manager(&fake).create("fresh").await.unwrap();
        assert_eq!(lease.namespace(), "fresh");
        assert!(fake.has_namespace("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_fails_when_namespace_never_appears() {
        let fake = Arc::new(FakeK8s::new().ignoring_namespace_creates());
        let err = manager(&fake).create("ghost").await.err().unwrap();
        assert!(matches!(err, SoloError::LeaseAcquisition { ref namespace, .. } if namespace == "ghost"));
    }

    #[tokio::test]
    async fn test_guard_release_deletes_lease() {
        let fake = Arc::new(FakeK8s::new().with_namespace("solo"));
        let manager = manager(&fake);
        let lease = manager.create("solo").await.unwrap();

        let guard = manager.acquire(lease).await.unwrap();
        assert!(fake.lease("solo", LEASE_NAME).is_some());
        assert!(guard.check().is_ok());

        guard.release().await.unwrap();
        assert!(fake.lease("solo", LEASE_NAME).is_none());
    }

    #[tokio::test]
    async fn test_second_manager_cannot_acquire() {
        let fake = Arc::new(FakeK8s::new().with_namespace("solo"));
        let first = manager(&fake);
        let guard = first.acquire(first.create("solo").await.unwrap()).await.unwrap();

        let second = manager(&fake);
        let err = second
            .acquire(second.create("solo").await.unwrap())
            .await
            .err()
            .unwrap();
        assert!(err.is_lease_held());

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_best_effort_release_after_namespace_delete() {
        let fake = Arc::new(FakeK8s::new().with_namespace("solo"));
        let manager = manager(&fake);
        let guard = manager
            .acquire(manager.create("solo").await.unwrap())
            .await
            .unwrap();

        fake.delete_namespace("solo").await.unwrap();
        guard.release_best_effort().await;
    }
}
