//! Single-namespace mutual exclusion on a coordination.k8s.io Lease

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::holder::LeaseHolder;
use crate::config::settings::LeaseSettings;
use crate::k8s::{K8s, LeaseRecord};
use crate::utils::{SoloError, SoloResult};

/// Name of the Lease object in every namespace solo manages
pub const LEASE_NAME: &str = "solo-lease";

/// Retry schedule for [`Lease::acquire_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (starting at 0)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl From<&LeaseSettings> for BackoffPolicy {
    fn from(settings: &LeaseSettings) -> Self {
        Self {
            attempts: settings.acquire_attempts.max(1),
            initial: Duration::from_millis(settings.backoff_initial_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
        }
    }
}

/// A lease bound to one namespace and one holder
#[derive(Clone)]
pub struct Lease {
    k8s: Arc<dyn K8s>,
    namespace: String,
    holder: LeaseHolder,
    identity: String,
    duration_secs: i32,
}

impl Lease {
    pub fn new(
        k8s: Arc<dyn K8s>,
        namespace: impl Into<String>,
        holder: LeaseHolder,
        duration_secs: i32,
    ) -> SoloResult<Self> {
        let identity = holder.to_json()?;
        Ok(Self {
            k8s,
            namespace: namespace.into(),
            holder,
            identity,
            duration_secs,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn holder(&self) -> &LeaseHolder {
        &self.holder
    }

    fn is_ours(&self, record: &LeaseRecord) -> bool {
        let Some(identity) = record.holder_identity.as_deref() else {
            return false;
        };
        match LeaseHolder::from_json(identity) {
            Some(holder) => holder == self.holder,
            None => identity == self.identity,
        }
    }

    fn held_by(&self, record: &LeaseRecord) -> SoloError {
        SoloError::LeaseAlreadyHeld {
            namespace: self.namespace.clone(),
            holder: record
                .holder_identity
                .as_deref()
                .map(LeaseHolder::describe)
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// A lost optimistic-concurrency race means someone else got there first
    fn conflict_as_held(&self, err: SoloError) -> SoloError {
        match err {
            SoloError::Conflict { .. } => SoloError::LeaseAlreadyHeld {
                namespace: self.namespace.clone(),
                holder: "a concurrent solo process".to_string(),
            },
            other => other,
        }
    }

    /// Try once to take the lease.
    ///
    /// Fails with [`SoloError::LeaseAlreadyHeld`] when a live holder other
    /// than this process owns it.
    pub async fn acquire(&self) -> SoloResult<()> {
        let now = Utc::now();

        let Some(existing) = self.k8s.read_lease(&self.namespace, LEASE_NAME).await? else {
            let record = LeaseRecord {
                holder_identity: Some(self.identity.clone()),
                duration_secs: self.duration_secs,
                acquire_time: Some(now),
                renew_time: Some(now),
                transitions: 0,
                resource_version: None,
            };
            self.k8s
                .create_lease(&self.namespace, LEASE_NAME, &record)
                .await
                .map_err(|e| self.conflict_as_held(e))?;
            info!(namespace = %self.namespace, holder = %self.holder, "Lease created");
            return Ok(());
        };

        if self.is_ours(&existing) {
            let mut renewed = existing;
            renewed.renew_time = Some(now);
            renewed.duration_secs = self.duration_secs;
            self.k8s
                .replace_lease(&self.namespace, LEASE_NAME, &renewed)
                .await
                .map_err(|e| self.conflict_as_held(e))?;
            debug!(namespace = %self.namespace, "Lease already ours, renewed");
            return Ok(());
        }

        if existing.has_holder() && !existing.is_expired(now) {
            return Err(self.held_by(&existing));
        }

        let previous = existing.holder_identity.clone();
        let mut taken = existing;
        if taken.has_holder() {
            taken.transitions += 1;
        }
        taken.holder_identity = Some(self.identity.clone());
        taken.duration_secs = self.duration_secs;
        taken.acquire_time = Some(now);
        taken.renew_time = Some(now);

        self.k8s
            .replace_lease(&self.namespace, LEASE_NAME, &taken)
            .await
            .map_err(|e| self.conflict_as_held(e))?;
        info!(
            namespace = %self.namespace,
            previous = %previous.as_deref().map(LeaseHolder::describe).unwrap_or_default(),
            transitions = taken.transitions,
            "Took over expired lease"
        );
        Ok(())
    }

    /// Acquire, retrying while the lease is held by someone else
    pub async fn acquire_with_retry(&self, policy: BackoffPolicy) -> SoloResult<()> {
        let mut retry = 0;
        loop {
            match self.acquire().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_lease_held() && retry + 1 < policy.attempts => {
                    let delay = policy.delay(retry);
                    warn!(
                        namespace = %self.namespace,
                        attempt = retry + 1,
                        max = policy.attempts,
                        ?delay,
                        "{}, retrying",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bump the renew time; [`SoloError::LeaseLost`] if the lease is no longer ours
    pub async fn renew(&self) -> SoloResult<()> {
        let lost = || SoloError::LeaseLost {
            namespace: self.namespace.clone(),
        };

        let existing = self
            .k8s
            .read_lease(&self.namespace, LEASE_NAME)
            .await?
            .ok_or_else(lost)?;
        if !self.is_ours(&existing) {
            return Err(lost());
        }

        let mut renewed = existing;
        renewed.renew_time = Some(Utc::now());
        match self
            .k8s
            .replace_lease(&self.namespace, LEASE_NAME, &renewed)
            .await
        {
            Ok(_) => {
                debug!(namespace = %self.namespace, "Lease renewed");
                Ok(())
            }
            Err(SoloError::Conflict { kind, name }) => {
                // Only a different holder (or no lease at all) means it is gone
                match self.k8s.read_lease(&self.namespace, LEASE_NAME).await? {
                    Some(current) if self.is_ours(&current) => {
                        debug!(namespace = %self.namespace, "Lease renew raced a concurrent write");
                        Err(SoloError::Conflict { kind, name })
                    }
                    _ => Err(lost()),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the lease if this process holds it; a no-op otherwise
    pub async fn release(&self) -> SoloResult<()> {
        match self.k8s.read_lease(&self.namespace, LEASE_NAME).await? {
            Some(existing) if self.is_ours(&existing) => {
                match self
                    .k8s
                    .delete_lease(
                        &self.namespace,
                        LEASE_NAME,
                        existing.resource_version.as_deref(),
                    )
                    .await
                {
                    Ok(()) => info!(namespace = %self.namespace, "Lease released"),
                    Err(SoloError::Conflict { .. }) => {
                        debug!(namespace = %self.namespace, "Lease changed hands before release, leaving it")
                    }
                    Err(e) => return Err(e),
                }
            }
            Some(_) => debug!(namespace = %self.namespace, "Lease held by someone else, not releasing"),
            None => debug!(namespace = %self.namespace, "No lease to release"),
        }
        Ok(())
    }
}
