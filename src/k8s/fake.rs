//! In-memory [`K8s`] used by unit tests

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::client::{ConfigMapData, K8s, LeaseRecord, PodSummary};
use crate::utils::{SoloError, SoloResult};

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    config_maps: BTreeMap<(String, String), ConfigMapData>,
    leases: BTreeMap<(String, String), LeaseRecord>,
    /// namespace -> pods (labels are matched with a simple subset check)
    pods: BTreeMap<String, Vec<(Vec<String>, PodSummary)>>,
    pvcs: BTreeMap<String, usize>,
    secrets: BTreeMap<String, usize>,
    next_version: u64,
    config_map_writes: usize,
    namespace_deletes: Vec<String>,
    ignore_namespace_create: bool,
    failing_lease_reads: usize,
    conflicting_lease_replaces: usize,
    /// Written just before the next lease replace or delete is applied
    takeover_before_write: Option<LeaseRecord>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn apply_takeover(&mut self, key: &(String, String)) {
        if let Some(mut takeover) = self.takeover_before_write.take() {
            takeover.resource_version = Some(self.bump());
            self.leases.insert(key.clone(), takeover);
        }
    }
}

#[derive(Default)]
pub struct FakeK8s {
    state: Mutex<State>,
}

impl FakeK8s {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        self.lock().namespaces.insert(namespace.to_string());
        self
    }

    /// Simulate an API server that accepts namespace creates but never persists them
    pub fn ignoring_namespace_creates(self) -> Self {
        self.lock().ignore_namespace_create = true;
        self
    }

    pub fn add_pod(&self, namespace: &str, labels: &[&str], name: &str, phase: &str, ready: bool) {
        self.lock()
            .pods
            .entry(namespace.to_string())
            .or_default()
            .push((
                labels.iter().map(|l| l.to_string()).collect(),
                PodSummary {
                    name: name.to_string(),
                    phase: phase.to_string(),
                    ready,
                },
            ));
    }

    pub fn set_pvcs(&self, namespace: &str, count: usize) {
        self.lock().pvcs.insert(namespace.to_string(), count);
    }

    pub fn set_secrets(&self, namespace: &str, count: usize) {
        self.lock().secrets.insert(namespace.to_string(), count);
    }

    pub fn config_map_writes(&self) -> usize {
        self.lock().config_map_writes
    }

    pub fn namespace_deletes(&self) -> Vec<String> {
        self.lock().namespace_deletes.clone()
    }

    pub fn lease(&self, namespace: &str, name: &str) -> Option<LeaseRecord> {
        self.lock()
            .leases
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Overwrite a lease as if another process wrote it
    pub fn put_lease(&self, namespace: &str, name: &str, mut lease: LeaseRecord) {
        let mut state = self.lock();
        lease.resource_version = Some(state.bump());
        state
            .leases
            .insert((namespace.to_string(), name.to_string()), lease);
    }

    /// Overwrite a ConfigMap as if another process wrote it
    pub fn put_config_map(&self, namespace: &str, mut config_map: ConfigMapData) {
        let mut state = self.lock();
        config_map.resource_version = Some(state.bump());
        state
            .config_maps
            .insert((namespace.to_string(), config_map.name.clone()), config_map);
    }

    /// Make the next `n` lease reads fail with an I/O error
    pub fn fail_next_lease_reads(&self, n: usize) {
        self.lock().failing_lease_reads = n;
    }

    /// Make the next `n` lease replaces report a conflict without writing
    pub fn conflict_next_lease_replaces(&self, n: usize) {
        self.lock().conflicting_lease_replaces = n;
    }

    /// Overwrite the lease right before the next replace or delete reaches
    /// it, as if another process took it over in between
    pub fn take_over_before_next_write(&self, lease: LeaseRecord) {
        self.lock().takeover_before_write = Some(lease);
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMapData> {
        self.lock()
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake k8s state poisoned")
    }
}

fn conflict(kind: &str, name: &str) -> SoloError {
    SoloError::Conflict {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl K8s for FakeK8s {
    async fn has_namespace(&self, namespace: &str) -> SoloResult<bool> {
        Ok(self.lock().namespaces.contains(namespace))
    }

    async fn create_namespace(&self, namespace: &str) -> SoloResult<()> {
        let mut state = self.lock();
        if !state.ignore_namespace_create {
            state.namespaces.insert(namespace.to_string());
        }
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> SoloResult<()> {
        let mut state = self.lock();
        state.namespaces.remove(namespace);
        state.namespace_deletes.push(namespace.to_string());
        state.config_maps.retain(|(ns, _), _| ns != namespace);
        state.leases.retain(|(ns, _), _| ns != namespace);
        state.pods.remove(namespace);
        Ok(())
    }

    async fn read_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> SoloResult<Option<ConfigMapData>> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapData,
    ) -> SoloResult<ConfigMapData> {
        let mut state = self.lock();
        let key = (namespace.to_string(), config_map.name.clone());
        if state.config_maps.contains_key(&key) {
            return Err(conflict("configmap", &config_map.name));
        }
        let mut stored = config_map.clone();
        stored.resource_version = Some(state.bump());
        state.config_maps.insert(key, stored.clone());
        state.config_map_writes += 1;
        Ok(stored)
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapData,
    ) -> SoloResult<ConfigMapData> {
        let mut state = self.lock();
        let key = (namespace.to_string(), config_map.name.clone());
        let current = state
            .config_maps
            .get(&key)
            .and_then(|c| c.resource_version.clone());
        if current.is_none() {
            return Err(conflict("configmap", &config_map.name));
        }
        if config_map.resource_version.is_some() && config_map.resource_version != current {
            return Err(conflict("configmap", &config_map.name));
        }
        let mut stored = config_map.clone();
        stored.resource_version = Some(state.bump());
        state.config_maps.insert(key, stored.clone());
        state.config_map_writes += 1;
        Ok(stored)
    }

    async fn read_lease(&self, namespace: &str, name: &str) -> SoloResult<Option<LeaseRecord>> {
        {
            let mut state = self.lock();
            if state.failing_lease_reads > 0 {
                state.failing_lease_reads -= 1;
                return Err(SoloError::Io(std::io::Error::other("lease read failed")));
            }
        }
        Ok(self.lease(namespace, name))
    }

    async fn create_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &LeaseRecord,
    ) -> SoloResult<LeaseRecord> {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        if state.leases.contains_key(&key) {
            return Err(conflict("lease", name));
        }
        let mut stored = lease.clone();
        stored.resource_version = Some(state.bump());
        state.leases.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &LeaseRecord,
    ) -> SoloResult<LeaseRecord> {
        let mut state = self.lock();
        if state.conflicting_lease_replaces > 0 {
            state.conflicting_lease_replaces -= 1;
            return Err(conflict("lease", name));
        }
        let key = (namespace.to_string(), name.to_string());
        state.apply_takeover(&key);
        let current = state
            .leases
            .get(&key)
            .and_then(|l| l.resource_version.clone());
        if current.is_none() || lease.resource_version != current {
            return Err(conflict("lease", name));
        }
        let mut stored = lease.clone();
        stored.resource_version = Some(state.bump());
        state.leases.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_lease(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> SoloResult<()> {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        state.apply_takeover(&key);
        let Some(current) = state.leases.get(&key) else {
            return Ok(());
        };
        if resource_version.is_some_and(|expected| current.resource_version.as_deref() != Some(expected)) {
            return Err(conflict("lease", name));
        }
        state.leases.remove(&key);
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, labels: &[String]) -> SoloResult<Vec<PodSummary>> {
        let state = self.lock();
        Ok(state
            .pods
            .get(namespace)
            .map(|pods| {
                pods.iter()
                    .filter(|(pod_labels, _)| labels.iter().all(|l| pod_labels.contains(l)))
                    .map(|(_, pod)| pod.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_pvcs(&self, namespace: &str) -> SoloResult<usize> {
        Ok(self.lock().pvcs.remove(namespace).unwrap_or(0))
    }

    async fn delete_secrets(&self, namespace: &str, _label_selector: &str) -> SoloResult<usize> {
        Ok(self.lock().secrets.remove(namespace).unwrap_or(0))
    }
}
