//! Kubernetes operations solo depends on, and their kube-rs implementation

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::Path;

use crate::utils::{SoloError, SoloResult};

/// A ConfigMap as solo sees it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMapData {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
    /// Resource version of the stored object; `None` for objects not yet written
    pub resource_version: Option<String>,
}

/// The fields of a coordination.k8s.io Lease solo reads and writes
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRecord {
    pub holder_identity: Option<String>,
    pub duration_secs: i32,
    pub acquire_time: Option<DateTime<Utc>>,
    pub renew_time: Option<DateTime<Utc>>,
    pub transitions: i32,
    pub resource_version: Option<String>,
}

impl LeaseRecord {
    /// True when the holder stopped renewing for longer than the lease duration
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.renew_time {
            Some(renewed) => {
                now.signed_duration_since(renewed).num_milliseconds()
                    > i64::from(self.duration_secs) * 1000
            }
            None => true,
        }
    }

    pub fn has_holder(&self) -> bool {
        self.holder_identity
            .as_deref()
            .is_some_and(|holder| !holder.is_empty())
    }
}

/// Summary of a pod used by readiness waits
#[derive(Debug, Clone, PartialEq)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub ready: bool,
}

/// Kubernetes API surface used by the lease, remote config and pipelines
#[async_trait]
pub trait K8s: Send + Sync {
    async fn has_namespace(&self, namespace: &str) -> SoloResult<bool>;

    async fn create_namespace(&self, namespace: &str) -> SoloResult<()>;

    async fn delete_namespace(&self, namespace: &str) -> SoloResult<()>;

    /// Read a ConfigMap; `None` if it does not exist
    async fn read_config_map(&self, namespace: &str, name: &str)
    -> SoloResult<Option<ConfigMapData>>;

    /// Create a ConfigMap; `SoloError::Conflict` if it already exists
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapData,
    ) -> SoloResult<ConfigMapData>;

    /// Replace a ConfigMap. When `resource_version` is set the write is
    /// conditional and fails with `SoloError::Conflict` on a stale version.
    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapData,
    ) -> SoloResult<ConfigMapData>;

    async fn read_lease(&self, namespace: &str, name: &str) -> SoloResult<Option<LeaseRecord>>;

    /// Create a Lease; `SoloError::Conflict` if one already exists
    async fn create_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &LeaseRecord,
    ) -> SoloResult<LeaseRecord>;

    /// Conditionally replace a Lease; `SoloError::Conflict` on a stale version
    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &LeaseRecord,
    ) -> SoloResult<LeaseRecord>;

    /// Delete a Lease; deleting an absent lease is not an error.
    ///
    /// With `resource_version` set the delete only goes through if the stored
    /// lease still has that version, otherwise `SoloError::Conflict`.
    async fn delete_lease(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> SoloResult<()>;

    async fn list_pods(&self, namespace: &str, labels: &[String]) -> SoloResult<Vec<PodSummary>>;

    /// Delete every PVC in the namespace; returns how many were removed
    async fn delete_pvcs(&self, namespace: &str) -> SoloResult<usize>;

    /// Delete secrets matching a label selector; returns how many were removed
    async fn delete_secrets(&self, namespace: &str, label_selector: &str) -> SoloResult<usize>;
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

/// kube-rs backed implementation of [`K8s`]
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    context: Option<String>,
}

impl KubeClient {
    /// Create a client from an optional kubeconfig path and context name
    pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> SoloResult<Self> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };

        let kubeconfig = match kubeconfig {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        }
        .map_err(|e| SoloError::LocalConfigInvalid(format!("failed to read kubeconfig: {}", e)))?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| {
                SoloError::LocalConfigInvalid(format!("failed to load kubeconfig: {}", e))
            })?;

        let client = Client::try_from(config).map_err(|e| SoloError::kube("create client", e))?;

        Ok(Self {
            client,
            context: context.map(str::to_string),
        })
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn leases(&self, namespace: &str) -> Api<Lease> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn config_map_from_data(namespace: &str, data: &ConfigMapData) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(data.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(data.labels.clone()),
            resource_version: data.resource_version.clone(),
            ..Default::default()
        },
        data: Some(data.data.clone()),
        ..Default::default()
    }
}

fn config_map_to_data(config_map: ConfigMap) -> ConfigMapData {
    ConfigMapData {
        name: config_map.metadata.name.unwrap_or_default(),
        labels: config_map.metadata.labels.unwrap_or_default(),
        data: config_map.data.unwrap_or_default(),
        resource_version: config_map.metadata.resource_version,
    }
}

// MicroTime's inner timestamp type differs across k8s-openapi releases; its
// RFC 3339 wire form does not, so conversions go through serde_json.
fn micro_time_to_chrono(time: &MicroTime) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn chrono_to_micro_time(time: DateTime<Utc>) -> SoloResult<MicroTime> {
    serde_json::from_value(serde_json::Value::String(
        time.to_rfc3339_opts(SecondsFormat::Micros, true),
    ))
    .map_err(|e| SoloError::RemoteConfigInvalid(format!("invalid lease timestamp: {}", e)))
}

fn lease_to_record(lease: Lease) -> LeaseRecord {
    let spec = lease.spec.unwrap_or_default();
    LeaseRecord {
        holder_identity: spec.holder_identity,
        duration_secs: spec.lease_duration_seconds.unwrap_or_default(),
        acquire_time: spec.acquire_time.as_ref().and_then(micro_time_to_chrono),
        renew_time: spec.renew_time.as_ref().and_then(micro_time_to_chrono),
        transitions: spec.lease_transitions.unwrap_or_default(),
        resource_version: lease.metadata.resource_version,
    }
}

fn record_to_lease(namespace: &str, name: &str, record: &LeaseRecord) -> SoloResult<Lease> {
    let mut lease = Lease {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: record.resource_version.clone(),
            ..Default::default()
        },
        spec: Some(Default::default()),
    };

    if let Some(spec) = lease.spec.as_mut() {
        spec.holder_identity = record.holder_identity.clone();
        spec.lease_duration_seconds = Some(record.duration_secs);
        spec.lease_transitions = Some(record.transitions);
        spec.acquire_time = record.acquire_time.map(chrono_to_micro_time).transpose()?;
        spec.renew_time = record.renew_time.map(chrono_to_micro_time).transpose()?;
    }

    Ok(lease)
}

fn pod_summary(pod: Pod) -> PodSummary {
    let status = pod.status.unwrap_or_default();
    let ready = status
        .conditions
        .as_ref()
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    PodSummary {
        name: pod.metadata.name.unwrap_or_default(),
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        ready,
    }
}

#[async_trait]
impl K8s for KubeClient {
    async fn has_namespace(&self, namespace: &str) -> SoloResult<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let found = namespaces
            .get_opt(namespace)
            .await
            .map_err(|e| SoloError::kube(format!("read namespace {}", namespace), e))?;
        Ok(found.is_some())
    }

    async fn create_namespace(&self, namespace: &str) -> SoloResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(SoloError::kube(format!("create namespace {}", namespace), e)),
        }
    }

    async fn delete_namespace(&self, namespace: &str) -> SoloResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(namespace, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(SoloError::kube(format!("delete namespace {}", namespace), e)),
        }
    }

    async fn read_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> SoloResult<Option<ConfigMapData>> {
        let found = self
            .config_maps(namespace)
            .get_opt(name)
            .await
            .map_err(|e| SoloError::kube(format!("read configmap {}/{}", namespace, name), e))?;
        Ok(found.map(config_map_to_data))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapData,
    ) -> SoloResult<ConfigMapData> {
        let object = config_map_from_data(namespace, config_map);
        match self
            .config_maps(namespace)
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(created) => Ok(config_map_to_data(created)),
            Err(e) if is_status(&e, 409) => Err(SoloError::Conflict {
                kind: "configmap".to_string(),
                name: config_map.name.clone(),
            }),
            Err(e) => Err(SoloError::kube(
                format!("create configmap {}/{}", namespace, config_map.name),
                e,
            )),
        }
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapData,
    ) -> SoloResult<ConfigMapData> {
        let object = config_map_from_data(namespace, config_map);
        match self
            .config_maps(namespace)
            .replace(&config_map.name, &PostParams::default(), &object)
            .await
        {
            Ok(replaced) => Ok(config_map_to_data(replaced)),
            Err(e) if is_status(&e, 409) => Err(SoloError::Conflict {
                kind: "configmap".to_string(),
                name: config_map.name.clone(),
            }),
            Err(e) => Err(SoloError::kube(
                format!("replace configmap {}/{}", namespace, config_map.name),
                e,
            )),
        }
    }

    async fn read_lease(&self, namespace: &str, name: &str) -> SoloResult<Option<LeaseRecord>> {
        let found = self
            .leases(namespace)
            .get_opt(name)
            .await
            .map_err(|e| SoloError::kube(format!("read lease {}/{}", namespace, name), e))?;
        Ok(found.map(lease_to_record))
    }

    async fn create_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &LeaseRecord,
    ) -> SoloResult<LeaseRecord> {
        let object = record_to_lease(namespace, name, lease)?;
        match self
            .leases(namespace)
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(created) => Ok(lease_to_record(created)),
            Err(e) if is_status(&e, 409) => Err(SoloError::Conflict {
                kind: "lease".to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(SoloError::kube(format!("create lease {}/{}", namespace, name), e)),
        }
    }

    async fn replace_lease(
        &self,
        namespace: &str,
        name: &str,
        lease: &LeaseRecord,
    ) -> SoloResult<LeaseRecord> {
        let object = record_to_lease(namespace, name, lease)?;
        match self
            .leases(namespace)
            .replace(name, &PostParams::default(), &object)
            .await
        {
            Ok(replaced) => Ok(lease_to_record(replaced)),
            Err(e) if is_status(&e, 409) => Err(SoloError::Conflict {
                kind: "lease".to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(SoloError::kube(format!("replace lease {}/{}", namespace, name), e)),
        }
    }

    async fn delete_lease(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
    ) -> SoloResult<()> {
        let params = DeleteParams {
            preconditions: resource_version.map(|version| Preconditions {
                resource_version: Some(version.to_string()),
                uid: None,
            }),
            ..Default::default()
        };
        match self.leases(namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) if is_status(&e, 409) => Err(SoloError::Conflict {
                kind: "lease".to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(SoloError::kube(format!("delete lease {}/{}", namespace, name), e)),
        }
    }

    async fn list_pods(&self, namespace: &str, labels: &[String]) -> SoloResult<Vec<PodSummary>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&labels.join(","));
        let list = pods
            .list(&params)
            .await
            .map_err(|e| SoloError::kube(format!("list pods in {}", namespace), e))?;
        Ok(list.items.into_iter().map(pod_summary).collect())
    }

    async fn delete_pvcs(&self, namespace: &str) -> SoloResult<usize> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let existing = pvcs
            .list(&ListParams::default())
            .await
            .map_err(|e| SoloError::kube(format!("list pvcs in {}", namespace), e))?;

        let mut deleted = 0;
        for pvc in existing.items {
            let Some(name) = pvc.metadata.name else {
                continue;
            };
            match pvcs.delete(&name, &DeleteParams::default()).await {
                Ok(_) => deleted += 1,
                Err(e) if is_status(&e, 404) => {}
                Err(e) => {
                    return Err(SoloError::kube(format!("delete pvc {}/{}", namespace, name), e));
                }
            }
        }
        Ok(deleted)
    }

    async fn delete_secrets(&self, namespace: &str, label_selector: &str) -> SoloResult<usize> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let existing = secrets
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| SoloError::kube(format!("list secrets in {}", namespace), e))?;

        let mut deleted = 0;
        for secret in existing.items {
            let Some(name) = secret.metadata.name else {
                continue;
            };
            match secrets.delete(&name, &DeleteParams::default()).await {
                Ok(_) => deleted += 1,
                Err(e) if is_status(&e, 404) => {}
                Err(e) => {
                    return Err(SoloError::kube(
                        format!("delete secret {}/{}", namespace, name),
                        e,
                    ));
                }
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(renewed_secs_ago: i64, duration_secs: i32) -> LeaseRecord {
        LeaseRecord {
            holder_identity: Some("someone".to_string()),
            duration_secs,
            acquire_time: None,
            renew_time: Some(Utc::now() - Duration::seconds(renewed_secs_ago)),
            transitions: 0,
            resource_version: None,
        }
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        assert!(!record(5, 20).is_expired(now));
        assert!(record(30, 20).is_expired(now));

        let mut never_renewed = record(0, 20);
        never_renewed.renew_time = None;
        assert!(never_renewed.is_expired(now));
    }

    #[test]
    fn test_micro_time_round_trip() {
        let now = Utc::now();
        let micro = chrono_to_micro_time(now).unwrap();
        let back = micro_time_to_chrono(&micro).unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_record_to_lease_carries_fields() {
        let mut rec = record(0, 15);
        rec.transitions = 3;
        rec.resource_version = Some("42".to_string());

        let lease = record_to_lease("solo", "solo-lease", &rec).unwrap();
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("42"));

        let back = lease_to_record(lease);
        assert_eq!(back.duration_secs, 15);
        assert_eq!(back.transitions, 3);
        assert_eq!(back.holder_identity.as_deref(), Some("someone"));
    }

    #[test]
    fn test_config_map_conversion() {
        let data = ConfigMapData {
            name: "solo-remote-config".to_string(),
            labels: BTreeMap::from([("a".to_string(), "b".to_string())]),
            data: BTreeMap::from([("k".to_string(), "v".to_string())]),
            resource_version: Some("7".to_string()),
        };
        let object = config_map_from_data("solo", &data);
        assert_eq!(object.metadata.namespace.as_deref(), Some("solo"));
        assert_eq!(config_map_to_data(object), data);
    }
}
