//! Kubernetes operations

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod pods;

pub use client::{ConfigMapData, K8s, KubeClient, LeaseRecord, PodSummary};
pub use pods::{wait_for_pods, wait_for_pods_ready};
