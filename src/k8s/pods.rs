//! Pod readiness waits

use tracing::{debug, info};

use super::client::K8s;
use crate::pipeline::{Attempt, PollPolicy, poll_until};
use crate::utils::{SoloError, SoloResult};

pub const NETWORK_NODE_LABEL: &str = "solo.hedera.com/type=network-node";
pub const HAPROXY_LABEL: &str = "solo.hedera.com/type=haproxy";
pub const ENVOY_PROXY_LABEL: &str = "solo.hedera.com/type=envoy-proxy";
pub const EXPLORER_LABEL: &str = "app.kubernetes.io/name=hedera-explorer";

/// Wait until at least `expected` pods matching `labels` are in one of `phases`.
///
/// Returns the number of matching pods seen on the successful check.
pub async fn wait_for_pods(
    k8s: &dyn K8s,
    namespace: &str,
    labels: &[String],
    expected: usize,
    phases: &[&str],
    policy: PollPolicy,
) -> SoloResult<usize> {
    info!(namespace, labels = ?labels, expected, phases = ?phases, "Waiting for pods");

    let outcome = poll_until(policy, |attempt| async move {
        let pods = k8s.list_pods(namespace, labels).await?;
        let matching = pods
            .iter()
            .filter(|pod| phases.contains(&pod.phase.as_str()))
            .count();
        debug!(attempt, matching, total = pods.len(), "Checked pod phases");
        if matching >= expected {
            Ok::<_, SoloError>(Attempt::Done(matching))
        } else {
            Ok(Attempt::Pending(matching))
        }
    })
    .await?;

    outcome.map_err(|exhausted| SoloError::ReadinessTimeout {
        namespace: namespace.to_string(),
        labels: labels.join(","),
        condition: format!("in phase {}", phases.join("|")),
        expected,
        found: exhausted.last.unwrap_or(0),
        attempts: exhausted.attempts,
    })
}

/// Wait until at least `expected` pods matching `labels` report the Ready condition
pub async fn wait_for_pods_ready(
    k8s: &dyn K8s,
    namespace: &str,
    labels: &[String],
    expected: usize,
    policy: PollPolicy,
) -> SoloResult<usize> {
    info!(namespace, labels = ?labels, expected, "Waiting for pods to be ready");

    let outcome = poll_until(policy, |attempt| async move {
        let pods = k8s.list_pods(namespace, labels).await?;
        let ready = pods.iter().filter(|pod| pod.ready).count();
        debug!(attempt, ready, total = pods.len(), "Checked pod readiness");
        if ready >= expected {
            Ok::<_, SoloError>(Attempt::Done(ready))
        } else {
            Ok(Attempt::Pending(ready))
        }
    })
    .await?;

    outcome.map_err(|exhausted| SoloError::ReadinessTimeout {
        namespace: namespace.to_string(),
        labels: labels.join(","),
        condition: "Ready".to_string(),
        expected,
        found: exhausted.last.unwrap_or(0),
        attempts: exhausted.attempts,
    })
}

/// Label set for a single selector string
pub fn labels(selector: &str) -> Vec<String> {
    vec![selector.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::FakeK8s;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_pods_running() {
        let k8s = FakeK8s::new().with_namespace("solo");
        k8s.add_pod("solo", &[NETWORK_NODE_LABEL], "network-node1-0", "Running", false);
        k8s.add_pod("solo", &[NETWORK_NODE_LABEL], "network-node2-0", "Running", false);

        let found = wait_for_pods(
            &k8s,
            "solo",
            &labels(NETWORK_NODE_LABEL),
            2,
            &["Running"],
            fast(3),
        )
        .await
        .unwrap();
        assert_eq!(found, 2);
    }

    #[tokio::test]
    async fn test_pods_never_running_names_expectation() {
        let k8s = FakeK8s::new().with_namespace("solo");
        k8s.add_pod("solo", &[NETWORK_NODE_LABEL], "network-node1-0", "Pending", false);

        let err = wait_for_pods(
            &k8s,
            "solo",
            &labels(NETWORK_NODE_LABEL),
            1,
            &["Running"],
            fast(3),
        )
        .await
        .unwrap_err();

        match err {
            SoloError::ReadinessTimeout {
                namespace,
                labels,
                condition,
                expected,
                found,
                attempts,
            } => {
                assert_eq!(namespace, "solo");
                assert_eq!(labels, NETWORK_NODE_LABEL);
                assert_eq!(condition, "in phase Running");
                assert_eq!(expected, 1);
                assert_eq!(found, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ready_ignores_other_labels() {
        let k8s = FakeK8s::new().with_namespace("solo");
        k8s.add_pod("solo", &[HAPROXY_LABEL], "haproxy-node1", "Running", true);
        k8s.add_pod("solo", &[ENVOY_PROXY_LABEL], "envoy-proxy-node1", "Running", false);

        assert_eq!(
            wait_for_pods_ready(&k8s, "solo", &labels(HAPROXY_LABEL), 1, fast(2))
                .await
                .unwrap(),
            1
        );
        assert!(matches!(
            wait_for_pods_ready(&k8s, "solo", &labels(ENVOY_PROXY_LABEL), 1, fast(2)).await,
            Err(SoloError::ReadinessTimeout { .. })
        ));
    }
}
