//! Identity written into the Lease `holderIdentity` field

use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

use crate::utils::SoloResult;

/// Who holds a lease: one value per process run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseHolder {
    pub username: String,
    pub hostname: String,
    pub process_id: u32,
    pub run_id: String,
}

impl LeaseHolder {
    /// Holder identity of the running process with a fresh run id
    pub fn current() -> Self {
        Self {
            username: current_username(),
            hostname: current_hostname(),
            process_id: std::process::id(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn to_json(&self) -> SoloResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(identity: &str) -> Option<Self> {
        serde_json::from_str(identity).ok()
    }

    /// Human readable form of a stored holder identity
    pub fn describe(identity: &str) -> String {
        match Self::from_json(identity) {
            Some(holder) => holder.to_string(),
            None => identity.to_string(),
        }
    }
}

impl std::fmt::Display for LeaseHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{} (pid {})",
            self.username, self.hostname, self.process_id
        )
    }
}

fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn current_hostname() -> String {
    if let Ok(host) = std::env::var("HOSTNAME")
        && !host.is_empty()
    {
        return host;
    }
    fs::read_to_string("/etc/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_fresh() {
        let a = LeaseHolder::current();
        let b = LeaseHolder::current();
        assert_eq!(a.process_id, b.process_id);
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_json_uses_camel_case() {
        let holder = LeaseHolder {
            username: "alice".to_string(),
            hostname: "box".to_string(),
            process_id: 42,
            run_id: "r1".to_string(),
        };
        let json = holder.to_json().unwrap();
        assert!(json.contains("\"processId\":42"));
        assert!(json.contains("\"runId\":\"r1\""));
        assert_eq!(LeaseHolder::from_json(&json), Some(holder));
        assert_eq!(LeaseHolder::describe(&json), "alice@box (pid 42)");
    }

    #[test]
    fn test_describe_foreign_identity() {
        assert_eq!(LeaseHolder::describe("some-operator"), "some-operator");
    }
}
