//! Error types for solo with actionable suggestions

use colored::Colorize;
use thiserror::Error;

/// Result alias used by the core modules
pub type SoloResult<T> = Result<T, SoloError>;

/// Errors raised by the lease, remote config and pipeline layers
#[derive(Error, Debug)]
pub enum SoloError {
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },

    #[error("Local configuration not found at {path}")]
    LocalConfigMissing { path: String },

    #[error("Local configuration is invalid: {0}")]
    LocalConfigInvalid(String),

    #[error("Lease for namespace '{namespace}' is already held by {holder}")]
    LeaseAlreadyHeld { namespace: String, holder: String },

    #[error("Failed to acquire lease for namespace '{namespace}': {reason}")]
    LeaseAcquisition { namespace: String, reason: String },

    #[error("Lease for namespace '{namespace}' was lost")]
    LeaseLost { namespace: String },

    #[error("Remote config is not loaded")]
    RemoteConfigNotLoaded,

    #[error("Remote config not found in namespace '{namespace}'")]
    RemoteConfigNotFound { namespace: String },

    #[error("Remote config already exists in namespace '{namespace}'")]
    RemoteConfigAlreadyExists { namespace: String },

    #[error("Remote config in namespace '{namespace}' was modified by another writer")]
    RemoteConfigConflict { namespace: String },

    #[error("Remote config is invalid: {0}")]
    RemoteConfigInvalid(String),

    #[error("Component '{name}' already exists")]
    ComponentExists { name: String },

    #[error("Component '{name}' not found")]
    ComponentNotFound { name: String },

    #[error("Component '{name}' is a {actual}, expected {expected}")]
    ComponentTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Node '{node}' is in state {actual}, accepted states: [{accepted}]")]
    NodeStateNotAccepted {
        node: String,
        accepted: String,
        actual: String,
    },

    #[error("Node '{node}' is in state {actual}, excluded states: [{excluded}]")]
    NodeStateExcluded {
        node: String,
        excluded: String,
        actual: String,
    },

    #[error(
        "Expected {expected} pod(s) with labels [{labels}] in namespace '{namespace}' to be {condition}, \
         found {found} after {attempts} attempts"
    )]
    ReadinessTimeout {
        namespace: String,
        labels: String,
        condition: String,
        expected: usize,
        found: usize,
        attempts: u32,
    },

    #[error("Conflict writing {kind} '{name}'")]
    Conflict { kind: String, name: String },

    #[error("Kubernetes API error while trying to {action}: {source}")]
    Kube {
        action: String,
        #[source]
        source: kube::Error,
    },

    #[error("helm {command} failed for release '{release}': {stderr}")]
    Helm {
        command: String,
        release: String,
        stderr: String,
    },

    #[error("Failed to (de)serialize YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SoloError {
    /// Wrap a kube error with the action that was attempted
    pub fn kube(action: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            action: action.into(),
            source,
        }
    }

    /// Whether the error means somebody else currently owns the lease
    pub fn is_lease_held(&self) -> bool {
        matches!(self, SoloError::LeaseAlreadyHeld { .. })
    }

    /// Actionable hints for the user
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            SoloError::MissingArgument(arg) => vec![format!("Pass --{}", arg)],
            SoloError::LocalConfigMissing { path } => vec![
                format!("Create a local configuration at {}", path),
                "Use --local-config to point at an existing file".to_string(),
            ],
            SoloError::LocalConfigInvalid(_) => vec![
                "Check userEmailAddress, deployments and clusterRefs in the local configuration"
                    .to_string(),
            ],
            SoloError::LeaseAlreadyHeld { namespace, .. } => vec![
                "Another solo command is running against this namespace, wait for it to finish"
                    .to_string(),
                format!(
                    "Inspect the lease: kubectl get lease solo-lease -n {} -o yaml",
                    namespace
                ),
            ],
            SoloError::LeaseLost { .. } => vec![
                "Verify cluster connectivity and re-run the command".to_string(),
            ],
            SoloError::RemoteConfigNotFound { .. } => vec![
                "Deploy the network first with: solo network deploy".to_string(),
                "Or create the deployment with: solo deployment create".to_string(),
            ],
            SoloError::RemoteConfigAlreadyExists { namespace } => vec![format!(
                "Inspect it: kubectl get configmap solo-remote-config -n {} -o yaml",
                namespace
            )],
            SoloError::RemoteConfigConflict { .. } => {
                vec!["Re-run the command to pick up the latest remote config".to_string()]
            }
            SoloError::NodeStateNotAccepted { .. } | SoloError::NodeStateExcluded { .. } => {
                vec!["Inspect node states in the remote config: kubectl get configmap solo-remote-config -o yaml".to_string()]
            }
            SoloError::ReadinessTimeout { namespace, labels, .. } => vec![
                format!("Check pod status: kubectl get pods -n {} -l {}", namespace, labels),
                "Increase waits.pod_max_attempts in the solo settings".to_string(),
            ],
            SoloError::Kube { .. } => vec![
                "Check if the cluster is healthy".to_string(),
                "Verify the kube context and credentials".to_string(),
            ],
            SoloError::Helm { .. } => vec![
                "Run with -vv to see the full helm invocation".to_string(),
                "Ensure helm is installed and in your PATH".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    /// Display the error with suggestions
    pub fn display(&self) {
        crate::log_error!("{}", self);
        eprintln!("{} {}", "Error:".red().bold(), self);

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }
    }
}

/// Helper to display an error chain and exit
pub fn display_error_and_exit(err: anyhow::Error) -> ! {
    match err.downcast_ref::<SoloError>() {
        Some(solo) => solo.display(),
        None => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            eprintln!("  {} Run with -v or -vv for more details", "→".blue());
        }
    }
    std::process::exit(1);
}
