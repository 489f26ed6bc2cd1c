//! Configuration: tool settings and the user's local deployment config

pub mod local;
pub mod settings;

pub use local::{DeploymentEntry, LocalConfig};
pub use settings::Settings;
