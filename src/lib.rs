//! solo: deploy and manage Hedera networks on Kubernetes

pub mod commands;
pub mod config;
pub mod helm;
pub mod k8s;
pub mod lease;
pub mod pipeline;
pub mod remote_config;
pub mod utils;
