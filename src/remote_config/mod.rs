//! Cluster-resident deployment state

pub mod components;
pub mod manager;
pub mod model;

pub use components::{
    BaseComponent, Component, ComponentType, ComponentsDataWrapper, ConsensusNodeComponent,
    ConsensusNodeState, RelayComponent,
};
pub use manager::{
    RemoteConfigContext, RemoteConfigManager, build_create_task, build_load_task,
    build_probe_task,
};
pub use model::{COMMAND_HISTORY_CAP, RemoteConfig, RemoteConfigMetadata};
