//! Deployed component inventory

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::utils::{SoloError, SoloResult};

/// Kind of a deployed component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentType {
    ConsensusNode,
    EnvoyProxy,
    HaProxy,
    Relay,
    MirrorNode,
    MirrorNodeExplorer,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentType::ConsensusNode => "consensus node",
            ComponentType::EnvoyProxy => "envoy proxy",
            ComponentType::HaProxy => "haproxy",
            ComponentType::Relay => "relay",
            ComponentType::MirrorNode => "mirror node",
            ComponentType::MirrorNodeExplorer => "mirror node explorer",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a consensus node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusNodeState {
    Requested,
    Initialized,
    Setup,
    Started,
    Frozen,
    Stopped,
}

impl fmt::Display for ConsensusNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsensusNodeState::Requested => "REQUESTED",
            ConsensusNodeState::Initialized => "INITIALIZED",
            ConsensusNodeState::Setup => "SETUP",
            ConsensusNodeState::Started => "STARTED",
            ConsensusNodeState::Frozen => "FROZEN",
            ConsensusNodeState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Fields shared by every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseComponent {
    pub name: String,
    pub cluster: String,
    pub namespace: String,
}

impl BaseComponent {
    pub fn new(
        name: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            namespace: namespace.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusNodeComponent {
    pub name: String,
    pub cluster: String,
    pub namespace: String,
    pub node_id: u64,
    pub state: ConsensusNodeState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayComponent {
    pub name: String,
    pub cluster: String,
    pub namespace: String,
    /// Consensus nodes this relay forwards to
    #[serde(default)]
    pub consensus_node_aliases: Vec<String>,
}

/// One named unit of the deployed system
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    ConsensusNode(ConsensusNodeComponent),
    EnvoyProxy(BaseComponent),
    HaProxy(BaseComponent),
    Relay(RelayComponent),
    MirrorNode(BaseComponent),
    MirrorNodeExplorer(BaseComponent),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::ConsensusNode(c) => &c.name,
            Component::Relay(c) => &c.name,
            Component::EnvoyProxy(c)
            | Component::HaProxy(c)
            | Component::MirrorNode(c)
            | Component::MirrorNodeExplorer(c) => &c.name,
        }
    }

    pub fn cluster(&self) -> &str {
        match self {
            Component::ConsensusNode(c) => &c.cluster,
            Component::Relay(c) => &c.cluster,
            Component::EnvoyProxy(c)
            | Component::HaProxy(c)
            | Component::MirrorNode(c)
            | Component::MirrorNodeExplorer(c) => &c.cluster,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Component::ConsensusNode(c) => &c.namespace,
            Component::Relay(c) => &c.namespace,
            Component::EnvoyProxy(c)
            | Component::HaProxy(c)
            | Component::MirrorNode(c)
            | Component::MirrorNodeExplorer(c) => &c.namespace,
        }
    }

    pub fn component_type(&self) -> ComponentType {
        match self {
            Component::ConsensusNode(_) => ComponentType::ConsensusNode,
            Component::EnvoyProxy(_) => ComponentType::EnvoyProxy,
            Component::HaProxy(_) => ComponentType::HaProxy,
            Component::Relay(_) => ComponentType::Relay,
            Component::MirrorNode(_) => ComponentType::MirrorNode,
            Component::MirrorNodeExplorer(_) => ComponentType::MirrorNodeExplorer,
        }
    }
}

/// Components keyed by name.
///
/// Names are unique across kinds and the variant tag is checked on every
/// edit and remove. Serialized grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ComponentGroups", into = "ComponentGroups")]
pub struct ComponentsDataWrapper {
    components: BTreeMap<String, Component>,
}

impl ComponentsDataWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn of_type(&self, component_type: ComponentType) -> impl Iterator<Item = &Component> {
        self.components
            .values()
            .filter(move |c| c.component_type() == component_type)
    }

    pub fn consensus_nodes(&self) -> impl Iterator<Item = &ConsensusNodeComponent> {
        self.components.values().filter_map(|c| match c {
            Component::ConsensusNode(node) => Some(node),
            _ => None,
        })
    }

    pub fn consensus_node(&self, name: &str) -> SoloResult<&ConsensusNodeComponent> {
        match self.components.get(name) {
            Some(Component::ConsensusNode(node)) => Ok(node),
            Some(other) => Err(type_mismatch(name, ComponentType::ConsensusNode, other)),
            None => Err(SoloError::ComponentNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Insert a new component; the inventory is unchanged if the name is taken
    pub fn add(&mut self, component: Component) -> SoloResult<()> {
        let name = component.name().to_string();
        if self.components.contains_key(&name) {
            return Err(SoloError::ComponentExists { name });
        }
        self.components.insert(name, component);
        Ok(())
    }

    /// Replace an existing component of the same kind
    pub fn edit(&mut self, component: Component) -> SoloResult<()> {
        let name = component.name();
        let existing = self
            .components
            .get(name)
            .ok_or_else(|| SoloError::ComponentNotFound {
                name: name.to_string(),
            })?;
        if existing.component_type() != component.component_type() {
            return Err(type_mismatch(name, component.component_type(), existing));
        }
        self.components.insert(name.to_string(), component);
        Ok(())
    }

    /// Add, or edit when a component of the same kind already has the name
    pub fn upsert(&mut self, component: Component) -> SoloResult<()> {
        if self.contains(component.name()) {
            self.edit(component)
        } else {
            self.add(component)
        }
    }

    pub fn remove(&mut self, name: &str, component_type: ComponentType) -> SoloResult<Component> {
        let existing = self
            .components
            .get(name)
            .ok_or_else(|| SoloError::ComponentNotFound {
                name: name.to_string(),
            })?;
        if existing.component_type() != component_type {
            return Err(type_mismatch(name, component_type, existing));
        }
        self.components
            .remove(name)
            .ok_or_else(|| SoloError::ComponentNotFound {
                name: name.to_string(),
            })
    }

    pub fn clear(&mut self) {
        self.components.clear();
    }

    /// Cross-component invariants: consensus node ids are unique
    pub fn validate(&self) -> SoloResult<()> {
        let mut seen = BTreeMap::new();
        for node in self.consensus_nodes() {
            if let Some(other) = seen.insert(node.node_id, &node.name) {
                return Err(SoloError::RemoteConfigInvalid(format!(
                    "consensus nodes '{}' and '{}' share node id {}",
                    other, node.name, node.node_id
                )));
            }
        }
        Ok(())
    }
}

fn type_mismatch(name: &str, expected: ComponentType, actual: &Component) -> SoloError {
    SoloError::ComponentTypeMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
        actual: actual.component_type().to_string(),
    }
}

/// Serialized form: one map per kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentGroups {
    #[serde(default)]
    consensus_nodes: BTreeMap<String, ConsensusNodeComponent>,
    #[serde(default)]
    envoy_proxies: BTreeMap<String, BaseComponent>,
    #[serde(default)]
    ha_proxies: BTreeMap<String, BaseComponent>,
    #[serde(default)]
    relays: BTreeMap<String, RelayComponent>,
    #[serde(default)]
    mirror_nodes: BTreeMap<String, BaseComponent>,
    #[serde(default)]
    mirror_node_explorers: BTreeMap<String, BaseComponent>,
}

impl From<ComponentsDataWrapper> for ComponentGroups {
    fn from(wrapper: ComponentsDataWrapper) -> Self {
        let mut groups = ComponentGroups::default();
        for (name, component) in wrapper.components {
            match component {
                Component::ConsensusNode(c) => {
                    groups.consensus_nodes.insert(name, c);
                }
                Component::EnvoyProxy(c) => {
                    groups.envoy_proxies.insert(name, c);
                }
                Component::HaProxy(c) => {
                    groups.ha_proxies.insert(name, c);
                }
                Component::Relay(c) => {
                    groups.relays.insert(name, c);
                }
                Component::MirrorNode(c) => {
                    groups.mirror_nodes.insert(name, c);
                }
                Component::MirrorNodeExplorer(c) => {
                    groups.mirror_node_explorers.insert(name, c);
                }
            }
        }
        groups
    }
}

impl TryFrom<ComponentGroups> for ComponentsDataWrapper {
    type Error = String;

    fn try_from(groups: ComponentGroups) -> Result<Self, Self::Error> {
        let entries = groups
            .consensus_nodes
            .into_iter()
            .map(|(k, c)| (k, Component::ConsensusNode(c)))
            .chain(groups.envoy_proxies.into_iter().map(|(k, c)| (k, Component::EnvoyProxy(c))))
            .chain(groups.ha_proxies.into_iter().map(|(k, c)| (k, Component::HaProxy(c))))
            .chain(groups.relays.into_iter().map(|(k, c)| (k, Component::Relay(c))))
            .chain(groups.mirror_nodes.into_iter().map(|(k, c)| (k, Component::MirrorNode(c))))
            .chain(
                groups
                    .mirror_node_explorers
                    .into_iter()
                    .map(|(k, c)| (k, Component::MirrorNodeExplorer(c))),
            );

        let mut wrapper = ComponentsDataWrapper::default();
        let mut names = BTreeSet::new();
        for (key, component) in entries {
            if key != component.name() {
                return Err(format!(
                    "component listed under '{}' is named '{}'",
                    key,
                    component.name()
                ));
            }
            if !names.insert(key.clone()) {
                return Err(format!("component '{}' appears in more than one group", key));
            }
            wrapper.components.insert(key, component);
        }
        Ok(wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, id: u64) -> Component {
        Component::ConsensusNode(ConsensusNodeComponent {
            name: name.to_string(),
            cluster: "c1".to_string(),
            namespace: "solo".to_string(),
            node_id: id,
            state: ConsensusNodeState::Initialized,
        })
    }

    fn haproxy(name: &str) -> Component {
        Component::HaProxy(BaseComponent::new(name, "c1", "solo"))
    }

    #[test]
    fn test_add_then_remove() {
        let mut inventory = ComponentsDataWrapper::new();
        inventory.add(node("node1", 0)).unwrap();
        inventory.add(haproxy("haproxy-node1")).unwrap();

        let removed = inventory
            .remove("node1", ComponentType::ConsensusNode)
            .unwrap();
        assert_eq!(removed.name(), "node1");
        assert!(!inventory.contains("node1"));
        assert!(matches!(
            inventory.remove("node1", ComponentType::ConsensusNode),
            Err(SoloError::ComponentNotFound { .. })
        ));
        assert_eq!(inventory.len(), 1);
    }

    #[test]
    fn test_add_collision_leaves_entry_unchanged() {
        let mut inventory = ComponentsDataWrapper::new();
        inventory.add(node("node1", 0)).unwrap();
        let before = inventory.clone();

        let err = inventory.add(haproxy("node1")).unwrap_err();
        assert!(matches!(err, SoloError::ComponentExists { ref name } if name == "node1"));
        assert_eq!(inventory, before);
    }

    #[test]
    fn test_edit_and_remove_check_type() {
        let mut inventory = ComponentsDataWrapper::new();
        inventory.add(haproxy("proxy")).unwrap();

        assert!(matches!(
            inventory.edit(Component::EnvoyProxy(BaseComponent::new("proxy", "c1", "solo"))),
            Err(SoloError::ComponentTypeMismatch { .. })
        ));
        assert!(matches!(
            inventory.remove("proxy", ComponentType::EnvoyProxy),
            Err(SoloError::ComponentTypeMismatch { .. })
        ));
        assert!(matches!(
            inventory.edit(haproxy("missing")),
            Err(SoloError::ComponentNotFound { .. })
        ));

        inventory
            .edit(Component::HaProxy(BaseComponent::new("proxy", "c2", "solo")))
            .unwrap();
        assert_eq!(inventory.get("proxy").unwrap().cluster(), "c2");
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let mut inventory = ComponentsDataWrapper::new();
        inventory.add(node("node1", 0)).unwrap();
        inventory.add(node("node2", 0)).unwrap();
        assert!(matches!(
            inventory.validate(),
            Err(SoloError::RemoteConfigInvalid(_))
        ));
    }

    #[test]
    fn test_yaml_groups_by_kind() {
        let mut inventory = ComponentsDataWrapper::new();
        inventory.add(node("node1", 0)).unwrap();
        inventory.add(haproxy("haproxy-node1")).unwrap();
        inventory
            .add(Component::Relay(RelayComponent {
                name: "relay".to_string(),
                cluster: "c1".to_string(),
                namespace: "solo".to_string(),
                consensus_node_aliases: vec!["node1".to_string()],
            }))
            .unwrap();

        let yaml = serde_yaml::to_string(&inventory).unwrap();
        assert!(yaml.contains("consensusNodes:"));
        assert!(yaml.contains("haProxies:"));
        assert!(yaml.contains("state: INITIALIZED"));
        assert!(yaml.contains("consensusNodeAliases:"));

        let back: ComponentsDataWrapper = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, inventory);
    }

    #[test]
    fn test_name_in_two_groups_rejected() {
        let yaml = r#"
consensusNodes:
  node1: {name: node1, cluster: c1, namespace: solo, nodeId: 0, state: STARTED}
haProxies:
  node1: {name: node1, cluster: c1, namespace: solo}
"#;
        let err = serde_yaml::from_str::<ComponentsDataWrapper>(yaml).unwrap_err();
        assert!(err.to_string().contains("more than one group"));
    }

    #[test]
    fn test_state_display_matches_wire_form() {
        assert_eq!(ConsensusNodeState::Initialized.to_string(), "INITIALIZED");
        assert_eq!(
            serde_yaml::to_string(&ConsensusNodeState::Frozen).unwrap().trim(),
            "FROZEN"
        );
    }
}
