//! Addresses: stable string keys for remote entities.
//!
//! An address joins a component's numeric path, an entity category and a
//! logical name, e.g. `tracks[3]:nodes:group`. Synth definitions are shared
//! per context and live outside any component: `synthdefs:<name>`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote entity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    Nodes,
    AudioBuses,
    ControlBuses,
    Buffers,
    Synthdefs,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Nodes => "nodes",
            Entity::AudioBuses => "audio-buses",
            Entity::ControlBuses => "control-buses",
            Entity::Buffers => "buffers",
            Entity::Synthdefs => "synthdefs",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Address of a component-owned entity.
    ///
    /// `component` is the owner's numeric address, e.g. `tracks[2]`.
    pub fn new(component: &str, entity: Entity, name: &str) -> Self {
        Self(format!("{}:{}:{}", component, entity, name))
    }

    /// Address of a context-global synth definition.
    pub fn synthdef(name: &str) -> Self {
        Self(format!("{}:{}", Entity::Synthdefs, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_node(&self) -> bool {
        self.0.contains(":nodes:")
    }

    /// The entity category encoded in the address.
    pub fn entity(&self) -> Option<Entity> {
        if self.0.starts_with("synthdefs:") {
            return Some(Entity::Synthdefs);
        }
        let category = self.0.split(':').nth(1)?;
        match category {
            "nodes" => Some(Entity::Nodes),
            "audio-buses" => Some(Entity::AudioBuses),
            "control-buses" => Some(Entity::ControlBuses),
            "buffers" => Some(Entity::Buffers),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_address_format() {
        let address = Address::new("tracks[3]", Entity::Nodes, "group");
        assert_eq!(address.as_str(), "tracks[3]:nodes:group");
        assert!(address.is_node());
        assert_eq!(address.entity(), Some(Entity::Nodes));
    }

    #[test]
    fn test_synthdef_address_is_global() {
        let address = Address::synthdef("patchbay:channel-strip:2");
        assert_eq!(address.as_str(), "synthdefs:patchbay:channel-strip:2");
        assert!(!address.is_node());
        assert_eq!(address.entity(), Some(Entity::Synthdefs));
    }

    #[test]
    fn test_bus_addresses_are_not_nodes() {
        let audio = Address::new("mixers[1]", Entity::AudioBuses, "main");
        let control = Address::new("mixers[1]", Entity::ControlBuses, "gain");
        assert!(!audio.is_node());
        assert_eq!(audio.entity(), Some(Entity::AudioBuses));
        assert_eq!(control.entity(), Some(Entity::ControlBuses));
        assert_eq!(control.to_string(), "mixers[1]:control-buses:gain");
    }
}
