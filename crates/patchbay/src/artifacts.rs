//! Realized remote handles, keyed by address.

use std::collections::BTreeMap;

use crate::address::Address;
use crate::context::{BufferId, BusGroup, NodeId};
use crate::spec::SpecHash;
use crate::synthdef::SynthDef;

/// Address-keyed tables of realized entities.
///
/// The session keeps one per context. Every component keeps one more as a
/// local cache, with `hashes` recording which spec realized each entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    pub audio_buses: BTreeMap<Address, BusGroup>,
    pub buffers: BTreeMap<Address, BufferId>,
    pub control_buses: BTreeMap<Address, BusGroup>,
    pub nodes: BTreeMap<Address, NodeId>,
    pub synthdefs: BTreeMap<Address, SynthDef>,
    pub hashes: BTreeMap<Address, SpecHash>,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.audio_buses.clear();
        self.buffers.clear();
        self.control_buses.clear();
        self.nodes.clear();
        self.synthdefs.clear();
        self.hashes.clear();
    }

    /// Merge `other` into this table; `other` wins on conflicting addresses.
    pub fn merge(&mut self, other: Artifacts) {
        self.audio_buses.extend(other.audio_buses);
        self.buffers.extend(other.buffers);
        self.control_buses.extend(other.control_buses);
        self.nodes.extend(other.nodes);
        self.synthdefs.extend(other.synthdefs);
        self.hashes.extend(other.hashes);
    }

    pub fn is_empty(&self) -> bool {
        self.audio_buses.is_empty()
            && self.buffers.is_empty()
            && self.control_buses.is_empty()
            && self.nodes.is_empty()
            && self.synthdefs.is_empty()
            && self.hashes.is_empty()
    }

    /// Number of realized entities, synth definitions excluded.
    pub fn len(&self) -> usize {
        self.audio_buses.len() + self.buffers.len() + self.control_buses.len() + self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Entity;
    use crate::context::CalculationRate;

    #[test]
    fn test_merge_overrides_existing_addresses() {
        let address = Address::new("tracks[2]", Entity::Nodes, "group");
        let other_address = Address::new("tracks[3]", Entity::Nodes, "group");

        let mut base = Artifacts::new();
        base.nodes.insert(address.clone(), NodeId(1000));
        base.nodes.insert(other_address.clone(), NodeId(1001));

        let mut update = Artifacts::new();
        update.nodes.insert(address.clone(), NodeId(1002));
        update.control_buses.insert(
            Address::new("tracks[2]", Entity::ControlBuses, "gain"),
            BusGroup::new(CalculationRate::Control, 0, 1),
        );

        base.merge(update);
        assert_eq!(base.nodes[&address], NodeId(1002));
        assert_eq!(base.nodes[&other_address], NodeId(1001));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_clear() {
        let mut artifacts = Artifacts::new();
        artifacts.synthdefs.insert(
            Address::synthdef("patchbay:meters:2"),
            SynthDef::meters(2),
        );
        assert!(!artifacts.is_empty());
        artifacts.clear();
        assert!(artifacts.is_empty());
    }
}
