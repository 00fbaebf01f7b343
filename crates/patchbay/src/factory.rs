//! Collects the specs one component resolves to.

use std::collections::HashSet;

use crate::address::{Address, Entity};
use crate::component::ComponentId;
use crate::context::{AddAction, ContextId};
use crate::spec::{
    BufferSpec, BusSpec, DestroyStrategy, GroupSpec, Placement, Spec, SpecKind, SynthSpec,
};
use crate::synthdef::SynthDef;

/// Spec builder for one component and context.
///
/// Specs come back ordered by category: synth definitions, buffers, buses,
/// groups, then synths. Synth definitions are deduplicated by address.
#[derive(Debug)]
pub struct SpecFactory {
    component: ComponentId,
    owner: String,
    context: ContextId,
    synthdefs: Vec<Spec>,
    buffers: Vec<Spec>,
    buses: Vec<Spec>,
    groups: Vec<Spec>,
    synths: Vec<Spec>,
    seen_synthdefs: HashSet<Address>,
}

impl SpecFactory {
    /// `owner` is the component's numeric address.
    pub fn new(component: ComponentId, owner: String, context: ContextId) -> Self {
        Self {
            component,
            owner,
            context,
            synthdefs: Vec::new(),
            buffers: Vec::new(),
            buses: Vec::new(),
            groups: Vec::new(),
            synths: Vec::new(),
            seen_synthdefs: HashSet::new(),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Address of an entity owned by this component.
    pub fn address(&self, entity: Entity, name: &str) -> Address {
        Address::new(&self.owner, entity, name)
    }

    fn spec(&self, name: &str, kind: SpecKind) -> Spec {
        Spec::new(&self.owner, self.component, self.context, name, kind)
    }

    pub fn add_synthdef(&mut self, synthdef: SynthDef) -> Address {
        let spec = self.spec("", SpecKind::SynthDef(synthdef));
        let address = spec.address.clone();
        if self.seen_synthdefs.insert(address.clone()) {
            self.synthdefs.push(spec);
        }
        address
    }

    pub fn add_audio_bus(&mut self, name: &str, channel_count: usize) -> Address {
        let spec = self.spec(
            name,
            SpecKind::AudioBus(BusSpec {
                channel_count,
                default: 0.0,
            }),
        );
        let address = spec.address.clone();
        self.buses.push(spec);
        address
    }

    pub fn add_control_bus(&mut self, name: &str, channel_count: usize, default: f64) -> Address {
        let spec = self.spec(
            name,
            SpecKind::ControlBus(BusSpec {
                channel_count,
                default,
            }),
        );
        let address = spec.address.clone();
        self.buses.push(spec);
        address
    }

    pub fn add_buffer(&mut self, name: &str, channel_count: usize, frame_count: usize) -> Address {
        let spec = self.spec(
            name,
            SpecKind::Buffer(BufferSpec {
                channel_count,
                frame_count,
            }),
        );
        let address = spec.address.clone();
        self.buffers.push(spec);
        address
    }

    pub fn add_group(
        &mut self,
        name: &str,
        placement: Placement,
        destroy_strategy: Option<DestroyStrategy>,
    ) -> Address {
        let spec = self.spec(
            name,
            SpecKind::Group(GroupSpec {
                placement,
                destroy_strategy,
            }),
        );
        let address = spec.address.clone();
        self.groups.push(spec);
        address
    }

    /// The component's `group`, ordered among its siblings.
    ///
    /// The first sibling goes at the head of the parent's `container` group;
    /// every other one goes after the previous sibling's group.
    pub fn add_container_group(
        &mut self,
        parent: &str,
        container: &str,
        previous: Option<&str>,
        destroy_strategy: Option<DestroyStrategy>,
    ) -> Address {
        let parent_group = Address::new(parent, Entity::Nodes, container);
        let placement = match previous {
            Some(previous) => Placement::new(
                AddAction::AddAfter,
                Some(Address::new(previous, Entity::Nodes, "group")),
            ),
            None => Placement::head_of(parent_group.clone()),
        };
        self.add_group("group", placement.with_parent(parent_group), destroy_strategy)
    }

    pub fn add_synth(&mut self, name: &str, synth: SynthSpec) -> Address {
        let spec = self.spec(name, SpecKind::Synth(synth));
        let address = spec.address.clone();
        self.synths.push(spec);
        address
    }

    pub fn into_specs(self) -> Vec<Spec> {
        let mut specs = self.synthdefs;
        specs.extend(self.buffers);
        specs.extend(self.buses);
        specs.extend(self.groups);
        specs.extend(self.synths);
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn factory() -> SpecFactory {
        SpecFactory::new(ComponentId(4), "tracks[4]".to_string(), ContextId(0))
    }

    #[test]
    fn test_specs_are_ordered_by_category() {
        let mut factory = factory();
        let group = factory.add_group("group", Placement::new(AddAction::AddToHead, None), None);
        factory.add_synth(
            "channel-strip",
            SynthSpec::new(Address::synthdef("patchbay:channel-strip:2"), Placement::tail_of(group)),
        );
        factory.add_audio_bus("main", 2);
        factory.add_synthdef(SynthDef::channel_strip(2));
        factory.add_buffer("samples", 1, 128);

        let names: Vec<String> = factory
            .into_specs()
            .iter()
            .map(|spec| spec.address.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "synthdefs:patchbay:channel-strip:2",
                "tracks[4]:buffers:samples",
                "tracks[4]:audio-buses:main",
                "tracks[4]:nodes:group",
                "tracks[4]:nodes:channel-strip",
            ]
        );
    }

    #[test]
    fn test_synthdefs_are_deduplicated() {
        let mut factory = factory();
        let first = factory.add_synthdef(SynthDef::meters(2));
        let second = factory.add_synthdef(SynthDef::meters(2));
        assert_eq!(first, second);
        assert_eq!(factory.into_specs().len(), 1);
    }

    #[test]
    fn test_container_group_placement() {
        let mut factory = factory();
        factory.add_container_group("mixers[1]", "tracks", None, None);
        let specs = factory.into_specs();
        let placement = specs[0].placement().unwrap();
        assert_eq!(placement.add_action, AddAction::AddToHead);
        assert_eq!(
            placement.target.as_ref().unwrap().as_str(),
            "mixers[1]:nodes:tracks"
        );

        let mut factory = self::factory();
        factory.add_container_group("mixers[1]", "tracks", Some("tracks[2]"), None);
        let specs = factory.into_specs();
        let placement = specs[0].placement().unwrap();
        assert_eq!(placement.add_action, AddAction::AddAfter);
        assert_eq!(
            placement.target.as_ref().unwrap().as_str(),
            "tracks[2]:nodes:group"
        );
        assert_eq!(
            placement.parent.as_ref().unwrap().as_str(),
            "mixers[1]:nodes:tracks"
        );
    }
}
