//! Entity specifications.
//!
//! A [`Spec`] describes the desired state of exactly one remote entity. Specs
//! are plain values: two specs at the same address either compare equal (no
//! work), differ in a way `mutate` can reach, or differ in a way that forces
//! the entity to be recreated.
//!
//! Every realization stamps a [`SpecHash`] into the owning component's local
//! artifact cache. Destruction only clears a local entry whose hash matches
//! the spec being destroyed, which keeps a freshly recreated entity at the
//! same address intact.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{Address, Entity};
use crate::artifacts::Artifacts;
use crate::change::Reconciliation;
use crate::component::ComponentId;
use crate::context::{
    AddAction, BusGroup, CalculationRate, ContextId, ControlValue, DoneAction, NodeId,
    Transaction,
};
use crate::error::{EngineError, Result};
use crate::synthdef::SynthDef;

/// BLAKE3 over a spec's JSON encoding, truncated to 128 bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecHash(String);

impl SpecHash {
    pub fn from_data(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hex::encode(&hash.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens to a node when its owner is destroyed directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DestroyStrategy {
    /// Set controls, typically a gate release.
    Set(BTreeMap<String, f64>),
    /// Free the node outright.
    Free,
}

impl DestroyStrategy {
    pub fn set(controls: &[(&str, f64)]) -> Self {
        DestroyStrategy::Set(
            controls
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        )
    }

    pub fn release() -> Self {
        Self::set(&[("gate", 0.0)])
    }
}

/// Where a node sits among its siblings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub add_action: AddAction,
    /// The enclosing group, when placement is relative to a sibling.
    pub parent: Option<Address>,
    /// `None` places relative to the context's default group.
    pub target: Option<Address>,
}

impl Placement {
    pub fn new(add_action: AddAction, target: Option<Address>) -> Self {
        Self {
            add_action,
            parent: None,
            target,
        }
    }

    pub fn head_of(target: Address) -> Self {
        Self::new(AddAction::AddToHead, Some(target))
    }

    pub fn tail_of(target: Address) -> Self {
        Self::new(AddAction::AddToTail, Some(target))
    }

    pub fn before(target: Address) -> Self {
        Self::new(AddAction::AddBefore, Some(target))
    }

    pub fn after(target: Address) -> Self {
        Self::new(AddAction::AddAfter, Some(target))
    }

    pub fn with_parent(mut self, parent: Address) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A synth control binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Binding {
    Value(f64),
    Bus(BusGroup),
    /// A bus address, resolved at apply time.
    Address(Address),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSpec {
    pub placement: Placement,
    pub destroy_strategy: Option<DestroyStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthSpec {
    pub placement: Placement,
    pub synthdef: Address,
    pub kwargs: BTreeMap<String, Binding>,
    pub destroy_strategy: Option<DestroyStrategy>,
}

impl SynthSpec {
    pub fn new(synthdef: Address, placement: Placement) -> Self {
        Self {
            placement,
            synthdef,
            kwargs: BTreeMap::new(),
            destroy_strategy: None,
        }
    }

    pub fn with_kwarg(mut self, key: &str, binding: Binding) -> Self {
        self.kwargs.insert(key.to_string(), binding);
        self
    }

    pub fn with_destroy_strategy(mut self, strategy: DestroyStrategy) -> Self {
        self.destroy_strategy = Some(strategy);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusSpec {
    pub channel_count: usize,
    pub default: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferSpec {
    pub channel_count: usize,
    pub frame_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SpecKind {
    Group(GroupSpec),
    Synth(SynthSpec),
    AudioBus(BusSpec),
    ControlBus(BusSpec),
    Buffer(BufferSpec),
    SynthDef(SynthDef),
}

impl SpecKind {
    pub fn entity(&self) -> Entity {
        match self {
            SpecKind::Group(_) | SpecKind::Synth(_) => Entity::Nodes,
            SpecKind::AudioBus(_) => Entity::AudioBuses,
            SpecKind::ControlBus(_) => Entity::ControlBuses,
            SpecKind::Buffer(_) => Entity::Buffers,
            SpecKind::SynthDef(_) => Entity::Synthdefs,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpecKind::Group(_) => "group",
            SpecKind::Synth(_) => "synth",
            SpecKind::AudioBus(_) => "audio-bus",
            SpecKind::ControlBus(_) => "control-bus",
            SpecKind::Buffer(_) => "buffer",
            SpecKind::SynthDef(_) => "synthdef",
        }
    }
}

/// Desired state of one remote entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spec {
    pub address: Address,
    pub component: ComponentId,
    pub context: ContextId,
    pub name: String,
    pub kind: SpecKind,
}

impl Spec {
    /// Build a spec owned by the component at numeric address `owner`.
    pub fn new(
        owner: &str,
        component: ComponentId,
        context: ContextId,
        name: &str,
        kind: SpecKind,
    ) -> Self {
        let address = match &kind {
            SpecKind::SynthDef(synthdef) => Address::synthdef(&synthdef.name),
            other => Address::new(owner, other.entity(), name),
        };
        let name = match &kind {
            SpecKind::SynthDef(synthdef) => synthdef.name.clone(),
            _ => name.to_string(),
        };
        Self {
            address,
            component,
            context,
            name,
            kind,
        }
    }

    pub fn hash(&self) -> Result<SpecHash> {
        let encoded = serde_json::to_vec(self)?;
        Ok(SpecHash::from_data(&encoded))
    }

    pub fn is_node(&self) -> bool {
        matches!(self.kind, SpecKind::Group(_) | SpecKind::Synth(_))
    }

    pub fn placement(&self) -> Option<&Placement> {
        match &self.kind {
            SpecKind::Group(group) => Some(&group.placement),
            SpecKind::Synth(synth) => Some(&synth.placement),
            _ => None,
        }
    }

    pub fn placement_mut(&mut self) -> Option<&mut Placement> {
        match &mut self.kind {
            SpecKind::Group(group) => Some(&mut group.placement),
            SpecKind::Synth(synth) => Some(&mut synth.placement),
            _ => None,
        }
    }

    /// Addresses this spec depends on: placement target, synth definition
    /// and any bound bus address.
    pub fn requires(&self) -> Vec<&Address> {
        match &self.kind {
            SpecKind::Group(group) => group.placement.target.iter().collect(),
            SpecKind::Synth(synth) => {
                let mut required: Vec<&Address> = synth.placement.target.iter().collect();
                required.push(&synth.synthdef);
                required.extend(synth.kwargs.values().filter_map(|binding| match binding {
                    Binding::Address(address) => Some(address),
                    _ => None,
                }));
                required
            }
            _ => Vec::new(),
        }
    }

    /// True if `old` cannot be turned into `self` in place.
    pub fn requires_recreation(&self, old: &Spec) -> bool {
        match (&self.kind, &old.kind) {
            (SpecKind::Group(_), SpecKind::Group(_)) => false,
            (SpecKind::Synth(new), SpecKind::Synth(old)) => {
                new.synthdef != old.synthdef
                    || ["in_", "out"]
                        .iter()
                        .any(|key| new.kwargs.get(*key) != old.kwargs.get(*key))
            }
            (SpecKind::AudioBus(new), SpecKind::AudioBus(old))
            | (SpecKind::ControlBus(new), SpecKind::ControlBus(old)) => {
                new.channel_count != old.channel_count
            }
            (SpecKind::Buffer(_), SpecKind::Buffer(_))
            | (SpecKind::SynthDef(_), SpecKind::SynthDef(_)) => self != old,
            _ => true,
        }
    }

    /// Realize the entity, recording it in both the pass's new table and the
    /// owner's local cache.
    pub fn create(
        &self,
        tx: &mut Transaction<'_>,
        local: &mut Artifacts,
        old: &Artifacts,
        new: &mut Artifacts,
    ) -> Result<()> {
        let address = &self.address;
        match &self.kind {
            SpecKind::SynthDef(synthdef) => {
                if old.synthdefs.contains_key(address) || new.synthdefs.contains_key(address) {
                    return Ok(());
                }
                tx.add_synthdefs(vec![synthdef.clone()]);
                new.synthdefs.insert(address.clone(), synthdef.clone());
                return Ok(());
            }
            SpecKind::Group(group) => {
                let target = resolve_node(tx, group.placement.target.as_ref(), old, new)?;
                let node = tx.add_group(group.placement.add_action, target);
                new.nodes.insert(address.clone(), node);
                local.nodes.insert(address.clone(), node);
            }
            SpecKind::Synth(synth) => {
                let (set, map) = resolve_kwargs(&synth.kwargs, old, new)?;
                let synthdef = resolve_synthdef(&synth.synthdef, old, new)?.clone();
                let target = resolve_node(tx, synth.placement.target.as_ref(), old, new)?;
                let controls = set
                    .into_iter()
                    .map(|(key, value)| (key, ControlValue::Value(value)))
                    .chain(map.into_iter().map(|(key, bus)| (key, ControlValue::Bus(bus))))
                    .collect();
                let node = tx.add_synth(&synthdef, synth.placement.add_action, target, controls);
                new.nodes.insert(address.clone(), node);
                local.nodes.insert(address.clone(), node);
            }
            SpecKind::AudioBus(bus) => {
                let bus_group = tx.add_bus_group(CalculationRate::Audio, bus.channel_count)?;
                new.audio_buses.insert(address.clone(), bus_group);
                local.audio_buses.insert(address.clone(), bus_group);
            }
            SpecKind::ControlBus(bus) => {
                let bus_group = tx.add_bus_group(CalculationRate::Control, bus.channel_count)?;
                tx.set_bus(bus_group, bus.default);
                new.control_buses.insert(address.clone(), bus_group);
                local.control_buses.insert(address.clone(), bus_group);
            }
            SpecKind::Buffer(buffer) => {
                let id = tx.add_buffer(buffer.channel_count, buffer.frame_count)?;
                new.buffers.insert(address.clone(), id);
                local.buffers.insert(address.clone(), id);
            }
        }
        local.hashes.insert(address.clone(), self.hash()?);
        Ok(())
    }

    /// Issue only the sub-changes implied by the diff against `old_spec`.
    pub fn mutate(
        &self,
        tx: &mut Transaction<'_>,
        local: &mut Artifacts,
        old: &Artifacts,
        new: &Artifacts,
        old_spec: &Spec,
    ) -> Result<()> {
        let address = &self.address;
        match (&self.kind, &old_spec.kind) {
            (SpecKind::Group(group), SpecKind::Group(old_group)) => {
                if group.placement != old_group.placement {
                    let node = existing_node(address, old)?;
                    let target = resolve_node(tx, group.placement.target.as_ref(), old, new)?;
                    tx.move_node(node, group.placement.add_action, target);
                }
            }
            (SpecKind::Synth(synth), SpecKind::Synth(old_synth)) => {
                if synth.placement != old_synth.placement {
                    let node = existing_node(address, old)?;
                    let target = resolve_node(tx, synth.placement.target.as_ref(), old, new)?;
                    tx.move_node(node, synth.placement.add_action, target);
                }
                if synth.kwargs != old_synth.kwargs {
                    let node = existing_node(address, old)?;
                    let (old_set, old_map) = resolve_kwargs_lenient(&old_synth.kwargs, old, new);
                    let (new_set, new_map) = resolve_kwargs(&synth.kwargs, old, new)?;
                    let set: Vec<(String, f64)> = new_set
                        .into_iter()
                        .filter(|(key, value)| old_set.get(key) != Some(value))
                        .collect();
                    let map: Vec<(String, BusGroup)> = new_map
                        .into_iter()
                        .filter(|(key, bus)| old_map.get(key) != Some(bus))
                        .collect();
                    if !map.is_empty() {
                        tx.map_node(node, map);
                    }
                    if !set.is_empty() {
                        tx.set_node(node, set);
                    }
                }
            }
            (SpecKind::ControlBus(bus), SpecKind::ControlBus(old_bus)) => {
                if bus.default != old_bus.default {
                    let bus_group = old
                        .control_buses
                        .get(address)
                        .copied()
                        .ok_or_else(|| EngineError::StaleArtifact(address.clone()))?;
                    tx.set_bus(bus_group, bus.default);
                }
            }
            (SpecKind::AudioBus(_), SpecKind::AudioBus(_)) => {}
            _ => return Err(EngineError::MalformedChange(address.clone())),
        }
        local.hashes.insert(address.clone(), self.hash()?);
        Ok(())
    }

    /// Release the entity.
    ///
    /// Groups rely on their enclosing group's release unless destroyed as a
    /// root with a strategy. Gated synths are released rather than freed.
    pub fn destroy(
        &self,
        tx: &mut Transaction<'_>,
        local: &mut Artifacts,
        old: &mut Artifacts,
        new: &Artifacts,
        reconciliation: Reconciliation,
    ) -> Result<()> {
        if !reconciliation.is_destroy() {
            return Err(EngineError::MalformedChange(self.address.clone()));
        }
        if let SpecKind::SynthDef(_) = self.kind {
            return Ok(());
        }
        let address = &self.address;
        let hash = self.hash()?;
        match local.hashes.get(address) {
            None => return Err(EngineError::StaleArtifact(address.clone())),
            Some(stored) if *stored == hash => {
                local.hashes.remove(address);
                match self.kind.entity() {
                    Entity::Nodes => {
                        local.nodes.remove(address);
                    }
                    Entity::AudioBuses => {
                        local.audio_buses.remove(address);
                    }
                    Entity::ControlBuses => {
                        local.control_buses.remove(address);
                    }
                    Entity::Buffers => {
                        local.buffers.remove(address);
                    }
                    Entity::Synthdefs => {}
                }
            }
            // Recreated this pass; the local entry belongs to the new entity.
            Some(_) => {}
        }

        let stale = || EngineError::StaleArtifact(address.clone());
        match &self.kind {
            SpecKind::Group(group) => {
                let node = old.nodes.remove(address).ok_or_else(stale)?;
                if reconciliation == Reconciliation::DestroyRoot {
                    match group.destroy_strategy.as_ref() {
                        Some(DestroyStrategy::Set(controls)) => {
                            tx.set_node(node, strategy_controls(controls));
                        }
                        Some(DestroyStrategy::Free) => tx.free_node(node),
                        None => {}
                    }
                }
            }
            SpecKind::Synth(synth) => {
                let node = old.nodes.remove(address).ok_or_else(stale)?;
                let has_gate = resolve_synthdef(&synth.synthdef, old, new)?.has_gate;
                match reconciliation {
                    Reconciliation::DestroyShallow | Reconciliation::Recreate => {
                        if has_gate {
                            tx.set_node(
                                node,
                                vec![
                                    ("done_action".to_string(), DoneAction::FreeSynth.value()),
                                    ("gate".to_string(), 0.0),
                                ],
                            );
                        } else {
                            tx.free_node(node);
                        }
                    }
                    Reconciliation::DestroyRoot => match synth.destroy_strategy.as_ref() {
                        Some(DestroyStrategy::Set(controls)) if has_gate => {
                            tx.set_node(node, strategy_controls(controls));
                        }
                        Some(_) => tx.free_node(node),
                        None => {}
                    },
                    Reconciliation::Create | Reconciliation::Mutate => {}
                }
            }
            SpecKind::AudioBus(_) => {
                let bus = old.audio_buses.remove(address).ok_or_else(stale)?;
                tx.free_bus(bus);
            }
            SpecKind::ControlBus(_) => {
                let bus = old.control_buses.remove(address).ok_or_else(stale)?;
                tx.free_bus(bus);
            }
            SpecKind::Buffer(_) => {
                let id = old.buffers.remove(address).ok_or_else(stale)?;
                tx.free_buffer(id);
            }
            SpecKind::SynthDef(_) => {}
        }
        Ok(())
    }
}

fn strategy_controls(controls: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
    controls
        .iter()
        .map(|(key, value)| (key.clone(), *value))
        .collect()
}

fn existing_node(address: &Address, old: &Artifacts) -> Result<NodeId> {
    old.nodes
        .get(address)
        .copied()
        .ok_or_else(|| EngineError::StaleArtifact(address.clone()))
}

/// Look up a placement target, new realizations first. `None` means the
/// context's default group.
fn resolve_node(
    tx: &Transaction<'_>,
    address: Option<&Address>,
    old: &Artifacts,
    new: &Artifacts,
) -> Result<NodeId> {
    match address {
        None => Ok(tx.context().default_group()),
        Some(address) => new
            .nodes
            .get(address)
            .or_else(|| old.nodes.get(address))
            .copied()
            .ok_or_else(|| EngineError::UnresolvedAddress(address.clone())),
    }
}

fn resolve_bus(address: &Address, old: &Artifacts, new: &Artifacts) -> Result<BusGroup> {
    new.audio_buses
        .get(address)
        .or_else(|| new.control_buses.get(address))
        .or_else(|| old.audio_buses.get(address))
        .or_else(|| old.control_buses.get(address))
        .copied()
        .ok_or_else(|| EngineError::UnresolvedAddress(address.clone()))
}

fn resolve_synthdef<'a>(
    address: &Address,
    old: &'a Artifacts,
    new: &'a Artifacts,
) -> Result<&'a SynthDef> {
    new.synthdefs
        .get(address)
        .or_else(|| old.synthdefs.get(address))
        .ok_or_else(|| EngineError::UnresolvedAddress(address.clone()))
}

type SetControls = BTreeMap<String, f64>;
type MapControls = BTreeMap<String, BusGroup>;

/// Split bindings into literal sets and bus maps.
///
/// Audio buses, and the `bus`/`in_`/`out` routing keys, are passed as bus
/// indices. Other control buses are mapped.
fn resolve_kwargs(
    kwargs: &BTreeMap<String, Binding>,
    old: &Artifacts,
    new: &Artifacts,
) -> Result<(SetControls, MapControls)> {
    let mut set = SetControls::new();
    let mut map = MapControls::new();
    for (key, binding) in kwargs {
        let bus = match binding {
            Binding::Value(value) => {
                set.insert(key.clone(), *value);
                continue;
            }
            Binding::Bus(bus) => *bus,
            Binding::Address(address) => resolve_bus(address, old, new)?,
        };
        if matches!(key.as_str(), "bus" | "in_" | "out") || bus.rate == CalculationRate::Audio {
            set.insert(key.clone(), bus.index as f64);
        } else {
            map.insert(key.clone(), bus);
        }
    }
    Ok((set, map))
}

/// Like `resolve_kwargs`, dropping bindings whose bus no longer resolves so
/// they read as changed.
fn resolve_kwargs_lenient(
    kwargs: &BTreeMap<String, Binding>,
    old: &Artifacts,
    new: &Artifacts,
) -> (SetControls, MapControls) {
    let resolvable: BTreeMap<String, Binding> = kwargs
        .iter()
        .filter(|(_, binding)| match binding {
            Binding::Address(address) => resolve_bus(address, old, new).is_ok(),
            _ => true,
        })
        .map(|(key, binding)| (key.clone(), binding.clone()))
        .collect();
    resolve_kwargs(&resolvable, old, new).unwrap_or_default()
}
