//! The component tree.
//!
//! Components live in an arena keyed by [`ComponentId`]. Parent, child and
//! connection links are ids, so deleting a subtree is removing its ids from
//! the arena and scrubbing the links that point at them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::artifacts::Artifacts;
use crate::context::{BusGroup, ContextId};
use crate::error::{EngineError, Result};
use crate::order::GraphOrder;
use crate::parameter::{Field, Parameter};
use crate::spec::Spec;

/// Identity of a component. Assigned once per session, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a routing edge a connection entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Io {
    /// The partner reads from this component.
    Read,
    /// The partner writes into this component.
    Write,
}

/// How a rack's chains read the rack's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    Ignore,
    Replace,
}

/// How a rack writes its mix back into its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    Mix,
    Replace,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackInput {
    None,
    Bus(BusGroup),
    Track(ComponentId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutput {
    None,
    /// The track's parent container.
    Default,
    Bus(BusGroup),
    Container(ComponentId),
}

/// A resolved routing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Bus(BusGroup),
    Component(ComponentId),
}

/// Parameter declaration for a device.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    pub field: Field,
    pub has_bus: bool,
}

/// A buffer a device owns for as long as it exists.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDef {
    pub name: String,
    pub channel_count: usize,
    pub frame_count: usize,
}

/// Describes a device: its synth definition family and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub name: String,
    pub parameters: Vec<ParameterDef>,
    pub buffers: Vec<BufferDef>,
}

impl DeviceConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, field: Field, has_bus: bool) -> Self {
        self.parameters.push(ParameterDef {
            name: name.to_string(),
            field,
            has_bus,
        });
        self
    }

    pub fn with_buffer(mut self, name: &str, channel_count: usize, frame_count: usize) -> Self {
        self.buffers.push(BufferDef {
            name: name.to_string(),
            channel_count,
            frame_count,
        });
        self
    }

    /// Writes a constant signal, for checking routing.
    pub fn signal_tester() -> Self {
        Self::new("dc-tester").with_parameter(
            "dc",
            Field::Float {
                default: 1.0,
                minimum: -1.0,
                maximum: 1.0,
            },
            false,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub tracks: Vec<ComponentId>,
    pub devices: Vec<ComponentId>,
    pub sends: Vec<ComponentId>,
    pub input: TrackInput,
    pub cached_input: Option<Endpoint>,
    pub output: TrackOutput,
    pub cached_output: Option<Endpoint>,
    pub muted: bool,
    pub soloed: bool,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            devices: Vec::new(),
            sends: Vec::new(),
            input: TrackInput::None,
            cached_input: None,
            output: TrackOutput::Default,
            cached_output: None,
            muted: false,
            soloed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rack {
    pub chains: Vec<ComponentId>,
    pub read_mode: ReadMode,
    pub write_mode: WriteMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    Mixer {
        tracks: Vec<ComponentId>,
        devices: Vec<ComponentId>,
    },
    Track(Track),
    Send {
        postfader: bool,
        target: ComponentId,
    },
    Rack(Rack),
    Chain {
        devices: Vec<ComponentId>,
    },
    Device(DeviceConfig),
}

/// The list of a parent a child is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Tracks,
    Devices,
    Sends,
    Chains,
}

impl ComponentKind {
    pub fn mixer() -> Self {
        ComponentKind::Mixer {
            tracks: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn track() -> Self {
        ComponentKind::Track(Track::default())
    }

    pub fn rack(read_mode: ReadMode, write_mode: WriteMode) -> Self {
        ComponentKind::Rack(Rack {
            chains: Vec::new(),
            read_mode,
            write_mode,
        })
    }

    pub fn chain() -> Self {
        ComponentKind::Chain {
            devices: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::Mixer { .. } => "mixer",
            ComponentKind::Track(_) => "track",
            ComponentKind::Send { .. } => "send",
            ComponentKind::Rack(_) => "rack",
            ComponentKind::Chain { .. } => "chain",
            ComponentKind::Device(_) => "device",
        }
    }

    /// Address category, as used in numeric and nested addresses.
    pub fn category(&self) -> &'static str {
        match self {
            ComponentKind::Mixer { .. } => "mixers",
            ComponentKind::Track(_) => "tracks",
            ComponentKind::Send { .. } => "sends",
            ComponentKind::Rack(_) | ComponentKind::Device(_) => "devices",
            ComponentKind::Chain { .. } => "chains",
        }
    }

    fn slot(&self) -> Option<Slot> {
        match self {
            ComponentKind::Mixer { .. } => None,
            ComponentKind::Track(_) => Some(Slot::Tracks),
            ComponentKind::Send { .. } => Some(Slot::Sends),
            ComponentKind::Rack(_) | ComponentKind::Device(_) => Some(Slot::Devices),
            ComponentKind::Chain { .. } => Some(Slot::Chains),
        }
    }

    fn slot_list(&self, slot: Slot) -> Option<&Vec<ComponentId>> {
        match (self, slot) {
            (ComponentKind::Mixer { tracks, .. }, Slot::Tracks) => Some(tracks),
            (ComponentKind::Mixer { devices, .. }, Slot::Devices) => Some(devices),
            (ComponentKind::Track(track), Slot::Tracks) => Some(&track.tracks),
            (ComponentKind::Track(track), Slot::Devices) => Some(&track.devices),
            (ComponentKind::Track(track), Slot::Sends) => Some(&track.sends),
            (ComponentKind::Rack(rack), Slot::Chains) => Some(&rack.chains),
            (ComponentKind::Chain { devices }, Slot::Devices) => Some(devices),
            _ => None,
        }
    }

    fn slot_list_mut(&mut self, slot: Slot) -> Option<&mut Vec<ComponentId>> {
        match (self, slot) {
            (ComponentKind::Mixer { tracks, .. }, Slot::Tracks) => Some(tracks),
            (ComponentKind::Mixer { devices, .. }, Slot::Devices) => Some(devices),
            (ComponentKind::Track(track), Slot::Tracks) => Some(&mut track.tracks),
            (ComponentKind::Track(track), Slot::Devices) => Some(&mut track.devices),
            (ComponentKind::Track(track), Slot::Sends) => Some(&mut track.sends),
            (ComponentKind::Rack(rack), Slot::Chains) => Some(&mut rack.chains),
            (ComponentKind::Chain { devices }, Slot::Devices) => Some(devices),
            _ => None,
        }
    }

    /// Children in processing order.
    pub fn children(&self) -> Vec<ComponentId> {
        match self {
            ComponentKind::Mixer { tracks, devices } => {
                tracks.iter().chain(devices).copied().collect()
            }
            ComponentKind::Track(track) => track
                .tracks
                .iter()
                .chain(&track.devices)
                .chain(&track.sends)
                .copied()
                .collect(),
            ComponentKind::Rack(rack) => rack.chains.clone(),
            ComponentKind::Chain { devices } => devices.clone(),
            ComponentKind::Send { .. } | ComponentKind::Device(_) => Vec::new(),
        }
    }

    pub fn tracks(&self) -> Option<&Vec<ComponentId>> {
        self.slot_list(Slot::Tracks)
    }

    pub fn devices(&self) -> Option<&Vec<ComponentId>> {
        self.slot_list(Slot::Devices)
    }

    pub fn is_track_container(&self) -> bool {
        self.tracks().is_some()
    }

    pub fn is_device_container(&self) -> bool {
        self.devices().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Component {
    pub id: ComponentId,
    pub name: Option<String>,
    pub parent: Option<ComponentId>,
    /// Explicit channel count; `None` inherits.
    pub channel_count: Option<usize>,
    pub is_active: bool,
    pub parameters: BTreeMap<String, Parameter>,
    pub connections: BTreeMap<(ComponentId, Role), Io>,
    /// The context the component was last realized against.
    pub context: Option<ContextId>,
    /// Specs realized by the last pass that touched this component.
    pub specs: Vec<Spec>,
    /// Local cache of this component's realized entities.
    pub artifacts: Artifacts,
    pub kind: ComponentKind,
}

impl Component {
    pub fn new(id: ComponentId, name: Option<String>, kind: ComponentKind) -> Self {
        let mut parameters = BTreeMap::new();
        match &kind {
            ComponentKind::Mixer { .. }
            | ComponentKind::Track(_)
            | ComponentKind::Send { .. }
            | ComponentKind::Chain { .. } => {
                parameters.insert("gain".to_string(), Parameter::gain());
            }
            ComponentKind::Rack(_) => {
                let mix = Field::Float {
                    default: 1.0,
                    minimum: 0.0,
                    maximum: 1.0,
                };
                parameters.insert("mix".to_string(), Parameter::new("mix", mix, true));
            }
            ComponentKind::Device(config) => {
                for def in &config.parameters {
                    parameters.insert(
                        def.name.clone(),
                        Parameter::new(&def.name, def.field, def.has_bus),
                    );
                }
            }
        }
        Self {
            id,
            name,
            parent: None,
            channel_count: None,
            is_active: true,
            parameters,
            connections: BTreeMap::new(),
            context: None,
            specs: Vec::new(),
            artifacts: Artifacts::new(),
            kind,
        }
    }

    /// Stable address prefix: category plus id.
    pub fn numeric_address(&self) -> String {
        format!("{}[{}]", self.kind.category(), self.id)
    }

    pub fn track(&self) -> Option<&Track> {
        match &self.kind {
            ComponentKind::Track(track) => Some(track),
            _ => None,
        }
    }

    pub fn track_mut(&mut self) -> Option<&mut Track> {
        match &mut self.kind {
            ComponentKind::Track(track) => Some(track),
            _ => None,
        }
    }

    pub fn rack(&self) -> Option<&Rack> {
        match &self.kind {
            ComponentKind::Rack(rack) => Some(rack),
            _ => None,
        }
    }

    pub fn rack_mut(&mut self) -> Option<&mut Rack> {
        match &mut self.kind {
            ComponentKind::Rack(rack) => Some(rack),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("<{} {} {:?}>", self.kind.name(), self.id, name),
            None => format!("<{} {}>", self.kind.name(), self.id),
        }
    }
}

/// Pre-images kept while a pass may still fail.
#[derive(Debug)]
struct Journal {
    components: HashMap<ComponentId, Component>,
    mixers: Vec<ComponentId>,
}

/// Arena of components, plus the ordered list of mixers.
#[derive(Debug)]
pub struct Tree {
    components: HashMap<ComponentId, Component>,
    mixers: Vec<ComponentId>,
    next_id: u64,
    default_channel_count: usize,
    journal: Option<Journal>,
}

impl Tree {
    pub fn new(default_channel_count: usize) -> Self {
        Self {
            components: HashMap::new(),
            mixers: Vec::new(),
            next_id: 1,
            default_channel_count,
            journal: None,
        }
    }

    pub fn mixers(&self) -> &[ComponentId] {
        &self.mixers
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.components.contains_key(&id)
    }

    pub fn get(&self, id: ComponentId) -> Result<&Component> {
        self.components
            .get(&id)
            .ok_or(EngineError::ComponentNotFound(id))
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        let component = self
            .components
            .get_mut(&id)
            .ok_or(EngineError::ComponentNotFound(id))?;
        if let Some(journal) = self.journal.as_mut() {
            journal
                .components
                .entry(id)
                .or_insert_with(|| component.clone());
        }
        Ok(component)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    fn allocate_id(&mut self) -> ComponentId {
        let id = ComponentId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_mixer(&mut self, name: Option<String>) -> ComponentId {
        let id = self.allocate_id();
        self.components
            .insert(id, Component::new(id, name, ComponentKind::mixer()));
        self.mixers.push(id);
        id
    }

    /// Create a component and append it to `parent`'s matching child list.
    pub fn add_child(
        &mut self,
        parent: ComponentId,
        name: Option<String>,
        kind: ComponentKind,
    ) -> Result<ComponentId> {
        let id = ComponentId(self.next_id);
        let component = Component::new(id, name, kind);
        let len = self.slot_len(parent, &component.kind)?;
        self.next_id += 1;
        self.components.insert(id, component);
        self.attach(id, parent, len)?;
        Ok(id)
    }

    fn slot_len(&self, parent: ComponentId, child: &ComponentKind) -> Result<usize> {
        let parent_component = self.get(parent)?;
        child
            .slot()
            .and_then(|slot| parent_component.kind.slot_list(slot))
            .map(Vec::len)
            .ok_or(EngineError::InvalidKind {
                component: parent,
                expected: child.category(),
                actual: parent_component.kind.name(),
            })
    }

    /// Insert a detached component into `parent` at `index`.
    pub fn attach(&mut self, id: ComponentId, parent: ComponentId, index: usize) -> Result<()> {
        let slot = self.get(id)?.kind.slot();
        let parent_component = self.get_mut(parent)?;
        let actual = parent_component.kind.name();
        let list = slot
            .and_then(|slot| parent_component.kind.slot_list_mut(slot))
            .ok_or(EngineError::InvalidKind {
                component: parent,
                expected: "container",
                actual,
            })?;
        let index = index.min(list.len());
        list.insert(index, id);
        self.get_mut(id)?.parent = Some(parent);
        Ok(())
    }

    /// Start recording the state of every component before its first
    /// change through [`Tree::get_mut`], and the mixer list.
    pub fn begin_journal(&mut self) {
        self.journal = Some(Journal {
            components: HashMap::new(),
            mixers: self.mixers.clone(),
        });
    }

    /// Stop recording and keep every change.
    pub fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Stop recording and put back every component changed since
    /// [`Tree::begin_journal`].
    pub fn rollback_journal(&mut self) {
        if let Some(journal) = self.journal.take() {
            self.components.extend(journal.components);
            self.mixers = journal.mixers;
        }
    }

    /// Remove a component from its parent's child list (or the mixer list).
    /// The subtree stays in the arena.
    pub fn detach(&mut self, id: ComponentId) -> Result<()> {
        let component = self.get(id)?;
        let slot = component.kind.slot();
        match component.parent {
            Some(parent) => {
                if let Some(list) = slot.and_then(|slot| {
                    self.get_mut(parent)
                        .ok()
                        .and_then(|parent| parent.kind.slot_list_mut(slot))
                }) {
                    list.retain(|child| *child != id);
                }
            }
            None => self.mixers.retain(|mixer| *mixer != id),
        }
        self.get_mut(id)?.parent = None;
        Ok(())
    }

    /// Drop a detached subtree from the arena, returning the removed ids.
    pub fn remove_subtree(&mut self, root: ComponentId) -> Vec<ComponentId> {
        let removed = self.walk(root).unwrap_or_default();
        for id in &removed {
            self.components.remove(id);
        }
        let gone: HashSet<ComponentId> = removed.iter().copied().collect();
        for component in self.components.values_mut() {
            component
                .connections
                .retain(|(partner, _), _| !gone.contains(partner));
        }
        removed
    }

    pub fn children(&self, id: ComponentId) -> Result<Vec<ComponentId>> {
        Ok(self.get(id)?.kind.children())
    }

    /// The component followed by its ancestors, innermost first.
    pub fn parentage(&self, id: ComponentId) -> Result<Vec<ComponentId>> {
        let mut parentage = vec![id];
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            parentage.push(parent);
            current = self.get(parent)?;
        }
        Ok(parentage)
    }

    /// True if `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: ComponentId, id: ComponentId) -> bool {
        self.parentage(id)
            .map(|parentage| parentage.contains(&ancestor))
            .unwrap_or(false)
    }

    /// The attached mixer at the top of `id`'s parentage.
    pub fn mixer_of(&self, id: ComponentId) -> Result<ComponentId> {
        let top = self
            .parentage(id)?
            .last()
            .copied()
            .ok_or(EngineError::Detached(id))?;
        if self.mixers.contains(&top) {
            Ok(top)
        } else {
            Err(EngineError::Detached(id))
        }
    }

    /// Position of `id` among its parent's children, in processing order.
    pub fn child_index(&self, id: ComponentId) -> Result<usize> {
        match self.get(id)?.parent {
            Some(parent) => self
                .get(parent)?
                .kind
                .children()
                .iter()
                .position(|child| *child == id)
                .ok_or(EngineError::Detached(id)),
            None => self
                .mixers
                .iter()
                .position(|mixer| *mixer == id)
                .ok_or(EngineError::Detached(id)),
        }
    }

    /// The sibling list `id` lives in, and its index there.
    pub fn siblings(&self, id: ComponentId) -> Result<(Vec<ComponentId>, usize)> {
        let component = self.get(id)?;
        let parent = component.parent.ok_or(EngineError::Detached(id))?;
        let list = component
            .kind
            .slot()
            .and_then(|slot| self.get(parent).ok()?.kind.slot_list(slot))
            .ok_or(EngineError::Detached(id))?;
        let index = list
            .iter()
            .position(|sibling| *sibling == id)
            .ok_or(EngineError::Detached(id))?;
        Ok((list.clone(), index))
    }

    /// The sibling processed immediately before `id` in its list.
    pub fn previous_sibling(&self, id: ComponentId) -> Result<Option<ComponentId>> {
        let (siblings, index) = self.siblings(id)?;
        Ok(index.checked_sub(1).map(|previous| siblings[previous]))
    }

    pub fn graph_order(&self, id: ComponentId) -> Result<GraphOrder> {
        let mut order = Vec::new();
        for ancestor in self.parentage(id)?.into_iter().rev() {
            order.push(self.child_index(ancestor)?);
        }
        Ok(order)
    }

    /// Order used when `id` writes somewhere. A send writes from its track.
    pub fn feedback_graph_order(&self, id: ComponentId) -> Result<GraphOrder> {
        let component = self.get(id)?;
        match (&component.kind, component.parent) {
            (ComponentKind::Send { .. }, Some(parent)) => self.graph_order(parent),
            _ => self.graph_order(id),
        }
    }

    /// Walk up until an explicit channel count is found.
    pub fn effective_channel_count(&self, id: ComponentId) -> Result<usize> {
        for ancestor in self.parentage(id)? {
            if let Some(channel_count) = self.get(ancestor)?.channel_count {
                return Ok(channel_count);
            }
        }
        Ok(self.default_channel_count)
    }

    /// Pre-order walk of a subtree.
    pub fn walk(&self, root: ComponentId) -> Result<Vec<ComponentId>> {
        let mut walked = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let children = self.get(id)?.kind.children();
            walked.push(id);
            stack.extend(children.into_iter().rev());
        }
        Ok(walked)
    }

    pub fn numeric_address(&self, id: ComponentId) -> Result<String> {
        Ok(self.get(id)?.numeric_address())
    }

    /// Position-based address, e.g. `session.mixers[0].tracks[1]`.
    pub fn nested_address(&self, id: ComponentId) -> Result<String> {
        let component = self.get(id)?;
        let category = component.kind.category();
        if let ComponentKind::Mixer { .. } = component.kind {
            return Ok(match self.mixers.iter().position(|mixer| *mixer == id) {
                Some(index) => format!("session.mixers[{}]", index),
                None => "mixers[?]".to_string(),
            });
        }
        match (component.parent, self.siblings(id)) {
            (Some(parent), Ok((_, index))) => Ok(format!(
                "{}.{}[{}]",
                self.nested_address(parent)?,
                category,
                index
            )),
            _ => Ok(format!("{}[?]", category)),
        }
    }

    /// Indented listing of a subtree.
    pub fn dump(&self, root: ComponentId) -> Result<String> {
        let mut lines = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let component = self.get(id)?;
            lines.push(format!("{}{}", "    ".repeat(depth), component.describe()));
            for child in component.kind.children().into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// mixer
    ///     track a
    ///         track a1
    ///     track b
    ///     device
    fn tree() -> (Tree, [ComponentId; 5]) {
        let mut tree = Tree::new(2);
        let mixer = tree.add_mixer(None);
        let a = tree
            .add_child(mixer, Some("a".into()), ComponentKind::track())
            .unwrap();
        let a1 = tree.add_child(a, None, ComponentKind::track()).unwrap();
        let b = tree.add_child(mixer, None, ComponentKind::track()).unwrap();
        let device = tree
            .add_child(
                mixer,
                None,
                ComponentKind::Device(DeviceConfig::signal_tester()),
            )
            .unwrap();
        (tree, [mixer, a, a1, b, device])
    }

    #[test]
    fn test_ids_start_at_one() {
        let (_, [mixer, a, a1, b, device]) = tree();
        assert_eq!(mixer, ComponentId(1));
        assert_eq!(a, ComponentId(2));
        assert_eq!(a1, ComponentId(3));
        assert_eq!(b, ComponentId(4));
        assert_eq!(device, ComponentId(5));
    }

    #[test]
    fn test_addresses() {
        let (tree, [mixer, _, a1, _, device]) = tree();
        assert_eq!(tree.numeric_address(a1).unwrap(), "tracks[3]");
        assert_eq!(tree.numeric_address(device).unwrap(), "devices[5]");
        assert_eq!(tree.numeric_address(mixer).unwrap(), "mixers[1]");
        assert_eq!(
            tree.nested_address(a1).unwrap(),
            "session.mixers[0].tracks[0].tracks[0]"
        );
        assert_eq!(
            tree.nested_address(device).unwrap(),
            "session.mixers[0].devices[0]"
        );
    }

    #[test]
    fn test_graph_order_counts_all_children() {
        let (tree, [mixer, a, a1, b, device]) = tree();
        assert_eq!(tree.graph_order(mixer).unwrap(), vec![0]);
        assert_eq!(tree.graph_order(a).unwrap(), vec![0, 0]);
        assert_eq!(tree.graph_order(a1).unwrap(), vec![0, 0, 0]);
        assert_eq!(tree.graph_order(b).unwrap(), vec![0, 1]);
        assert_eq!(tree.graph_order(device).unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_walk_is_preorder() {
        let (tree, [mixer, a, a1, b, device]) = tree();
        assert_eq!(tree.walk(mixer).unwrap(), vec![mixer, a, a1, b, device]);
    }

    #[test]
    fn test_effective_channel_count_inherits() {
        let (mut tree, [mixer, a, a1, b, _]) = tree();
        assert_eq!(tree.effective_channel_count(a1).unwrap(), 2);
        tree.get_mut(a).unwrap().channel_count = Some(4);
        assert_eq!(tree.effective_channel_count(a1).unwrap(), 4);
        assert_eq!(tree.effective_channel_count(b).unwrap(), 2);
        tree.get_mut(mixer).unwrap().channel_count = Some(8);
        assert_eq!(tree.effective_channel_count(b).unwrap(), 8);
    }

    #[test]
    fn test_detach_and_remove() {
        let (mut tree, [mixer, a, a1, b, _]) = tree();
        tree.get_mut(b)
            .unwrap()
            .connections
            .insert((a1, Role::Input), Io::Read);
        tree.detach(a).unwrap();
        assert_eq!(tree.nested_address(a).unwrap(), "tracks[?]");
        assert!(matches!(tree.mixer_of(a1), Err(EngineError::Detached(_))));
        assert_eq!(tree.graph_order(b).unwrap(), vec![0, 0]);

        let removed = tree.remove_subtree(a);
        assert_eq!(removed, vec![a, a1]);
        assert!(!tree.contains(a1));
        assert!(tree.get(b).unwrap().connections.is_empty());
        assert_eq!(tree.children(mixer).unwrap().len(), 2);
    }

    #[test]
    fn test_rollback_restores_changed_components() {
        let (mut tree, [mixer, a, a1, b, _]) = tree();
        let second = tree.add_mixer(None);

        tree.begin_journal();
        tree.get_mut(b).unwrap().track_mut().unwrap().input = TrackInput::Track(a1);
        tree.get_mut(a1)
            .unwrap()
            .connections
            .insert((b, Role::Input), Io::Read);
        tree.detach(a).unwrap();
        tree.detach(mixer).unwrap();
        tree.rollback_journal();

        assert_eq!(tree.mixers(), &[mixer, second]);
        assert_eq!(tree.get(mixer).unwrap().kind.tracks(), Some(&vec![a, b]));
        assert_eq!(tree.mixer_of(a1).unwrap(), mixer);
        assert_eq!(tree.get(b).unwrap().track().unwrap().input, TrackInput::None);
        assert!(tree.get(a1).unwrap().connections.is_empty());

        tree.begin_journal();
        tree.detach(a).unwrap();
        tree.commit_journal();
        tree.rollback_journal();
        assert_eq!(tree.get(mixer).unwrap().kind.tracks(), Some(&vec![b]));
    }

    #[test]
    fn test_children_must_fit_their_parent() {
        let (mut tree, [_, _, _, _, device]) = tree();
        let err = tree
            .add_child(device, None, ComponentKind::track())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidKind { .. }));
    }

    #[test]
    fn test_previous_sibling() {
        let (tree, [_, a, a1, b, device]) = tree();
        assert_eq!(tree.previous_sibling(a).unwrap(), None);
        assert_eq!(tree.previous_sibling(b).unwrap(), Some(a));
        assert_eq!(tree.previous_sibling(a1).unwrap(), None);
        // Devices are ordered separately from tracks.
        assert_eq!(tree.previous_sibling(device).unwrap(), None);
    }

    #[test]
    fn test_dump() {
        let (tree, [mixer, ..]) = tree();
        assert_eq!(
            tree.dump(mixer).unwrap(),
            "<mixer 1>\n    <track 2 \"a\">\n        <track 3>\n    <track 4>\n    <device 5>"
        );
    }
}
