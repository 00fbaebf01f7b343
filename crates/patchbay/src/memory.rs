//! In-process synthesis context.
//!
//! `MemoryContext` allocates ids the way a remote server would, records every
//! bundle it receives, and keeps a simulated node tree so tests can check the
//! effect of a pass and not only the requests it produced.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::context::{
    AddAction, BootStatus, BufferId, Bundle, BusGroup, CalculationRate, Context, ContextError,
    ContextId, ControlValue, DoneAction, NodeId, Request,
};
use crate::synthdef::SynthDef;

const ROOT_NODE: NodeId = NodeId(0);
const DEFAULT_GROUP: NodeId = NodeId(1);
const FIRST_NODE_ID: i32 = 1000;
const PRIVATE_AUDIO_BUS_OFFSET: i32 = 16;
const MAX_BUFFERS: i32 = 1024;

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    Group {
        children: Vec<NodeId>,
    },
    Synth {
        synthdef: String,
        controls: BTreeMap<String, ControlValue>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    parent: Option<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone, Default)]
struct Server {
    nodes: BTreeMap<NodeId, Node>,
    synthdefs: BTreeMap<String, SynthDef>,
    control_buses: BTreeMap<i32, f64>,
    buffers: BTreeSet<BufferId>,
}

impl Server {
    fn booted() -> Self {
        let mut server = Self::default();
        server.nodes.insert(
            ROOT_NODE,
            Node {
                parent: None,
                kind: NodeKind::Group {
                    children: vec![DEFAULT_GROUP],
                },
            },
        );
        server.nodes.insert(
            DEFAULT_GROUP,
            Node {
                parent: Some(ROOT_NODE),
                kind: NodeKind::Group {
                    children: Vec::new(),
                },
            },
        );
        server
    }

    fn children_mut(&mut self, group: NodeId) -> Result<&mut Vec<NodeId>, ContextError> {
        match self.nodes.get_mut(&group).map(|node| &mut node.kind) {
            Some(NodeKind::Group { children }) => Ok(children),
            Some(NodeKind::Synth { .. }) => Err(rejected(format!("node {} is not a group", group))),
            None => Err(rejected(format!("node {} not found", group))),
        }
    }

    fn place(&mut self, id: NodeId, action: AddAction, target: NodeId) -> Result<(), ContextError> {
        let (parent, index) = match action {
            AddAction::AddToHead => (target, 0),
            AddAction::AddToTail => {
                let len = self.children_mut(target)?.len();
                (target, len)
            }
            AddAction::AddBefore | AddAction::AddAfter => {
                let parent = self
                    .nodes
                    .get(&target)
                    .and_then(|node| node.parent)
                    .ok_or_else(|| rejected(format!("node {} has no parent", target)))?;
                let position = self
                    .children_mut(parent)?
                    .iter()
                    .position(|child| *child == target)
                    .ok_or_else(|| rejected(format!("node {} not in its parent", target)))?;
                let offset = usize::from(action == AddAction::AddAfter);
                (parent, position + offset)
            }
        };
        self.children_mut(parent)?.insert(index, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(parent);
        }
        Ok(())
    }

    fn unlink(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|node| node.parent);
        if let Some(parent) = parent {
            if let Ok(children) = self.children_mut(parent) {
                children.retain(|child| *child != id);
            }
        }
    }

    fn free(&mut self, id: NodeId) {
        self.unlink(id);
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(Node {
                kind: NodeKind::Group { children },
                ..
            }) = self.nodes.remove(&id)
            {
                stack.extend(children);
            }
        }
    }

    fn add_node(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        action: AddAction,
        target: NodeId,
    ) -> Result<(), ContextError> {
        if self.nodes.contains_key(&id) {
            return Err(rejected(format!("node {} already exists", id)));
        }
        if !self.nodes.contains_key(&target) {
            return Err(rejected(format!("target node {} not found", target)));
        }
        self.nodes.insert(id, Node { parent: None, kind });
        if let Err(err) = self.place(id, action, target) {
            self.nodes.remove(&id);
            return Err(err);
        }
        Ok(())
    }

    /// Synths under `id`, including `id` itself.
    fn synths_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut synths = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            match self.nodes.get(&id).map(|node| &node.kind) {
                Some(NodeKind::Group { children }) => stack.extend(children.iter().rev()),
                Some(NodeKind::Synth { .. }) => synths.push(id),
                None => {}
            }
        }
        synths
    }

    fn set_controls(&mut self, id: NodeId, controls: &[(String, ControlValue)]) -> Vec<NodeId> {
        let mut released = Vec::new();
        for synth in self.synths_under(id) {
            let gated = match self.nodes.get(&synth).map(|node| &node.kind) {
                Some(NodeKind::Synth { synthdef, .. }) => self
                    .synthdefs
                    .get(synthdef)
                    .is_some_and(|synthdef| synthdef.has_gate),
                _ => false,
            };
            if let Some(Node {
                kind: NodeKind::Synth { controls: current, .. },
                ..
            }) = self.nodes.get_mut(&synth)
            {
                for (key, value) in controls {
                    current.insert(key.clone(), *value);
                }
                let gate_closed = controls
                    .iter()
                    .any(|(key, value)| key == "gate" && *value == ControlValue::Value(0.0));
                if gated && gate_closed {
                    released.push(synth);
                }
            }
        }
        released
    }

    /// Finish releases: the synth's `done_action` decides what is freed.
    fn finish_release(&mut self, synth: NodeId) {
        let Some(node) = self.nodes.get(&synth) else {
            return;
        };
        let done_action = match &node.kind {
            NodeKind::Synth { controls, .. } => match controls.get("done_action") {
                Some(ControlValue::Value(value)) => DoneAction::from_value(*value),
                _ => Some(DoneAction::Nothing),
            },
            NodeKind::Group { .. } => None,
        };
        let parent = node.parent;
        match done_action {
            Some(DoneAction::FreeSynth) => self.free(synth),
            Some(DoneAction::FreeSynthAndEnclosingGroup) => match parent {
                Some(parent) if parent != ROOT_NODE && parent != DEFAULT_GROUP => self.free(parent),
                _ => self.free(synth),
            },
            Some(DoneAction::Nothing) | None => {}
        }
    }

    fn apply(&mut self, request: &Request) -> Result<Vec<NodeId>, ContextError> {
        match request {
            Request::LoadSynthDefs(synthdefs) => {
                for synthdef in synthdefs {
                    self.synthdefs.insert(synthdef.name.clone(), synthdef.clone());
                }
            }
            Request::NewGroup { id, action, target } => {
                self.add_node(
                    *id,
                    NodeKind::Group {
                        children: Vec::new(),
                    },
                    *action,
                    *target,
                )?;
            }
            Request::NewSynth {
                id,
                synthdef,
                action,
                target,
                controls,
            } => {
                if !self.synthdefs.contains_key(synthdef) {
                    return Err(rejected(format!("synthdef {} not loaded", synthdef)));
                }
                self.add_node(
                    *id,
                    NodeKind::Synth {
                        synthdef: synthdef.clone(),
                        controls: controls.iter().cloned().collect(),
                    },
                    *action,
                    *target,
                )?;
            }
            Request::MoveNode { id, action, target } => {
                if !self.nodes.contains_key(id) {
                    return Err(rejected(format!("node {} not found", id)));
                }
                self.unlink(*id);
                self.place(*id, *action, *target)?;
            }
            // Freed nodes may still receive sets and maps sent in the same
            // pass; the server ignores those.
            Request::SetNode { id, controls } => {
                let controls: Vec<(String, ControlValue)> = controls
                    .iter()
                    .map(|(key, value)| (key.clone(), ControlValue::Value(*value)))
                    .collect();
                return Ok(self.set_controls(*id, &controls));
            }
            Request::MapNode { id, controls } => {
                let controls: Vec<(String, ControlValue)> = controls
                    .iter()
                    .map(|(key, bus)| (key.clone(), ControlValue::Bus(*bus)))
                    .collect();
                self.set_controls(*id, &controls);
            }
            Request::FreeNode { id } => self.free(*id),
            Request::SetBus { bus, value } => {
                if bus.rate == CalculationRate::Control {
                    for index in bus.index..bus.index + bus.count as i32 {
                        self.control_buses.insert(index, *value);
                    }
                }
            }
            Request::FreeBus { bus } => {
                if bus.rate == CalculationRate::Control {
                    for index in bus.index..bus.index + bus.count as i32 {
                        self.control_buses.remove(&index);
                    }
                }
            }
            Request::AllocateBuffer { id, .. } => {
                if !self.buffers.insert(*id) {
                    return Err(rejected(format!("buffer {} already allocated", id.0)));
                }
            }
            Request::FreeBuffer { id } => {
                self.buffers.remove(id);
            }
        }
        Ok(Vec::new())
    }

    fn dump(&self) -> String {
        let mut lines = Vec::new();
        let mut stack = vec![(ROOT_NODE, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let indent = "    ".repeat(depth);
            match &node.kind {
                NodeKind::Group { children } => {
                    lines.push(format!("{}{} group", indent, id));
                    for child in children.iter().rev() {
                        stack.push((*child, depth + 1));
                    }
                }
                NodeKind::Synth { synthdef, .. } => {
                    lines.push(format!("{}{} {}", indent, id, synthdef));
                }
            }
        }
        lines.join("\n")
    }
}

fn rejected(message: String) -> ContextError {
    ContextError::Rejected(message)
}

#[derive(Debug)]
struct State {
    boot_status: BootStatus,
    server: Server,
    next_node: i32,
    next_audio_bus: i32,
    next_control_bus: i32,
    next_buffer: i32,
    log: Vec<Bundle>,
    syncs: usize,
    fail_next_send: Option<String>,
}

/// A simulated synthesis server.
#[derive(Debug)]
pub struct MemoryContext {
    id: ContextId,
    output_channels: usize,
    state: Mutex<State>,
}

impl MemoryContext {
    pub fn new(id: ContextId) -> Self {
        Self::with_output_channels(id, 2)
    }

    pub fn with_output_channels(id: ContextId, output_channels: usize) -> Self {
        Self {
            id,
            output_channels,
            state: Mutex::new(State {
                boot_status: BootStatus::Offline,
                server: Server::default(),
                next_node: FIRST_NODE_ID,
                next_audio_bus: PRIVATE_AUDIO_BUS_OFFSET,
                next_control_bus: 0,
                next_buffer: 0,
                log: Vec::new(),
                syncs: 0,
                fail_next_send: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject the next bundle with `message` without applying any of it.
    pub fn fail_next_send(&self, message: &str) {
        self.state().fail_next_send = Some(message.to_string());
    }

    /// Every bundle applied so far, oldest first.
    pub fn bundles(&self) -> Vec<Bundle> {
        self.state().log.clone()
    }

    /// Requests of every applied bundle, flattened.
    pub fn requests(&self) -> Vec<Request> {
        self.state()
            .log
            .iter()
            .flat_map(|bundle| bundle.requests.iter().cloned())
            .collect()
    }

    pub fn take_log(&self) -> Vec<Bundle> {
        std::mem::take(&mut self.state().log)
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn sync_count(&self) -> usize {
        self.state().syncs
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.state().server.nodes.contains_key(&id)
    }

    pub fn node_parent(&self, id: NodeId) -> Option<NodeId> {
        self.state().server.nodes.get(&id).and_then(|node| node.parent)
    }

    pub fn group_children(&self, id: NodeId) -> Vec<NodeId> {
        match self.state().server.nodes.get(&id).map(|node| &node.kind) {
            Some(NodeKind::Group { children }) => children.clone(),
            _ => Vec::new(),
        }
    }

    /// Name of the synth definition a synth node runs.
    pub fn synth_name(&self, id: NodeId) -> Option<String> {
        match self.state().server.nodes.get(&id).map(|node| &node.kind) {
            Some(NodeKind::Synth { synthdef, .. }) => Some(synthdef.clone()),
            _ => None,
        }
    }

    pub fn node_control(&self, id: NodeId, key: &str) -> Option<ControlValue> {
        match self.state().server.nodes.get(&id).map(|node| &node.kind) {
            Some(NodeKind::Synth { controls, .. }) => controls.get(key).copied(),
            _ => None,
        }
    }

    /// Value of the first channel of a control bus group.
    pub fn control_bus_value(&self, bus: BusGroup) -> Option<f64> {
        self.state().server.control_buses.get(&bus.index).copied()
    }

    pub fn node_count(&self) -> usize {
        self.state().server.nodes.len()
    }

    pub fn dump_tree(&self) -> String {
        self.state().server.dump()
    }
}

#[async_trait]
impl Context for MemoryContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn boot_status(&self) -> BootStatus {
        self.state().boot_status
    }

    fn default_group(&self) -> NodeId {
        DEFAULT_GROUP
    }

    fn audio_output_bus_group(&self) -> BusGroup {
        BusGroup::new(CalculationRate::Audio, 0, self.output_channels)
    }

    fn allocate_node_id(&self) -> NodeId {
        let mut state = self.state();
        let id = NodeId(state.next_node);
        state.next_node += 1;
        id
    }

    fn allocate_bus_group(
        &self,
        rate: CalculationRate,
        count: usize,
    ) -> Result<BusGroup, ContextError> {
        let mut state = self.state();
        let next = match rate {
            CalculationRate::Audio => &mut state.next_audio_bus,
            CalculationRate::Control => &mut state.next_control_bus,
        };
        let index = *next;
        *next += count as i32;
        Ok(BusGroup::new(rate, index, count))
    }

    fn allocate_buffer_id(&self) -> Result<BufferId, ContextError> {
        let mut state = self.state();
        if state.next_buffer >= MAX_BUFFERS {
            return Err(ContextError::Exhausted("buffers"));
        }
        let id = BufferId(state.next_buffer);
        state.next_buffer += 1;
        Ok(id)
    }

    async fn boot(&self) -> Result<(), ContextError> {
        let mut state = self.state();
        if state.boot_status != BootStatus::Online {
            state.server = Server::booted();
            state.boot_status = BootStatus::Online;
            debug!(context = %self.id, "memory context booted");
        }
        Ok(())
    }

    async fn quit(&self) -> Result<(), ContextError> {
        let mut state = self.state();
        state.server = Server::default();
        state.boot_status = BootStatus::Offline;
        debug!(context = %self.id, "memory context quit");
        Ok(())
    }

    async fn send(&self, bundle: Bundle) -> Result<(), ContextError> {
        let mut state = self.state();
        if state.boot_status != BootStatus::Online {
            return Err(ContextError::Offline(self.id));
        }
        if let Some(message) = state.fail_next_send.take() {
            return Err(ContextError::Rejected(message));
        }

        // Apply to a copy so a rejected bundle leaves no trace.
        let mut server = state.server.clone();
        let mut released = Vec::new();
        for request in &bundle.requests {
            released.extend(server.apply(request)?);
        }
        for synth in released {
            server.finish_release(synth);
        }
        state.server = server;
        state.log.push(bundle);
        Ok(())
    }

    async fn sync(&self) -> Result<(), ContextError> {
        let mut state = self.state();
        if state.boot_status != BootStatus::Online {
            return Err(ContextError::Offline(self.id));
        }
        state.syncs += 1;
        Ok(())
    }
}
