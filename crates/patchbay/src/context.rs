//! The synthesis context boundary.
//!
//! A context is an external, stateful synthesis process. It owns groups,
//! synths, buses and buffers, all addressed by small integers. The engine
//! allocates those integers client-side, writes requests into a
//! [`Transaction`], and ships the result as one [`Bundle`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::synthdef::SynthDef;

/// Identifies a context within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub i32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CalculationRate {
    Audio,
    Control,
}

/// Sibling placement relative to a target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddAction {
    AddToHead = 0,
    AddToTail = 1,
    AddBefore = 2,
    AddAfter = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootStatus {
    Offline,
    Booting,
    Online,
    Quitting,
}

/// What a gated synth does once its release finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneAction {
    Nothing = 0,
    FreeSynth = 2,
    FreeSynthAndEnclosingGroup = 14,
}

impl DoneAction {
    /// Control value as sent to the context.
    pub fn value(self) -> f64 {
        self as i32 as f64
    }

    pub fn from_value(value: f64) -> Option<Self> {
        match value as i32 {
            0 => Some(DoneAction::Nothing),
            2 => Some(DoneAction::FreeSynth),
            14 => Some(DoneAction::FreeSynthAndEnclosingGroup),
            _ => None,
        }
    }
}

/// A contiguous run of buses at one calculation rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusGroup {
    pub rate: CalculationRate,
    pub index: i32,
    pub count: usize,
}

impl BusGroup {
    pub fn new(rate: CalculationRate, index: i32, count: usize) -> Self {
        Self { rate, index, count }
    }

    /// Symbol used when mapping a synth control onto this bus group.
    pub fn map_symbol(&self) -> String {
        match self.rate {
            CalculationRate::Audio => format!("a{}", self.index),
            CalculationRate::Control => format!("c{}", self.index),
        }
    }
}

/// A literal value or a bus mapping for one synth control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    Value(f64),
    Bus(BusGroup),
}

/// One primitive operation against a context.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    LoadSynthDefs(Vec<SynthDef>),
    NewGroup {
        id: NodeId,
        action: AddAction,
        target: NodeId,
    },
    NewSynth {
        id: NodeId,
        synthdef: String,
        action: AddAction,
        target: NodeId,
        controls: Vec<(String, ControlValue)>,
    },
    MoveNode {
        id: NodeId,
        action: AddAction,
        target: NodeId,
    },
    SetNode {
        id: NodeId,
        controls: Vec<(String, f64)>,
    },
    MapNode {
        id: NodeId,
        controls: Vec<(String, BusGroup)>,
    },
    FreeNode {
        id: NodeId,
    },
    SetBus {
        bus: BusGroup,
        value: f64,
    },
    FreeBus {
        bus: BusGroup,
    },
    AllocateBuffer {
        id: BufferId,
        channel_count: usize,
        frame_count: usize,
    },
    FreeBuffer {
        id: BufferId,
    },
}

/// Requests sent together. An atomic bundle is applied as one unit by the
/// context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bundle {
    pub requests: Vec<Request>,
    pub atomic: bool,
}

impl Bundle {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context rejected request: {0}")]
    Rejected(String),

    #[error("timed out waiting for context sync")]
    Timeout,

    #[error("context {0} is offline")]
    Offline(ContextId),

    #[error("context ran out of {0}")]
    Exhausted(&'static str),
}

/// A remote synthesis process.
///
/// Allocation is client-side and synchronous; everything that touches the
/// remote process is async.
#[async_trait]
pub trait Context: Send + Sync + fmt::Debug {
    fn id(&self) -> ContextId;

    fn boot_status(&self) -> BootStatus;

    /// The group new top-level nodes are placed into.
    fn default_group(&self) -> NodeId;

    /// Hardware output buses.
    fn audio_output_bus_group(&self) -> BusGroup;

    fn allocate_node_id(&self) -> NodeId;

    fn allocate_bus_group(
        &self,
        rate: CalculationRate,
        count: usize,
    ) -> Result<BusGroup, ContextError>;

    fn allocate_buffer_id(&self) -> Result<BufferId, ContextError>;

    async fn boot(&self) -> Result<(), ContextError>;

    async fn quit(&self) -> Result<(), ContextError>;

    async fn send(&self, bundle: Bundle) -> Result<(), ContextError>;

    /// Barrier: completes once every previously sent bundle has landed.
    async fn sync(&self) -> Result<(), ContextError>;
}

/// Accumulates requests for one bundle, allocating ids through the context.
pub struct Transaction<'a> {
    context: &'a dyn Context,
    requests: Vec<Request>,
}

impl<'a> Transaction<'a> {
    pub fn new(context: &'a dyn Context) -> Self {
        Self {
            context,
            requests: Vec::new(),
        }
    }

    pub fn context(&self) -> &'a dyn Context {
        self.context
    }

    pub fn add_group(&mut self, action: AddAction, target: NodeId) -> NodeId {
        let id = self.context.allocate_node_id();
        self.requests.push(Request::NewGroup { id, action, target });
        id
    }

    pub fn add_synth(
        &mut self,
        synthdef: &SynthDef,
        action: AddAction,
        target: NodeId,
        controls: Vec<(String, ControlValue)>,
    ) -> NodeId {
        let id = self.context.allocate_node_id();
        self.requests.push(Request::NewSynth {
            id,
            synthdef: synthdef.name.clone(),
            action,
            target,
            controls,
        });
        id
    }

    /// Allocate a bus group. Buses need no request until they are written.
    pub fn add_bus_group(
        &mut self,
        rate: CalculationRate,
        count: usize,
    ) -> Result<BusGroup, ContextError> {
        self.context.allocate_bus_group(rate, count)
    }

    pub fn add_buffer(
        &mut self,
        channel_count: usize,
        frame_count: usize,
    ) -> Result<BufferId, ContextError> {
        let id = self.context.allocate_buffer_id()?;
        self.requests.push(Request::AllocateBuffer {
            id,
            channel_count,
            frame_count,
        });
        Ok(id)
    }

    pub fn add_synthdefs(&mut self, synthdefs: Vec<SynthDef>) {
        if !synthdefs.is_empty() {
            self.requests.push(Request::LoadSynthDefs(synthdefs));
        }
    }

    pub fn move_node(&mut self, id: NodeId, action: AddAction, target: NodeId) {
        self.requests.push(Request::MoveNode { id, action, target });
    }

    pub fn set_node(&mut self, id: NodeId, controls: Vec<(String, f64)>) {
        self.requests.push(Request::SetNode { id, controls });
    }

    pub fn map_node(&mut self, id: NodeId, controls: Vec<(String, BusGroup)>) {
        self.requests.push(Request::MapNode { id, controls });
    }

    pub fn free_node(&mut self, id: NodeId) {
        self.requests.push(Request::FreeNode { id });
    }

    pub fn set_bus(&mut self, bus: BusGroup, value: f64) {
        self.requests.push(Request::SetBus { bus, value });
    }

    pub fn free_bus(&mut self, bus: BusGroup) {
        self.requests.push(Request::FreeBus { bus });
    }

    pub fn free_buffer(&mut self, id: BufferId) {
        self.requests.push(Request::FreeBuffer { id });
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn into_bundle(self, atomic: bool) -> Bundle {
        Bundle {
            requests: self.requests,
            atomic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryContext;

    #[test]
    fn test_map_symbol() {
        let control = BusGroup::new(CalculationRate::Control, 12, 1);
        let audio = BusGroup::new(CalculationRate::Audio, 16, 2);
        assert_eq!(control.map_symbol(), "c12");
        assert_eq!(audio.map_symbol(), "a16");
    }

    #[test]
    fn test_transaction_allocates_through_context() {
        let context = MemoryContext::new(ContextId(0));
        let mut tx = Transaction::new(&context);

        let group = tx.add_group(AddAction::AddToHead, context.default_group());
        let synthdef = SynthDef::channel_strip(2);
        let synth = tx.add_synth(&synthdef, AddAction::AddToTail, group, Vec::new());
        let bus = tx.add_bus_group(CalculationRate::Control, 1).unwrap();
        tx.set_bus(bus, 0.5);

        assert_ne!(group, synth);
        let bundle = tx.into_bundle(true);
        assert!(bundle.atomic);
        assert_eq!(bundle.len(), 3);
        assert_eq!(
            bundle.requests[0],
            Request::NewGroup {
                id: group,
                action: AddAction::AddToHead,
                target: context.default_group(),
            }
        );
        assert!(matches!(
            &bundle.requests[1],
            Request::NewSynth { synthdef, .. } if synthdef == "patchbay:channel-strip:2"
        ));
    }

    #[test]
    fn test_empty_synthdef_upload_is_skipped() {
        let context = MemoryContext::new(ContextId(0));
        let mut tx = Transaction::new(&context);
        tx.add_synthdefs(Vec::new());
        assert!(tx.is_empty());
    }
}
