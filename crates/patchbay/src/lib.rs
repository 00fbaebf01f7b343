//! Patchbay: declarative audio graph reconciliation
//!
//! Callers edit a tree of mixers, tracks, sends, racks, chains and devices.
//! Each edit runs one reconciliation pass that turns the affected components
//! into specs (the groups, synths, buses and buffers they need), diffs those
//! specs against what is already realized, and applies the difference to one
//! or more synthesis contexts in dependency-safe batches.
//!
//! - **component / session**: the tree and the locked API that edits it
//! - **components**: per-kind spec recipes
//! - **change / sort**: the differ and the batcher
//! - **reconcile**: the pass driver
//! - **context / memory**: the context seam and its in-process implementation

pub mod activation;
pub mod address;
pub mod artifacts;
pub mod change;
pub mod component;
pub mod components;
pub mod context;
pub mod error;
pub mod factory;
pub mod memory;
pub mod order;
pub mod parameter;
pub mod reconcile;
pub mod routing;
pub mod session;
pub mod sort;
pub mod spec;
pub mod synthdef;

pub use address::{Address, Entity};
pub use artifacts::Artifacts;
pub use change::{Reconciliation, SpecChange};
pub use component::{
    Component, ComponentId, ComponentKind, DeviceConfig, ReadMode, TrackInput, TrackOutput,
    WriteMode,
};
pub use context::{
    AddAction, BootStatus, BufferId, Bundle, BusGroup, CalculationRate, Context, ContextError,
    ContextId, ControlValue, NodeId, Request,
};
pub use error::{EngineError, Result};
pub use memory::MemoryContext;
pub use order::GraphOrder;
pub use parameter::{Field, Parameter};
pub use reconcile::{BatchSummary, ChangeSummary, PassReport};
pub use session::Session;
pub use sort::BatchKind;
pub use spec::{Spec, SpecKind};
pub use synthdef::SynthDef;
