//! Engine errors.
//!
//! Variants fall into four groups: tree-mutation preconditions (raised before
//! anything is resolved), unresolvable addresses, stale-state assertions, and
//! failures reported by a synthesis context.

use thiserror::Error;

use crate::address::Address;
use crate::component::ComponentId;
use crate::context::{ContextError, ContextId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("component not found: {0}")]
    ComponentNotFound(ComponentId),

    #[error("component {0} is not attached to a parent")]
    Detached(ComponentId),

    #[error("invalid move of {component} into {parent} at index {index}")]
    InvalidMove {
        component: ComponentId,
        parent: ComponentId,
        index: usize,
    },

    #[error("components {0} and {1} belong to different mixers")]
    CrossMixer(ComponentId, ComponentId),

    #[error("component {0} cannot route to itself")]
    SelfRouting(ComponentId),

    #[error("cannot ungroup {0}: {1}")]
    UngroupUnsupported(ComponentId, &'static str),

    #[error("invalid component path: {0}")]
    InvalidPath(String),

    #[error("component {component} has no parameter {name:?}")]
    UnknownParameter { component: ComponentId, name: String },

    #[error("component {component} is a {actual}, expected {expected}")]
    InvalidKind {
        component: ComponentId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("context not found: {0}")]
    ContextNotFound(ContextId),

    #[error("context already registered: {0}")]
    DuplicateContext(ContextId),

    #[error("session has no contexts")]
    NoContexts,

    #[error("session is not online")]
    NotOnline,

    #[error("track range {index}+{count} is out of bounds for {len} tracks")]
    InvalidTrackRange {
        index: usize,
        count: usize,
        len: usize,
    },

    #[error("unresolved address: {0}")]
    UnresolvedAddress(Address),

    #[error("stale artifact at {0}")]
    StaleArtifact(Address),

    #[error("node creations form a dependency cycle through {0}")]
    DependencyCycle(Address),

    #[error("malformed change at {0}")]
    MalformedChange(Address),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("failed to encode spec: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
