//! Differencing of spec snapshots.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::address::Address;
use crate::artifacts::Artifacts;
use crate::component::ComponentId;
use crate::context::ContextId;
use crate::error::{EngineError, Result};
use crate::spec::{Spec, SpecKind};

/// Why an address is being touched in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Reconciliation {
    Create,
    Mutate,
    /// Replace in place: create the new entity, then destroy the old one.
    Recreate,
    /// The owner survives, or is deleted as a descendant of a deleted root.
    DestroyShallow,
    /// The owner is the component being deleted.
    DestroyRoot,
}

impl Reconciliation {
    pub fn is_destroy(self) -> bool {
        matches!(
            self,
            Reconciliation::Recreate | Reconciliation::DestroyShallow | Reconciliation::DestroyRoot
        )
    }
}

/// One address's worth of work.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecChange {
    pub address: Address,
    pub component: ComponentId,
    pub context: ContextId,
    pub reconciliation: Reconciliation,
    pub new_spec: Option<Spec>,
    pub old_spec: Option<Spec>,
    /// Depth of the owner in the tree, used to order destructions.
    pub depth: usize,
}

impl SpecChange {
    fn create(spec: &Spec, depth: usize) -> Self {
        Self {
            address: spec.address.clone(),
            component: spec.component,
            context: spec.context,
            reconciliation: Reconciliation::Create,
            new_spec: Some(spec.clone()),
            old_spec: None,
            depth,
        }
    }

    fn destroy(spec: &Spec, reconciliation: Reconciliation, depth: usize) -> Self {
        Self {
            address: spec.address.clone(),
            component: spec.component,
            context: spec.context,
            reconciliation,
            new_spec: None,
            old_spec: Some(spec.clone()),
            depth,
        }
    }

    fn transition(old: &Spec, new: &Spec, reconciliation: Reconciliation, depth: usize) -> Self {
        Self {
            address: new.address.clone(),
            component: new.component,
            context: new.context,
            reconciliation,
            new_spec: Some(new.clone()),
            old_spec: Some(old.clone()),
            depth,
        }
    }

    pub fn new_spec(&self) -> Result<&Spec> {
        self.new_spec
            .as_ref()
            .ok_or_else(|| EngineError::MalformedChange(self.address.clone()))
    }

    pub fn old_spec(&self) -> Result<&Spec> {
        self.old_spec
            .as_ref()
            .ok_or_else(|| EngineError::MalformedChange(self.address.clone()))
    }

    /// The spec that decides this change's batch category.
    pub fn spec(&self) -> Result<&Spec> {
        self.new_spec
            .as_ref()
            .or(self.old_spec.as_ref())
            .ok_or_else(|| EngineError::MalformedChange(self.address.clone()))
    }
}

/// Diff one component's stored specs against its freshly resolved ones.
///
/// Output follows the order of `new`, then the removed entries of `old`.
/// Synth definition uploads already present in the new context's table are
/// skipped, and `destroy` tags every removal.
pub fn gather(
    old: &[Spec],
    new: &[Spec],
    context_artifacts: &BTreeMap<ContextId, Artifacts>,
    destroy: Reconciliation,
    depth: usize,
) -> Vec<SpecChange> {
    let old_by_address: HashMap<&Address, &Spec> =
        old.iter().map(|spec| (&spec.address, spec)).collect();
    let new_by_address: HashMap<&Address, &Spec> =
        new.iter().map(|spec| (&spec.address, spec)).collect();

    let mut changes = Vec::new();
    for new_spec in new {
        match old_by_address.get(&new_spec.address) {
            None => {
                if let SpecKind::SynthDef(_) = new_spec.kind {
                    let loaded = context_artifacts
                        .get(&new_spec.context)
                        .is_some_and(|artifacts| artifacts.synthdefs.contains_key(&new_spec.address));
                    if loaded {
                        continue;
                    }
                }
                changes.push(SpecChange::create(new_spec, depth));
            }
            Some(old_spec) if *old_spec == new_spec => {}
            Some(old_spec) if old_spec.context != new_spec.context => {
                changes.push(SpecChange::create(new_spec, depth));
                changes.push(SpecChange::destroy(old_spec, destroy, depth));
            }
            Some(old_spec) => {
                let reconciliation = if new_spec.requires_recreation(old_spec) {
                    Reconciliation::Recreate
                } else {
                    Reconciliation::Mutate
                };
                changes.push(SpecChange::transition(
                    old_spec,
                    new_spec,
                    reconciliation,
                    depth,
                ));
            }
        }
    }
    for old_spec in old {
        if !new_by_address.contains_key(&old_spec.address) {
            changes.push(SpecChange::destroy(old_spec, destroy, depth));
        }
    }
    changes
}
