//! Ordering and batching of a pass's changes.
//!
//! Changes are split per context, then laid out in dependency order:
//! synth definitions, buffers, buses, nodes (topologically sorted over their
//! node-to-node requirements), mutations, and finally destructions. Each
//! batch is sent as one bundle; batches marked `sync` are followed by a
//! barrier before the next batch is issued.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::address::Address;
use crate::artifacts::Artifacts;
use crate::change::{Reconciliation, SpecChange};
use crate::component::{ComponentId, Tree};
use crate::context::{ContextId, Transaction};
use crate::error::{EngineError, Result};
use crate::spec::SpecKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Create,
    Mutate,
    Destroy,
}

/// Changes sent together as one bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecChangeGroup {
    pub kind: BatchKind,
    pub changes: Vec<SpecChange>,
    /// Send as an atomic bundle.
    pub group: bool,
    /// Wait for the context to confirm before the next batch.
    pub sync: bool,
}

impl SpecChangeGroup {
    fn new(kind: BatchKind, changes: Vec<SpecChange>, group: bool, sync: bool) -> Self {
        Self {
            kind,
            changes,
            group,
            sync,
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Write every change into `tx`, updating the owners' local caches.
    pub fn apply(
        &self,
        tx: &mut Transaction<'_>,
        tree: &mut Tree,
        old: &mut Artifacts,
        new: &mut Artifacts,
    ) -> Result<()> {
        for change in &self.changes {
            let local = &mut tree.get_mut(change.component)?.artifacts;
            match self.kind {
                BatchKind::Create => change.new_spec()?.create(tx, local, old, new)?,
                BatchKind::Mutate => {
                    change
                        .new_spec()?
                        .mutate(tx, local, old, new, change.old_spec()?)?
                }
                BatchKind::Destroy => {
                    change
                        .old_spec()?
                        .destroy(tx, local, old, new, change.reconciliation)?
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ContextChanges {
    creations: Vec<SpecChange>,
    mutations: Vec<SpecChange>,
    destructions: Vec<SpecChange>,
}

/// Order and batch the changes gathered in one pass, per context.
pub fn sort(changes: Vec<SpecChange>) -> Result<BTreeMap<ContextId, Vec<SpecChangeGroup>>> {
    let mut by_context: BTreeMap<ContextId, ContextChanges> = BTreeMap::new();
    for change in changes {
        match change.reconciliation {
            Reconciliation::Create => {
                let context = change.new_spec()?.context;
                by_context.entry(context).or_default().creations.push(change);
            }
            Reconciliation::Mutate => {
                let context = change.new_spec()?.context;
                by_context.entry(context).or_default().mutations.push(change);
            }
            Reconciliation::Recreate => {
                let context = change.new_spec()?.context;
                let entry = by_context.entry(context).or_default();
                entry.creations.push(change.clone());
                entry.destructions.push(change);
            }
            Reconciliation::DestroyShallow | Reconciliation::DestroyRoot => {
                let context = change.old_spec()?.context;
                by_context.entry(context).or_default().destructions.push(change);
            }
        }
    }

    let mut sorted = BTreeMap::new();
    for (context, changes) in by_context {
        sorted.insert(context, batch(changes)?);
    }
    Ok(sorted)
}

fn batch(changes: ContextChanges) -> Result<Vec<SpecChangeGroup>> {
    let ContextChanges {
        creations,
        mutations,
        mut destructions,
    } = changes;

    let mut synthdefs: BTreeMap<Address, SpecChange> = BTreeMap::new();
    let mut buffers = Vec::new();
    let mut buses = Vec::new();
    let mut nodes = Vec::new();
    for change in creations {
        match change.new_spec()?.kind {
            SpecKind::SynthDef(_) => {
                synthdefs.entry(change.address.clone()).or_insert(change);
            }
            SpecKind::Buffer(_) => buffers.push(change),
            SpecKind::AudioBus(_) | SpecKind::ControlBus(_) => buses.push(change),
            SpecKind::Group(_) | SpecKind::Synth(_) => nodes.push(change),
        }
    }

    let mut batches = Vec::new();
    if !synthdefs.is_empty() {
        batches.push(SpecChangeGroup::new(
            BatchKind::Create,
            synthdefs.into_values().collect(),
            false,
            true,
        ));
    }
    for changes in per_component_sorted(buffers) {
        batches.push(SpecChangeGroup::new(BatchKind::Create, changes, true, true));
    }
    for changes in per_component_sorted(buses) {
        batches.push(SpecChangeGroup::new(BatchKind::Create, changes, true, false));
    }
    for changes in consecutive_by_component(topological(nodes)?) {
        batches.push(SpecChangeGroup::new(BatchKind::Create, changes, true, false));
    }
    for changes in consecutive_by_component(mutations) {
        batches.push(SpecChangeGroup::new(BatchKind::Mutate, changes, true, false));
    }
    // Stable: same-depth changes keep their gather order.
    destructions.sort_by(|a, b| b.depth.cmp(&a.depth));
    for changes in consecutive_by_component(destructions) {
        batches.push(SpecChangeGroup::new(BatchKind::Destroy, changes, true, false));
    }
    Ok(batches)
}

/// Group by owning component in first-seen order, each group sorted by
/// address.
fn per_component_sorted(changes: Vec<SpecChange>) -> Vec<Vec<SpecChange>> {
    let mut order: Vec<ComponentId> = Vec::new();
    let mut groups: BTreeMap<ComponentId, Vec<SpecChange>> = BTreeMap::new();
    for change in changes {
        if !groups.contains_key(&change.component) {
            order.push(change.component);
        }
        groups.entry(change.component).or_default().push(change);
    }
    order
        .into_iter()
        .filter_map(|component| groups.remove(&component))
        .map(|mut changes| {
            changes.sort_by(|a, b| a.address.cmp(&b.address));
            changes
        })
        .collect()
}

fn consecutive_by_component(changes: Vec<SpecChange>) -> Vec<Vec<SpecChange>> {
    let mut groups: Vec<Vec<SpecChange>> = Vec::new();
    for change in changes {
        match groups.last_mut() {
            Some(last) if last[0].component == change.component => last.push(change),
            _ => groups.push(vec![change]),
        }
    }
    groups
}

/// Order node creations so every node follows the nodes it is placed
/// relative to.
///
/// Pending changes rotate through a queue until their requirements have been
/// emitted. A full rotation without progress means the requirements form a
/// cycle.
fn topological(nodes: Vec<SpecChange>) -> Result<Vec<SpecChange>> {
    let creating: HashSet<Address> = nodes.iter().map(|change| change.address.clone()).collect();
    let mut pending: VecDeque<SpecChange> = nodes.into();
    let mut emitted: HashSet<Address> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    let mut stalled = 0;

    while let Some(change) = pending.pop_front() {
        let ready = change.new_spec()?.requires().into_iter().all(|address| {
            !address.is_node()
                || *address == change.address
                || !creating.contains(address)
                || emitted.contains(address)
        });
        if ready {
            emitted.insert(change.address.clone());
            ordered.push(change);
            stalled = 0;
        } else {
            stalled += 1;
            if stalled > pending.len() {
                return Err(EngineError::DependencyCycle(change.address));
            }
            pending.push_back(change);
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::gather;
    use crate::context::AddAction;
    use crate::spec::{BufferSpec, BusSpec, GroupSpec, Placement, Spec, SynthSpec};
    use crate::synthdef::SynthDef;
    use pretty_assertions::assert_eq;

    fn owner(id: u64) -> String {
        format!("tracks[{}]", id)
    }

    fn make(id: u64, name: &str, kind: SpecKind) -> Spec {
        Spec::new(&owner(id), ComponentId(id), ContextId(0), name, kind)
    }

    fn group(id: u64, name: &str, placement: Placement) -> Spec {
        make(
            id,
            name,
            SpecKind::Group(GroupSpec {
                placement,
                destroy_strategy: None,
            }),
        )
    }

    fn node(id: u64, name: &str) -> Address {
        Address::new(&owner(id), crate::address::Entity::Nodes, name)
    }

    fn bus(id: u64, name: &str, channel_count: usize) -> Spec {
        make(
            id,
            name,
            SpecKind::AudioBus(BusSpec {
                channel_count,
                default: 0.0,
            }),
        )
    }

    fn creates(specs: &[Spec]) -> Vec<SpecChange> {
        gather(
            &[],
            specs,
            &BTreeMap::new(),
            Reconciliation::DestroyShallow,
            0,
        )
    }

    fn addresses(batch: &SpecChangeGroup) -> Vec<String> {
        batch
            .changes
            .iter()
            .map(|change| change.address.to_string())
            .collect()
    }

    #[test]
    fn test_creation_phases() {
        let strip = make(
            1,
            "channel-strip",
            SpecKind::Synth(
                SynthSpec::new(
                    Address::synthdef("patchbay:channel-strip:2"),
                    Placement::tail_of(node(1, "group")),
                )
                .with_kwarg(
                    "out",
                    crate::spec::Binding::Address(bus(1, "main", 2).address),
                ),
            ),
        );
        let specs = vec![
            strip,
            group(1, "group", Placement::new(AddAction::AddToHead, None)),
            bus(1, "main", 2),
            make(
                1,
                "samples",
                SpecKind::Buffer(BufferSpec {
                    channel_count: 1,
                    frame_count: 64,
                }),
            ),
            make(1, "", SpecKind::SynthDef(SynthDef::meters(2))),
            make(1, "", SpecKind::SynthDef(SynthDef::channel_strip(2))),
        ];
        let sorted = sort(creates(&specs)).unwrap();
        let batches = &sorted[&ContextId(0)];

        assert_eq!(batches.len(), 4);
        assert_eq!(
            addresses(&batches[0]),
            vec![
                "synthdefs:patchbay:channel-strip:2",
                "synthdefs:patchbay:meters:2"
            ]
        );
        assert!(batches[0].sync && !batches[0].group);
        assert_eq!(addresses(&batches[1]), vec!["tracks[1]:buffers:samples"]);
        assert!(batches[1].sync);
        assert_eq!(addresses(&batches[2]), vec!["tracks[1]:audio-buses:main"]);
        assert!(!batches[2].sync);
        assert_eq!(
            addresses(&batches[3]),
            vec!["tracks[1]:nodes:group", "tracks[1]:nodes:channel-strip"]
        );
        assert!(batches[3].group);
    }

    #[test]
    fn test_nodes_follow_their_targets_across_components() {
        let specs = vec![
            group(2, "group", Placement::after(node(1, "group"))),
            group(1, "group", Placement::new(AddAction::AddToHead, None)),
            group(2, "tracks", Placement::head_of(node(2, "group"))),
        ];
        let sorted = sort(creates(&specs)).unwrap();
        let batches = &sorted[&ContextId(0)];
        let flat: Vec<String> = batches.iter().flat_map(addresses).collect();
        assert_eq!(
            flat,
            vec![
                "tracks[1]:nodes:group",
                "tracks[2]:nodes:group",
                "tracks[2]:nodes:tracks"
            ]
        );
        // The two tracks[2] groups land consecutively and share a batch.
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_cycle_is_reported() {
        let specs = vec![
            group(1, "a", Placement::after(node(1, "b"))),
            group(1, "b", Placement::after(node(1, "a"))),
        ];
        let err = sort(creates(&specs)).unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle(_)));
    }

    #[test]
    fn test_recreate_spans_creation_and_destruction() {
        let old = vec![bus(1, "main", 2)];
        let new = vec![bus(1, "main", 4)];
        let changes = gather(
            &old,
            &new,
            &BTreeMap::new(),
            Reconciliation::DestroyShallow,
            0,
        );
        let sorted = sort(changes).unwrap();
        let batches = &sorted[&ContextId(0)];
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].kind, BatchKind::Create);
        assert_eq!(batches[1].kind, BatchKind::Destroy);
        assert_eq!(addresses(&batches[0]), addresses(&batches[1]));
    }

    #[test]
    fn test_destructions_run_deepest_first() {
        let shallow = gather(
            &[group(1, "group", Placement::new(AddAction::AddToHead, None))],
            &[],
            &BTreeMap::new(),
            Reconciliation::DestroyRoot,
            0,
        );
        let deep = gather(
            &[group(2, "group", Placement::head_of(node(1, "group")))],
            &[],
            &BTreeMap::new(),
            Reconciliation::DestroyShallow,
            1,
        );
        let sorted = sort(shallow.into_iter().chain(deep).collect()).unwrap();
        let batches = &sorted[&ContextId(0)];
        let flat: Vec<String> = batches.iter().flat_map(addresses).collect();
        assert_eq!(flat, vec!["tracks[2]:nodes:group", "tracks[1]:nodes:group"]);
        assert!(batches.iter().all(|batch| batch.kind == BatchKind::Destroy));
    }

    #[test]
    fn test_contexts_are_batched_independently() {
        let mut elsewhere = bus(2, "main", 2);
        elsewhere.context = ContextId(1);
        let sorted = sort(creates(&[bus(1, "main", 2), elsewhere])).unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[&ContextId(1)][0].changes[0].component, ComponentId(2));
    }
}
