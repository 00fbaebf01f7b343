//! The reconciliation pass.
//!
//! One pass walks the affected components, re-resolves their connections and
//! specs, diffs them against what is realized, then sorts and applies the
//! changes context by context. Either every batch lands and the new state is
//! committed, or the pass fails and nothing is committed.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::activation;
use crate::address::{Address, Entity};
use crate::artifacts::Artifacts;
use crate::change::{gather, Reconciliation, SpecChange};
use crate::component::{ComponentId, Tree};
use crate::components::{resolve_specs, ContextTarget};
use crate::context::{BootStatus, BusGroup, Context, ContextError, ContextId, Transaction};
use crate::error::{EngineError, Result};
use crate::routing::reconcile_connections;
use crate::sort::{sort, BatchKind};
use crate::spec::{Placement, Spec, SpecKind};

/// One address touched by a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSummary {
    pub address: Address,
    pub component: ComponentId,
    pub context: ContextId,
    pub reconciliation: Reconciliation,
}

/// One bundle sent by a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub context: ContextId,
    pub kind: BatchKind,
    pub changes: usize,
    pub requests: usize,
    pub sync: bool,
}

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub changes: Vec<ChangeSummary>,
    pub batches: Vec<BatchSummary>,
    pub deleted: Vec<ComponentId>,
    /// Tracks whose activation changed, with their new state.
    pub activation: Vec<(ComponentId, bool)>,
}

impl PassReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, reconciliation: Reconciliation) -> usize {
        self.changes
            .iter()
            .filter(|change| change.reconciliation == reconciliation)
            .count()
    }

    pub fn changes_for(&self, component: ComponentId) -> Vec<&ChangeSummary> {
        self.changes
            .iter()
            .filter(|change| change.component == component)
            .collect()
    }
}

/// A registered context and its global artifact table.
#[derive(Debug)]
pub(crate) struct ContextEntry {
    pub context: Arc<dyn Context>,
    pub artifacts: Artifacts,
}

/// Everything a session guards with its lock.
#[derive(Debug)]
pub(crate) struct Engine {
    pub tree: Tree,
    /// In registration order.
    pub contexts: Vec<ContextEntry>,
    pub mixer_contexts: HashMap<ComponentId, ContextId>,
    pub status: BootStatus,
    pub sync_timeout: Duration,
    pub last_pass: Option<PassReport>,
}

/// Changes gathered by the walk, not yet applied.
#[derive(Default)]
struct Walk {
    visited: HashSet<ComponentId>,
    related: Vec<ComponentId>,
    deleting: Vec<ComponentId>,
    /// Old placements of deleted nodes, lent to the siblings placed after
    /// them.
    borrowed: HashMap<Address, Placement>,
    changes: Vec<SpecChange>,
    pending: Vec<(ComponentId, Vec<Spec>, Option<ContextId>)>,
}

impl Walk {
    fn relate(&mut self, id: ComponentId) {
        if !self.related.contains(&id) {
            self.related.push(id);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &mut self,
        tree: &mut Tree,
        id: ComponentId,
        deleting: bool,
        is_root: bool,
        target: Option<ContextTarget>,
        snapshot: &BTreeMap<ContextId, Artifacts>,
        queue: &mut VecDeque<ComponentId>,
    ) -> Result<()> {
        if !self.visited.insert(id) {
            return Ok(());
        }
        let update = reconcile_connections(tree, id, deleting, &self.deleting)?;
        for related in update.related {
            self.relate(related);
        }
        for orphan in update.orphaned {
            if !self.deleting.contains(&orphan) {
                debug!(component = %orphan, "connection target deleted, deleting");
                self.deleting.push(orphan);
                queue.push_back(orphan);
            }
        }

        let target = if deleting { None } else { target };
        let new_specs = match target {
            Some(target) => resolve_specs(tree, id, target)?,
            None => Vec::new(),
        };
        let new_context = target.map(|target| target.id);
        let depth = tree.parentage(id)?.len();

        let component = tree.get_mut(id)?;
        let mut old_specs = component.specs.clone();
        if deleting && is_root {
            let own = format!("{}:", component.numeric_address());
            for spec in &old_specs {
                let Some(placement) = spec.placement() else {
                    continue;
                };
                let external = placement
                    .target
                    .as_ref()
                    .is_some_and(|target| !target.as_str().starts_with(&own));
                if external {
                    self.borrowed
                        .insert(spec.address.clone(), placement.clone());
                }
            }
        } else if !deleting && !self.borrowed.is_empty() {
            borrow_positions(&mut old_specs, &self.borrowed, &mut component.artifacts)?;
        }

        let destroy = if is_root && (deleting || component.context != new_context) {
            Reconciliation::DestroyRoot
        } else {
            Reconciliation::DestroyShallow
        };
        self.changes
            .extend(gather(&old_specs, &new_specs, snapshot, destroy, depth));
        self.pending.push((id, new_specs, new_context));
        Ok(())
    }
}

/// Point old node specs placed relative to a deleted root at wherever that
/// root was placed. The local hash is restamped so the rewritten spec still
/// owns its artifact.
fn borrow_positions(
    specs: &mut [Spec],
    borrowed: &HashMap<Address, Placement>,
    local: &mut Artifacts,
) -> Result<()> {
    for spec in specs.iter_mut() {
        let mut changed = false;
        if let Some(placement) = spec.placement_mut() {
            let mut hops = 0;
            while let Some(lent) = placement
                .target
                .as_ref()
                .and_then(|target| borrowed.get(target))
            {
                *placement = lent.clone();
                changed = true;
                hops += 1;
                if hops > borrowed.len() {
                    break;
                }
            }
        }
        if changed && local.hashes.contains_key(&spec.address) {
            local.hashes.insert(spec.address.clone(), spec.hash()?);
        }
    }
    Ok(())
}

pub(crate) async fn sync_context(context: &dyn Context, timeout: Duration) -> Result<()> {
    tokio::time::timeout(timeout, context.sync())
        .await
        .map_err(|_| ContextError::Timeout)??;
    Ok(())
}

impl Engine {
    pub fn new(default_channel_count: usize, sync_timeout: Duration) -> Self {
        Self {
            tree: Tree::new(default_channel_count),
            contexts: Vec::new(),
            mixer_contexts: HashMap::new(),
            status: BootStatus::Offline,
            sync_timeout,
            last_pass: None,
        }
    }

    pub fn context_entry(&self, id: ContextId) -> Result<&ContextEntry> {
        self.contexts
            .iter()
            .find(|entry| entry.context.id() == id)
            .ok_or(EngineError::ContextNotFound(id))
    }

    fn context_entry_mut(&mut self, id: ContextId) -> Result<&mut ContextEntry> {
        self.contexts
            .iter_mut()
            .find(|entry| entry.context.id() == id)
            .ok_or(EngineError::ContextNotFound(id))
    }

    /// Where each mixer resolves right now. Mixers on a context that is not
    /// online, or in a session that is not online, resolve nowhere.
    fn targets(&self) -> HashMap<ComponentId, ContextTarget> {
        if self.status != BootStatus::Online {
            return HashMap::new();
        }
        self.mixer_contexts
            .iter()
            .filter_map(|(mixer, context)| {
                let entry = self.context_entry(*context).ok()?;
                if entry.context.boot_status() != BootStatus::Online {
                    return None;
                }
                Some((
                    *mixer,
                    ContextTarget {
                        id: *context,
                        output: entry.context.audio_output_bus_group(),
                    },
                ))
            })
            .collect()
    }

    /// Run one pass over `roots`, deleting the subtrees of `deleting`.
    ///
    /// A pass that fails leaves the tree, every component's caches and the
    /// global tables as they were before it started.
    pub async fn reconcile(
        &mut self,
        roots: &[ComponentId],
        deleting: &[ComponentId],
    ) -> Result<PassReport> {
        self.tree.begin_journal();
        let mut report = match self.pass(roots, deleting).await {
            Ok(report) => {
                self.tree.commit_journal();
                report
            }
            Err(err) => {
                warn!(error = %err, "pass failed, rolling back");
                self.tree.rollback_journal();
                return Err(err);
            }
        };
        report.activation = self.update_activation().await?;
        self.last_pass = Some(report.clone());
        Ok(report)
    }

    async fn pass(
        &mut self,
        roots: &[ComponentId],
        deleting: &[ComponentId],
    ) -> Result<PassReport> {
        info!(roots = ?roots, deleting = ?deleting, "reconciling");
        let targets = self.targets();
        let target_for = |tree: &Tree, id: ComponentId| -> Option<ContextTarget> {
            tree.mixer_of(id)
                .ok()
                .and_then(|mixer| targets.get(&mixer).copied())
        };

        let mut old_tables: BTreeMap<ContextId, Artifacts> = self
            .contexts
            .iter()
            .map(|entry| (entry.context.id(), entry.artifacts.clone()))
            .collect();
        let snapshot = old_tables.clone();

        let mut walk = Walk {
            deleting: deleting.to_vec(),
            ..Walk::default()
        };
        let mut queue: VecDeque<ComponentId> = deleting.iter().copied().collect();
        while let Some(root) = queue.pop_front() {
            if !self.tree.contains(root) {
                continue;
            }
            if let Ok((siblings, index)) = self.tree.siblings(root) {
                let previous = index.checked_sub(1).and_then(|index| siblings.get(index));
                for neighbor in previous.into_iter().chain(siblings.get(index + 1)) {
                    walk.relate(*neighbor);
                }
            }
            for id in self.tree.walk(root)? {
                walk.visit(
                    &mut self.tree,
                    id,
                    true,
                    id == root,
                    None,
                    &snapshot,
                    &mut queue,
                )?;
            }
        }
        // Survivors resolve against the tree as it will be after the pass.
        let mut order = Vec::new();
        for id in &walk.deleting {
            if self.tree.contains(*id) && self.tree.mixer_of(*id).is_ok() {
                order.push((self.tree.graph_order(*id)?, *id));
            }
        }
        order.sort();
        let mut detached = Vec::new();
        for (_, id) in order.into_iter().rev() {
            self.tree.detach(id)?;
            detached.push(id);
        }

        for root in roots {
            if walk.visited.contains(root) || self.tree.mixer_of(*root).is_err() {
                continue;
            }
            for id in self.tree.walk(*root)? {
                let target = target_for(&self.tree, id);
                walk.visit(
                    &mut self.tree,
                    id,
                    false,
                    id == *root,
                    target,
                    &snapshot,
                    &mut queue,
                )?;
            }
        }

        let mut related = Vec::new();
        for id in std::mem::take(&mut walk.related) {
            if walk.visited.contains(&id) || self.tree.mixer_of(id).is_err() {
                continue;
            }
            related.push((self.tree.graph_order(id)?, id));
        }
        related.sort();
        for (_, id) in related {
            let target = target_for(&self.tree, id);
            walk.visit(
                &mut self.tree,
                id,
                false,
                false,
                target,
                &snapshot,
                &mut queue,
            )?;
        }

        let mut report = PassReport {
            changes: walk
                .changes
                .iter()
                .map(|change| ChangeSummary {
                    address: change.address.clone(),
                    component: change.component,
                    context: change.context,
                    reconciliation: change.reconciliation,
                })
                .collect(),
            ..PassReport::default()
        };
        debug!(changes = walk.changes.len(), "gathered changes");

        let mut new_tables: BTreeMap<ContextId, Artifacts> = BTreeMap::new();
        self.apply(
            std::mem::take(&mut walk.changes),
            &mut old_tables,
            &mut new_tables,
            &mut report,
        )
        .await?;

        for (context, mut table) in old_tables {
            if let Some(new) = new_tables.remove(&context) {
                table.merge(new);
            }
            if let Ok(entry) = self.context_entry_mut(context) {
                entry.artifacts = table;
            }
        }
        for (id, specs, context) in walk.pending {
            if let Ok(component) = self.tree.get_mut(id) {
                component.specs = specs;
                component.context = context;
            }
        }

        for id in detached {
            let removed = self.tree.remove_subtree(id);
            self.mixer_contexts.remove(&id);
            info!(component = %id, removed = removed.len(), "deleted component");
            report.deleted.push(id);
        }
        Ok(report)
    }

    async fn apply(
        &mut self,
        changes: Vec<SpecChange>,
        old_tables: &mut BTreeMap<ContextId, Artifacts>,
        new_tables: &mut BTreeMap<ContextId, Artifacts>,
        report: &mut PassReport,
    ) -> Result<()> {
        for (context_id, groups) in sort(changes)? {
            let context = Arc::clone(&self.context_entry(context_id)?.context);
            let old = old_tables.entry(context_id).or_default();
            let new = new_tables.entry(context_id).or_default();
            for group in groups {
                let mut tx = Transaction::new(context.as_ref());
                group.apply(&mut tx, &mut self.tree, old, new)?;
                let bundle = tx.into_bundle(group.group);
                let requests = bundle.len();
                if !bundle.is_empty() {
                    context.send(bundle).await?;
                }
                if group.sync {
                    sync_context(context.as_ref(), self.sync_timeout).await?;
                }
                debug!(
                    context = %context_id,
                    kind = ?group.kind,
                    changes = group.len(),
                    requests,
                    sync = group.sync,
                    "applied batch"
                );
                report.batches.push(BatchSummary {
                    context: context_id,
                    kind: group.kind,
                    changes: group.len(),
                    requests,
                    sync: group.sync,
                });
            }
        }
        Ok(())
    }

    /// Recompute mute/solo for every track and push the tracks whose state
    /// changed to their `active` buses, one bundle per context.
    pub async fn update_activation(&mut self) -> Result<Vec<(ComponentId, bool)>> {
        let mut changed = Vec::new();
        let mut sets: BTreeMap<ContextId, Vec<(BusGroup, f64)>> = BTreeMap::new();
        for (id, active) in activation::compute(&self.tree)? {
            let component = self.tree.get_mut(id)?;
            if component.is_active == active {
                continue;
            }
            component.is_active = active;
            changed.push((id, active));

            let value = f64::from(u8::from(active));
            let address = Address::new(
                &component.numeric_address(),
                Entity::ControlBuses,
                "active",
            );
            let Some(spec) = component
                .specs
                .iter_mut()
                .find(|spec| spec.address == address)
            else {
                continue;
            };
            if let SpecKind::ControlBus(bus) = &mut spec.kind {
                bus.default = value;
            }
            let hash = spec.hash()?;
            let context = spec.context;
            if component.artifacts.hashes.contains_key(&address) {
                component.artifacts.hashes.insert(address.clone(), hash);
            }
            if let Some(bus) = component.artifacts.control_buses.get(&address) {
                sets.entry(context).or_default().push((*bus, value));
            }
        }

        for (context_id, values) in sets {
            let context = Arc::clone(&self.context_entry(context_id)?.context);
            if context.boot_status() != BootStatus::Online {
                continue;
            }
            let mut tx = Transaction::new(context.as_ref());
            for (bus, value) in values {
                tx.set_bus(bus, value);
            }
            context.send(tx.into_bundle(true)).await?;
            info!(context = %context_id, "updated track activation");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AddAction;
    use crate::spec::GroupSpec;
    use pretty_assertions::assert_eq;

    fn group(owner: &str, placement: Placement) -> Spec {
        Spec::new(
            owner,
            ComponentId(9),
            ContextId(0),
            "group",
            SpecKind::Group(GroupSpec {
                placement,
                destroy_strategy: None,
            }),
        )
    }

    #[test]
    fn test_borrow_follows_consecutive_deletions() {
        let a = Address::new("tracks[2]", Entity::Nodes, "group");
        let b = Address::new("tracks[3]", Entity::Nodes, "group");
        let c = Address::new("tracks[4]", Entity::Nodes, "group");
        let parent = Address::new("mixers[1]", Entity::Nodes, "tracks");

        let mut borrowed = HashMap::new();
        borrowed.insert(
            b.clone(),
            Placement::new(AddAction::AddAfter, Some(a.clone())).with_parent(parent.clone()),
        );
        borrowed.insert(
            c.clone(),
            Placement::new(AddAction::AddAfter, Some(b.clone())).with_parent(parent.clone()),
        );

        let mut specs = vec![group(
            "tracks[5]",
            Placement::new(AddAction::AddAfter, Some(c)).with_parent(parent.clone()),
        )];
        let mut local = Artifacts::new();
        local.hashes.insert(specs[0].address.clone(), specs[0].hash().unwrap());
        borrow_positions(&mut specs, &borrowed, &mut local).unwrap();

        assert_eq!(
            specs[0].placement(),
            Some(&Placement::new(AddAction::AddAfter, Some(a)).with_parent(parent))
        );
        assert_eq!(local.hashes[&specs[0].address], specs[0].hash().unwrap());
    }

    #[test]
    fn test_borrow_leaves_unrelated_specs() {
        let target = Address::new("mixers[1]", Entity::Nodes, "tracks");
        let mut specs = vec![group("tracks[2]", Placement::head_of(target.clone()))];
        let before = specs.clone();
        let mut borrowed = HashMap::new();
        borrowed.insert(
            Address::new("tracks[3]", Entity::Nodes, "group"),
            Placement::head_of(target),
        );
        borrow_positions(&mut specs, &borrowed, &mut Artifacts::new()).unwrap();
        assert_eq!(specs, before);
    }
}
