//! Connection bookkeeping between components.
//!
//! A routing edge is recorded on the component at the far end, keyed by the
//! component that owns the edge: a track reading from `source` leaves
//! `(track, Input) => Read` on `source`, and a track or send writing into
//! `target` leaves `(owner, Output) => Write` on `target`. Feedback detection
//! only ever looks at the `Write` entries of the reader.

use crate::component::{
    ComponentId, ComponentKind, Endpoint, Io, Role, TrackInput, TrackOutput, Tree,
};
use crate::error::Result;

/// Outcome of re-resolving one component's connections.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConnectionUpdate {
    /// Components whose specs may have changed because of this one.
    pub related: Vec<ComponentId>,
    /// Components left without a reason to exist, to be deleted this pass.
    pub orphaned: Vec<ComponentId>,
}

impl ConnectionUpdate {
    fn relate(&mut self, id: ComponentId) {
        if !self.related.contains(&id) {
            self.related.push(id);
        }
    }
}

fn within_roots(tree: &Tree, roots: &[ComponentId], id: ComponentId) -> bool {
    roots.iter().any(|root| tree.is_ancestor(*root, id))
}

fn insert_connection(
    tree: &mut Tree,
    on: ComponentId,
    key: (ComponentId, Role),
    io: Io,
) -> Result<()> {
    tree.get_mut(on)?.connections.insert(key, io);
    Ok(())
}

fn remove_connection(tree: &mut Tree, on: ComponentId, key: (ComponentId, Role)) {
    if let Ok(component) = tree.get_mut(on) {
        component.connections.remove(&key);
    }
}

fn component_of(endpoint: Option<Endpoint>) -> Option<ComponentId> {
    match endpoint {
        Some(Endpoint::Component(id)) => Some(id),
        _ => None,
    }
}

/// Re-resolve the connections of `id`.
///
/// When `deleting`, every edge the component owns is torn down and partners
/// outside the deleted `roots` are told their partner is gone.
pub fn reconcile_connections(
    tree: &mut Tree,
    id: ComponentId,
    deleting: bool,
    roots: &[ComponentId],
) -> Result<ConnectionUpdate> {
    let mut update = ConnectionUpdate::default();

    let partners: Vec<ComponentId> = tree
        .get(id)?
        .connections
        .keys()
        .map(|(partner, _)| *partner)
        .collect();
    for partner in partners {
        if !tree.contains(partner) {
            continue;
        }
        if !deleting {
            update.relate(partner);
        } else if !within_roots(tree, roots, partner) {
            update.relate(partner);
            if notify_disconnected(tree, partner, id)? && !update.orphaned.contains(&partner) {
                update.orphaned.push(partner);
            }
        }
    }

    let component = tree.get(id)?;
    let parent = component.parent;
    match &component.kind {
        ComponentKind::Track(_) => {
            reconcile_track_input(tree, id, deleting, roots, &mut update)?;
            reconcile_track_output(tree, id, deleting, roots, &mut update)?;
        }
        ComponentKind::Send { target, .. } => {
            let target = *target;
            if let Some(parent) = parent {
                if deleting {
                    remove_connection(tree, parent, (id, Role::Input));
                    remove_connection(tree, target, (id, Role::Output));
                } else {
                    insert_connection(tree, parent, (id, Role::Input), Io::Read)?;
                    if tree.contains(target) {
                        insert_connection(tree, target, (id, Role::Output), Io::Write)?;
                    }
                }
                for partner in [parent, target] {
                    if tree.contains(partner) && !(deleting && within_roots(tree, roots, partner)) {
                        update.relate(partner);
                    }
                }
            }
        }
        ComponentKind::Chain { .. } => {
            if let Some(rack) = parent {
                if !(deleting && within_roots(tree, roots, rack)) {
                    update.relate(rack);
                }
            }
        }
        ComponentKind::Mixer { .. } | ComponentKind::Rack(_) | ComponentKind::Device(_) => {}
    }
    Ok(update)
}

fn reconcile_track_input(
    tree: &mut Tree,
    id: ComponentId,
    deleting: bool,
    roots: &[ComponentId],
    update: &mut ConnectionUpdate,
) -> Result<()> {
    let Some(track) = tree.get(id)?.track() else {
        return Ok(());
    };
    let old = track.cached_input;
    let new = if deleting {
        None
    } else {
        match track.input {
            TrackInput::None => None,
            TrackInput::Bus(bus) => Some(Endpoint::Bus(bus)),
            TrackInput::Track(source) if tree.contains(source) => {
                Some(Endpoint::Component(source))
            }
            TrackInput::Track(_) => None,
        }
    };
    if old != new {
        if let Some(source) = component_of(old) {
            remove_connection(tree, source, (id, Role::Input));
        }
        if let Some(source) = component_of(new) {
            insert_connection(tree, source, (id, Role::Input), Io::Read)?;
        }
        if let Some(track) = tree.get_mut(id)?.track_mut() {
            track.cached_input = new;
        }
    }
    for source in [component_of(old), component_of(new)].into_iter().flatten() {
        if tree.contains(source) && !(deleting && within_roots(tree, roots, source)) {
            update.relate(source);
        }
    }
    Ok(())
}

fn reconcile_track_output(
    tree: &mut Tree,
    id: ComponentId,
    deleting: bool,
    roots: &[ComponentId],
    update: &mut ConnectionUpdate,
) -> Result<()> {
    let component = tree.get(id)?;
    let Some(track) = component.track() else {
        return Ok(());
    };
    let old = track.cached_output;
    let new = if deleting {
        None
    } else {
        match track.output {
            TrackOutput::None => None,
            TrackOutput::Default => component.parent.map(Endpoint::Component),
            TrackOutput::Bus(bus) => Some(Endpoint::Bus(bus)),
            TrackOutput::Container(target) if tree.contains(target) => {
                Some(Endpoint::Component(target))
            }
            TrackOutput::Container(_) => None,
        }
    };
    if old != new {
        if let Some(target) = component_of(old) {
            remove_connection(tree, target, (id, Role::Output));
        }
        if let Some(target) = component_of(new) {
            insert_connection(tree, target, (id, Role::Output), Io::Write)?;
        }
        if let Some(track) = tree.get_mut(id)?.track_mut() {
            track.cached_output = new;
        }
    }
    for target in [component_of(old), component_of(new)].into_iter().flatten() {
        if tree.contains(target) && !(deleting && within_roots(tree, roots, target)) {
            update.relate(target);
        }
    }
    Ok(())
}

/// Tell `id` that `gone` is being deleted. Returns true if `id` should be
/// deleted along with it.
fn notify_disconnected(tree: &mut Tree, id: ComponentId, gone: ComponentId) -> Result<bool> {
    let component = tree.get_mut(id)?;
    match &mut component.kind {
        ComponentKind::Track(track) => {
            if track.input == TrackInput::Track(gone) {
                track.input = TrackInput::None;
            }
            if track.output == TrackOutput::Container(gone) {
                track.output = TrackOutput::None;
            }
            Ok(false)
        }
        ComponentKind::Send { target, .. } => Ok(*target == gone),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree() -> (Tree, ComponentId, ComponentId, ComponentId) {
        let mut tree = Tree::new(2);
        let mixer = tree.add_mixer(None);
        let a = tree.add_child(mixer, None, ComponentKind::track()).unwrap();
        let b = tree.add_child(mixer, None, ComponentKind::track()).unwrap();
        (tree, mixer, a, b)
    }

    #[test]
    fn test_default_output_writes_into_parent() {
        let (mut tree, mixer, a, _) = tree();
        let update = reconcile_connections(&mut tree, a, false, &[]).unwrap();
        assert_eq!(update.related, vec![mixer]);
        assert_eq!(
            tree.get(mixer).unwrap().connections.get(&(a, Role::Output)),
            Some(&Io::Write)
        );
        assert_eq!(
            tree.get(a).unwrap().track().unwrap().cached_output,
            Some(Endpoint::Component(mixer))
        );
    }

    #[test]
    fn test_input_change_moves_the_read_entry() {
        let (mut tree, mixer, a, b) = tree();
        tree.get_mut(b).unwrap().track_mut().unwrap().input = TrackInput::Track(a);
        reconcile_connections(&mut tree, b, false, &[]).unwrap();
        assert_eq!(
            tree.get(a).unwrap().connections.get(&(b, Role::Input)),
            Some(&Io::Read)
        );

        tree.get_mut(b).unwrap().track_mut().unwrap().input = TrackInput::None;
        let update = reconcile_connections(&mut tree, b, false, &[]).unwrap();
        assert!(tree.get(a).unwrap().connections.is_empty());
        assert_eq!(update.related, vec![a, mixer]);
    }

    #[test]
    fn test_send_is_orphaned_with_its_target() {
        let (mut tree, mixer, a, b) = tree();
        let send = tree
            .add_child(
                a,
                None,
                ComponentKind::Send {
                    postfader: true,
                    target: b,
                },
            )
            .unwrap();
        reconcile_connections(&mut tree, send, false, &[]).unwrap();
        assert_eq!(
            tree.get(b).unwrap().connections.get(&(send, Role::Output)),
            Some(&Io::Write)
        );
        assert_eq!(
            tree.get(a).unwrap().connections.get(&(send, Role::Input)),
            Some(&Io::Read)
        );

        let update = reconcile_connections(&mut tree, b, true, &[b]).unwrap();
        assert_eq!(update.orphaned, vec![send]);
        assert_eq!(update.related, vec![send]);
    }

    #[test]
    fn test_partners_inside_deleted_roots_are_ignored() {
        let (mut tree, _, a, _) = tree();
        let child = tree.add_child(a, None, ComponentKind::track()).unwrap();
        reconcile_connections(&mut tree, child, false, &[]).unwrap();
        assert!(tree.get(a).unwrap().connections.contains_key(&(child, Role::Output)));

        let update = reconcile_connections(&mut tree, child, true, &[a]).unwrap();
        assert!(update.related.is_empty());
        assert!(tree.get(a).unwrap().connections.is_empty());

        let update = reconcile_connections(&mut tree, a, true, &[a]).unwrap();
        assert!(update.related.is_empty());
        assert!(update.orphaned.is_empty());
    }

    #[test]
    fn test_deleted_input_source_is_cleared() {
        let (mut tree, _, a, b) = tree();
        tree.get_mut(b).unwrap().track_mut().unwrap().input = TrackInput::Track(a);
        reconcile_connections(&mut tree, b, false, &[]).unwrap();

        let update = reconcile_connections(&mut tree, a, true, &[a]).unwrap();
        assert!(update.related.contains(&b));
        assert_eq!(tree.get(b).unwrap().track().unwrap().input, TrackInput::None);
    }

    #[test]
    fn test_chain_relates_its_rack() {
        use crate::component::{ReadMode, WriteMode};
        let (mut tree, mixer, _, _) = tree();
        let rack = tree
            .add_child(mixer, None, ComponentKind::rack(ReadMode::Replace, WriteMode::Mix))
            .unwrap();
        let chain = tree.add_child(rack, None, ComponentKind::chain()).unwrap();
        let update = reconcile_connections(&mut tree, chain, false, &[]).unwrap();
        assert_eq!(update.related, vec![rack]);
        let update = reconcile_connections(&mut tree, chain, true, &[rack]).unwrap();
        assert!(update.related.is_empty());
    }
}
