//! Mute and solo.

use std::collections::BTreeMap;

use crate::component::{ComponentId, Tree};
use crate::error::Result;

fn is_soloed(tree: &Tree, id: ComponentId) -> bool {
    tree.get(id)
        .ok()
        .and_then(|component| component.track())
        .is_some_and(|track| track.soloed)
}

/// Whether each track in the tree should currently be audible.
///
/// Muting always wins. Otherwise, once anything is soloed, only soloed
/// tracks, their ancestors and their descendants stay active.
pub fn compute(tree: &Tree) -> Result<BTreeMap<ComponentId, bool>> {
    let tracks: Vec<ComponentId> = tree
        .iter()
        .filter(|component| component.track().is_some())
        .map(|component| component.id)
        .collect();
    let any_soloed = tracks.iter().any(|id| is_soloed(tree, *id));

    let mut activation = BTreeMap::new();
    for id in tracks {
        let track = tree.get(id)?.track();
        let active = match track {
            Some(track) if track.muted => false,
            Some(track) if track.soloed => true,
            _ if any_soloed => {
                tree.walk(id)?.into_iter().any(|id| is_soloed(tree, id))
                    || tree.parentage(id)?.into_iter().any(|id| is_soloed(tree, id))
            }
            _ => true,
        };
        activation.insert(id, active);
    }
    Ok(activation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;

    #[test]
    fn test_activation() {
        let mut tree = Tree::new(2);
        let mixer = tree.add_mixer(None);
        let a = tree.add_child(mixer, None, ComponentKind::track()).unwrap();
        let a1 = tree.add_child(a, None, ComponentKind::track()).unwrap();
        let a2 = tree.add_child(a, None, ComponentKind::track()).unwrap();
        let b = tree.add_child(mixer, None, ComponentKind::track()).unwrap();

        let activation = compute(&tree).unwrap();
        assert!(activation.values().all(|active| *active));

        tree.get_mut(b).unwrap().track_mut().unwrap().muted = true;
        let activation = compute(&tree).unwrap();
        assert!(!activation[&b]);
        assert!(activation[&a]);

        tree.get_mut(a1).unwrap().track_mut().unwrap().soloed = true;
        let activation = compute(&tree).unwrap();
        assert!(activation[&a1]);
        // An ancestor of a soloed track keeps playing, its other children
        // do not.
        assert!(activation[&a]);
        assert!(!activation[&a2]);
        assert!(!activation[&b]);

        // A muted track stays silent even when soloed.
        tree.get_mut(b).unwrap().track_mut().unwrap().soloed = true;
        assert!(!compute(&tree).unwrap()[&b]);
    }

    #[test]
    fn test_descendants_of_soloed_tracks_play() {
        let mut tree = Tree::new(2);
        let mixer = tree.add_mixer(None);
        let a = tree.add_child(mixer, None, ComponentKind::track()).unwrap();
        let a1 = tree.add_child(a, None, ComponentKind::track()).unwrap();
        let b = tree.add_child(mixer, None, ComponentKind::track()).unwrap();
        tree.get_mut(a).unwrap().track_mut().unwrap().soloed = true;

        let activation = compute(&tree).unwrap();
        assert!(activation[&a1]);
        assert!(!activation[&b]);
    }
}
