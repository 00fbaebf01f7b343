//! Graph order and feedback detection.
//!
//! A component's graph order is the path of child indices from its mixer
//! down to it, with the mixer's own index first. Processing runs in graph
//! order, so an edge whose reader comes at or before its writer has to read
//! the previous block instead.

use crate::component::{ComponentId, Io, Tree};
use crate::error::Result;

pub type GraphOrder = Vec<usize>;

/// True if audio written at `writer` and read at `reader` runs backwards.
///
/// When one order is a prefix of the other the shallower component contains
/// the deeper one. Children run before their container's strip, so a
/// descendant writing into its container is fine and the reverse is not.
pub fn feedsback(writer: &[usize], reader: &[usize]) -> bool {
    let length = reader.len().min(writer.len());
    if writer.len() < reader.len() {
        reader[..length] <= *writer
    } else if reader.len() < writer.len() {
        *reader < writer[..length]
    } else {
        reader <= writer
    }
}

/// True if anything writing into `id` does so backwards.
pub fn needs_feedback(tree: &Tree, id: ComponentId) -> Result<bool> {
    let reader = tree.graph_order(id)?;
    for (&(partner, _), io) in &tree.get(id)?.connections {
        if *io != Io::Write || !tree.contains(partner) {
            continue;
        }
        if feedsback(&tree.feedback_graph_order(partner)?, &reader) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_and_descendant() {
        let outer = [0, 1];
        let inner = [0, 1, 2];
        assert!(feedsback(&outer, &inner));
        assert!(!feedsback(&inner, &outer));
    }

    #[test]
    fn test_siblings() {
        let first = [0, 0];
        let second = [0, 1];
        assert!(!feedsback(&first, &second));
        assert!(feedsback(&second, &first));
    }

    #[test]
    fn test_self_edge_feeds_back() {
        assert!(feedsback(&[0, 2], &[0, 2]));
    }

    #[test]
    fn test_unrelated_depths() {
        // An earlier branch's descendant writing into a later, shallower one.
        assert!(!feedsback(&[0, 0, 3], &[0, 1]));
        // A later branch's descendant writing back into an earlier sibling.
        assert!(feedsback(&[0, 2, 0], &[0, 1]));
    }
}
