use std::fmt;

use super::NodeStore;
use crate::types::Ref;

/// Location of a node: the slot indices to follow from the store's top ref.
///
/// The empty path is the top ref itself. A path stays valid across commits
/// even though the refs along it move, which is what lets a detached child
/// accessor find its node set again after its parent relocated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    /// The location of slot `ndx` of the node at `self`.
    pub fn child(&self, ndx: usize) -> Self {
        let mut slots = self.0.clone();
        slots.push(ndx);
        NodePath(slots)
    }

    /// The parent location and the slot index within it, or `None` at the root.
    pub fn parent(&self) -> Option<(NodePath, usize)> {
        let (&last, rest) = self.0.split_last()?;
        Some((NodePath(rest.to_vec()), last))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn slots(&self) -> &[usize] {
        &self.0
    }

    /// Follow the path through `HasRefs` nodes, starting at the store's top ref.
    pub fn resolve(&self, store: &impl NodeStore) -> Ref {
        self.0
            .iter()
            .fold(store.top_ref(), |r, &ndx| store.translate(r).get_ref(ndx))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for ndx in &self.0 {
            write!(f, "/{ndx}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SlabStore;

    #[test]
    fn test_child_and_parent() {
        let path = NodePath::root().child(3).child(1);
        assert_eq!(path.slots(), &[3, 1]);
        assert_eq!(path.to_string(), "/3/1");

        let (parent, ndx) = path.parent().unwrap();
        assert_eq!(ndx, 1);
        assert_eq!(parent, NodePath::root().child(3));
        assert!(NodePath::root().parent().is_none());
        assert!(NodePath::root().is_root());
        assert!(!path.is_root());
        assert_eq!(NodePath::root().to_string(), "/");
    }

    #[test]
    fn test_resolve_follows_slots() {
        let mut store = SlabStore::new();
        let leaf = store.create_int_node(&[7]).unwrap();
        let inner = store.create_ref_node(&[Ref::NULL, leaf]).unwrap();
        let top = store.create_ref_node(&[inner]).unwrap();
        store.set_top_ref(top);

        assert_eq!(NodePath::root().resolve(&store), top);
        assert_eq!(NodePath::root().child(0).resolve(&store), inner);
        assert_eq!(NodePath::root().child(0).child(1).resolve(&store), leaf);
    }

    #[test]
    fn test_resolve_survives_relocation() {
        let mut store = SlabStore::new();
        let leaf = store.create_int_node(&[1]).unwrap();
        let top = store.create_ref_node(&[leaf]).unwrap();
        store.set_top_ref(top);
        store.commit().unwrap();

        let path = NodePath::root().child(0);
        let before = path.resolve(&store);
        store.make_writable(before).unwrap();
        store.translate_mut(before).set(0, 2);
        store.commit().unwrap();

        let after = path.resolve(&store);
        assert_ne!(before, after);
        assert_eq!(store.translate(after).get(0), 2);
    }
}
