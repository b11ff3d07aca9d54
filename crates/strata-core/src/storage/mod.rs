//! Storage engine: node layout, file header and I/O, the slab store.

pub mod file;
pub mod header;
pub mod node;
pub mod path;
pub mod slab;

pub use node::{Node, NodeKind, NodeRef};
pub use path::NodePath;
pub use slab::{CommitInfo, SlabStore, StoreOptions, SyncMode};

use crate::error::StorageError;
use crate::types::{Epoch, Ref};

/// Relocatable node storage the schema layer is built on.
///
/// Nodes are addressed by [`Ref`]. A node reached through `translate` may be
/// read-only (committed data); it must be made writable before
/// `translate_mut`. Making a node writable never changes its ref within the
/// current transaction, but refs may change when the store commits.
pub trait NodeStore {
    /// Take ownership of `node` and give it a fresh ref.
    fn create_node_from(&mut self, node: Node) -> Result<Ref, StorageError>;
    /// Release a node. Its children are left alone.
    fn destroy(&mut self, r: Ref);
    /// Resolve a ref to the node's current image.
    fn translate(&self, r: Ref) -> NodeRef<'_>;
    /// Writable access. Panics if `r` is read-only.
    fn translate_mut(&mut self, r: Ref) -> &mut Node;
    /// Ensure `r` may be mutated in place. May allocate.
    fn make_writable(&mut self, r: Ref) -> Result<(), StorageError>;
    /// Claim `additional` bytes for writable node `r` before growing it
    /// through `translate_mut`. A refused claim leaves the node untouched.
    fn reserve(&mut self, r: Ref, additional: usize) -> Result<(), StorageError>;
    fn is_read_only(&self, r: Ref) -> bool;
    /// Root of everything reachable in the store.
    fn top_ref(&self) -> Ref;
    fn set_top_ref(&mut self, r: Ref);
    /// Incremented whenever a transaction ends.
    fn epoch(&self) -> Epoch;
    /// Incremented on every commit.
    fn version(&self) -> u64;

    /// Allocate a node of `size` zero slots (or empty strings).
    fn create_node(&mut self, kind: NodeKind, size: usize) -> Result<Ref, StorageError> {
        self.create_node_from(Node::new(kind, size))
    }

    fn create_int_node(&mut self, values: &[i64]) -> Result<Ref, StorageError> {
        self.create_node_from(Node::from_values(values))
    }

    fn create_ref_node(&mut self, refs: &[Ref]) -> Result<Ref, StorageError> {
        self.create_node_from(Node::from_refs(refs))
    }

    fn create_string_node(&mut self, values: &[&str]) -> Result<Ref, StorageError> {
        self.create_node_from(Node::from_strings(values))
    }

    /// Release `r` and every node reachable from it through `HasRefs` slots.
    fn destroy_deep(&mut self, r: Ref) {
        let children: Vec<Ref> = {
            let node = self.translate(r);
            if node.kind() == NodeKind::HasRefs {
                node.refs().filter(|child| !child.is_null()).collect()
            } else {
                Vec::new()
            }
        };
        for child in children {
            self.destroy_deep(child);
        }
        self.destroy(r);
    }
}
