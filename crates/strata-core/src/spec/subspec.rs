use crate::storage::{NodePath, NodeStore};
use crate::types::{ColumnType, Ref};

use super::{SUBSPECS_SLOT, Spec};

/// Non-owning view of one entry in a spec's subspec array.
///
/// Holds the parent accessor and the entry's index, nothing else; the
/// subspec's ref is looked up on demand. Turn it into a standalone accessor
/// with [`Spec::from_subspec`].
#[derive(Debug, Clone, Copy)]
pub struct SubspecRef<'a> {
    parent: &'a Spec,
    subspec_ndx: usize,
}

impl SubspecRef<'_> {
    pub fn subspec_ndx(&self) -> usize {
        self.subspec_ndx
    }

    /// Where the subspec lives, relative to the store's top ref.
    pub fn location(&self) -> NodePath {
        self.parent
            .location()
            .child(SUBSPECS_SLOT)
            .child(self.subspec_ndx)
    }

    /// Current ref of the subspec's root.
    pub fn get_ref(&self, store: &impl NodeStore) -> Ref {
        self.parent.subspec_ref(store, self.subspec_ndx)
    }
}

impl Spec {
    /// Position of column `column_ndx`'s subspec in the subspec array: the
    /// number of `Table` columns before it.
    pub fn subspec_ndx(&self, store: &impl NodeStore, column_ndx: usize) -> usize {
        self.assert_attached(store);
        let types = store.translate(self.types);
        assert!(
            column_ndx <= types.size(),
            "column index {column_ndx} out of range ({} columns)",
            types.size()
        );
        (0..column_ndx)
            .filter(|&i| types.get(i) == ColumnType::Table.code())
            .count()
    }

    pub fn subspec_ref(&self, store: &impl NodeStore, subspec_ndx: usize) -> Ref {
        let count = self.num_subspecs(store);
        assert!(
            subspec_ndx < count,
            "subspec index {subspec_ndx} out of range ({count} subspecs)"
        );
        store.translate(self.subspecs(store)).get_ref(subspec_ndx)
    }

    pub fn num_subspecs(&self, store: &impl NodeStore) -> usize {
        self.assert_attached(store);
        let subspecs = self.subspecs(store);
        if subspecs.is_null() {
            0
        } else {
            store.translate(subspecs).size()
        }
    }

    /// Handle to the spec of `Table` column `column_ndx`.
    pub fn subtable_spec(&self, store: &impl NodeStore, column_ndx: usize) -> SubspecRef<'_> {
        let column_type = self.real_column_type(store, column_ndx);
        assert_eq!(
            column_type,
            ColumnType::Table,
            "column {column_ndx} is not a table column"
        );
        SubspecRef {
            parent: self,
            subspec_ndx: self.subspec_ndx(store, column_ndx),
        }
    }

    /// Handle to entry `subspec_ndx` of the subspec array.
    pub fn subspec_by_ndx(&self, store: &impl NodeStore, subspec_ndx: usize) -> SubspecRef<'_> {
        let count = self.num_subspecs(store);
        assert!(
            subspec_ndx < count,
            "subspec index {subspec_ndx} out of range ({count} subspecs)"
        );
        SubspecRef {
            parent: self,
            subspec_ndx,
        }
    }

    /// Standalone accessor for the subspec behind `handle`.
    pub fn from_subspec(store: &impl NodeStore, handle: SubspecRef<'_>) -> Spec {
        let top = handle.get_ref(store);
        Spec::bind(store, handle.location(), top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SlabStore;
    use crate::types::{ColumnAttr, DataType};

    fn nested(store: &mut SlabStore) -> Spec {
        let mut spec = Spec::create(store, NodePath::root()).unwrap();
        spec.add_column(store, DataType::Table, "t0", ColumnAttr::empty())
            .unwrap();
        spec.add_column(store, DataType::Int, "n", ColumnAttr::empty())
            .unwrap();
        spec.add_column(store, DataType::Table, "t1", ColumnAttr::empty())
            .unwrap();
        spec
    }

    #[test]
    fn test_subspec_ndx_counts_preceding_tables() {
        let mut store = SlabStore::new();
        let spec = nested(&mut store);
        assert_eq!(spec.subspec_ndx(&store, 0), 0);
        assert_eq!(spec.subspec_ndx(&store, 1), 1);
        assert_eq!(spec.subspec_ndx(&store, 2), 1);
        assert_eq!(spec.subspec_ndx(&store, 3), 2);
        assert_eq!(spec.num_subspecs(&store), 2);
    }

    #[test]
    fn test_handle_location_and_ref() {
        let mut store = SlabStore::new();
        let spec = nested(&mut store);

        let handle = spec.subtable_spec(&store, 2);
        assert_eq!(handle.subspec_ndx(), 1);
        assert_eq!(handle.location(), NodePath::root().child(SUBSPECS_SLOT).child(1));
        assert_eq!(handle.get_ref(&store), handle.location().resolve(&store));
        assert_eq!(handle.get_ref(&store), spec.subspec_ref(&store, 1));
        assert_eq!(spec.subspec_by_ndx(&store, 1).location(), handle.location());
    }

    #[test]
    fn test_from_subspec_reads_child() {
        let mut store = SlabStore::new();
        let spec = nested(&mut store);

        let mut child = Spec::from_subspec(&store, spec.subtable_spec(&store, 0));
        assert_eq!(child.column_count(&store), 0);
        child
            .add_column(&mut store, DataType::String, "inner", ColumnAttr::empty())
            .unwrap();

        let again = Spec::from_subspec(&store, spec.subspec_by_ndx(&store, 0));
        assert_eq!(again.column_name(&store, 0), "inner");
        assert_eq!(Spec::first_column_type(&store, again.top_ref()), Some(ColumnType::String));
    }

    #[test]
    #[should_panic(expected = "not a table column")]
    fn test_subtable_spec_requires_table_column() {
        let mut store = SlabStore::new();
        let spec = nested(&mut store);
        spec.subtable_spec(&store, 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_subspec_by_ndx_out_of_range() {
        let mut store = SlabStore::new();
        let spec = nested(&mut store);
        spec.subspec_by_ndx(&store, 2);
    }
}
