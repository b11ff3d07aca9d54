use tracing::debug;

use crate::error::{Error, StorageError};
use crate::storage::node::SLOT_WIDTH;
use crate::storage::{NodeKind, NodePath, NodeStore};
use crate::types::{ColumnType, Ref};

use super::{ENUMKEYS_SLOT, SUBSPECS_SLOT, Spec, TYPES_SLOT};

impl Spec {
    /// Switch string column `column_ndx` to dictionary-coded storage.
    ///
    /// `keys_ref` is the column's value dictionary, built by the caller. The
    /// spec takes ownership of it: it is destroyed with the column. Returns
    /// the dictionary's location. The logical type stays `String`.
    pub fn upgrade_string_to_enum(
        &mut self,
        store: &mut impl NodeStore,
        column_ndx: usize,
        keys_ref: Ref,
    ) -> Result<NodePath, Error> {
        self.check_attached(&*store)?;
        let current = self.real_column_type(&*store, column_ndx);
        assert_eq!(
            current,
            ColumnType::String,
            "only plain string columns can be upgraded to enums"
        );
        assert!(!keys_ref.is_null(), "enum dictionary ref must not be null");
        self.make_writable(store)?;

        let mut staged = Vec::with_capacity(2);
        if let Err(e) = self.stage_enum_arrays(store, &mut staged) {
            for r in staged {
                store.destroy(r);
            }
            return Err(e.into());
        }
        for r in staged {
            store.translate_mut(self.top).add_ref(r);
        }

        let keys_ndx = self.enumkeys_ndx(&*store, column_ndx);
        let enumkeys = self.enumkeys(&*store);
        store.translate_mut(enumkeys).insert_ref(keys_ndx, keys_ref);
        self.set_column_type(store, column_ndx, ColumnType::StringEnum);
        debug!(column = column_ndx, keys = %keys_ref, "upgraded string column to enum");
        Ok(self.location.child(ENUMKEYS_SLOT).child(keys_ndx))
    }

    /// Create whichever of the subspec and enum-key arrays the root still
    /// lacks, in slot order, and claim room for linking them and for one more
    /// dictionary.
    fn stage_enum_arrays(
        &self,
        store: &mut impl NodeStore,
        staged: &mut Vec<Ref>,
    ) -> Result<(), StorageError> {
        let present = store.translate(self.top).size();
        debug_assert!(present >= SUBSPECS_SLOT);
        for _ in present..=ENUMKEYS_SLOT {
            staged.push(store.create_node(NodeKind::HasRefs, 0)?);
        }
        if !staged.is_empty() {
            store.reserve(self.top, staged.len() * SLOT_WIDTH)?;
        }
        let enumkeys = match staged.last() {
            Some(&r) => r,
            None => self.enumkeys(&*store),
        };
        store.reserve(enumkeys, SLOT_WIDTH)
    }

    /// Only `String -> StringEnum` is a legal storage-type change.
    fn set_column_type(&mut self, store: &mut impl NodeStore, column_ndx: usize, to: ColumnType) {
        let from = self.real_column_type(&*store, column_ndx);
        assert!(
            from == ColumnType::String && to == ColumnType::StringEnum,
            "illegal column type transition {from:?} -> {to:?}"
        );
        debug_assert!(!store.is_read_only(self.types));
        debug_assert_eq!(
            store.translate(self.top).get_ref(TYPES_SLOT),
            self.types
        );
        store.translate_mut(self.types).set(column_ndx, to.code());
    }

    /// Position of column `column_ndx`'s dictionary in the enum-key array:
    /// the number of `StringEnum` columns before it.
    pub fn enumkeys_ndx(&self, store: &impl NodeStore, column_ndx: usize) -> usize {
        self.assert_attached(store);
        let types = store.translate(self.types);
        (0..column_ndx)
            .filter(|&i| types.get(i) == ColumnType::StringEnum.code())
            .count()
    }

    /// Dictionary of column `column_ndx`, or [`Ref::NULL`] if the column is
    /// not enum-coded.
    pub fn enumkeys_ref(&self, store: &impl NodeStore, column_ndx: usize) -> Ref {
        if self.real_column_type(store, column_ndx) != ColumnType::StringEnum {
            return Ref::NULL;
        }
        let keys_ndx = self.enumkeys_ndx(store, column_ndx);
        store.translate(self.enumkeys(store)).get_ref(keys_ndx)
    }

    /// Location of column `column_ndx`'s dictionary, if it has one.
    pub fn enumkeys_location(&self, store: &impl NodeStore, column_ndx: usize) -> Option<NodePath> {
        if self.real_column_type(store, column_ndx) != ColumnType::StringEnum {
            return None;
        }
        let keys_ndx = self.enumkeys_ndx(store, column_ndx);
        Some(self.location.child(ENUMKEYS_SLOT).child(keys_ndx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::SlabStore;
    use crate::types::{ColumnAttr, DataType};

    fn columns(store: &mut SlabStore, types: &[DataType]) -> Spec {
        let mut spec = Spec::create(store, NodePath::root()).unwrap();
        for (i, &data_type) in types.iter().enumerate() {
            spec.add_column(store, data_type, &format!("c{i}"), ColumnAttr::empty())
                .unwrap();
        }
        spec
    }

    #[test]
    fn test_upgrade_string_column() {
        let mut store = SlabStore::new();
        let mut spec = columns(&mut store, &[DataType::Int, DataType::String]);
        let keys = store.create_string_node(&["x", "y"]).unwrap();

        let location = spec.upgrade_string_to_enum(&mut store, 1, keys).unwrap();
        assert_eq!(spec.real_column_type(&store, 1), ColumnType::StringEnum);
        assert_eq!(spec.column_type(&store, 1), DataType::String);
        assert_eq!(spec.enumkeys_ref(&store, 1), keys);
        assert_eq!(spec.enumkeys_ref(&store, 0), Ref::NULL);
        assert_eq!(spec.enumkeys_location(&store, 1), Some(location.clone()));
        assert_eq!(location.resolve(&store), keys);
        assert_eq!(spec.enumkeys_location(&store, 0), None);

        // Both optional arrays now exist; the subspec array is empty.
        assert_eq!(store.translate(spec.top_ref()).size(), ENUMKEYS_SLOT + 1);
        assert_eq!(spec.num_subspecs(&store), 0);
        spec.verify(&store).unwrap();
    }

    #[test]
    fn test_later_dictionaries_shift() {
        let mut store = SlabStore::new();
        let mut spec = columns(
            &mut store,
            &[DataType::String, DataType::String, DataType::String],
        );
        let k2 = store.create_string_node(&["b"]).unwrap();
        let k0 = store.create_string_node(&["a"]).unwrap();

        spec.upgrade_string_to_enum(&mut store, 2, k2).unwrap();
        spec.upgrade_string_to_enum(&mut store, 0, k0).unwrap();
        assert_eq!(spec.enumkeys_ndx(&store, 2), 1);
        assert_eq!(spec.enumkeys_ref(&store, 0), k0);
        assert_eq!(spec.enumkeys_ref(&store, 2), k2);

        spec.remove_column(&mut store, 0).unwrap();
        assert_eq!(spec.enumkeys_ref(&store, 1), k2);
        assert_eq!(spec.enumkeys_ndx(&store, 1), 0);
        spec.verify(&store).unwrap();
    }

    #[test]
    fn test_upgrade_with_existing_table_column() {
        let mut store = SlabStore::new();
        let mut spec = columns(&mut store, &[DataType::Table, DataType::String]);
        let keys = store.create_string_node(&["only"]).unwrap();
        spec.upgrade_string_to_enum(&mut store, 1, keys).unwrap();
        assert_eq!(spec.num_subspecs(&store), 1);
        assert_eq!(spec.enumkeys_ref(&store, 1), keys);
        spec.verify(&store).unwrap();
    }

    #[test]
    #[should_panic(expected = "only plain string columns")]
    fn test_upgrade_requires_string_column() {
        let mut store = SlabStore::new();
        let mut spec = columns(&mut store, &[DataType::Int]);
        let keys = store.create_string_node(&[]).unwrap();
        let _ = spec.upgrade_string_to_enum(&mut store, 0, keys);
    }

    #[test]
    #[should_panic(expected = "only plain string columns")]
    fn test_upgrade_twice_panics() {
        let mut store = SlabStore::new();
        let mut spec = columns(&mut store, &[DataType::String]);
        let keys = store.create_string_node(&["v"]).unwrap();
        spec.upgrade_string_to_enum(&mut store, 0, keys).unwrap();
        let _ = spec.upgrade_string_to_enum(&mut store, 0, keys);
    }

    #[test]
    fn test_upgrade_out_of_memory_changes_nothing() {
        let mut store = SlabStore::new();
        let mut spec = columns(&mut store, &[DataType::String]);
        let info = store.commit().unwrap();
        spec.update_from_parent(&store, info.old_baseline);
        let keys = store.create_string_node(&["v"]).unwrap();

        // Room to copy the four spec nodes (80 bytes) and create the
        // subspec array (8 bytes), but not the enum-key array.
        store.set_allocation_limit(Some(store.allocated() + 88));
        match spec.upgrade_string_to_enum(&mut store, 0, keys) {
            Err(Error::Storage(StorageError::OutOfMemory { .. })) => {}
            other => panic!("expected OutOfMemory, got {other:?}"),
        }
        assert_eq!(spec.real_column_type(&store, 0), ColumnType::String);
        assert_eq!(spec.num_subspecs(&store), 0);
        assert_eq!(store.translate(spec.top_ref()).size(), SUBSPECS_SLOT);
        spec.verify(&store).unwrap();

        store.set_allocation_limit(None);
        spec.upgrade_string_to_enum(&mut store, 0, keys).unwrap();
        assert_eq!(spec.enumkeys_ref(&store, 0), keys);
    }
}
