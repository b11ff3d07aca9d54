//! Column specs: the node set describing one table's columns.
//!
//! A spec is a `HasRefs` root whose slots point at parallel arrays:
//!
//! ```text
//! [0] types     Normal   one ColumnType code per column
//! [1] names     String   one name per column
//! [2] attrs     Normal   one ColumnAttr word per column
//! [3] subspecs  HasRefs  one nested spec root per Table column     (optional)
//! [4] enumkeys  HasRefs  one dictionary per StringEnum column      (optional)
//! ```
//!
//! Slots 3 and 4 exist only once a table column or an enum upgrade needed
//! them, and are never removed afterwards: a missing slot is not the same
//! as an empty array. Creating slot 4 always creates slot 3 first.
//!
//! A [`Spec`] caches the refs of the root and the three mandatory arrays,
//! which stay put between commits. Slots 3 and 4 are read from the root on
//! every use: another accessor bound to the same node set may have appended
//! them. Each accessor is stamped with the store's epoch and version when it
//! binds. After a non-transactional commit it must be refreshed with
//! [`Spec::update_from_parent`]; once the store's epoch moves on (a
//! transaction ended) it is detached for good. Readers assert attachment,
//! mutators report it as [`TxnError`].

pub mod descriptor;
pub mod migrate;
pub mod subspec;

pub use descriptor::{ColumnDescriptor, SchemaDescriptor};
pub use subspec::SubspecRef;

use tracing::{debug, trace};

use crate::error::{Error, SchemaError, StorageError, TxnError};
use crate::storage::node::{OFFSET_WIDTH, SLOT_WIDTH};
use crate::storage::{NodeKind, NodePath, NodeStore};
use crate::types::{ColumnAttr, ColumnType, DataType, Epoch, Ref};

pub(crate) const TYPES_SLOT: usize = 0;
pub(crate) const NAMES_SLOT: usize = 1;
pub(crate) const ATTRS_SLOT: usize = 2;
pub(crate) const SUBSPECS_SLOT: usize = 3;
pub(crate) const ENUMKEYS_SLOT: usize = 4;

/// Physical placement of a column in its table's column-ref array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Slot of the column's data; an index, if any, follows at `+ 1`.
    pub column_ref_ndx: usize,
    pub has_index: bool,
}

/// Accessor for one spec node set.
#[derive(Debug, Clone)]
pub struct Spec {
    location: NodePath,
    top: Ref,
    types: Ref,
    names: Ref,
    attrs: Ref,
    epoch: Epoch,
    version: u64,
}

fn decode_type(code: i64) -> ColumnType {
    match ColumnType::from_code(code) {
        Some(ty) => ty,
        None => panic!("corrupted spec: unknown column type code {code}"),
    }
}

fn decode_attr(code: i64) -> ColumnAttr {
    match ColumnAttr::from_code(code) {
        Some(attr) => attr,
        None => panic!("corrupted spec: unknown attribute bits {code:#x}"),
    }
}

impl Spec {
    /// Allocate the root and the three mandatory arrays of an empty spec.
    ///
    /// Either every node is created or none is.
    pub fn create_empty(store: &mut impl NodeStore) -> Result<Ref, StorageError> {
        let mut created = Vec::with_capacity(3);
        let result = Self::build_empty(store, &mut created);
        if result.is_err() {
            for r in created {
                store.destroy(r);
            }
        }
        result
    }

    fn build_empty(store: &mut impl NodeStore, created: &mut Vec<Ref>) -> Result<Ref, StorageError> {
        for kind in [NodeKind::Normal, NodeKind::String, NodeKind::Normal] {
            created.push(store.create_node(kind, 0)?);
        }
        store.create_ref_node(created)
    }

    /// Create an empty spec and link it at `location`.
    ///
    /// The root location replaces the store's top ref. Any other location
    /// must name an existing slot of a `HasRefs` node; the previous content
    /// of that slot is overwritten, not destroyed.
    pub fn create(store: &mut impl NodeStore, location: NodePath) -> Result<Spec, Error> {
        let top = Self::create_empty(store)?;
        match location.parent() {
            None => store.set_top_ref(top),
            Some((parent, ndx)) => {
                let parent_ref = parent.resolve(&*store);
                if let Err(e) = store.make_writable(parent_ref) {
                    store.destroy_deep(top);
                    return Err(e.into());
                }
                store.translate_mut(parent_ref).set_ref(ndx, top);
            }
        }
        debug!(location = %location, top = %top, "created spec");
        Ok(Self::bind(&*store, location, top))
    }

    /// Bind an accessor to the spec found at `location`.
    pub fn attach(store: &impl NodeStore, location: NodePath) -> Spec {
        let top = location.resolve(store);
        Self::bind(store, location, top)
    }

    pub(crate) fn bind(store: &impl NodeStore, location: NodePath, top: Ref) -> Spec {
        let mut spec = Spec {
            location,
            top: Ref::NULL,
            types: Ref::NULL,
            names: Ref::NULL,
            attrs: Ref::NULL,
            epoch: store.epoch(),
            version: store.version(),
        };
        spec.init(store, top);
        spec
    }

    fn init(&mut self, store: &impl NodeStore, top: Ref) {
        let node = store.translate(top);
        assert_eq!(
            node.kind(),
            NodeKind::HasRefs,
            "spec root {top} is not a ref array"
        );
        self.top = top;
        self.types = node.get_ref(TYPES_SLOT);
        self.names = node.get_ref(NAMES_SLOT);
        self.attrs = node.get_ref(ATTRS_SLOT);
        self.epoch = store.epoch();
        self.version = store.version();
    }

    pub fn location(&self) -> &NodePath {
        &self.location
    }

    /// Ref of the spec's root node as of the last bind or refresh.
    pub fn top_ref(&self) -> Ref {
        self.top
    }

    /// Whether this accessor may still be used against `store`.
    pub fn is_attached(&self, store: &impl NodeStore) -> bool {
        self.check_attached(store).is_ok()
    }

    pub(crate) fn check_attached(&self, store: &impl NodeStore) -> Result<(), TxnError> {
        if self.epoch != store.epoch() {
            return Err(TxnError::StaleAccessor {
                accessor: self.epoch,
                current: store.epoch(),
            });
        }
        if self.version != store.version() {
            return Err(TxnError::NotRefreshed {
                accessor: self.version,
                current: store.version(),
            });
        }
        Ok(())
    }

    pub(crate) fn assert_attached(&self, store: &impl NodeStore) {
        if let Err(e) = self.check_attached(store) {
            panic!("{e}");
        }
    }

    fn optional_slot(&self, store: &impl NodeStore, slot: usize) -> Ref {
        let top = store.translate(self.top);
        if top.size() > slot {
            top.get_ref(slot)
        } else {
            Ref::NULL
        }
    }

    /// The subspec array, or [`Ref::NULL`] if no table column ever needed it.
    pub(crate) fn subspecs(&self, store: &impl NodeStore) -> Ref {
        self.optional_slot(store, SUBSPECS_SLOT)
    }

    /// The enum-key array, or [`Ref::NULL`] before the first enum upgrade.
    pub(crate) fn enumkeys(&self, store: &impl NodeStore) -> Ref {
        self.optional_slot(store, ENUMKEYS_SLOT)
    }

    /// Make every node of this spec's own set writable.
    ///
    /// Done before any edit so that, once it succeeded, edits to these nodes
    /// that do not grow them cannot fail for the rest of the transaction.
    pub(crate) fn make_writable(&self, store: &mut impl NodeStore) -> Result<(), StorageError> {
        let optional = [self.subspecs(&*store), self.enumkeys(&*store)];
        for r in [self.top, self.types, self.names, self.attrs]
            .into_iter()
            .chain(optional)
        {
            if !r.is_null() {
                store.make_writable(r)?;
            }
        }
        Ok(())
    }

    fn assert_column(&self, store: &impl NodeStore, ndx: usize) {
        let count = self.column_count(store);
        assert!(ndx < count, "column index {ndx} out of range ({count} columns)");
    }

    pub fn column_count(&self, store: &impl NodeStore) -> usize {
        self.assert_attached(store);
        store.translate(self.names).size()
    }

    /// Logical type of column `ndx`.
    pub fn column_type(&self, store: &impl NodeStore, ndx: usize) -> DataType {
        self.real_column_type(store, ndx).data_type()
    }

    /// Storage type of column `ndx` (`StringEnum` after an enum upgrade).
    pub fn real_column_type(&self, store: &impl NodeStore, ndx: usize) -> ColumnType {
        self.assert_column(store, ndx);
        decode_type(store.translate(self.types).get(ndx))
    }

    pub fn column_name<'s>(&self, store: &'s impl NodeStore, ndx: usize) -> &'s str {
        self.assert_column(store, ndx);
        store.translate(self.names).get_str(ndx)
    }

    /// Index of the first column called `name`.
    pub fn column_index(&self, store: &impl NodeStore, name: &str) -> Option<usize> {
        self.assert_attached(store);
        store.translate(self.names).find_first_str(name)
    }

    pub fn column_attr(&self, store: &impl NodeStore, ndx: usize) -> ColumnAttr {
        self.assert_column(store, ndx);
        decode_attr(store.translate(self.attrs).get(ndx))
    }

    /// Position of column `ndx` among its table's column refs. Every
    /// indexed column before it occupies one extra slot for its index.
    /// `ndx` may equal the column count: the position a new column would get.
    pub fn column_pos(&self, store: &impl NodeStore, ndx: usize) -> usize {
        self.assert_attached(store);
        let attrs = store.translate(self.attrs);
        assert!(
            ndx <= attrs.size(),
            "column index {ndx} out of range ({} columns)",
            attrs.size()
        );
        ndx + (0..ndx)
            .filter(|&i| decode_attr(attrs.get(i)).contains(ColumnAttr::INDEXED))
            .count()
    }

    pub fn column_info(&self, store: &impl NodeStore, ndx: usize) -> ColumnInfo {
        ColumnInfo {
            column_ref_ndx: self.column_pos(store, ndx),
            has_index: self.column_attr(store, ndx).contains(ColumnAttr::INDEXED),
        }
    }

    /// Type of the first column of the spec rooted at `top`, if it has any.
    pub fn first_column_type(store: &impl NodeStore, top: Ref) -> Option<ColumnType> {
        let types = store.translate(store.translate(top).get_ref(TYPES_SLOT));
        if types.is_empty() {
            None
        } else {
            Some(decode_type(types.get(0)))
        }
    }

    /// Append a column and return its index.
    ///
    /// A `Table` column also gets a fresh empty subspec, creating the
    /// subspec array on first use.
    pub fn add_column(
        &mut self,
        store: &mut impl NodeStore,
        data_type: DataType,
        name: &str,
        attr: ColumnAttr,
    ) -> Result<usize, Error> {
        self.check_attached(&*store)?;
        self.make_writable(store)?;
        let column_ndx = self.column_count(&*store);
        let column_type = ColumnType::from(data_type);

        // Everything that can fail happens here, before the first edit.
        let mut staged = Vec::with_capacity(2);
        if let Err(e) = self.stage_column(store, column_type, name, &mut staged) {
            for r in staged {
                store.destroy_deep(r);
            }
            return Err(e.into());
        }

        if let Some(&subspec) = staged.first() {
            if let Some(&array) = staged.get(1) {
                debug_assert_eq!(store.translate(self.top).size(), SUBSPECS_SLOT);
                store.translate_mut(self.top).add_ref(array);
            }
            let subspecs = self.subspecs(&*store);
            store.translate_mut(subspecs).add_ref(subspec);
        }
        store.translate_mut(self.types).add(column_type.code());
        store.translate_mut(self.names).add_str(name);
        store.translate_mut(self.attrs).add(attr.code());
        debug!(column = column_ndx, name, ?column_type, ?attr, "added column");
        Ok(column_ndx)
    }

    /// Allocate what a new column needs and claim the growth of every array
    /// it is appended to. `staged` receives the new subspec, followed by the
    /// new subspec array if this is the first table column.
    fn stage_column(
        &self,
        store: &mut impl NodeStore,
        column_type: ColumnType,
        name: &str,
        staged: &mut Vec<Ref>,
    ) -> Result<(), StorageError> {
        if column_type == ColumnType::Table {
            staged.push(Self::create_empty(store)?);
            let subspecs = self.subspecs(&*store);
            if subspecs.is_null() {
                let array = store.create_node(NodeKind::HasRefs, 0)?;
                staged.push(array);
                store.reserve(array, SLOT_WIDTH)?;
                store.reserve(self.top, SLOT_WIDTH)?;
            } else {
                store.reserve(subspecs, SLOT_WIDTH)?;
            }
        }
        store.reserve(self.types, SLOT_WIDTH)?;
        store.reserve(self.names, OFFSET_WIDTH + name.len())?;
        store.reserve(self.attrs, SLOT_WIDTH)
    }

    /// Rename column `ndx`. Names are not required to be unique.
    pub fn rename_column(
        &mut self,
        store: &mut impl NodeStore,
        ndx: usize,
        name: &str,
    ) -> Result<(), Error> {
        self.check_attached(&*store)?;
        self.assert_column(&*store, ndx);
        self.make_writable(store)?;
        let old_len = store.translate(self.names).get_str(ndx).len();
        store.reserve(self.names, name.len().saturating_sub(old_len))?;
        store.translate_mut(self.names).set_str(ndx, name);
        debug!(column = ndx, name, "renamed column");
        Ok(())
    }

    /// Remove column `ndx`, destroying its subspec or enum dictionary.
    ///
    /// Only fails while the spec's nodes are still read-only, i.e. before
    /// the first successful mutation since the last commit.
    pub fn remove_column(&mut self, store: &mut impl NodeStore, ndx: usize) -> Result<(), Error> {
        self.check_attached(&*store)?;
        self.assert_column(&*store, ndx);
        self.make_writable(store)?;

        let column_type = self.real_column_type(&*store, ndx);
        match column_type {
            ColumnType::Table => {
                let subspec_ndx = self.subspec_ndx(&*store, ndx);
                let subspecs = self.subspecs(&*store);
                let subspec = store.translate(subspecs).get_ref(subspec_ndx);
                store.destroy_deep(subspec);
                store.translate_mut(subspecs).erase(subspec_ndx);
            }
            ColumnType::StringEnum => {
                let keys_ndx = self.enumkeys_ndx(&*store, ndx);
                let enumkeys = self.enumkeys(&*store);
                let keys = store.translate(enumkeys).get_ref(keys_ndx);
                store.destroy_deep(keys);
                store.translate_mut(enumkeys).erase(keys_ndx);
            }
            _ => {}
        }

        store.translate_mut(self.types).erase(ndx);
        store.translate_mut(self.names).erase(ndx);
        store.translate_mut(self.attrs).erase(ndx);
        debug!(column = ndx, ?column_type, "removed column");
        Ok(())
    }

    /// Replace the attribute set of column `ndx`.
    pub fn set_column_attr(
        &mut self,
        store: &mut impl NodeStore,
        ndx: usize,
        attr: ColumnAttr,
    ) -> Result<(), Error> {
        self.check_attached(&*store)?;
        self.assert_column(&*store, ndx);
        self.make_writable(store)?;
        store.translate_mut(self.attrs).set(ndx, attr.code());
        debug!(column = ndx, ?attr, "set column attributes");
        Ok(())
    }

    /// Re-synchronise with the store after a non-transactional commit.
    ///
    /// The spec's root is looked up again through its location. If it is
    /// unchanged and lies in the part of the store that existed before the
    /// commit (`old_baseline`), nothing below it moved and only the version
    /// stamp is renewed. Otherwise every cached ref is re-read. Calling this
    /// twice is the same as calling it once.
    ///
    /// # Panics
    ///
    /// Panics if a transaction ended since the accessor was bound.
    pub fn update_from_parent(&mut self, store: &impl NodeStore, old_baseline: u64) {
        assert_eq!(
            self.epoch,
            store.epoch(),
            "update_from_parent on a detached spec accessor"
        );
        let top = self.location.resolve(store);
        if top == self.top && top.offset() < old_baseline {
            self.version = store.version();
            trace!(location = %self.location, "spec unchanged by commit");
            return;
        }
        self.init(store, top);
        trace!(location = %self.location, top = %top, "spec refreshed");
    }

    /// Destroy the spec's whole node tree, subspecs and dictionaries included.
    ///
    /// The slot that referenced the spec is left untouched.
    pub fn destroy(self, store: &mut impl NodeStore) {
        store.destroy_deep(self.top);
        debug!(location = %self.location, "destroyed spec");
    }

    /// Structural equality: same columns with the same names, types and
    /// attributes, and equal subspecs. Refs are never compared, so the two
    /// specs may live in different stores.
    pub fn equals(&self, store: &impl NodeStore, other: &Spec, other_store: &impl NodeStore) -> bool {
        self.assert_attached(store);
        other.assert_attached(other_store);
        specs_equal(store, self.top, other_store, other.top)
    }

    /// Check every structural invariant of the spec tree.
    pub fn verify(&self, store: &impl NodeStore) -> Result<(), Error> {
        self.check_attached(store)?;
        verify_node_set(store, self.top, &self.location)?;
        Ok(())
    }
}

fn specs_equal(a_store: &impl NodeStore, a: Ref, b_store: &impl NodeStore, b: Ref) -> bool {
    let (a_top, b_top) = (a_store.translate(a), b_store.translate(b));
    let a_types = a_store.translate(a_top.get_ref(TYPES_SLOT));
    let b_types = b_store.translate(b_top.get_ref(TYPES_SLOT));
    if a_types.size() != b_types.size() {
        return false;
    }
    let a_names = a_store.translate(a_top.get_ref(NAMES_SLOT));
    let b_names = b_store.translate(b_top.get_ref(NAMES_SLOT));
    let a_attrs = a_store.translate(a_top.get_ref(ATTRS_SLOT));
    let b_attrs = b_store.translate(b_top.get_ref(ATTRS_SLOT));

    let mut subspec_ndx = 0;
    for i in 0..a_types.size() {
        let code = a_types.get(i);
        if code != b_types.get(i)
            || a_names.get_str(i) != b_names.get_str(i)
            || a_attrs.get(i) != b_attrs.get(i)
        {
            return false;
        }
        if code == ColumnType::Table.code() {
            let a_sub = a_store
                .translate(a_top.get_ref(SUBSPECS_SLOT))
                .get_ref(subspec_ndx);
            let b_sub = b_store
                .translate(b_top.get_ref(SUBSPECS_SLOT))
                .get_ref(subspec_ndx);
            if !specs_equal(a_store, a_sub, b_store, b_sub) {
                return false;
            }
            subspec_ndx += 1;
        }
    }
    true
}

fn violated(location: &NodePath, what: String) -> SchemaError {
    SchemaError::InvariantViolated(format!("spec at {location}: {what}"))
}

fn verify_node_set(store: &impl NodeStore, top: Ref, location: &NodePath) -> Result<(), SchemaError> {
    let root = store.translate(top);
    if root.kind() != NodeKind::HasRefs {
        return Err(violated(location, format!("root is a {:?} node", root.kind())));
    }
    if !(ATTRS_SLOT + 1..=ENUMKEYS_SLOT + 1).contains(&root.size()) {
        return Err(violated(location, format!("root has {} slots", root.size())));
    }

    let expect = |slot: usize, kind: NodeKind| {
        let r = root.get_ref(slot);
        if r.is_null() {
            return Err(violated(location, format!("slot {slot} is null")));
        }
        let node = store.translate(r);
        if node.kind() != kind {
            return Err(violated(
                location,
                format!("slot {slot} is a {:?} node, expected {kind:?}", node.kind()),
            ));
        }
        Ok(node)
    };

    let types = expect(TYPES_SLOT, NodeKind::Normal)?;
    let names = expect(NAMES_SLOT, NodeKind::String)?;
    let attrs = expect(ATTRS_SLOT, NodeKind::Normal)?;
    let count = types.size();
    if names.size() != count || attrs.size() != count {
        return Err(violated(
            location,
            format!(
                "{count} types, {} names, {} attributes",
                names.size(),
                attrs.size()
            ),
        ));
    }

    let mut tables = 0;
    let mut enums = 0;
    for i in 0..count {
        let code = types.get(i);
        match ColumnType::from_code(code) {
            Some(ColumnType::Table) => tables += 1,
            Some(ColumnType::StringEnum) => enums += 1,
            Some(_) => {}
            None => return Err(SchemaError::UnknownColumnType(code)),
        }
        let attr = attrs.get(i);
        if ColumnAttr::from_code(attr).is_none() {
            return Err(SchemaError::UnknownAttribute(attr));
        }
    }

    let subspecs = if root.size() > SUBSPECS_SLOT {
        Some(expect(SUBSPECS_SLOT, NodeKind::HasRefs)?)
    } else {
        None
    };
    let num_subspecs = subspecs.map_or(0, |node| node.size());
    if num_subspecs != tables {
        return Err(violated(
            location,
            format!("{tables} table columns but {num_subspecs} subspecs"),
        ));
    }

    let enumkeys = if root.size() > ENUMKEYS_SLOT {
        Some(expect(ENUMKEYS_SLOT, NodeKind::HasRefs)?)
    } else {
        None
    };
    let num_keys = enumkeys.map_or(0, |node| node.size());
    if num_keys != enums {
        return Err(violated(
            location,
            format!("{enums} enum columns but {num_keys} dictionaries"),
        ));
    }
    if let Some(keys) = enumkeys
        && keys.refs().any(|r| r.is_null())
    {
        return Err(violated(location, "null enum dictionary".to_string()));
    }

    if let Some(subspecs) = subspecs {
        for (i, sub) in subspecs.refs().enumerate() {
            let sub_location = location.child(SUBSPECS_SLOT).child(i);
            if sub.is_null() {
                return Err(violated(&sub_location, "null subspec".to_string()));
            }
            verify_node_set(store, sub, &sub_location)?;
        }
    }
    Ok(())
}
