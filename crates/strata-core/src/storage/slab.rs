use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, StorageError, TxnError};
use crate::types::{DATA_START, Epoch, NODE_ALIGN, Ref};

use super::NodeStore;
use super::file::FileManager;
use super::node::{Node, NodeKind, NodeRef, aligned_len};

/// Controls when `fsync` is called during commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Fsync after every commit (default). Maximum durability.
    #[default]
    Full = 0,
    /// Skip fsync entirely. Data may be lost on crash but commits are
    /// much faster. Useful for bulk loads and tests.
    None = 1,
}

/// Tunables for a [`SlabStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub sync_mode: SyncMode,
    /// Upper bound on bytes the writer may allocate between two commits:
    /// fresh nodes, copies made writable, and growth claimed through
    /// `reserve`. `None` means unbounded.
    pub allocation_limit: Option<usize>,
}

impl StoreOptions {
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_allocation_limit(mut self, bytes: usize) -> Self {
        self.allocation_limit = Some(bytes);
        self
    }
}

/// Outcome of a successful [`SlabStore::commit`].
///
/// Every ref below `old_baseline` that was not rewritten still names the
/// same node after the commit. Accessors pass `old_baseline` to
/// `update_from_parent` to decide whether they must re-read their node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    pub old_baseline: u64,
    pub new_baseline: u64,
    pub top_ref: Ref,
}

enum Base {
    Memory(Vec<u8>),
    File(FileManager),
}

impl Base {
    fn data(&self) -> &[u8] {
        match self {
            Base::Memory(bytes) => bytes,
            Base::File(fm) => fm.data(),
        }
    }

    fn append(&mut self, bytes: &[u8], top_ref: Ref, sync: SyncMode) -> Result<(), StorageError> {
        match self {
            Base::Memory(data) => {
                data.extend_from_slice(bytes);
                Ok(())
            }
            Base::File(fm) => fm.append(bytes, top_ref, sync),
        }
    }
}

/// Node store made of an append-only committed base and a writer overlay.
///
/// Reads check the overlay first and fall through to the base. Mutations
/// only ever touch overlay copies; a base node made writable is shadowed
/// under its existing ref until the next commit. Fresh nodes get virtual
/// refs at or above the baseline. `commit` lays the dirty part of the tree
/// out after the base (copy-on-write) and starts a new, empty overlay.
pub struct SlabStore {
    base: Base,
    overlay: HashMap<Ref, Node>,
    released: HashSet<Ref>,
    next_ref: u64,
    top_ref: Ref,
    committed_top: Ref,
    allocated: usize,
    epoch: Epoch,
    version: u64,
    in_transaction: bool,
    options: StoreOptions,
}

impl SlabStore {
    /// An empty in-memory store with default options.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// An empty in-memory store.
    pub fn with_options(options: StoreOptions) -> Self {
        Self::from_base(Base::Memory(vec![0u8; DATA_START as usize]), Ref::NULL, options)
    }

    /// Create a new database file at `path`.
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StorageError> {
        let fm = FileManager::create(path.as_ref())?;
        Ok(Self::from_base(Base::File(fm), Ref::NULL, options))
    }

    /// Open an existing database file, verifying every node reachable from
    /// the committed top ref.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StorageError> {
        let fm = FileManager::open(path.as_ref())?;
        let top = fm.header().top_ref;
        let store = Self::from_base(Base::File(fm), top, options);
        if !top.is_null()
            && let Err(e) = store.verify_tree(top)
        {
            warn!(path = ?store.path(), error = %e, "rejecting corrupted database file");
            return Err(e);
        }
        Ok(store)
    }

    fn from_base(base: Base, top: Ref, options: StoreOptions) -> Self {
        let next_ref = base.data().len() as u64;
        Self {
            base,
            overlay: HashMap::new(),
            released: HashSet::new(),
            next_ref,
            top_ref: top,
            committed_top: top,
            allocated: 0,
            epoch: 0,
            version: 0,
            in_transaction: false,
            options,
        }
    }

    /// End of the committed address space. Refs below it resolve into the base.
    pub fn baseline(&self) -> u64 {
        self.base.data().len() as u64
    }

    /// File backing the store, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        match &self.base {
            Base::Memory(_) => None,
            Base::File(fm) => Some(fm.path()),
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn set_sync_mode(&mut self, sync_mode: SyncMode) {
        self.options.sync_mode = sync_mode;
    }

    /// Change the allocation limit. Bytes already allocated since the last
    /// commit still count against the new limit.
    pub fn set_allocation_limit(&mut self, limit: Option<usize>) {
        self.options.allocation_limit = limit;
    }

    /// Top ref as of the last commit.
    pub fn committed_top_ref(&self) -> Ref {
        self.committed_top
    }

    /// Bytes allocated since the last commit or rollback.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Number of nodes in the writer overlay.
    pub fn pending_nodes(&self) -> usize {
        self.overlay.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Start a write transaction. Ending it (commit or rollback) detaches
    /// every accessor created before that point.
    pub fn begin(&mut self) -> Result<(), TxnError> {
        if self.in_transaction {
            return Err(TxnError::AlreadyActive);
        }
        self.in_transaction = true;
        Ok(())
    }

    /// Persist everything reachable from the top ref.
    ///
    /// Post-order walk from the top: a node is appended at a new offset if it
    /// was written in this round or any of its children moved. Untouched
    /// subtrees keep their refs. Without an active transaction this is a
    /// non-transactional commit: the epoch stays, the version advances, and
    /// accessors refresh with `update_from_parent(info.old_baseline)`.
    pub fn commit(&mut self) -> Result<CommitInfo, StorageError> {
        let old_baseline = self.baseline();
        let mut image = Vec::new();
        let top_ref = if self.top_ref.is_null() {
            Ref::NULL
        } else {
            self.write_subtree(self.top_ref, old_baseline, &mut image)
        };
        self.base.append(&image, top_ref, self.options.sync_mode)?;

        self.overlay.clear();
        self.released.clear();
        self.allocated = 0;
        self.next_ref = self.baseline();
        self.top_ref = top_ref;
        self.committed_top = top_ref;
        self.version += 1;
        if self.in_transaction {
            self.in_transaction = false;
            self.epoch += 1;
        }

        let info = CommitInfo {
            old_baseline,
            new_baseline: self.baseline(),
            top_ref,
        };
        debug!(
            old_baseline,
            new_baseline = info.new_baseline,
            bytes = image.len(),
            top = %top_ref,
            epoch = self.epoch,
            "commit"
        );
        Ok(info)
    }

    fn write_subtree(&self, r: Ref, base_len: u64, image: &mut Vec<u8>) -> Ref {
        let node = self.translate(r);
        let mut rewritten: Option<Node> = None;
        if node.kind() == NodeKind::HasRefs {
            for (i, child) in node.refs().enumerate() {
                if child.is_null() {
                    continue;
                }
                let moved = self.write_subtree(child, base_len, image);
                if moved != child {
                    rewritten.get_or_insert_with(|| node.to_node()).set_ref(i, moved);
                }
            }
        }
        let bytes = match &rewritten {
            Some(copy) => copy.bytes(),
            None if self.overlay.contains_key(&r) => node.bytes(),
            None => return r,
        };
        let at = base_len + image.len() as u64;
        image.extend_from_slice(bytes);
        image.resize(aligned_len(image.len()), 0);
        Ref::from_offset(at)
    }

    /// Discard every change since the last commit and end the transaction.
    pub fn rollback(&mut self) {
        let discarded = self.overlay.len();
        self.overlay.clear();
        self.released.clear();
        self.allocated = 0;
        self.next_ref = self.baseline();
        self.top_ref = self.committed_top;
        self.in_transaction = false;
        self.epoch += 1;
        debug!(discarded, epoch = self.epoch, "rollback");
    }

    /// Run `f` inside a transaction: commit if it returns `Ok`, roll back
    /// otherwise (including when the commit itself fails).
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => match self.commit() {
                Ok(_) => Ok(value),
                Err(e) => {
                    self.rollback();
                    Err(e.into())
                }
            },
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn charge(&mut self, bytes: usize) -> Result<(), StorageError> {
        if let Some(limit) = self.options.allocation_limit {
            let available = limit.saturating_sub(self.allocated);
            if bytes > available {
                return Err(StorageError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }
        self.allocated += bytes;
        Ok(())
    }

    /// Check the committed tree below `top`. Children always precede their
    /// parent in the file, which rules out cycles. The walk is iterative;
    /// a node shared by several parents is parsed once.
    fn verify_tree(&self, top: Ref) -> Result<(), StorageError> {
        let data = self.base.data();
        let mut pending = vec![(top, data.len() as u64)];
        let mut seen = HashSet::new();
        while let Some((r, upper)) = pending.pop() {
            let offset = r.offset();
            if offset < DATA_START || offset >= upper {
                return Err(StorageError::RefOutOfBounds { offset, len: upper });
            }
            if offset % NODE_ALIGN as u64 != 0 {
                return Err(StorageError::CorruptedNode(format!(
                    "misaligned node ref {r}"
                )));
            }
            if !seen.insert(r) {
                continue;
            }
            let node = NodeRef::parse(&data[offset as usize..])?;
            node.validate()?;
            if node.kind() == NodeKind::HasRefs {
                pending.extend(
                    node.refs()
                        .filter(|child| !child.is_null())
                        .map(|child| (child, offset)),
                );
            }
        }
        Ok(())
    }
}

impl Default for SlabStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for SlabStore {
    fn create_node_from(&mut self, node: Node) -> Result<Ref, StorageError> {
        let len = aligned_len(node.byte_len());
        self.charge(len)?;
        let r = Ref::from_offset(self.next_ref);
        self.next_ref += len as u64;
        self.overlay.insert(r, node);
        Ok(r)
    }

    fn destroy(&mut self, r: Ref) {
        let removed = self.overlay.remove(&r).is_some();
        if r.offset() < self.baseline() {
            self.released.insert(r);
        } else {
            debug_assert!(removed, "destroying unknown node {r}");
        }
    }

    fn translate(&self, r: Ref) -> NodeRef<'_> {
        if let Some(node) = self.overlay.get(&r) {
            return node.as_node_ref();
        }
        debug_assert!(!self.released.contains(&r), "node {r} was destroyed");
        let data = self.base.data();
        let offset = r.offset();
        assert!(
            offset >= DATA_START && offset < data.len() as u64,
            "dangling ref {r} (baseline {:#x})",
            data.len()
        );
        match NodeRef::parse(&data[offset as usize..]) {
            Ok(node) => node,
            Err(e) => panic!("corrupted node at {r}: {e}"),
        }
    }

    fn translate_mut(&mut self, r: Ref) -> &mut Node {
        match self.overlay.get_mut(&r) {
            Some(node) => node,
            None => panic!("node {r} is read-only; make_writable must come first"),
        }
    }

    fn make_writable(&mut self, r: Ref) -> Result<(), StorageError> {
        if self.overlay.contains_key(&r) {
            return Ok(());
        }
        let node = self.translate(r).to_node();
        self.charge(aligned_len(node.byte_len()))?;
        self.overlay.insert(r, node);
        Ok(())
    }

    fn reserve(&mut self, r: Ref, additional: usize) -> Result<(), StorageError> {
        assert!(
            self.overlay.contains_key(&r),
            "node {r} is read-only; make_writable must come first"
        );
        self.charge(additional)
    }

    fn is_read_only(&self, r: Ref) -> bool {
        !self.overlay.contains_key(&r)
    }

    fn top_ref(&self) -> Ref {
        self.top_ref
    }

    fn set_top_ref(&mut self, r: Ref) {
        self.top_ref = r;
    }

    fn epoch(&self) -> Epoch {
        self.epoch
    }

    fn version(&self) -> u64 {
        self.version
    }
}
