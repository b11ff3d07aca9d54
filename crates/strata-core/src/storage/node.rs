//! Binary node layout, identical in memory and on disk.
//!
//! ```text
//! [0]     kind: u8 (0 = Normal, 1 = HasRefs, 2 = String)
//! [1..4]  reserved (zero)
//! [4..8]  size: u32 LE, element count
//! [8..]   payload
//!         Normal / HasRefs: size x 8-byte LE slots
//!         String:           size x u32 LE end offsets, then the UTF-8 bytes
//! ```
//!
//! `Normal` slots are read as `i64`; `HasRefs` slots are read as [`Ref`]
//! (unsigned) from the same little-endian words.

use crate::error::StorageError;
use crate::types::{NODE_ALIGN, Ref};

/// Size of the node header in bytes.
pub const NODE_HEADER_SIZE: usize = 8;

/// Bytes per slot of a `Normal` or `HasRefs` node.
pub const SLOT_WIDTH: usize = 8;
/// Bytes per end offset of a `String` node, on top of the string itself.
pub const OFFSET_WIDTH: usize = 4;

/// Discriminant values for node kinds stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Normal = 0,
    HasRefs = 1,
    String = 2,
}

impl NodeKind {
    /// Convert a stored discriminant to a `NodeKind`.
    pub fn from_u8(value: u8) -> Result<Self, StorageError> {
        match value {
            0 => Ok(NodeKind::Normal),
            1 => Ok(NodeKind::HasRefs),
            2 => Ok(NodeKind::String),
            other => Err(StorageError::CorruptedNode(format!(
                "invalid node kind discriminant: {other}"
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Round `len` up to the node alignment.
pub fn aligned_len(len: usize) -> usize {
    len.div_ceil(NODE_ALIGN) * NODE_ALIGN
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_word(buf: &[u8], at: usize) -> [u8; 8] {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + SLOT_WIDTH]);
    word
}

/// Read-only view of one node image.
///
/// Borrowed from whatever currently holds the node: the committed base (a
/// memory map for file-backed stores) or the writer's private copy.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    buf: &'a [u8],
}

impl<'a> NodeRef<'a> {
    /// Interpret the node image at the start of `bytes`.
    ///
    /// Checks the header and that the payload fits; string contents are
    /// checked by [`validate`](Self::validate).
    pub fn parse(bytes: &'a [u8]) -> Result<Self, StorageError> {
        if bytes.len() < NODE_HEADER_SIZE {
            return Err(StorageError::CorruptedNode(
                "truncated node header".to_string(),
            ));
        }
        let kind = NodeKind::from_u8(bytes[0])?;
        let size = read_u32(bytes, 4) as usize;
        let len = match kind {
            NodeKind::Normal | NodeKind::HasRefs => NODE_HEADER_SIZE + size * SLOT_WIDTH,
            NodeKind::String => {
                let table_end = NODE_HEADER_SIZE + size * OFFSET_WIDTH;
                if bytes.len() < table_end {
                    return Err(StorageError::CorruptedNode(format!(
                        "string offset table of {size} entries exceeds {} available bytes",
                        bytes.len()
                    )));
                }
                let blob_len = if size == 0 {
                    0
                } else {
                    read_u32(bytes, table_end - OFFSET_WIDTH) as usize
                };
                table_end + blob_len
            }
        };
        if bytes.len() < len {
            return Err(StorageError::CorruptedNode(format!(
                "{kind:?} node needs {len} bytes, only {} available",
                bytes.len()
            )));
        }
        Ok(Self { buf: &bytes[..len] })
    }

    /// Full consistency check of the payload (string offsets and UTF-8).
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.kind() != NodeKind::String {
            return Ok(());
        }
        let size = self.size();
        let blob = NODE_HEADER_SIZE + size * OFFSET_WIDTH;
        let mut start = 0usize;
        for i in 0..size {
            let end = read_u32(self.buf, NODE_HEADER_SIZE + i * OFFSET_WIDTH) as usize;
            if end < start || blob + end > self.buf.len() {
                return Err(StorageError::CorruptedNode(format!(
                    "string element {i} has invalid bounds {start}..{end}"
                )));
            }
            if std::str::from_utf8(&self.buf[blob + start..blob + end]).is_err() {
                return Err(StorageError::CorruptedNode(format!(
                    "string element {i} is not valid UTF-8"
                )));
            }
            start = end;
        }
        Ok(())
    }

    pub fn kind(&self) -> NodeKind {
        // The header was checked by `parse` or written by `Node`.
        match self.buf[0] {
            0 => NodeKind::Normal,
            1 => NodeKind::HasRefs,
            _ => NodeKind::String,
        }
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        read_u32(self.buf, 4) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The raw node image (unpadded).
    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }

    fn slot_offset(&self, i: usize) -> usize {
        assert!(
            i < self.size(),
            "node index {i} out of bounds (size {})",
            self.size()
        );
        NODE_HEADER_SIZE + i * SLOT_WIDTH
    }

    /// Read an integer slot.
    pub fn get(&self, i: usize) -> i64 {
        debug_assert_ne!(self.kind(), NodeKind::String);
        i64::from_le_bytes(read_word(self.buf, self.slot_offset(i)))
    }

    /// Read a reference slot of a `HasRefs` node.
    pub fn get_ref(&self, i: usize) -> Ref {
        debug_assert_eq!(self.kind(), NodeKind::HasRefs);
        Ref::from_offset(u64::from_le_bytes(read_word(self.buf, self.slot_offset(i))))
    }

    /// Iterate over the slots of a `HasRefs` node as references.
    pub fn refs(self) -> impl Iterator<Item = Ref> + 'a {
        (0..self.size()).map(move |i| self.get_ref(i))
    }

    /// Read a string element.
    ///
    /// # Panics
    ///
    /// Panics if the element is not valid UTF-8 (a node that was never
    /// validated).
    pub fn get_str(&self, i: usize) -> &'a str {
        debug_assert_eq!(self.kind(), NodeKind::String);
        let size = self.size();
        assert!(i < size, "string index {i} out of bounds (size {size})");
        let blob = NODE_HEADER_SIZE + size * OFFSET_WIDTH;
        let start = if i == 0 {
            0
        } else {
            read_u32(self.buf, NODE_HEADER_SIZE + (i - 1) * OFFSET_WIDTH) as usize
        };
        let end = read_u32(self.buf, NODE_HEADER_SIZE + i * OFFSET_WIDTH) as usize;
        let bytes: &'a [u8] = &self.buf[blob + start..blob + end];
        match std::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => panic!("corrupted string node: element {i} is not UTF-8"),
        }
    }

    /// Index of the first integer slot equal to `value`.
    pub fn find_first(&self, value: i64) -> Option<usize> {
        (0..self.size()).find(|&i| self.get(i) == value)
    }

    /// Index of the first string element equal to `value`.
    pub fn find_first_str(&self, value: &str) -> Option<usize> {
        (0..self.size()).find(|&i| self.get_str(i) == value)
    }

    /// Copy this image into an owned, writable node.
    pub fn to_node(&self) -> Node {
        Node {
            buf: self.buf.to_vec(),
        }
    }
}

/// An owned, writable node image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    buf: Vec<u8>,
}

impl Node {
    /// A node of `size` zero slots, or `size` empty strings.
    pub fn new(kind: NodeKind, size: usize) -> Self {
        let payload = match kind {
            NodeKind::Normal | NodeKind::HasRefs => size * SLOT_WIDTH,
            NodeKind::String => size * OFFSET_WIDTH,
        };
        let mut buf = vec![0u8; NODE_HEADER_SIZE + payload];
        buf[0] = kind.as_u8();
        buf[4..8].copy_from_slice(&(size as u32).to_le_bytes());
        Self { buf }
    }

    /// A `Normal` node holding `values`.
    pub fn from_values(values: &[i64]) -> Self {
        let mut node = Node::new(NodeKind::Normal, 0);
        for &value in values {
            node.add(value);
        }
        node
    }

    /// A `HasRefs` node holding `refs`.
    pub fn from_refs(refs: &[Ref]) -> Self {
        let mut node = Node::new(NodeKind::HasRefs, 0);
        for &r in refs {
            node.add_ref(r);
        }
        node
    }

    /// A `String` node holding `values`.
    pub fn from_strings<S: AsRef<str>>(values: &[S]) -> Self {
        let size = values.len();
        let mut buf = Vec::with_capacity(NODE_HEADER_SIZE + size * OFFSET_WIDTH);
        buf.push(NodeKind::String.as_u8());
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(size as u32).to_le_bytes());
        let mut end = 0u32;
        for value in values {
            end += value.as_ref().len() as u32;
            buf.extend_from_slice(&end.to_le_bytes());
        }
        for value in values {
            buf.extend_from_slice(value.as_ref().as_bytes());
        }
        Self { buf }
    }

    pub fn as_node_ref(&self) -> NodeRef<'_> {
        NodeRef { buf: &self.buf }
    }

    pub fn kind(&self) -> NodeKind {
        self.as_node_ref().kind()
    }

    pub fn size(&self) -> usize {
        self.as_node_ref().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Length of the node image in bytes (unpadded).
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn set_size(&mut self, size: usize) {
        self.buf[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    }

    fn write_word(&mut self, i: usize, word: [u8; 8]) {
        let offset = self.as_node_ref().slot_offset(i);
        self.buf[offset..offset + SLOT_WIDTH].copy_from_slice(&word);
    }

    fn insert_word(&mut self, i: usize, word: [u8; 8]) {
        let size = self.size();
        assert!(i <= size, "insert index {i} out of bounds (size {size})");
        let offset = NODE_HEADER_SIZE + i * SLOT_WIDTH;
        self.buf.splice(offset..offset, word);
        self.set_size(size + 1);
    }

    pub fn get(&self, i: usize) -> i64 {
        self.as_node_ref().get(i)
    }

    pub fn get_ref(&self, i: usize) -> Ref {
        self.as_node_ref().get_ref(i)
    }

    pub fn get_str(&self, i: usize) -> &str {
        self.as_node_ref().get_str(i)
    }

    pub fn set(&mut self, i: usize, value: i64) {
        debug_assert_eq!(self.kind(), NodeKind::Normal);
        self.write_word(i, value.to_le_bytes());
    }

    pub fn set_ref(&mut self, i: usize, r: Ref) {
        debug_assert_eq!(self.kind(), NodeKind::HasRefs);
        self.write_word(i, r.offset().to_le_bytes());
    }

    pub fn insert(&mut self, i: usize, value: i64) {
        debug_assert_eq!(self.kind(), NodeKind::Normal);
        self.insert_word(i, value.to_le_bytes());
    }

    pub fn insert_ref(&mut self, i: usize, r: Ref) {
        debug_assert_eq!(self.kind(), NodeKind::HasRefs);
        self.insert_word(i, r.offset().to_le_bytes());
    }

    pub fn add(&mut self, value: i64) {
        self.insert(self.size(), value);
    }

    pub fn add_ref(&mut self, r: Ref) {
        self.insert_ref(self.size(), r);
    }

    /// Remove element `i`, shifting later elements down.
    pub fn erase(&mut self, i: usize) {
        let size = self.size();
        assert!(i < size, "erase index {i} out of bounds (size {size})");
        if self.kind() == NodeKind::String {
            let mut values = self.strings();
            values.remove(i);
            *self = Node::from_strings(&values);
            return;
        }
        let offset = NODE_HEADER_SIZE + i * SLOT_WIDTH;
        self.buf.drain(offset..offset + SLOT_WIDTH);
        self.set_size(size - 1);
    }

    pub fn set_str(&mut self, i: usize, value: &str) {
        let size = self.size();
        assert!(i < size, "string index {i} out of bounds (size {size})");
        let mut values = self.strings();
        values[i] = value.to_owned();
        *self = Node::from_strings(&values);
    }

    pub fn insert_str(&mut self, i: usize, value: &str) {
        let size = self.size();
        assert!(i <= size, "insert index {i} out of bounds (size {size})");
        let mut values = self.strings();
        values.insert(i, value.to_owned());
        *self = Node::from_strings(&values);
    }

    pub fn add_str(&mut self, value: &str) {
        self.insert_str(self.size(), value);
    }

    fn strings(&self) -> Vec<String> {
        debug_assert_eq!(self.kind(), NodeKind::String);
        let node = self.as_node_ref();
        (0..node.size()).map(|i| node.get_str(i).to_owned()).collect()
    }
}
