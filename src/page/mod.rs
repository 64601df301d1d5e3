//! # Page Types
//!
//! This module defines the closed set of page variants that the store can
//! persist, as a sum type with an explicit codec table (see [`codec`]).
//! There is no open class hierarchy to dispatch over; adding a variant
//! means touching the enum, the tag table, and nothing else.
//!
//! ## Page Variants
//!
//! | tag  | variant            | role |
//! |------|--------------------|------|
//! | 0x01 | `UberPage`         | root of one revision; links the previous revision's uber page by offset |
//! | 0x02 | `RevisionRootPage` | anchors the revision's data page and index slots |
//! | 0x03 | `KeyValuePage`     | unordered container of document records |
//! | 0x04 | `AvlIndexPage`     | container of index-tree nodes for one index |
//!
//! ## Copy-on-Write Lifecycle
//!
//! Pages are created in memory by document or index mutation, serialized at
//! most once per revision, and immutable once flushed. A changed page is
//! always written at a new offset; no on-disk byte range is ever mutated.
//! The revision chain is therefore a backward-linked list of immutable uber
//! pages, indexed by offset into the backing store rather than through an
//! in-memory pointer graph.

pub mod codec;
pub mod reference;

pub use codec::{decode_page, encode_page};
pub use reference::{PageReference, RefRepr, REF_REPR_SIZE};

use std::collections::BTreeMap;

use crate::index::avltree::AvlNode;

/// Tag byte identifying a page variant in its serialized form.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Uber = 0x01,
    RevisionRoot = 0x02,
    KeyValue = 0x03,
    AvlIndex = 0x04,
}

impl PageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PageKind::Uber),
            0x02 => Some(PageKind::RevisionRoot),
            0x03 => Some(PageKind::KeyValue),
            0x04 => Some(PageKind::AvlIndex),
            _ => None,
        }
    }
}

/// The closed set of persistable pages.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Uber(UberPage),
    RevisionRoot(RevisionRootPage),
    KeyValue(KeyValuePage),
    AvlIndex(AvlIndexPage),
}

impl Page {
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Uber(_) => PageKind::Uber,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::KeyValue(_) => PageKind::KeyValue,
            Page::AvlIndex(_) => PageKind::AvlIndex,
        }
    }

    /// Revision-root pages get the coarse 256-byte alignment in the data
    /// file; everything else aligns to 8 bytes.
    pub fn is_revision_root(&self) -> bool {
        matches!(self, Page::RevisionRoot(_))
    }
}

/// Root page of one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct UberPage {
    pub revision_number: u64,
    /// Offset of the previous revision's uber page; `None` for revision 1.
    pub previous_uber_page_offset: Option<u64>,
    /// Reference to this revision's revision-root page.
    pub root_ref: PageReference,
}

impl UberPage {
    pub fn new(revision_number: u64, previous_uber_page_offset: Option<u64>) -> Self {
        Self {
            revision_number,
            previous_uber_page_offset,
            root_ref: PageReference::new(),
        }
    }
}

/// Anchors one revision's data page and index slots.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionRootPage {
    pub revision_number: u64,
    /// Wall-clock commit time, milliseconds since the Unix epoch.
    pub commit_timestamp_millis: u64,
    /// Highest document record key allocated as of this revision.
    pub max_record_key: u64,
    /// Reference to the revision's key/value record container.
    pub data_ref: PageReference,
    /// Per-index references, sorted by index id.
    pub index_slots: Vec<IndexSlot>,
}

impl RevisionRootPage {
    pub fn new(revision_number: u64, commit_timestamp_millis: u64) -> Self {
        Self {
            revision_number,
            commit_timestamp_millis,
            max_record_key: 0,
            data_ref: PageReference::new(),
            index_slots: Vec::new(),
        }
    }

    pub fn slot(&self, index_id: u32) -> Option<&IndexSlot> {
        self.index_slots
            .iter()
            .find(|slot| slot.index_id == index_id)
    }
}

/// One index's entry in a revision root.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSlot {
    pub index_id: u32,
    pub reference: PageReference,
    /// Number of distinct keys in the index as of this revision.
    pub entry_count: u64,
}

/// Unordered container of document records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValuePage {
    records: BTreeMap<u64, Vec<u8>>,
}

impl KeyValuePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_key: u64) -> Option<&[u8]> {
        self.records.get(&record_key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, record_key: u64, value: Vec<u8>) {
        self.records.insert(record_key, value);
    }

    pub fn remove(&mut self, record_key: u64) -> bool {
        self.records.remove(&record_key).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.records.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

/// Container of index-tree nodes for one index.
///
/// Nodes are addressed by page-internal keys handed out by `allocate`;
/// the keys are stable across serialization, so child/parent links survive
/// a round trip through the store.
#[derive(Debug, Clone, PartialEq)]
pub struct AvlIndexPage {
    root: Option<u64>,
    next_node_key: u64,
    nodes: BTreeMap<u64, AvlNode>,
}

impl Default for AvlIndexPage {
    fn default() -> Self {
        Self::new()
    }
}

impl AvlIndexPage {
    pub fn new() -> Self {
        Self {
            root: None,
            next_node_key: 1,
            nodes: BTreeMap::new(),
        }
    }

    /// Rebuilds a page from decoded parts. The codec is the only caller.
    pub(crate) fn from_parts(
        root: Option<u64>,
        next_node_key: u64,
        nodes: BTreeMap<u64, AvlNode>,
    ) -> Self {
        Self {
            root,
            next_node_key,
            nodes,
        }
    }

    pub fn root(&self) -> Option<u64> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<u64>) {
        self.root = root;
    }

    pub fn next_node_key(&self) -> u64 {
        self.next_node_key
    }

    pub fn node(&self, node_key: u64) -> Option<&AvlNode> {
        self.nodes.get(&node_key)
    }

    pub fn node_mut(&mut self, node_key: u64) -> Option<&mut AvlNode> {
        self.nodes.get_mut(&node_key)
    }

    /// Stores `node` under a fresh node key and returns the key.
    pub fn allocate(&mut self, node: AvlNode) -> u64 {
        let node_key = self.next_node_key;
        self.next_node_key += 1;
        self.nodes.insert(node_key, node);
        node_key
    }

    pub fn remove_node(&mut self, node_key: u64) -> Option<AvlNode> {
        self.nodes.remove(&node_key)
    }

    /// Number of tree nodes (distinct keys) in this index.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &AvlNode)> {
        self.nodes.iter().map(|(k, v)| (*k, v))
    }
}
