//! # Index Module
//!
//! Secondary indexes over the document store, maintained as persistent
//! AVL trees through the same paging mechanism as the documents themselves.
//!
//! ## Index Kinds
//!
//! - **Cas** (content-and-structure): typed value at a path
//! - **Path**: structure only
//! - **Name**: element/attribute names
//!
//! Each [`IndexDef`] owns one tree, selected by its stable numeric id in
//! the revision root. Multiple document nodes carrying an equal key
//! aggregate into one tree node whose value is the [`NodeReferences`] set;
//! duplicate keys never exist at two tree nodes.
//!
//! ## Construction vs. Maintenance
//!
//! A new index over an existing resource is materialized once by the
//! [`builder`](crate::index::builder) (full document scan); from then on
//! the [`listener`](crate::index::listener) keeps it consistent
//! incrementally as the owning write transaction mutates the document.
//!
//! ## Queries
//!
//! [`open_index`] resolves an index over a read transaction and returns the
//! lazy ascending sequence of matching `(IndexKey, NodeReferences)` pairs
//! for a point or range search.

pub mod avltree;
pub mod builder;
pub mod key;
pub mod listener;

pub use builder::IndexBuilder;
pub use key::{IndexKey, KeyValue};
pub use listener::{Change, ChangeKind, IndexListener};

use std::collections::BTreeSet;
use std::ops::Bound;

use eyre::Result;

use crate::trx::PageReadTrx;

use avltree::reader::RangeIter;

/// What an index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    ContentAndStructure,
    Path,
    Name,
}

/// Identifies one index tree: its kind and its stable numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub kind: IndexKind,
    pub id: u32,
}

impl IndexDef {
    pub fn new(kind: IndexKind, id: u32) -> Self {
        Self { kind, id }
    }
}

/// How to match keys when opening an index.
#[derive(Debug, Clone)]
pub enum SearchMode {
    /// Exact key match; yields at most one entry.
    Equal,
    /// Ordered interval match; yields entries in ascending key order.
    Range {
        low: Bound<IndexKey>,
        high: Bound<IndexKey>,
    },
}

/// The set of document-node identifiers sharing one index key.
///
/// Backed by a sorted vector so serialization is deterministic and set
/// operations stay branch-light at the small sizes typical for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReferences {
    ids: Vec<u64>,
}

impl NodeReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(id: u64) -> Self {
        Self { ids: vec![id] }
    }

    /// Builds a set from ids in any order; duplicates collapse.
    pub fn from_vec(mut ids: Vec<u64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Adds `id`; returns false if it was already present.
    pub fn insert(&mut self, id: u64) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Removes `id`; returns false if it was not present.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }
}

/// Path filter for builders and listeners: the set of admissible
/// path-summary nodes. An empty filter admits every path.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    paths: BTreeSet<u64>,
}

impl PathFilter {
    /// Admits every path.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of(paths: impl IntoIterator<Item = u64>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    pub fn admits(&self, path_node: u64) -> bool {
        self.paths.is_empty() || self.paths.contains(&path_node)
    }
}

/// A document node as seen by the index layer. The document model itself
/// is an external collaborator; this is the slice of it indexes consume.
#[derive(Debug, Clone, PartialEq)]
pub struct DocNode {
    pub node_id: u64,
    pub path_node: u64,
    pub name: Option<String>,
    pub value: Option<KeyValue>,
}

impl DocNode {
    /// Derives this node's key under `kind`, or `None` if the node lacks
    /// the ingredient the kind requires.
    pub fn derive_key(&self, kind: IndexKind) -> Option<IndexKey> {
        match kind {
            IndexKind::ContentAndStructure => self.value.clone().map(|value| IndexKey::Cas {
                path_node: self.path_node,
                value,
            }),
            IndexKind::Path => Some(IndexKey::Path {
                path_node: self.path_node,
            }),
            IndexKind::Name => self.name.clone().map(|name| IndexKey::Name { name }),
        }
    }
}

/// A read-only view of the document as of one revision.
pub trait DocumentSnapshot {
    fn nodes(&self) -> Box<dyn Iterator<Item = DocNode> + '_>;
}

/// Opens `index_def` over `trx` and returns the lazy ascending sequence of
/// matching `(IndexKey, NodeReferences)` pairs.
///
/// `Equal` mode requires `key`; `Range` mode ignores it (the interval lives
/// in the mode itself).
pub fn open_index(
    trx: &PageReadTrx,
    key: Option<&IndexKey>,
    index_def: IndexDef,
    mode: SearchMode,
) -> Result<RangeIter> {
    trx.index_reader(index_def)?.search(key, mode)
}
