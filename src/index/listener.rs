//! # Index Listener
//!
//! Incremental index maintenance. The owning write transaction reports
//! every document mutation as a [`Change`]; the listener derives the key
//! under its index kind and routes it to the tree writer. A value update
//! arrives as a `Deleted` of the old state followed by an `Inserted` of
//! the new state, so the listener itself never diffs.

use eyre::Result;
use tracing::debug;

use crate::index::avltree::AvlTreeWriter;
use crate::page::AvlIndexPage;

use super::{DocNode, IndexDef, PathFilter};

/// Direction of a document mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Deleted,
}

/// One document mutation as reported to index listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub node: DocNode,
}

impl Change {
    pub fn inserted(node: DocNode) -> Self {
        Self {
            kind: ChangeKind::Inserted,
            node,
        }
    }

    pub fn deleted(node: DocNode) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            node,
        }
    }
}

/// Keeps one index tree consistent with the document it covers.
pub struct IndexListener {
    index_def: IndexDef,
    filter: PathFilter,
}

impl IndexListener {
    pub fn new(index_def: IndexDef, filter: PathFilter) -> Self {
        Self { index_def, filter }
    }

    pub fn index_def(&self) -> IndexDef {
        self.index_def
    }

    /// Applies one change to the working tree page. Changes outside the
    /// path filter, or on nodes that do not carry this kind's key
    /// ingredient, are ignored.
    pub fn listen(&self, change: &Change, page: &mut AvlIndexPage) -> Result<()> {
        if !self.filter.admits(change.node.path_node) {
            return Ok(());
        }
        let Some(key) = change.node.derive_key(self.index_def.kind) else {
            return Ok(());
        };

        let mut writer = AvlTreeWriter::new(page);
        match change.kind {
            ChangeKind::Inserted => {
                writer.insert(key, change.node.node_id)?;
            }
            ChangeKind::Deleted => {
                let removed = writer.remove(&key, change.node.node_id)?;
                if removed {
                    debug!(
                        index_id = self.index_def.id,
                        node_id = change.node.node_id,
                        "index entry removed"
                    );
                }
            }
        }
        Ok(())
    }
}
