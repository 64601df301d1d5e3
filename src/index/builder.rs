//! # Index Builder
//!
//! One-shot materialization of a new index over an existing document.
//!
//! The builder performs a single full scan of a [`DocumentSnapshot`],
//! derives each node's key under the index kind, filters by path, and
//! inserts into the working tree page. After the owning transaction
//! commits, the [`listener`](crate::index::listener) takes over and the
//! builder is never run again for that index.

use eyre::Result;
use tracing::debug;

use crate::index::avltree::AvlTreeWriter;
use crate::page::AvlIndexPage;

use super::{DocumentSnapshot, IndexDef, PathFilter};

/// Builds one index tree from scratch by scanning a document snapshot.
pub struct IndexBuilder {
    index_def: IndexDef,
    filter: PathFilter,
}

impl IndexBuilder {
    pub fn new(index_def: IndexDef, filter: PathFilter) -> Self {
        Self { index_def, filter }
    }

    /// Scans `snapshot` and populates `page`. Returns the number of
    /// document nodes that contributed an entry.
    pub fn build(&self, snapshot: &dyn DocumentSnapshot, page: &mut AvlIndexPage) -> Result<u64> {
        let mut writer = AvlTreeWriter::new(page);
        let mut indexed = 0u64;

        for node in snapshot.nodes() {
            if !self.filter.admits(node.path_node) {
                continue;
            }
            let Some(key) = node.derive_key(self.index_def.kind) else {
                continue;
            };
            writer.insert(key, node.node_id)?;
            indexed += 1;
        }

        debug!(
            index_id = self.index_def.id,
            indexed, "index build scan complete"
        );
        Ok(indexed)
    }
}
