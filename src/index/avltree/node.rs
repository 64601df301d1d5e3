//! AVL tree node.
//!
//! Nodes are records inside an [`AvlIndexPage`](crate::page::AvlIndexPage),
//! addressed by a page-internal node key allocated from the page's counter.
//! Child and parent links are node keys, never memory pointers, so a node
//! survives serialization unchanged.

use crate::index::key::IndexKey;
use crate::index::NodeReferences;

/// One node of the balanced index tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvlNode {
    pub key: IndexKey,
    pub value: NodeReferences,
    pub left: Option<u64>,
    pub right: Option<u64>,
    pub parent: Option<u64>,
    /// Height of the subtree rooted here; a leaf has height 1.
    pub height: i8,
}

impl AvlNode {
    /// A fresh leaf carrying one index entry.
    pub fn leaf(key: IndexKey, value: NodeReferences) -> Self {
        Self {
            key,
            value,
            left: None,
            right: None,
            parent: None,
            height: 1,
        }
    }

    pub fn child(&self, left: bool) -> Option<u64> {
        if left {
            self.left
        } else {
            self.right
        }
    }

    pub fn set_child(&mut self, left: bool, node: Option<u64>) {
        if left {
            self.left = node;
        } else {
            self.right = node;
        }
    }
}
