//! # AVL Tree Writer
//!
//! Mutation side of the balanced index tree: insertion with key
//! aggregation, removal with BST splice, and AVL rebalancing via single and
//! double rotations.
//!
//! ## Aggregation Before Structure
//!
//! `insert` only grows the tree when the key is genuinely new; an equal key
//! adds the document-node id to the existing node's [`NodeReferences`] set
//! and leaves the structure (and balance) untouched. Symmetrically,
//! `remove` only shrinks the tree when the last id under a key disappears.
//!
//! ## Rebalancing
//!
//! After a structural change the writer walks the parent chain from the
//! change site to the root, recomputing heights and applying the standard
//! four rotation cases:
//!
//! ```text
//! LL: bf(n) > 1, bf(n.left) >= 0   -> rotate right at n
//! LR: bf(n) > 1, bf(n.left) < 0    -> rotate left at n.left, right at n
//! RR: bf(n) < -1, bf(n.right) <= 0 -> rotate left at n
//! RL: bf(n) < -1, bf(n.right) > 0  -> rotate right at n.right, left at n
//! ```
//!
//! Rotations fix child, parent, and root links in place; the walk is
//! iterative, so rebalancing never recurses.

use eyre::Result;

use crate::error::StorageError;
use crate::index::key::IndexKey;
use crate::index::NodeReferences;
use crate::page::AvlIndexPage;

use super::node::AvlNode;

/// Write-side handle over one index tree's working page.
pub struct AvlTreeWriter<'a> {
    page: &'a mut AvlIndexPage,
}

impl<'a> AvlTreeWriter<'a> {
    pub fn new(page: &'a mut AvlIndexPage) -> Self {
        Self { page }
    }

    /// Associates `node_id` with `key`. Returns true if a new tree node was
    /// created, false if the id aggregated into (or already existed under)
    /// an existing key.
    pub fn insert(&mut self, key: IndexKey, node_id: u64) -> Result<bool> {
        let Some(root) = self.page.root() else {
            let node_key = self
                .page
                .allocate(AvlNode::leaf(key, NodeReferences::single(node_id)));
            self.page.set_root(Some(node_key));
            return Ok(true);
        };

        let mut current = root;
        let (attach_to, attach_left) = loop {
            let node = self.node(current)?;
            match key.cmp(&node.key) {
                std::cmp::Ordering::Equal => {
                    self.node_mut(current)?.value.insert(node_id);
                    return Ok(false);
                }
                std::cmp::Ordering::Less => match node.left {
                    Some(left) => current = left,
                    None => break (current, true),
                },
                std::cmp::Ordering::Greater => match node.right {
                    Some(right) => current = right,
                    None => break (current, false),
                },
            }
        };

        let mut leaf = AvlNode::leaf(key, NodeReferences::single(node_id));
        leaf.parent = Some(attach_to);
        let node_key = self.page.allocate(leaf);
        self.node_mut(attach_to)?.set_child(attach_left, Some(node_key));

        self.rebalance_up(Some(attach_to))?;
        Ok(true)
    }

    /// Dissociates `node_id` from `key`. Returns true if the tree node was
    /// removed (last id gone), false otherwise, including when the key or
    /// the id was not present at all.
    pub fn remove(&mut self, key: &IndexKey, node_id: u64) -> Result<bool> {
        let Some(node_key) = self.find(key)? else {
            return Ok(false);
        };

        let node = self.node_mut(node_key)?;
        if !node.value.remove(node_id) {
            return Ok(false);
        }
        if !node.value.is_empty() {
            return Ok(false);
        }

        self.delete_node(node_key)?;
        Ok(true)
    }

    fn find(&self, key: &IndexKey) -> Result<Option<u64>> {
        let mut current = self.page.root();
        while let Some(node_key) = current {
            let node = self.node(node_key)?;
            current = match key.cmp(&node.key) {
                std::cmp::Ordering::Equal => return Ok(Some(node_key)),
                std::cmp::Ordering::Less => node.left,
                std::cmp::Ordering::Greater => node.right,
            };
        }
        Ok(None)
    }

    /// Standard BST deletion. A node with two children swaps payload with
    /// its in-order successor (which has no left child) and the successor's
    /// record is spliced out instead.
    fn delete_node(&mut self, node_key: u64) -> Result<()> {
        let (left, right) = {
            let node = self.node(node_key)?;
            (node.left, node.right)
        };

        let (splice_key, rebalance_from) = if left.is_some() && right.is_some() {
            // INVARIANT: right subtree is non-empty, so a successor exists.
            let mut successor = right.unwrap();
            while let Some(next) = self.node(successor)?.left {
                successor = next;
            }

            let succ = self.node(successor)?;
            let succ_key = succ.key.clone();
            let succ_value = succ.value.clone();
            let target = self.node_mut(node_key)?;
            target.key = succ_key;
            target.value = succ_value;

            let succ_parent = self.node(successor)?.parent;
            (successor, succ_parent)
        } else {
            let parent = self.node(node_key)?.parent;
            (node_key, parent)
        };

        let (child, parent) = {
            let node = self.node(splice_key)?;
            (node.left.or(node.right), node.parent)
        };
        self.replace_child(parent, splice_key, child)?;
        self.page.remove_node(splice_key);

        self.rebalance_up(rebalance_from)?;
        Ok(())
    }

    fn replace_child(&mut self, parent: Option<u64>, old: u64, new: Option<u64>) -> Result<()> {
        match parent {
            None => self.page.set_root(new),
            Some(parent_key) => {
                let parent_node = self.node_mut(parent_key)?;
                if parent_node.left == Some(old) {
                    parent_node.left = new;
                } else {
                    parent_node.right = new;
                }
            }
        }
        if let Some(new_key) = new {
            self.node_mut(new_key)?.parent = parent;
        }
        Ok(())
    }

    fn rebalance_up(&mut self, start: Option<u64>) -> Result<()> {
        let mut current = start;
        while let Some(node_key) = current {
            self.update_height(node_key)?;
            let balanced = self.rebalance_node(node_key)?;
            current = self.node(balanced)?.parent;
        }
        Ok(())
    }

    /// Applies at most one (possibly double) rotation at `node_key`;
    /// returns the key now rooting that subtree.
    fn rebalance_node(&mut self, node_key: u64) -> Result<u64> {
        let bf = self.balance_factor(node_key)?;

        if bf > 1 {
            // INVARIANT: bf > 1 implies a left child exists.
            let left = self.node(node_key)?.left.unwrap();
            if self.balance_factor(left)? < 0 {
                self.rotate(left, true)?;
            }
            self.rotate(node_key, false)
        } else if bf < -1 {
            // INVARIANT: bf < -1 implies a right child exists.
            let right = self.node(node_key)?.right.unwrap();
            if self.balance_factor(right)? > 0 {
                self.rotate(right, false)?;
            }
            self.rotate(node_key, true)
        } else {
            Ok(node_key)
        }
    }

    /// Rotates the subtree at `pivot` left (`true`) or right (`false`);
    /// returns the key of the new subtree root.
    fn rotate(&mut self, pivot: u64, left_rotation: bool) -> Result<u64> {
        let parent = self.node(pivot)?.parent;
        let rising = self
            .node(pivot)?
            .child(!left_rotation)
            .ok_or_else(|| StorageError::tree_invariant("rotation without inner child"))?;
        let transferred = self.node(rising)?.child(left_rotation);

        self.node_mut(pivot)?.set_child(!left_rotation, transferred);
        if let Some(t) = transferred {
            self.node_mut(t)?.parent = Some(pivot);
        }

        self.node_mut(rising)?.set_child(left_rotation, Some(pivot));
        self.node_mut(pivot)?.parent = Some(rising);

        self.replace_child(parent, pivot, Some(rising))?;

        self.update_height(pivot)?;
        self.update_height(rising)?;
        Ok(rising)
    }

    fn node(&self, node_key: u64) -> Result<&AvlNode> {
        self.page
            .node(node_key)
            .ok_or_else(|| StorageError::tree_invariant(format!("dangling node key {}", node_key)).into())
    }

    fn node_mut(&mut self, node_key: u64) -> Result<&mut AvlNode> {
        self.page
            .node_mut(node_key)
            .ok_or_else(|| StorageError::tree_invariant(format!("dangling node key {}", node_key)).into())
    }

    fn height_of(&self, link: Option<u64>) -> i8 {
        link.and_then(|k| self.page.node(k)).map_or(0, |n| n.height)
    }

    fn update_height(&mut self, node_key: u64) -> Result<()> {
        let (left, right) = {
            let node = self.node(node_key)?;
            (node.left, node.right)
        };
        let height = 1 + self.height_of(left).max(self.height_of(right));
        self.node_mut(node_key)?.height = height;
        Ok(())
    }

    fn balance_factor(&self, node_key: u64) -> Result<i8> {
        let node = self.node(node_key)?;
        Ok(self.height_of(node.left) - self.height_of(node.right))
    }
}
