//! # Persistent AVL Tree
//!
//! The balanced index tree: a binary search tree over [`IndexKey`] with the
//! AVL balance invariant, whose nodes are records inside an
//! [`AvlIndexPage`](crate::page::AvlIndexPage) and therefore versioned with
//! the page store like everything else.
//!
//! ## Split Responsibilities
//!
//! - [`writer::AvlTreeWriter`] mutates the working page owned by a write
//!   transaction: insertion with rebalancing, key aggregation, removal with
//!   BST splice and rebalancing.
//! - [`reader::AvlTreeReader`] owns an immutable decoded snapshot of the
//!   page and answers point and range queries through standalone iterator
//!   values with explicit traversal stacks; no recursion, so arbitrarily
//!   deep (or corrupted) trees cannot blow the call stack.
//!
//! The tree carries no locking of its own; it inherits the single-writer,
//! multi-reader discipline of the page store it lives in.

pub mod node;
pub mod reader;
pub mod writer;

pub use node::AvlNode;
pub use reader::AvlTreeReader;
pub use writer::AvlTreeWriter;

use eyre::Result;

use crate::error::StorageError;
use crate::page::AvlIndexPage;

/// Validates the full tree shape: parent links, strict BST ordering, stored
/// heights, and the AVL balance bound. Intended for tests and debug
/// assertions; a failure means a bug in this crate, surfaced as
/// [`StorageError::TreeInvariant`].
pub fn validate(page: &AvlIndexPage) -> Result<()> {
    let Some(root) = page.root() else {
        if !page.is_empty() {
            return Err(StorageError::tree_invariant(format!(
                "no root but {} nodes stored",
                page.len()
            ))
            .into());
        }
        return Ok(());
    };

    let root_node = page
        .node(root)
        .ok_or_else(|| StorageError::tree_invariant(format!("root {} missing", root)))?;
    if root_node.parent.is_some() {
        return Err(StorageError::tree_invariant(format!("root {} has a parent", root)).into());
    }

    let mut visited = 0usize;
    // (node_key, expected_parent) pairs, explicit stack.
    let mut stack = vec![(root, None::<u64>)];
    let mut heights = std::collections::BTreeMap::new();

    // First pass: structure and parent links, children before heights.
    while let Some((node_key, expected_parent)) = stack.pop() {
        visited += 1;
        if visited > page.len() {
            return Err(StorageError::tree_invariant("cycle in tree links").into());
        }

        let node = page
            .node(node_key)
            .ok_or_else(|| StorageError::tree_invariant(format!("dangling link to {}", node_key)))?;

        if node.parent != expected_parent {
            return Err(StorageError::tree_invariant(format!(
                "node {} has parent {:?}, expected {:?}",
                node_key, node.parent, expected_parent
            ))
            .into());
        }

        for (child, is_left) in [(node.left, true), (node.right, false)] {
            if let Some(child_key) = child {
                let child_node = page.node(child_key).ok_or_else(|| {
                    StorageError::tree_invariant(format!("dangling link to {}", child_key))
                })?;
                let in_order = if is_left {
                    child_node.key < node.key
                } else {
                    child_node.key > node.key
                };
                if !in_order {
                    return Err(StorageError::tree_invariant(format!(
                        "BST order violated between {} and its {} child {}",
                        node_key,
                        if is_left { "left" } else { "right" },
                        child_key
                    ))
                    .into());
                }
                stack.push((child_key, Some(node_key)));
            }
        }
    }

    if visited != page.len() {
        return Err(StorageError::tree_invariant(format!(
            "{} nodes reachable from root, {} stored",
            visited,
            page.len()
        ))
        .into());
    }

    // Second pass: iterative post-order height check.
    let mut post = vec![(root, false)];
    while let Some((node_key, children_done)) = post.pop() {
        let node = page.node(node_key).unwrap(); // INVARIANT: links validated above
        if !children_done {
            post.push((node_key, true));
            if let Some(left) = node.left {
                post.push((left, false));
            }
            if let Some(right) = node.right {
                post.push((right, false));
            }
            continue;
        }

        let left_height = node.left.map_or(0, |k| heights[&k]);
        let right_height = node.right.map_or(0, |k| heights[&k]);
        let expected = 1 + left_height.max(right_height);

        if node.height as i32 != expected {
            return Err(StorageError::tree_invariant(format!(
                "node {} stores height {}, computed {}",
                node_key, node.height, expected
            ))
            .into());
        }
        if (left_height - right_height).abs() > 1 {
            return Err(StorageError::tree_invariant(format!(
                "node {} unbalanced: left {}, right {}",
                node_key, left_height, right_height
            ))
            .into());
        }

        heights.insert(node_key, expected);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key::IndexKey;
    use crate::index::NodeReferences;

    fn path_key(path_node: u64) -> IndexKey {
        IndexKey::Path { path_node }
    }

    #[test]
    fn empty_page_is_valid() {
        validate(&AvlIndexPage::new()).unwrap();
    }

    #[test]
    fn hand_built_valid_tree_passes() {
        let mut page = AvlIndexPage::new();
        let b = page.allocate(AvlNode::leaf(path_key(2), NodeReferences::single(1)));
        let a = page.allocate(AvlNode::leaf(path_key(1), NodeReferences::single(1)));
        let c = page.allocate(AvlNode::leaf(path_key(3), NodeReferences::single(1)));

        page.node_mut(b).unwrap().left = Some(a);
        page.node_mut(b).unwrap().right = Some(c);
        page.node_mut(b).unwrap().height = 2;
        page.node_mut(a).unwrap().parent = Some(b);
        page.node_mut(c).unwrap().parent = Some(b);
        page.set_root(Some(b));

        validate(&page).unwrap();
    }

    #[test]
    fn broken_order_is_detected() {
        let mut page = AvlIndexPage::new();
        let b = page.allocate(AvlNode::leaf(path_key(2), NodeReferences::single(1)));
        let a = page.allocate(AvlNode::leaf(path_key(5), NodeReferences::single(1)));

        page.node_mut(b).unwrap().left = Some(a);
        page.node_mut(b).unwrap().height = 2;
        page.node_mut(a).unwrap().parent = Some(b);
        page.set_root(Some(b));

        let err = validate(&page).unwrap_err();
        let inner = err.downcast_ref::<StorageError>().unwrap();
        assert!(matches!(inner, StorageError::TreeInvariant { .. }));
    }

    #[test]
    fn wrong_height_is_detected() {
        let mut page = AvlIndexPage::new();
        let a = page.allocate(AvlNode::leaf(path_key(1), NodeReferences::single(1)));
        page.node_mut(a).unwrap().height = 3;
        page.set_root(Some(a));

        assert!(validate(&page).is_err());
    }

    #[test]
    fn unreachable_node_is_detected() {
        let mut page = AvlIndexPage::new();
        let a = page.allocate(AvlNode::leaf(path_key(1), NodeReferences::single(1)));
        page.allocate(AvlNode::leaf(path_key(2), NodeReferences::single(1)));
        page.set_root(Some(a));

        assert!(validate(&page).is_err());
    }
}
