//! # AVL Tree Reader
//!
//! Read-side access to one index tree: point lookup, ordered iteration, and
//! bounded range scans over an immutable page snapshot.
//!
//! ## Iterator Design
//!
//! Iteration is a standalone value over an owned page snapshot, not a
//! callback tied to the reader: it holds an explicit stack of pending
//! nodes (the left spine of the subtree still to visit), so traversal depth
//! is bounded by tree height without any recursion, and an iterator can be
//! constructed mid-range and dropped early without touching the reader
//! again.
//!
//! ```text
//! next():  pop k  ->  push left spine of k.right  ->  yield k
//! ```
//!
//! ## Snapshot Semantics
//!
//! The reader owns a decoded [`AvlIndexPage`]; pages are immutable once
//! read, so a reader observes exactly the revision it was opened against no
//! matter what the single writer does afterwards.

use std::ops::Bound;
use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use smallvec::SmallVec;

use crate::index::key::IndexKey;
use crate::index::{NodeReferences, SearchMode};
use crate::page::AvlIndexPage;

/// Pending-node stack; 16 levels cover trees of ~65k keys without spilling.
type NodeStack = SmallVec<[u64; 16]>;

/// Read-side handle over one index tree snapshot.
#[derive(Debug, Clone)]
pub struct AvlTreeReader {
    page: Arc<AvlIndexPage>,
}

impl AvlTreeReader {
    pub fn new(page: AvlIndexPage) -> Self {
        Self {
            page: Arc::new(page),
        }
    }

    /// Number of distinct keys in the tree.
    pub fn len(&self) -> usize {
        self.page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page.is_empty()
    }

    /// Point lookup by standard BST descent.
    pub fn get(&self, key: &IndexKey) -> Option<&NodeReferences> {
        let mut current = self.page.root();
        while let Some(node_key) = current {
            let node = self.page.node(node_key)?;
            current = match key.cmp(&node.key) {
                std::cmp::Ordering::Equal => return Some(&node.value),
                std::cmp::Ordering::Less => node.left,
                std::cmp::Ordering::Greater => node.right,
            };
        }
        None
    }

    /// In-order iteration over the whole tree.
    pub fn iter(&self) -> AvlNodeIterator {
        AvlNodeIterator::full(Arc::clone(&self.page))
    }

    /// In-order iteration starting at the lowest key admitted by `low`.
    pub fn iter_from(&self, low: Bound<&IndexKey>) -> AvlNodeIterator {
        AvlNodeIterator::from_bound(Arc::clone(&self.page), low)
    }

    /// Resolves a point or range search into the lazy ascending sequence
    /// of matching `(key, references)` pairs. `Equal` requires `key` and
    /// yields at most one pair; `Range` carries its bounds in the mode and
    /// rejects a separate key.
    pub fn search(self, key: Option<&IndexKey>, mode: SearchMode) -> Result<RangeIter> {
        match mode {
            SearchMode::Equal => {
                let key = key.ok_or_else(|| eyre!("EQUAL search requires a key"))?;
                Ok(self.into_range(
                    Bound::Included(key.clone()),
                    Bound::Included(key.clone()),
                ))
            }
            SearchMode::Range { low, high } => {
                ensure!(
                    key.is_none(),
                    "RANGE search carries its bounds in the mode; no separate key is accepted"
                );
                Ok(self.into_range(low, high))
            }
        }
    }

    /// Consumes the reader into a bounded ascending range scan.
    pub fn into_range(self, low: Bound<IndexKey>, high: Bound<IndexKey>) -> RangeIter {
        let inner = AvlNodeIterator::from_bound(Arc::clone(&self.page), match &low {
            Bound::Included(k) => Bound::Included(k),
            Bound::Excluded(k) => Bound::Excluded(k),
            Bound::Unbounded => Bound::Unbounded,
        });
        RangeIter { inner, high }
    }
}

/// In-order traversal of tree nodes with explicit state.
pub struct AvlNodeIterator {
    page: Arc<AvlIndexPage>,
    stack: NodeStack,
}

impl AvlNodeIterator {
    fn full(page: Arc<AvlIndexPage>) -> Self {
        let mut iter = Self {
            stack: NodeStack::new(),
            page,
        };
        let root = iter.page.root();
        iter.push_left_spine(root);
        iter
    }

    /// Seeds the stack with every ancestor whose key is admitted by `low`,
    /// descending toward the lowest admissible key.
    fn from_bound(page: Arc<AvlIndexPage>, low: Bound<&IndexKey>) -> Self {
        let mut iter = Self {
            stack: NodeStack::new(),
            page,
        };

        let (bound_key, inclusive) = match low {
            Bound::Unbounded => {
                let root = iter.page.root();
                iter.push_left_spine(root);
                return iter;
            }
            Bound::Included(k) => (k, true),
            Bound::Excluded(k) => (k, false),
        };

        let mut current = iter.page.root();
        while let Some(node_key) = current {
            let Some(node) = iter.page.node(node_key) else {
                break;
            };
            let admitted = match node.key.cmp(bound_key) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => inclusive,
                std::cmp::Ordering::Less => false,
            };
            if admitted {
                iter.stack.push(node_key);
                current = node.left;
            } else {
                current = node.right;
            }
        }

        iter
    }

    fn push_left_spine(&mut self, mut current: Option<u64>) {
        while let Some(node_key) = current {
            self.stack.push(node_key);
            current = self.page.node(node_key).and_then(|n| n.left);
        }
    }
}

impl Iterator for AvlNodeIterator {
    type Item = (IndexKey, NodeReferences);

    fn next(&mut self) -> Option<Self::Item> {
        let node_key = self.stack.pop()?;
        let node = self.page.node(node_key)?;
        let item = (node.key.clone(), node.value.clone());
        self.push_left_spine(node.right);
        Some(item)
    }
}

/// Lazy ascending `(key, references)` sequence bounded above.
pub struct RangeIter {
    inner: AvlNodeIterator,
    high: Bound<IndexKey>,
}

impl Iterator for RangeIter {
    type Item = (IndexKey, NodeReferences);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, refs) = self.inner.next()?;
        let admitted = match &self.high {
            Bound::Unbounded => true,
            Bound::Included(h) => key <= *h,
            Bound::Excluded(h) => key < *h,
        };
        if admitted {
            Some((key, refs))
        } else {
            // Past the upper bound; drain the stack so the iterator is fused.
            self.inner.stack.clear();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::avltree::AvlTreeWriter;
    use crate::index::key::KeyValue;

    fn int_key(v: i64) -> IndexKey {
        IndexKey::Cas {
            path_node: 1,
            value: KeyValue::Int(v),
        }
    }

    fn tree_of(keys: &[i64]) -> AvlTreeReader {
        let mut page = AvlIndexPage::new();
        let mut writer = AvlTreeWriter::new(&mut page);
        for (i, v) in keys.iter().enumerate() {
            writer.insert(int_key(*v), i as u64 + 100).unwrap();
        }
        AvlTreeReader::new(page)
    }

    fn keys_of<I: Iterator<Item = (IndexKey, NodeReferences)>>(iter: I) -> Vec<i64> {
        iter.map(|(k, _)| match k {
            IndexKey::Cas {
                value: KeyValue::Int(v),
                ..
            } => v,
            other => panic!("unexpected key {:?}", other),
        })
        .collect()
    }

    #[test]
    fn search_modes_resolve_point_and_range() {
        let equal = tree_of(&[10, 5, 15])
            .search(Some(&int_key(5)), SearchMode::Equal)
            .unwrap();
        assert_eq!(keys_of(equal), vec![5]);

        let range = tree_of(&[10, 5, 15, 3, 7])
            .search(
                None,
                SearchMode::Range {
                    low: Bound::Excluded(int_key(3)),
                    high: Bound::Included(int_key(10)),
                },
            )
            .unwrap();
        assert_eq!(keys_of(range), vec![5, 7, 10]);

        assert!(tree_of(&[1]).search(None, SearchMode::Equal).is_err());
    }

    #[test]
    fn get_finds_present_and_misses_absent() {
        let reader = tree_of(&[10, 5, 15]);
        assert!(reader.get(&int_key(10)).is_some());
        assert!(reader.get(&int_key(5)).is_some());
        assert!(reader.get(&int_key(7)).is_none());
    }

    #[test]
    fn full_iteration_is_in_order() {
        let reader = tree_of(&[10, 5, 15, 3, 7, 12, 20, 1]);
        assert_eq!(keys_of(reader.iter()), vec![1, 3, 5, 7, 10, 12, 15, 20]);
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let reader = AvlTreeReader::new(AvlIndexPage::new());
        assert_eq!(reader.iter().count(), 0);
        assert!(reader.get(&int_key(1)).is_none());
    }

    #[test]
    fn iter_from_inclusive_and_exclusive() {
        let reader = tree_of(&[10, 5, 15, 3, 7]);

        assert_eq!(
            keys_of(reader.iter_from(Bound::Included(&int_key(7)))),
            vec![7, 10, 15]
        );
        assert_eq!(
            keys_of(reader.iter_from(Bound::Excluded(&int_key(7)))),
            vec![10, 15]
        );
        // A bound between keys starts at the next higher key.
        assert_eq!(
            keys_of(reader.iter_from(Bound::Included(&int_key(6)))),
            vec![7, 10, 15]
        );
    }

    #[test]
    fn range_respects_upper_bound() {
        let reader = tree_of(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let range = reader
            .clone()
            .into_range(Bound::Included(int_key(3)), Bound::Included(int_key(6)));
        assert_eq!(keys_of(range), vec![3, 4, 5, 6]);

        let range = reader
            .clone()
            .into_range(Bound::Excluded(int_key(3)), Bound::Excluded(int_key(6)));
        assert_eq!(keys_of(range), vec![4, 5]);

        let mut range = reader
            .clone()
            .into_range(Bound::Included(int_key(7)), Bound::Included(int_key(2)));
        assert!(range.next().is_none());
        assert!(range.next().is_none());
    }

    #[test]
    fn equal_range_yields_single_entry_with_references() {
        let mut page = AvlIndexPage::new();
        let mut writer = AvlTreeWriter::new(&mut page);
        writer.insert(int_key(4), 100).unwrap();
        writer.insert(int_key(4), 200).unwrap();
        let reader = AvlTreeReader::new(page);

        let hits: Vec<_> = reader
            .into_range(Bound::Included(int_key(4)), Bound::Included(int_key(4)))
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.iter().collect::<Vec<_>>(), vec![100, 200]);
    }

    #[test]
    fn deep_tree_iterates_without_recursion() {
        let keys: Vec<i64> = (0..2000).collect();
        let reader = tree_of(&keys);
        assert_eq!(keys_of(reader.iter()), keys);
    }
}
