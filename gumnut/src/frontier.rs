//! Height-bucketed frontier driving the top-down phase.

use crate::tree::SyntaxTree;
use indextree::NodeId;
use std::collections::BTreeMap;

/// Nodes of one tree that are waiting to be compared, bucketed by height.
///
/// Within a bucket nodes come out in the order they were pushed.
#[derive(Debug)]
pub struct HeightFrontier<'t, T: SyntaxTree> {
    tree: &'t T,
    buckets: BTreeMap<usize, Vec<NodeId>>,
    len: usize,
}

impl<'t, T: SyntaxTree> HeightFrontier<'t, T> {
    /// Create an empty frontier over `tree`.
    pub fn new(tree: &'t T) -> Self {
        Self {
            tree,
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    /// Add a node to the bucket of its height.
    pub fn push(&mut self, node: NodeId) {
        let height = self.tree.height(node);
        self.buckets.entry(height).or_default().push(node);
        self.len += 1;
    }

    /// The greatest height currently held.
    ///
    /// `None` means the frontier is empty. Since `None < Some(0)`, an empty
    /// frontier compares below a frontier holding only leaves.
    pub fn peek_max(&self) -> Option<usize> {
        self.buckets.last_key_value().map(|(&height, _)| height)
    }

    /// Remove and return every node at the greatest height.
    ///
    /// Returns an empty batch when the frontier is empty.
    pub fn pop(&mut self) -> Vec<NodeId> {
        match self.buckets.pop_last() {
            Some((_, batch)) => {
                self.len -= batch.len();
                batch
            }
            None => Vec::new(),
        }
    }

    /// Push the direct children of `node`, in sibling order.
    pub fn open(&mut self, node: NodeId) {
        for child in self.tree.children(node) {
            self.push(child);
        }
    }

    /// Whether no node is waiting.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of waiting nodes across all heights.
    pub fn len(&self) -> usize {
        self.len
    }
}
