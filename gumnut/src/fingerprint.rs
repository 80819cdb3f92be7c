//! Structural fingerprints.
//!
//! A fingerprint folds a node's label and value together with the
//! fingerprints of its children, in sibling order, Merkle-tree style. Equal
//! fingerprints stand in for subtree isomorphism everywhere in the matcher.

use crate::tree::SyntaxTree;
use crate::{error, trace};
use core::hash::{Hash, Hasher};
use indextree::NodeId;
use parking_lot::RwLock;
use rapidhash::RapidHashMap as HashMap;
use rapidhash::fast::RapidHasher;

/// Order-sensitive hash of a subtree.
///
/// This is 64 bits wide and is treated as collision-free. That is an
/// accepted approximation for realistic AST sizes, not a guarantee. Two
/// subtrees with the same fingerprint are considered isomorphic without
/// being compared node by node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub u64);

/// Which input of a comparison a node id belongs to.
///
/// Both trees allocate ids from their own arenas, so the same `NodeId` value
/// routinely names one node on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The old tree.
    A,
    /// The new tree.
    B,
}

/// Fingerprints of every node of both trees, computed once per matching run.
///
/// Writers take the lock exclusively, readers share it. A run creates one
/// memo, fills it for both sides and drops it when the matching is done.
#[derive(Debug, Default)]
pub struct FingerprintMemo {
    entries: RwLock<HashMap<(Side, NodeId), Fingerprint>>,
}

impl FingerprintMemo {
    /// Create an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a memo covering every node of both trees.
    ///
    /// With the `rayon` feature the two trees are hashed concurrently.
    pub fn for_trees<TA, TB>(tree_a: &TA, tree_b: &TB) -> Self
    where
        TA: SyntaxTree,
        TB: SyntaxTree,
    {
        let memo = Self::new();

        #[cfg(feature = "rayon")]
        rayon::join(|| memo.fill(Side::A, tree_a), || memo.fill(Side::B, tree_b));

        #[cfg(not(feature = "rayon"))]
        {
            memo.fill(Side::A, tree_a);
            memo.fill(Side::B, tree_b);
        }

        memo
    }

    /// Hash every node of `tree` into the memo under `side`.
    pub fn fill<T: SyntaxTree>(&self, side: Side, tree: &T) {
        if let Some(root) = tree.root() {
            fingerprint(tree, root, Some((self, side)));
            trace!(?side, root = %root, "memo filled");
        }
    }

    /// The recorded fingerprint of a node, if any.
    pub fn get(&self, side: Side, node: NodeId) -> Option<Fingerprint> {
        self.entries.read().get(&(side, node)).copied()
    }

    /// The recorded fingerprint of a node.
    ///
    /// # Panics
    ///
    /// Panics if the node was never hashed. During matching this means the
    /// frontier handed out a node that does not belong to the input tree.
    pub fn require(&self, side: Side, node: NodeId) -> Fingerprint {
        match self.get(side, node) {
            Some(fp) => fp,
            None => {
                error!(?side, node = %node, "fingerprint memo miss");
                panic!("node {node} on side {side:?} is missing from the fingerprint memo")
            }
        }
    }

    /// Number of recorded nodes, both sides together.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn record(&self, side: Side, node: NodeId, fp: Fingerprint) {
        self.entries.write().entry((side, node)).or_insert(fp);
    }
}

/// Hash of a node's own label and value.
fn content_hash(label: &str, value: &str) -> u64 {
    let mut hasher = RapidHasher::default();
    label.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

/// Compute the fingerprint of the subtree rooted at `node`.
///
/// A leaf's fingerprint is its content hash. An inner node hashes its content
/// hash followed by its children's fingerprints in ascending sibling
/// position, so reordering children changes the result.
///
/// When a memo is given, every node of the subtree is recorded in it under
/// `side`. The walk is iterative, so tree depth is not limited by the stack.
pub fn fingerprint<T: SyntaxTree>(
    tree: &T,
    node: NodeId,
    memo: Option<(&FingerprintMemo, Side)>,
) -> Fingerprint {
    let mut done: HashMap<NodeId, Fingerprint> = HashMap::default();
    let mut stack = vec![(node, false)];

    while let Some((id, expanded)) = stack.pop() {
        if !expanded {
            stack.push((id, true));
            stack.extend(tree.children(id).map(|child| (child, false)));
            continue;
        }

        let content = content_hash(tree.label(id), tree.value(id));
        let fp = if tree.is_leaf(id) {
            Fingerprint(content)
        } else {
            let mut hasher = RapidHasher::default();
            hasher.write_u64(content);
            for child in tree.children(id) {
                let child_fp = done
                    .remove(&child)
                    .unwrap_or_else(|| panic!("child {child} was not hashed before its parent"));
                hasher.write_u64(child_fp.0);
            }
            Fingerprint(hasher.finish())
        };

        if let Some((memo, side)) = memo {
            memo.record(side, id, fp);
        }
        done.insert(id, fp);
    }

    done.remove(&node)
        .unwrap_or_else(|| panic!("node {node} produced no fingerprint"))
}

/// Whether two subtrees, possibly from different trees, are isomorphic.
pub fn is_isomorphic<TA, TB>(tree_a: &TA, a: NodeId, tree_b: &TB, b: NodeId) -> bool
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    fingerprint(tree_a, a, None) == fingerprint(tree_b, b, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;
    use test_log::test;

    fn pair_tree(first: (&str, &str), second: (&str, &str)) -> Tree {
        let mut tree = Tree::with_root("call", "f");
        let root = tree.root().unwrap();
        tree.push_child(root, first.0, first.1).unwrap();
        tree.push_child(root, second.0, second.1).unwrap();
        tree
    }

    #[test]
    fn test_child_order_changes_fingerprint() {
        let ab = pair_tree(("arg", "a"), ("arg", "b"));
        let ba = pair_tree(("arg", "b"), ("arg", "a"));

        let fp_ab = fingerprint(&ab, ab.root().unwrap(), None);
        let fp_ba = fingerprint(&ba, ba.root().unwrap(), None);
        assert_ne!(fp_ab, fp_ba);
    }

    #[test]
    fn test_order_follows_positions_not_insertion() {
        let mut tree = Tree::with_root("call", "f");
        let root = tree.root().unwrap();
        tree.add_child(root, 9, "arg", "b").unwrap();
        tree.add_child(root, 2, "arg", "a").unwrap();

        let expected = pair_tree(("arg", "a"), ("arg", "b"));
        assert_eq!(
            fingerprint(&tree, root, None),
            fingerprint(&expected, expected.root().unwrap(), None)
        );
    }

    #[test]
    fn test_leaf_fingerprint_is_content_hash() {
        let tree = Tree::with_root("ident", "x");
        let root = tree.root().unwrap();
        assert_eq!(fingerprint(&tree, root, None).0, content_hash("ident", "x"));
    }

    #[test]
    fn test_label_value_boundary_matters() {
        let a = Tree::with_root("ab", "c");
        let b = Tree::with_root("a", "bc");
        assert!(!is_isomorphic(&a, a.root().unwrap(), &b, b.root().unwrap()));
    }

    #[test]
    fn test_isomorphic_is_reflexive_and_implies_equal_degree() {
        let tree = pair_tree(("arg", "a"), ("arg", "b"));
        for id in tree.pre_order() {
            assert!(is_isomorphic(&tree, id, &tree, id));
        }

        let other = pair_tree(("arg", "a"), ("arg", "b"));
        let (ra, rb) = (tree.root().unwrap(), other.root().unwrap());
        assert!(is_isomorphic(&tree, ra, &other, rb));
        assert_eq!(tree.degree(ra), other.degree(rb));
    }

    #[test]
    fn test_memo_records_every_node_once_per_side() {
        let a = pair_tree(("arg", "a"), ("arg", "b"));
        let b = pair_tree(("arg", "a"), ("arg", "c"));
        let memo = FingerprintMemo::for_trees(&a, &b);

        assert_eq!(memo.len(), a.node_count() + b.node_count());
        for id in a.pre_order() {
            assert_eq!(memo.require(Side::A, id), fingerprint(&a, id, None));
        }
        for id in b.pre_order() {
            assert_eq!(memo.require(Side::B, id), fingerprint(&b, id, None));
        }
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_concurrent_fill_matches_sequential_fill() {
        let mut a = Tree::with_root("block", "");
        let root = a.root().unwrap();
        for i in 0..200 {
            let stmt = a.push_child(root, "stmt", "").unwrap();
            a.push_child(stmt, "ident", format!("v{}", i % 13)).unwrap();
        }
        let mut b = a.clone();
        b.update_value(root, "edited").unwrap();

        let concurrent = FingerprintMemo::for_trees(&a, &b);
        let sequential = FingerprintMemo::new();
        sequential.fill(Side::A, &a);
        sequential.fill(Side::B, &b);

        assert_eq!(concurrent.len(), sequential.len());
        for id in a.pre_order() {
            assert_eq!(concurrent.get(Side::A, id), sequential.get(Side::A, id));
        }
        for id in b.pre_order() {
            assert_eq!(concurrent.get(Side::B, id), sequential.get(Side::B, id));
        }
    }

    #[test]
    fn test_memo_sides_do_not_collide() {
        // Same shapes, so the same NodeIds; different content.
        let a = pair_tree(("arg", "a"), ("arg", "b"));
        let b = pair_tree(("arg", "x"), ("arg", "y"));
        let memo = FingerprintMemo::for_trees(&a, &b);

        let root = a.root().unwrap();
        assert_eq!(b.root(), Some(root));
        assert_ne!(memo.require(Side::A, root), memo.require(Side::B, root));
    }

    #[test]
    fn test_memo_miss_is_none() {
        let tree = Tree::with_root("root", "");
        let memo = FingerprintMemo::new();
        assert!(memo.is_empty());
        assert_eq!(memo.get(Side::A, tree.root().unwrap()), None);
    }

    #[test]
    #[should_panic(expected = "missing from the fingerprint memo")]
    fn test_memo_require_panics_on_miss() {
        let tree = Tree::with_root("root", "");
        FingerprintMemo::new().require(Side::B, tree.root().unwrap());
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut tree = Tree::with_root("block", "");
        let mut cursor = tree.root().unwrap();
        for _ in 0..5_000 {
            cursor = tree.push_child(cursor, "block", "").unwrap();
        }
        let memo = FingerprintMemo::new();
        memo.fill(Side::A, &tree);
        assert_eq!(memo.len(), 5_001);
    }
}
