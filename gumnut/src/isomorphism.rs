//! Grouping of same-height batches by fingerprint.

use crate::fingerprint::{Fingerprint, FingerprintMemo, Side};
use crate::tree::SyntaxTree;
use indextree::NodeId;
use rapidhash::RapidHashMap as HashMap;

/// Nodes of both batches sharing one fingerprint.
///
/// Every node of `a` is isomorphic to every node of `b`, so the group stands
/// for the slice of the batch cross-product whose pairs are isomorphic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// The shared fingerprint.
    pub fingerprint: Fingerprint,
    /// Members from tree A, in batch order.
    pub a: Vec<NodeId>,
    /// Members from tree B, in batch order.
    pub b: Vec<NodeId>,
}

/// What the top-down phase does with a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Exactly one node per side: an anchor.
    Unique,
    /// At least one node per side and more than one on some side.
    Ambiguous,
    /// Some side holds more than `max_size` nodes.
    Oversized,
    /// Only one side has nodes with this fingerprint.
    Unmatched,
}

impl Group {
    /// Classify the group against the per-side size cap.
    pub fn kind(&self, max_size: usize) -> GroupKind {
        if self.a.is_empty() || self.b.is_empty() {
            GroupKind::Unmatched
        } else if self.a.len() > max_size || self.b.len() > max_size {
            GroupKind::Oversized
        } else if self.a.len() == 1 && self.b.len() == 1 {
            GroupKind::Unique
        } else {
            GroupKind::Ambiguous
        }
    }

    /// Every member of both sides.
    pub fn members(&self) -> impl Iterator<Item = (Side, NodeId)> + '_ {
        let a = self.a.iter().map(|&id| (Side::A, id));
        let b = self.b.iter().map(|&id| (Side::B, id));
        a.chain(b)
    }

    /// All `(a, b)` pairs of the group, A-major.
    pub fn cross_product(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.a
            .iter()
            .flat_map(|&a| self.b.iter().map(move |&b| (a, b)))
    }
}

/// Group two equal-height batches by fingerprint.
///
/// Groups come out in the order their fingerprint was first seen, walking
/// `batch_a` first and then `batch_b`.
///
/// # Panics
///
/// Panics if a batch node is missing from the memo.
pub fn group_batches(
    batch_a: &[NodeId],
    batch_b: &[NodeId],
    memo: &FingerprintMemo,
) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<Fingerprint, usize> = HashMap::default();

    let members = batch_a
        .iter()
        .map(|&id| (Side::A, id))
        .chain(batch_b.iter().map(|&id| (Side::B, id)));

    for (side, id) in members {
        let fingerprint = memo.require(side, id);
        let slot = *index.entry(fingerprint).or_insert_with(|| {
            groups.push(Group {
                fingerprint,
                a: Vec::new(),
                b: Vec::new(),
            });
            groups.len() - 1
        });
        match side {
            Side::A => groups[slot].a.push(id),
            Side::B => groups[slot].b.push(id),
        }
    }

    groups
}

/// Call `f` for every node pair of two isomorphic subtrees, roots first.
///
/// Isomorphic subtrees have the same shape, so their pre-orders line up node
/// for node.
pub fn for_each_isomorphic_pair<TA, TB>(
    tree_a: &TA,
    a: NodeId,
    tree_b: &TB,
    b: NodeId,
    mut f: impl FnMut(NodeId, NodeId),
) where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    for (da, db) in tree_a.descendants(a).zip(tree_b.descendants(b)) {
        f(da, db);
    }
}
