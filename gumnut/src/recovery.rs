//! Recovery phase: match the nodes the first two phases left behind.
//!
//! Two passes over tree A:
//! 1. Containers, in pre-order so parents are decided before their children.
//!    With a matched parent, the child of the counterpart with the same label
//!    at the same position is preferred. Otherwise the best same-label B
//!    container by descendant Dice is taken, and roots fall back to a plain
//!    label match.
//! 2. Leaves under matched parents, by fingerprint and position.

use crate::fingerprint::{FingerprintMemo, Side};
use crate::matching::{Matching, MatchingConfig};
use crate::trace;
use crate::tree::SyntaxTree;
use indextree::NodeId;
use rapidhash::{RapidHashMap as HashMap, RapidHashSet as HashSet};

/// Strict descendants of the containers recovery scores, filled on demand.
struct LazyDescendantMap<'a, T: SyntaxTree> {
    tree: &'a T,
    cache: HashMap<NodeId, HashSet<NodeId>>,
}

impl<'a, T: SyntaxTree> LazyDescendantMap<'a, T> {
    fn new(tree: &'a T) -> Self {
        Self {
            tree,
            cache: HashMap::default(),
        }
    }

    /// Strict descendants of a node, computed on first use.
    fn get_or_compute(&mut self, node: NodeId) -> &HashSet<NodeId> {
        let tree = self.tree;
        self.cache
            .entry(node)
            .or_insert_with(|| tree.descendants(node).skip(1).collect())
    }
}

/// Run both recovery passes, extending `matching` in place.
pub fn recover<TA, TB>(
    tree_a: &TA,
    tree_b: &TB,
    memo: &FingerprintMemo,
    matching: &mut Matching,
    config: &MatchingConfig,
) where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    if tree_a.root().is_none() || tree_b.root().is_none() {
        return;
    }

    let mut desc_a = LazyDescendantMap::new(tree_a);
    let mut desc_b = LazyDescendantMap::new(tree_b);

    // Unmatched B containers by label.
    let mut b_by_label: HashMap<&str, Vec<NodeId>> = HashMap::default();
    for b_id in tree_b.pre_order() {
        if !matching.contains_b(b_id) && !tree_b.is_leaf(b_id) {
            b_by_label.entry(tree_b.label(b_id)).or_default().push(b_id);
        }
    }

    // PASS 1: containers
    for a_id in tree_a.pre_order() {
        if matching.contains_a(a_id) || tree_a.is_leaf(a_id) {
            continue;
        }

        let label = tree_a.label(a_id);
        let parent_a = tree_a.parent(a_id);

        if let Some(parent_b) = parent_a.and_then(|p| matching.get_b(p)) {
            let position = tree_a.position(a_id);
            let by_position = tree_b.children(parent_b).find(|&b_id| {
                !matching.contains_b(b_id)
                    && tree_b.position(b_id) == position
                    && tree_b.label(b_id) == label
            });
            if let Some(b_id) = by_position {
                trace!(a = %a_id, b = %b_id, label, "recover pass1: position+label match");
                matching.add(a_id, b_id);
                continue;
            }
        }

        let mut best: Option<(NodeId, f64)> = None;
        for &b_id in b_by_label.get(label).map(Vec::as_slice).unwrap_or_default() {
            if matching.contains_b(b_id)
                || !ancestry_compatible(a_id, b_id, tree_a, tree_b, matching)
            {
                continue;
            }
            let score = descendant_dice(a_id, b_id, matching, &mut desc_a, &mut desc_b);
            if score >= config.min_dice && best.is_none_or(|(_, top)| score > top) {
                best = Some((b_id, score));
            }
        }

        if let Some((b_id, _score)) = best {
            trace!(a = %a_id, b = %b_id, _score, "recover pass1: dice match");
            matching.add(a_id, b_id);
        } else if parent_a.is_none()
            && let Some(root_b) = tree_b.root()
            && !matching.contains_b(root_b)
            && tree_b.label(root_b) == label
        {
            trace!(a = %a_id, b = %root_b, "recover pass1: root label match");
            matching.add(a_id, root_b);
        }
    }

    // PASS 2: leaves under matched parents
    for a_id in tree_a.pre_order() {
        if matching.contains_a(a_id) || !tree_a.is_leaf(a_id) {
            continue;
        }
        let Some(parent_b) = tree_a.parent(a_id).and_then(|p| matching.get_b(p)) else {
            continue;
        };

        let label = tree_a.label(a_id);
        let position = tree_a.position(a_id);
        let fingerprint = memo.require(Side::A, a_id);

        let candidates: Vec<NodeId> = tree_b
            .children(parent_b)
            .filter(|&b_id| {
                !matching.contains_b(b_id) && tree_b.is_leaf(b_id) && tree_b.label(b_id) == label
            })
            .collect();

        let same_fp = |b_id: &&NodeId| memo.require(Side::B, **b_id) == fingerprint;
        let same_position = |b_id: &&NodeId| tree_b.position(**b_id) == position;

        let best = candidates
            .iter()
            .find(|b_id| same_fp(b_id) && same_position(b_id))
            .or_else(|| candidates.iter().find(same_fp))
            .or_else(|| candidates.iter().find(same_position))
            .copied();

        if let Some(b_id) = best {
            trace!(a = %a_id, b = %b_id, label, "recover pass2: leaf match");
            matching.add(a_id, b_id);
        }
    }
}

/// Whether `node` lies strictly below `ancestor`.
fn is_strict_descendant<T: SyntaxTree>(tree: &T, node: NodeId, ancestor: NodeId) -> bool {
    let mut cursor = tree.parent(node);
    while let Some(id) = cursor {
        if id == ancestor {
            return true;
        }
        cursor = tree.parent(id);
    }
    false
}

/// Check if B is a valid match for A based on ancestry constraints.
///
/// If A's parent is matched to some node P_b, then B must be a descendant of P_b,
/// and the same the other way around.
fn ancestry_compatible<TA, TB>(
    a_id: NodeId,
    b_id: NodeId,
    tree_a: &TA,
    tree_b: &TB,
    matching: &Matching,
) -> bool
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    if let Some(a_parent) = tree_a.parent(a_id)
        && let Some(matched_b_parent) = matching.get_b(a_parent)
        && !is_strict_descendant(tree_b, b_id, matched_b_parent)
    {
        trace!(a = %a_id, b = %b_id, "ancestry check failed: B not below matched parent");
        return false;
    }

    if let Some(b_parent) = tree_b.parent(b_id)
        && let Some(matched_a_parent) = matching.get_a(b_parent)
        && !is_strict_descendant(tree_a, a_id, matched_a_parent)
    {
        trace!(a = %a_id, b = %b_id, "ancestry check failed: A not below matched parent");
        return false;
    }

    true
}

/// Dice coefficient over matched descendants.
///
/// dice(A, B) = 2 × |matched_descendants| / (|descendants_A| + |descendants_B|)
fn descendant_dice<TA, TB>(
    a_id: NodeId,
    b_id: NodeId,
    matching: &Matching,
    desc_a_map: &mut LazyDescendantMap<'_, TA>,
    desc_b_map: &mut LazyDescendantMap<'_, TB>,
) -> f64
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    #[cfg(feature = "matching-stats")]
    crate::matching::count_dice_call();

    let desc_a = desc_a_map.get_or_compute(a_id);
    let desc_b = desc_b_map.get_or_compute(b_id);

    if desc_a.is_empty() && desc_b.is_empty() {
        return 1.0;
    }

    let common = desc_a
        .iter()
        .filter(|&&a| matching.get_b(a).is_some_and(|b| desc_b.contains(&b)))
        .count();
    2.0 * common as f64 / (desc_a.len() + desc_b.len()) as f64
}
