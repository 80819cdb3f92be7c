//! Greedy resolution of ambiguous candidate pairs.

use crate::matching::{Matching, MatchingConfig};
use crate::trace;
use crate::tree::SyntaxTree;
use indextree::NodeId;

/// Similarity score used to rank candidates.
///
/// `1.0` when both nodes are leaves, otherwise
/// `2 * degree(a) / (degree(a) + degree(b))`. Only `a`'s degree is in the
/// numerator, so the score is not symmetric in its arguments.
pub fn dice<TA, TB>(tree_a: &TA, a: NodeId, tree_b: &TB, b: NodeId) -> f64
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    #[cfg(feature = "matching-stats")]
    crate::matching::count_dice_call();

    let degree_a = tree_a.degree(a);
    let degree_b = tree_b.degree(b);
    if degree_a == 0 && degree_b == 0 {
        1.0
    } else {
        2.0 * degree_a as f64 / (degree_a + degree_b) as f64
    }
}

/// Accept candidates into `matching`, best Dice score first.
///
/// Candidates are stably sorted by descending score, so ties keep their
/// enumeration order. Each accepted pair brings its whole descendant pairing
/// along, and every other candidate touching an already matched node is
/// discarded. Candidates scoring below `min_dice` are dropped.
pub fn resolve_candidates<TA, TB>(
    tree_a: &TA,
    tree_b: &TB,
    mut matching: Matching,
    candidates: Vec<(NodeId, NodeId)>,
    config: &MatchingConfig,
) -> Matching
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    let mut scored: Vec<(f64, NodeId, NodeId)> = candidates
        .into_iter()
        .map(|(a, b)| (dice(tree_a, a, tree_b, b), a, b))
        .collect();
    scored.sort_by(|x, y| y.0.total_cmp(&x.0));

    for (score, a, b) in scored {
        if matching.contains_a(a) || matching.contains_b(b) {
            continue;
        }
        if score < config.min_dice {
            trace!(a = %a, b = %b, score, "resolve: below min_dice");
            continue;
        }
        trace!(a = %a, b = %b, score, "resolve: accept");
        matching.add_isomorphic(tree_a, a, tree_b, b);
    }

    matching
}
