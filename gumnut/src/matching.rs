//! Top-down anchor matching and the matching entry point.
//!
//! A run goes through these phases:
//! 1. Top-down: walk both trees from the roots in height-synchronized rounds,
//!    anchoring subtrees whose fingerprint is unique on both sides and
//!    collecting ambiguous pairs as candidates
//! 2. Resolution: accept candidates greedily by Dice score
//! 3. Recovery (optional): match what is left by label, position and
//!    descendant similarity

use crate::{debug, trace};

use crate::error::ConfigError;
use crate::fingerprint::{FingerprintMemo, Side};
use crate::frontier::HeightFrontier;
use crate::isomorphism::{Group, GroupKind, for_each_isomorphic_pair, group_batches};
use crate::recovery::recover;
use crate::resolve::resolve_candidates;
use crate::tree::SyntaxTree;
#[cfg(feature = "matching-stats")]
use core::cell::RefCell;
use indextree::NodeId;

#[cfg(feature = "matching-stats")]
thread_local! {
    static DICE_CALLS: RefCell<usize> = const { RefCell::new(0) };
    static CANDIDATE_PAIRS: RefCell<usize> = const { RefCell::new(0) };
}

/// Reset matching statistics (call before compute_matching)
#[cfg(feature = "matching-stats")]
pub fn reset_stats() {
    DICE_CALLS.with(|c| *c.borrow_mut() = 0);
    CANDIDATE_PAIRS.with(|c| *c.borrow_mut() = 0);
}

/// Get matching statistics: (dice_evaluations, candidate_pairs)
#[cfg(feature = "matching-stats")]
pub fn get_stats() -> (usize, usize) {
    let calls = DICE_CALLS.with(|c| *c.borrow());
    let candidates = CANDIDATE_PAIRS.with(|c| *c.borrow());
    (calls, candidates)
}

#[cfg(feature = "matching-stats")]
pub(crate) fn count_dice_call() {
    DICE_CALLS.with(|c| *c.borrow_mut() += 1);
}

#[cfg(feature = "matching-stats")]
fn count_candidates(n: usize) {
    CANDIDATE_PAIRS.with(|c| *c.borrow_mut() += n);
}

/// Which node of tree A became which node of tree B.
///
/// Every node takes part in at most one pair: [`Matching::add`] refuses a
/// pair when either node is already taken, so the mapping stays injective
/// in both directions.
#[derive(Debug, Clone, Default)]
pub struct Matching {
    /// Slot per A node index, holding its B partner.
    a_to_b: Vec<Option<NodeId>>,
    /// Slot per B node index, holding its A partner.
    b_to_a: Vec<Option<NodeId>>,
    /// Accepted pairs, oldest first.
    pairs: Vec<(NodeId, NodeId)>,
}

impl Matching {
    /// Create a new empty matching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty matching with lookup slots for `nodes_a` and
    /// `nodes_b` nodes, and room for as many pairs as the smaller side.
    ///
    /// Ids beyond the preallocated slots are still accepted.
    pub fn with_capacity(nodes_a: usize, nodes_b: usize) -> Self {
        Self {
            a_to_b: vec![None; nodes_a + 1],
            b_to_a: vec![None; nodes_b + 1],
            pairs: Vec::with_capacity(nodes_a.min(nodes_b)),
        }
    }

    /// Add a match between two nodes.
    ///
    /// Returns `false` and leaves the matching untouched when either node is
    /// already matched.
    #[inline]
    pub fn add(&mut self, a: NodeId, b: NodeId) -> bool {
        if self.contains_a(a) || self.contains_b(b) {
            return false;
        }

        let a_idx = usize::from(a);
        let b_idx = usize::from(b);

        if a_idx >= self.a_to_b.len() {
            self.a_to_b.resize(a_idx + 1, None);
        }
        if b_idx >= self.b_to_a.len() {
            self.b_to_a.resize(b_idx + 1, None);
        }

        self.a_to_b[a_idx] = Some(b);
        self.b_to_a[b_idx] = Some(a);
        self.pairs.push((a, b));
        true
    }

    /// Check if a node from tree A is matched.
    #[inline(always)]
    pub fn contains_a(&self, a: NodeId) -> bool {
        self.get_b(a).is_some()
    }

    /// Check if a node from tree B is matched.
    #[inline(always)]
    pub fn contains_b(&self, b: NodeId) -> bool {
        self.get_a(b).is_some()
    }

    /// Get the match for a node from tree A.
    #[inline(always)]
    pub fn get_b(&self, a: NodeId) -> Option<NodeId> {
        self.a_to_b.get(usize::from(a)).copied().flatten()
    }

    /// Get the match for a node from tree B.
    #[inline(always)]
    pub fn get_a(&self, b: NodeId) -> Option<NodeId> {
        self.b_to_a.get(usize::from(b)).copied().flatten()
    }

    /// Get all matched pairs, in the order they were accepted.
    pub fn pairs(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.pairs.iter().copied()
    }

    /// Get the number of matched pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Check if there are no matches.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Match two isomorphic subtrees node for node.
    pub(crate) fn add_isomorphic<TA, TB>(
        &mut self,
        tree_a: &TA,
        a: NodeId,
        tree_b: &TB,
        b: NodeId,
    ) where
        TA: SyntaxTree,
        TB: SyntaxTree,
    {
        for_each_isomorphic_pair(tree_a, a, tree_b, b, |x, y| {
            self.add(x, y);
        });
    }
}

/// Configuration for the matching algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// The top-down phase only compares batches strictly taller than this.
    /// Smaller subtrees are too generic to anchor on.
    pub min_height: usize,

    /// Minimum Dice score for a candidate to be accepted during resolution,
    /// and for a container match during recovery.
    pub min_dice: f64,

    /// Largest number of same-fingerprint nodes per side that is expanded
    /// into candidate pairs. Bigger groups are opened instead.
    pub max_size: usize,

    /// Whether to run the recovery phase after resolution.
    pub recovery: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_height: 1,
            min_dice: 0.5,
            max_size: 1000,
            recovery: true,
        }
    }
}

impl MatchingConfig {
    /// Set `min_height`.
    pub fn with_min_height(mut self, min_height: usize) -> Self {
        self.min_height = min_height;
        self
    }

    /// Set `min_dice`.
    pub fn with_min_dice(mut self, min_dice: f64) -> Self {
        self.min_dice = min_dice;
        self
    }

    /// Set `max_size`.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Enable or disable the recovery phase.
    pub fn with_recovery(mut self, recovery: bool) -> Self {
        self.recovery = recovery;
        self
    }

    /// Check that every tunable is within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_dice) {
            return Err(ConfigError::MinDiceOutOfRange(self.min_dice));
        }
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        Ok(())
    }
}

/// What the top-down phase hands to resolution.
#[derive(Debug, Clone, Default)]
pub struct TopDownOutcome {
    /// Anchored pairs, each anchor followed by its descendant pairs.
    pub unique: Matching,
    /// Ambiguous pairs, in enumeration order.
    pub candidates: Vec<(NodeId, NodeId)>,
}

/// Compute the matching between two trees.
///
/// The two trees can have different concrete types. Fails only when the
/// configuration is out of range.
pub fn compute_matching<TA, TB>(
    tree_a: &TA,
    tree_b: &TB,
    config: &MatchingConfig,
) -> Result<Matching, ConfigError>
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    config.validate()?;
    debug!(
        nodes_a = tree_a.node_count(),
        nodes_b = tree_b.node_count(),
        "compute_matching start"
    );

    let memo = FingerprintMemo::for_trees(tree_a, tree_b);
    debug!(fingerprints = memo.len(), "fingerprints computed");

    let TopDownOutcome { unique, candidates } = top_down(tree_a, tree_b, &memo, config);
    debug!(
        unique = unique.len(),
        candidates = candidates.len(),
        "after top_down"
    );

    let mut matching = resolve_candidates(tree_a, tree_b, unique, candidates, config);
    debug!(matched = matching.len(), "after resolve_candidates");

    if config.recovery {
        recover(tree_a, tree_b, &memo, &mut matching, config);
        debug!(matched = matching.len(), "after recover");
    }

    Ok(matching)
}

/// Top-down phase.
///
/// Each round either opens the taller frontier's batch, or, when both
/// frontiers peak at the same height, groups both batches by fingerprint.
/// Unique groups become anchors together with their whole subtrees,
/// ambiguous groups become candidates, and everything else is opened so the
/// next round looks one level deeper. The loop stops once either frontier
/// drops to `min_height` or runs empty.
///
/// # Panics
///
/// Panics if `memo` does not cover both trees.
pub fn top_down<TA, TB>(
    tree_a: &TA,
    tree_b: &TB,
    memo: &FingerprintMemo,
    config: &MatchingConfig,
) -> TopDownOutcome
where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    let (Some(root_a), Some(root_b)) = (tree_a.root(), tree_b.root()) else {
        trace!("top_down: empty input");
        return TopDownOutcome::default();
    };
    let mut outcome = TopDownOutcome {
        unique: Matching::with_capacity(tree_a.node_count(), tree_b.node_count()),
        candidates: Vec::new(),
    };

    let mut frontier_a = HeightFrontier::new(tree_a);
    let mut frontier_b = HeightFrontier::new(tree_b);
    frontier_a.push(root_a);
    frontier_b.push(root_b);

    let floor = Some(config.min_height);
    loop {
        let height_a = frontier_a.peek_max();
        let height_b = frontier_b.peek_max();
        if height_a.min(height_b) <= floor {
            break;
        }

        if height_a > height_b {
            for node in frontier_a.pop() {
                frontier_a.open(node);
            }
            continue;
        }
        if height_b > height_a {
            for node in frontier_b.pop() {
                frontier_b.open(node);
            }
            continue;
        }

        let batch_a = frontier_a.pop();
        let batch_b = frontier_b.pop();
        trace!(
            height = ?height_a,
            batch_a = batch_a.len(),
            batch_b = batch_b.len(),
            "top_down: round"
        );

        for group in group_batches(&batch_a, &batch_b, memo) {
            match group.kind(config.max_size) {
                GroupKind::Unique => {
                    let (a, b) = (group.a[0], group.b[0]);
                    trace!(a = %a, b = %b, "top_down: anchor");
                    outcome.unique.add_isomorphic(tree_a, a, tree_b, b);
                }
                GroupKind::Ambiguous => {
                    trace!(
                        a = group.a.len(),
                        b = group.b.len(),
                        "top_down: ambiguous group"
                    );
                    #[cfg(feature = "matching-stats")]
                    count_candidates(group.a.len() * group.b.len());
                    outcome.candidates.extend(group.cross_product());
                }
                GroupKind::Oversized => {
                    trace!(
                        a = group.a.len(),
                        b = group.b.len(),
                        max_size = config.max_size,
                        "top_down: oversized group opened"
                    );
                    open_group(&group, &mut frontier_a, &mut frontier_b);
                }
                GroupKind::Unmatched => {
                    open_group(&group, &mut frontier_a, &mut frontier_b);
                }
            }
        }
    }

    outcome
}

fn open_group<TA, TB>(
    group: &Group,
    frontier_a: &mut HeightFrontier<'_, TA>,
    frontier_b: &mut HeightFrontier<'_, TB>,
) where
    TA: SyntaxTree,
    TB: SyntaxTree,
{
    for (side, node) in group.members() {
        match side {
            Side::A => frontier_a.open(node),
            Side::B => frontier_b.open(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;
    use test_log::test;

    /// root -> [stmt -> [ident x, lit 1], stmt -> [ident y, lit <value>]]
    fn program(last_value: &str) -> Tree {
        let mut tree = Tree::with_root("program", "");
        let root = tree.root().unwrap();
        let s1 = tree.push_child(root, "stmt", "").unwrap();
        tree.push_child(s1, "ident", "x").unwrap();
        tree.push_child(s1, "lit", "1").unwrap();
        let s2 = tree.push_child(root, "stmt", "").unwrap();
        tree.push_child(s2, "ident", "y").unwrap();
        tree.push_child(s2, "lit", last_value).unwrap();
        tree
    }

    fn run_top_down(a: &Tree, b: &Tree, config: &MatchingConfig) -> TopDownOutcome {
        let memo = FingerprintMemo::for_trees(a, b);
        top_down(a, b, &memo, config)
    }

    #[test]
    fn test_add_refuses_already_matched_nodes() {
        let a = program("2");
        let b = program("2");
        let mut ids_a = a.pre_order();
        let mut ids_b = b.pre_order();
        let (a0, a1) = (ids_a.next().unwrap(), ids_a.next().unwrap());
        let (b0, b1) = (ids_b.next().unwrap(), ids_b.next().unwrap());

        let mut matching = Matching::new();
        assert!(matching.add(a0, b0));
        assert!(!matching.add(a0, b1));
        assert!(!matching.add(a1, b0));
        assert!(matching.add(a1, b1));

        assert_eq!(matching.len(), 2);
        assert_eq!(matching.get_b(a0), Some(b0));
        assert_eq!(matching.get_a(b1), Some(a1));
        assert_eq!(matching.pairs().collect::<Vec<_>>(), [(a0, b0), (a1, b1)]);
    }

    #[test]
    fn test_preallocated_matching_starts_empty_and_grows() {
        let a = program("2");
        let b = program("2");
        let mut matching = Matching::with_capacity(2, 2);
        assert!(matching.is_empty());
        for id in a.pre_order() {
            assert_eq!(matching.get_b(id), None);
        }

        // Ids past the preallocated slots still land.
        for (x, y) in a.pre_order().zip(b.pre_order()) {
            assert!(matching.add(x, y));
        }
        assert_eq!(matching.len(), a.node_count());
        let last = a.pre_order().last().unwrap();
        assert_eq!(matching.get_b(last), Some(last));
        assert_eq!(matching.get_a(last), Some(last));

        let outcome = run_top_down(&a, &b, &MatchingConfig::default());
        assert_eq!(outcome.unique.len(), a.node_count());
    }

    #[test]
    fn test_identical_trees_are_fully_anchored() {
        let a = program("2");
        let b = program("2");
        let outcome = run_top_down(&a, &b, &MatchingConfig::default());

        assert_eq!(outcome.unique.len(), a.node_count());
        assert!(outcome.candidates.is_empty());
        for (x, y) in outcome.unique.pairs() {
            assert_eq!(a.label(x), b.label(y));
            assert_eq!(a.value(x), b.value(y));
        }
    }

    #[test]
    fn test_changed_leaf_is_not_anchored() {
        let a = program("2");
        let b = program("3");
        let config = MatchingConfig::default().with_min_height(0);
        let outcome = run_top_down(&a, &b, &config);

        let root_a = a.root().unwrap();
        let stmts_a: Vec<_> = a.children(root_a).collect();
        let stmts_b: Vec<_> = b.children(b.root().unwrap()).collect();

        // The untouched statement is anchored with its leaves.
        assert_eq!(outcome.unique.get_b(stmts_a[0]), Some(stmts_b[0]));
        assert_eq!(outcome.unique.len(), 3);

        // The changed leaf and its ancestors are not.
        let changed = a.children(stmts_a[1]).last().unwrap();
        for node in [changed, stmts_a[1], root_a] {
            assert!(!outcome.unique.contains_a(node));
        }
    }

    #[test]
    fn test_repeated_subtrees_become_candidates() {
        // Two identical statements on both sides.
        let mut a = Tree::with_root("program", "v1");
        let ra = a.root().unwrap();
        for _ in 0..2 {
            let stmt = a.push_child(ra, "stmt", "").unwrap();
            a.push_child(stmt, "call", "f").unwrap();
        }
        let mut b = a.clone();
        b.update_value(b.root().unwrap(), "v2").unwrap();

        let config = MatchingConfig::default().with_min_height(0);
        let outcome = run_top_down(&a, &b, &config);

        assert!(outcome.unique.is_empty());
        assert_eq!(outcome.candidates.len(), 4);
        let stmts_a: Vec<_> = a.children(ra).collect();
        assert_eq!(outcome.candidates[0].0, stmts_a[0]);
        assert_eq!(outcome.candidates[2].0, stmts_a[1]);
    }

    #[test]
    fn test_oversized_group_is_opened() {
        let mut a = Tree::with_root("program", "v1");
        let ra = a.root().unwrap();
        for _ in 0..3 {
            let stmt = a.push_child(ra, "stmt", "").unwrap();
            let call = a.push_child(stmt, "call", "").unwrap();
            a.push_child(call, "ident", "f").unwrap();
        }
        let mut b = a.clone();
        b.update_value(b.root().unwrap(), "v2").unwrap();

        let config = MatchingConfig::default().with_min_height(0).with_max_size(2);
        let outcome = run_top_down(&a, &b, &config);

        // The stmt group (3 x 3) and the call group one level down (3 x 3)
        // are both too big, so nothing reaches the candidates.
        assert!(outcome.candidates.is_empty());
        assert!(outcome.unique.is_empty());

        let config = config.with_max_size(3);
        let outcome = run_top_down(&a, &b, &config);
        assert_eq!(outcome.candidates.len(), 9);
    }

    #[test]
    fn test_unequal_heights_open_the_taller_side() {
        // A wraps the shared statement one level deeper than B.
        let mut a = Tree::with_root("program", "");
        let ra = a.root().unwrap();
        let block = a.push_child(ra, "block", "").unwrap();
        let stmt_a = a.push_child(block, "stmt", "").unwrap();
        let call_a = a.push_child(stmt_a, "call", "f").unwrap();
        a.push_child(call_a, "arg", "1").unwrap();

        let mut b = Tree::with_root("program", "");
        let rb = b.root().unwrap();
        let stmt_b = b.push_child(rb, "stmt", "").unwrap();
        let call_b = b.push_child(stmt_b, "call", "f").unwrap();
        b.push_child(call_b, "arg", "1").unwrap();

        let outcome = run_top_down(&a, &b, &MatchingConfig::default());
        assert_eq!(outcome.unique.get_b(stmt_a), Some(stmt_b));
        assert_eq!(outcome.unique.get_b(call_a), Some(call_b));
        assert!(!outcome.unique.contains_a(ra));
    }

    #[test]
    fn test_empty_tree_yields_empty_outcome() {
        let a = Tree::new();
        let b = program("2");
        let outcome = run_top_down(&a, &b, &MatchingConfig::default());
        assert!(outcome.unique.is_empty());
        assert!(outcome.candidates.is_empty());

        let matching = compute_matching(&a, &b, &MatchingConfig::default()).unwrap();
        assert!(matching.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(MatchingConfig::default().validate(), Ok(()));
        assert_eq!(
            MatchingConfig::default().with_min_dice(1.5).validate(),
            Err(ConfigError::MinDiceOutOfRange(1.5))
        );
        assert!(matches!(
            MatchingConfig::default().with_min_dice(f64::NAN).validate(),
            Err(ConfigError::MinDiceOutOfRange(_))
        ));
        assert_eq!(
            MatchingConfig::default().with_max_size(0).validate(),
            Err(ConfigError::ZeroMaxSize)
        );

        let a = program("2");
        let result = compute_matching(&a, &a, &MatchingConfig::default().with_max_size(0));
        assert_eq!(result.unwrap_err(), ConfigError::ZeroMaxSize);
    }

    #[cfg(feature = "matching-stats")]
    #[test]
    fn test_stats_count_candidates() {
        let mut a = Tree::with_root("program", "v1");
        let ra = a.root().unwrap();
        for _ in 0..2 {
            let stmt = a.push_child(ra, "stmt", "").unwrap();
            a.push_child(stmt, "call", "f").unwrap();
        }
        let mut b = a.clone();
        b.update_value(b.root().unwrap(), "v2").unwrap();

        reset_stats();
        let config = MatchingConfig::default()
            .with_min_height(0)
            .with_recovery(false);
        compute_matching(&a, &b, &config).unwrap();
        let (dice_calls, candidates) = get_stats();
        assert_eq!(candidates, 4);
        assert_eq!(dice_calls, 4);
    }
}
