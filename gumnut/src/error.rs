//! Error types.
//!
//! Only recoverable conditions live here. Broken matcher bookkeeping (a memo
//! miss, a frontier handing out a node the tree does not know) panics instead.

use indextree::NodeId;

/// Errors returned by the [`Tree`](crate::Tree) mutation API.
///
/// A failed mutation never leaves the tree half-edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The id does not refer to a live node of this tree.
    #[error("node {node} does not exist in this tree")]
    NodeNotFound {
        /// The offending id.
        node: NodeId,
    },

    /// The parent already has a child at that position.
    #[error("node {parent} already has a child at position {position}")]
    DuplicatePosition {
        /// The parent that was asked to take the child.
        parent: NodeId,
        /// The occupied position.
        position: usize,
    },

    /// The last child of `parent` already sits at `usize::MAX`, so there is
    /// no position left to append at.
    #[error("node {parent} has no free position after its last child")]
    PositionOverflow {
        /// The parent that was asked to take the child.
        parent: NodeId,
    },

    /// Attaching `node` under `parent` would make `node` its own ancestor.
    #[error("cannot attach node {node} under node {parent}: it would become its own ancestor")]
    InvalidAttachment {
        /// The node being attached.
        node: NodeId,
        /// The requested parent.
        parent: NodeId,
    },
}

/// Errors returned when validating a [`MatchingConfig`](crate::MatchingConfig).
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// `min_dice` must be a finite number in `[0, 1]`.
    #[error("min_dice must be within [0, 1], got {0}")]
    MinDiceOutOfRange(f64),

    /// `max_size` must allow at least one node per group side.
    #[error("max_size must be at least 1")]
    ZeroMaxSize,
}
