//! # Gumnut
//!
//! GumTree-style matching of two versions of an abstract syntax tree.
//!
//! Named after the woody fruit of the gum tree.
//!
//! ## Algorithm Overview
//!
//! Given an old tree A and a new tree B, gumnut computes an injective mapping
//! saying which node of A became which node of B. Edit-script generators and
//! diff renderers build on top of it.
//!
//! The matching works in phases:
//!
//! 1. **Fingerprinting**: every node gets an order-sensitive hash of its
//!    subtree (Merkle-tree style)
//! 2. **Top-down**: both trees are walked from the roots in rounds of equal
//!    height. A fingerprint found exactly once on each side anchors the two
//!    subtrees; a fingerprint found several times yields candidate pairs
//! 3. **Resolution**: candidates are accepted greedily by Dice score
//! 4. **Recovery** (optional): leftover containers are matched by label,
//!    position and descendant similarity, then leftover leaves under matched
//!    parents
//!
//! ## Usage
//!
//! ```
//! use gumnut::{MatchingConfig, SyntaxTree, Tree, compute_matching};
//!
//! let mut old = Tree::with_root("program", "");
//! let root = old.root().unwrap();
//! old.push_child(root, "ident", "x").unwrap();
//! old.push_child(root, "ident", "y").unwrap();
//!
//! let mut new = old.clone();
//! new.push_child(root, "ident", "z").unwrap();
//!
//! let matching = compute_matching(&old, &new, &MatchingConfig::default()).unwrap();
//! assert_eq!(matching.len(), 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::std_instead_of_core)]

pub use indextree;

mod tracing_macros;
pub(crate) use tracing_macros::{debug, error, trace};

/// Error types
pub mod error;
/// Structural fingerprints and the per-run memo
pub mod fingerprint;
/// Height-bucketed frontier
pub mod frontier;
/// Grouping of batches by fingerprint
pub mod isomorphism;
/// Top-down matching and the entry point
pub mod matching;
/// Recovery phase
pub mod recovery;
/// Candidate resolution
pub mod resolve;
/// Tree representation and editing
pub mod tree;

pub use error::{ConfigError, TreeError};
pub use fingerprint::{Fingerprint, FingerprintMemo, Side, fingerprint, is_isomorphic};
pub use frontier::HeightFrontier;
pub use isomorphism::{Group, GroupKind, for_each_isomorphic_pair, group_batches};
pub use matching::*;
pub use recovery::recover;
pub use resolve::{dice, resolve_candidates};
pub use tree::{NodeData, SyntaxTree, Tree};
