//! Arena-backed AST with sparse, position-keyed children.
//!
//! Every node lives in an [`indextree::Arena`]; the parent link is the
//! arena's non-owning back-reference. Children are kept in the sibling list
//! sorted by their sibling position, so iteration order is position order no
//! matter in which order nodes were attached. Positions may have gaps: they
//! are the source indices a node was created with and are never compacted.

use crate::error::TreeError;
use crate::trace;
use core::cmp::Ordering;
use indextree::{Arena, NodeEdge, NodeId};

/// One AST node: its grammar label, its token value, and the bookkeeping the
/// tree keeps up to date (sibling position and subtree height).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Name of the grammar production.
    pub label: String,
    /// Literal token text. Usually empty for inner nodes.
    pub value: String,
    position: Option<usize>,
    height: usize,
}

impl NodeData {
    fn new(label: impl Into<String>, value: impl Into<String>, position: Option<usize>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            position,
            height: 0,
        }
    }

    /// Sibling position under the parent, `None` for the root.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Longest downward path to a leaf.
    pub fn height(&self) -> usize {
        self.height
    }
}

/// Read-only view of a labeled, ordered, rooted tree.
///
/// The matcher is generic over this trait, so the two sides of a comparison
/// can be different tree implementations. Accessors taking a `NodeId` panic
/// when handed an id that is not a live node of the tree: inside the matcher
/// that only happens when its own bookkeeping is broken.
pub trait SyntaxTree: Sync {
    /// The root, or `None` for an empty tree.
    fn root(&self) -> Option<NodeId>;

    /// Number of live nodes.
    fn node_count(&self) -> usize;

    /// Grammar label of a node.
    fn label(&self, id: NodeId) -> &str;

    /// Token value of a node.
    fn value(&self, id: NodeId) -> &str;

    /// Parent of a node, `None` for the root.
    fn parent(&self, id: NodeId) -> Option<NodeId>;

    /// Sibling position of a node, `None` for the root.
    fn position(&self, id: NodeId) -> Option<usize>;

    /// Direct children in ascending sibling position.
    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_;

    /// Number of direct children.
    fn degree(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    /// 0 for a leaf, otherwise 1 + the tallest child.
    fn height(&self, id: NodeId) -> usize;

    /// Whether the node has no children.
    fn is_leaf(&self, id: NodeId) -> bool {
        self.degree(id) == 0
    }

    /// All nodes, parents before children, siblings in position order.
    fn pre_order(&self) -> impl Iterator<Item = NodeId> + '_;

    /// All nodes, children before parents, siblings in position order.
    fn post_order(&self) -> impl Iterator<Item = NodeId> + '_;

    /// The node itself followed by all its descendants in pre-order.
    fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// An AST with an editing API.
///
/// Cloning copies the arena as-is, so node ids of the clone refer to the
/// same positions in the structure as in the original. Clone-then-edit is
/// the usual way to produce the "after" side of a comparison.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    arena: Arena<NodeData>,
    root: Option<NodeId>,
}

impl Tree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tree holding a single root node.
    pub fn with_root(label: impl Into<String>, value: impl Into<String>) -> Self {
        let mut tree = Self::new();
        tree.add_root(label, value);
        tree
    }

    /// Data of a node, or `None` if the id is not live in this tree.
    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.arena
            .get(id)
            .filter(|node| !node.is_removed())
            .map(indextree::Node::get)
    }

    /// Whether the id refers to a live node of this tree.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// The child of `parent` sitting at `position`, if any.
    pub fn child_at(&self, parent: NodeId, position: usize) -> Option<NodeId> {
        self.get(parent)?;
        parent
            .children(&self.arena)
            .find(|&child| self.data(child).position == Some(position))
    }

    /// Add a new root.
    ///
    /// If the tree already has a root, the previous root becomes the only
    /// child (at position 0) of the new one.
    pub fn add_root(&mut self, label: impl Into<String>, value: impl Into<String>) -> NodeId {
        let id = self.arena.new_node(NodeData::new(label, value, None));
        if let Some(previous) = self.root {
            self.arena[previous].get_mut().position = Some(0);
            id.append(previous, &mut self.arena);
            self.refresh_heights(id);
        }
        self.root = Some(id);
        trace!(node = %id, "add_root");
        id
    }

    /// Add a new leaf as the child of `parent` at sibling `position`.
    ///
    /// Positions need not be contiguous; the child is placed after every
    /// sibling with a smaller position.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        position: usize,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        self.live(parent)?;
        let before = self.insertion_point(parent, position, None)?;
        let id = self
            .arena
            .new_node(NodeData::new(label, value, Some(position)));
        self.link(parent, id, before);
        self.refresh_heights(parent);
        trace!(node = %id, parent = %parent, position, "add_child");
        Ok(id)
    }

    /// Add a new leaf after the last child of `parent`.
    ///
    /// Fails with [`TreeError::PositionOverflow`] when the last child already
    /// sits at `usize::MAX`.
    pub fn push_child(
        &mut self,
        parent: NodeId,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        self.live(parent)?;
        let position = match parent
            .last_child(&self.arena)
            .and_then(|last| self.data(last).position)
        {
            Some(last) => last
                .checked_add(1)
                .ok_or(TreeError::PositionOverflow { parent })?,
            None => 0,
        };
        self.add_child(parent, position, label, value)
    }

    /// Move `node` (with its whole subtree) to become the child of
    /// `new_parent` at `position`.
    pub fn move_node(
        &mut self,
        node: NodeId,
        new_parent: NodeId,
        position: usize,
    ) -> Result<(), TreeError> {
        self.live(node)?;
        self.live(new_parent)?;

        // Also rejects moving the root, since it is everyone's ancestor.
        if new_parent.ancestors(&self.arena).any(|ancestor| ancestor == node) {
            return Err(TreeError::InvalidAttachment {
                node,
                parent: new_parent,
            });
        }

        let old_parent = self.arena[node].parent();
        if old_parent == Some(new_parent) && self.data(node).position == Some(position) {
            return Ok(());
        }

        let before = self.insertion_point(new_parent, position, Some(node))?;
        node.detach(&mut self.arena);
        self.arena[node].get_mut().position = Some(position);
        self.link(new_parent, node, before);

        if let Some(old_parent) = old_parent {
            self.refresh_heights(old_parent);
        }
        self.refresh_heights(new_parent);
        trace!(node = %node, parent = %new_parent, position, "move_node");
        Ok(())
    }

    /// Remove `node` and its whole subtree. Removing the root empties the tree.
    pub fn delete(&mut self, node: NodeId) -> Result<(), TreeError> {
        self.live(node)?;
        let parent = self.arena[node].parent();
        node.remove_subtree(&mut self.arena);
        if self.root == Some(node) {
            self.root = None;
        }
        if let Some(parent) = parent {
            self.refresh_heights(parent);
        }
        trace!(node = %node, "delete");
        Ok(())
    }

    /// Replace the label of `node`.
    pub fn update_label(
        &mut self,
        node: NodeId,
        label: impl Into<String>,
    ) -> Result<(), TreeError> {
        self.live(node)?;
        self.arena[node].get_mut().label = label.into();
        Ok(())
    }

    /// Replace the value of `node`.
    pub fn update_value(
        &mut self,
        node: NodeId,
        value: impl Into<String>,
    ) -> Result<(), TreeError> {
        self.live(node)?;
        self.arena[node].get_mut().value = value.into();
        Ok(())
    }

    /// Deep structural equality between the subtree at `a` and the subtree
    /// at `b` in `other`: labels, values and sibling positions all agree.
    ///
    /// This walks both subtrees completely. The matcher itself never uses
    /// it; fingerprints stand in for it there.
    pub fn subtree_eq<T: SyntaxTree>(&self, a: NodeId, other: &T, b: NodeId) -> bool {
        let mut stack = vec![(a, b)];
        while let Some((a, b)) = stack.pop() {
            let data = self.data(a);
            if data.label != other.label(b)
                || data.value != other.value(b)
                || data.position != other.position(b)
                || self.degree(a) != other.degree(b)
            {
                return false;
            }
            stack.extend(self.children(a).zip(other.children(b)));
        }
        true
    }

    fn node(&self, id: NodeId) -> &indextree::Node<NodeData> {
        match self.arena.get(id).filter(|node| !node.is_removed()) {
            Some(node) => node,
            None => panic!("node {id} is not part of this tree"),
        }
    }

    fn data(&self, id: NodeId) -> &NodeData {
        self.node(id).get()
    }

    fn live(&self, id: NodeId) -> Result<(), TreeError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(TreeError::NodeNotFound { node: id })
        }
    }

    /// Find the sibling a child at `position` must be inserted before
    /// (`None` means append), ignoring `moving` if it is already a child.
    fn insertion_point(
        &self,
        parent: NodeId,
        position: usize,
        moving: Option<NodeId>,
    ) -> Result<Option<NodeId>, TreeError> {
        for child in parent.children(&self.arena) {
            if Some(child) == moving {
                continue;
            }
            match self.data(child).position.cmp(&Some(position)) {
                Ordering::Less => {}
                Ordering::Equal => return Err(TreeError::DuplicatePosition { parent, position }),
                Ordering::Greater => return Ok(Some(child)),
            }
        }
        Ok(None)
    }

    fn link(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        match before {
            Some(sibling) => sibling.insert_before(child, &mut self.arena),
            None => parent.append(child, &mut self.arena),
        }
    }

    /// Recompute cached heights from `start` upwards, stopping at the first
    /// ancestor whose height did not change.
    fn refresh_heights(&mut self, start: NodeId) {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let height = id
                .children(&self.arena)
                .map(|child| self.arena[child].get().height + 1)
                .max()
                .unwrap_or(0);
            let data = self.arena[id].get_mut();
            if data.height == height {
                break;
            }
            data.height = height;
            cursor = self.arena[id].parent();
        }
    }
}

impl SyntaxTree for Tree {
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn node_count(&self) -> usize {
        self.root
            .map_or(0, |root| root.descendants(&self.arena).count())
    }

    fn label(&self, id: NodeId) -> &str {
        &self.data(id).label
    }

    fn value(&self, id: NodeId) -> &str {
        &self.data(id).value
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent()
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.data(id).position
    }

    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    fn height(&self, id: NodeId) -> usize {
        self.data(id).height
    }

    fn pre_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.root
            .into_iter()
            .flat_map(move |root| root.descendants(&self.arena))
    }

    fn post_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.root.into_iter().flat_map(move |root| {
            root.traverse(&self.arena).filter_map(|edge| match edge {
                NodeEdge::End(id) => Some(id),
                NodeEdge::Start(_) => None,
            })
        })
    }

    fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.descendants(&self.arena)
    }
}
