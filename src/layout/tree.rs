//! The pane tree.
//!
//! A workspace's panes form a rooted tree: leaves hold web views, splits
//! hold exactly two children behind a divider, stacks hold an ordered list
//! of leaf members with one visible at a time. Nodes live in a slotmap
//! arena and refer to each other by [`NodeId`]; parent edges are plain ids,
//! so a torn-down node can never be reached through a dangling pointer;
//! a stale id simply fails to resolve.
//!
//! This module owns structure only. Widget reparenting is sequenced by
//! [`super::reparent`], and every mutating entry point lives on
//! [`super::Workspace`], which keeps structure and widgets in the required
//! order: structure first, widget host calls next, deferred layout last.

use std::collections::HashMap;

use slotmap::{Key, SlotMap};
use trellis_bridge::{PaneTreeNode, PaneTreeSnapshot, SplitOrientation};

use crate::host::{HostBackend, Orientation, PaneView, ViewIdOf};

slotmap::new_key_type! {
    /// Identifier of a node in the pane arena.
    pub struct NodeId;
}

impl NodeId {
    /// Stable textual form carried in script-world event payloads.
    pub fn display(&self) -> String {
        self.data().as_ffi().to_string()
    }
}

/// Direction of a split or navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub fn orientation(self) -> SplitOrientation {
        match self {
            Direction::Left | Direction::Right => SplitOrientation::Horizontal,
            Direction::Up | Direction::Down => SplitOrientation::Vertical,
        }
    }

    /// Whether the existing pane keeps the first slot of a new split.
    /// Splitting right or down places the new pane second.
    pub fn existing_first(self) -> bool {
        matches!(self, Direction::Right | Direction::Down)
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn from_placement(placement: trellis_config::Placement) -> Self {
        match placement {
            trellis_config::Placement::Left => Direction::Left,
            trellis_config::Placement::Right => Direction::Right,
            trellis_config::Placement::Up => Direction::Up,
            trellis_config::Placement::Down => Direction::Down,
        }
    }
}

impl From<SplitOrientation> for Orientation {
    fn from(orientation: SplitOrientation) -> Self {
        match orientation {
            SplitOrientation::Horizontal => Orientation::Horizontal,
            SplitOrientation::Vertical => Orientation::Vertical,
        }
    }
}

/// How a leaf came to exist, as far as input routing cares.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PaneKind {
    /// Independent browsing context.
    Tab,
    /// Related context opened by a script on another pane.
    Popup,
    /// Not yet classified (smart detection pending, or a bootstrap pane).
    #[default]
    Unclassified,
}

bitflags::bitflags! {
    /// Event controllers the host dropped during an unparent and which the
    /// deferred post-reparent step must re-attach.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct PendingReattach: u8 {
        const HOVER = 1;
        const FOCUS = 1 << 1;
    }
}

/// A pane holding a single web view.
#[derive(Debug)]
pub struct Leaf<B: HostBackend> {
    pub view: B::View,
    /// The view's outermost widget; the unit of reparenting.
    pub container: B::Widget,
    pub parent: Option<NodeId>,
    pub kind: PaneKind,
    pub is_popup: bool,
    /// The view shares its opener's session context.
    pub is_related: bool,
    /// Leaf that spawned this popup. Checked for liveness on every use.
    pub parent_leaf: Option<NodeId>,
    pub auto_close_on_oauth: bool,
    /// Deduplication key of the intent that created this pane, released
    /// when the pane closes.
    pub request_id: Option<String>,
    /// Views of popups currently open under this leaf. While non-empty,
    /// script-initiated navigations on this leaf are rejected.
    pub active_popup_children: Vec<ViewIdOf<B>>,
    /// Flipped to false on teardown; guards deferred callbacks.
    pub widget_valid: bool,
    pub pending_reattach: PendingReattach,
    /// Present only while this leaf is a stack member.
    pub title_bar: Option<B::Widget>,
}

impl<B: HostBackend> Leaf<B> {
    pub fn new(view: B::View) -> Self {
        let container = view.root_widget();
        Self {
            view,
            container,
            parent: None,
            kind: PaneKind::default(),
            is_popup: false,
            is_related: false,
            parent_leaf: None,
            auto_close_on_oauth: false,
            request_id: None,
            active_popup_children: Vec::new(),
            widget_valid: true,
            // A fresh container has no controllers yet; the first deferred
            // pass attaches them once the widget is realized.
            pending_reattach: PendingReattach::all(),
            title_bar: None,
        }
    }

    /// Records `view` as an open popup child, keeping insertion order.
    pub fn add_popup_child(&mut self, view: ViewIdOf<B>) {
        if !self.active_popup_children.contains(&view) {
            self.active_popup_children.push(view);
        }
    }

    pub fn remove_popup_child(&mut self, view: &ViewIdOf<B>) {
        self.active_popup_children.retain(|id| id != view);
    }
}

/// A binary split with an orientation and a divider widget.
#[derive(Debug)]
pub struct Split<B: HostBackend> {
    pub orientation: SplitOrientation,
    pub first: NodeId,
    pub second: NodeId,
    pub parent: Option<NodeId>,
    /// The host's two-pane divider widget.
    pub divider: B::Widget,
    /// The divider has been centered after the initial allocation.
    pub divider_synced: bool,
}

impl<B: HostBackend> Split<B> {
    pub fn other_child(&self, child: NodeId) -> Option<NodeId> {
        if self.first == child {
            Some(self.second)
        } else if self.second == child {
            Some(self.first)
        } else {
            None
        }
    }

    pub fn contains_child(&self, child: NodeId) -> bool {
        self.first == child || self.second == child
    }
}

/// An ordered stack of leaf members; one visible, the rest as title bars.
#[derive(Debug)]
pub struct Stack<B: HostBackend> {
    pub members: Vec<NodeId>,
    pub active_index: usize,
    pub parent: Option<NodeId>,
    /// Outer widget; the unit of reparenting for the whole stack.
    pub wrapper: B::Widget,
    /// Vertical box actually holding member title bars and containers.
    pub inner_box: B::Widget,
}

impl<B: HostBackend> Stack<B> {
    pub fn active_member(&self) -> Option<NodeId> {
        self.members.get(self.active_index).copied()
    }

    pub fn member_index(&self, member: NodeId) -> Option<usize> {
        self.members.iter().position(|&id| id == member)
    }
}

#[derive(Debug)]
pub enum PaneNode<B: HostBackend> {
    Leaf(Leaf<B>),
    Split(Split<B>),
    Stack(Stack<B>),
}

impl<B: HostBackend> PaneNode<B> {
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            PaneNode::Leaf(leaf) => leaf.parent,
            PaneNode::Split(split) => split.parent,
            PaneNode::Stack(stack) => stack.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            PaneNode::Leaf(leaf) => leaf.parent = parent,
            PaneNode::Split(split) => split.parent = parent,
            PaneNode::Stack(stack) => stack.parent = parent,
        }
    }

    /// The widget a parent holds for this node.
    pub fn container_widget(&self) -> &B::Widget {
        match self {
            PaneNode::Leaf(leaf) => &leaf.container,
            PaneNode::Split(split) => &split.divider,
            PaneNode::Stack(stack) => &stack.wrapper,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PaneNode::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&Leaf<B>> {
        match self {
            PaneNode::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut Leaf<B>> {
        match self {
            PaneNode::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    pub fn as_split(&self) -> Option<&Split<B>> {
        match self {
            PaneNode::Split(split) => Some(split),
            _ => None,
        }
    }

    pub fn as_split_mut(&mut self) -> Option<&mut Split<B>> {
        match self {
            PaneNode::Split(split) => Some(split),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&Stack<B>> {
        match self {
            PaneNode::Stack(stack) => Some(stack),
            _ => None,
        }
    }

    pub fn as_stack_mut(&mut self) -> Option<&mut Stack<B>> {
        match self {
            PaneNode::Stack(stack) => Some(stack),
            _ => None,
        }
    }
}

/// Maximum tree depth tolerated before the walk assumes a cycle.
const MAX_DEPTH: usize = 50;

/// A workspace's pane arena.
#[derive(Debug)]
pub struct PaneTree<B: HostBackend> {
    nodes: SlotMap<NodeId, PaneNode<B>>,
    root: Option<NodeId>,
    view_to_leaf: HashMap<ViewIdOf<B>, NodeId>,
    cleanup_generation: u64,
}

impl<B: HostBackend> Default for PaneTree<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: HostBackend> PaneTree<B> {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: None,
            view_to_leaf: HashMap::new(),
            cleanup_generation: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
        if let Some(id) = root {
            if let Some(node) = self.nodes.get_mut(id) {
                node.set_parent(None);
            }
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&PaneNode<B>> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut PaneNode<B>> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn leaf(&self, id: NodeId) -> Option<&Leaf<B>> {
        self.nodes.get(id).and_then(PaneNode::as_leaf)
    }

    pub fn leaf_mut(&mut self, id: NodeId) -> Option<&mut Leaf<B>> {
        self.nodes.get_mut(id).and_then(PaneNode::as_leaf_mut)
    }

    pub fn split(&self, id: NodeId) -> Option<&Split<B>> {
        self.nodes.get(id).and_then(PaneNode::as_split)
    }

    pub fn split_mut(&mut self, id: NodeId) -> Option<&mut Split<B>> {
        self.nodes.get_mut(id).and_then(PaneNode::as_split_mut)
    }

    pub fn stack(&self, id: NodeId) -> Option<&Stack<B>> {
        self.nodes.get(id).and_then(PaneNode::as_stack)
    }

    pub fn stack_mut(&mut self, id: NodeId) -> Option<&mut Stack<B>> {
        self.nodes.get_mut(id).and_then(PaneNode::as_stack_mut)
    }

    /// True for a node that is a leaf, still in the arena, and not torn
    /// down. Every public operation validates its target through this.
    pub fn is_live_leaf(&self, id: NodeId) -> bool {
        self.leaf(id).is_some_and(|leaf| leaf.widget_valid)
    }

    pub fn leaf_for_view(&self, view: &ViewIdOf<B>) -> Option<NodeId> {
        self.view_to_leaf.get(view).copied()
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(PaneNode::parent)
    }

    /// The stack this leaf is a member of, if any.
    pub fn enclosing_stack(&self, leaf: NodeId) -> Option<NodeId> {
        let parent = self.parent_of(leaf)?;
        self.stack(parent).map(|_| parent)
    }

    /// Registers a fresh leaf. The view must not already be mapped.
    pub fn insert_leaf(&mut self, leaf: Leaf<B>) -> NodeId {
        let view_id = leaf.view.id();
        let id = self.nodes.insert(PaneNode::Leaf(leaf));
        let previous = self.view_to_leaf.insert(view_id, id);
        debug_assert!(previous.is_none(), "view registered twice");
        id
    }

    /// Creates a split node around `target`, wiring all parent pointers and
    /// the grandparent's (or root's) child slot. Purely structural.
    pub fn wrap_in_split(
        &mut self,
        target: NodeId,
        new_leaf: NodeId,
        orientation: SplitOrientation,
        existing_first: bool,
        divider: B::Widget,
    ) -> NodeId {
        let grandparent = self.parent_of(target);

        let (first, second) = if existing_first {
            (target, new_leaf)
        } else {
            (new_leaf, target)
        };

        let split = self.nodes.insert(PaneNode::Split(Split {
            orientation,
            first,
            second,
            parent: grandparent,
            divider,
            divider_synced: false,
        }));

        if let Some(node) = self.nodes.get_mut(target) {
            node.set_parent(Some(split));
        }
        if let Some(node) = self.nodes.get_mut(new_leaf) {
            node.set_parent(Some(split));
        }

        match grandparent {
            Some(gp) => self.replace_child(gp, target, split),
            None => self.root = Some(split),
        }

        split
    }

    /// Creates a stack node holding `target` as its sole member, taking
    /// over `target`'s place in its parent (or the root slot).
    pub fn wrap_in_stack(
        &mut self,
        target: NodeId,
        wrapper: B::Widget,
        inner_box: B::Widget,
    ) -> NodeId {
        let grandparent = self.parent_of(target);

        let stack = self.nodes.insert(PaneNode::Stack(Stack {
            members: vec![target],
            active_index: 0,
            parent: grandparent,
            wrapper,
            inner_box,
        }));

        if let Some(node) = self.nodes.get_mut(target) {
            node.set_parent(Some(stack));
        }

        match grandparent {
            Some(gp) => self.replace_child(gp, target, stack),
            None => self.root = Some(stack),
        }

        stack
    }

    /// Inserts `member` into a stack's member list. Structure only; the
    /// stack controller owns the widget side.
    pub fn stack_insert_member(&mut self, stack_id: NodeId, member: NodeId, index: usize) {
        if let Some(stack) = self.stack_mut(stack_id) {
            let index = index.min(stack.members.len());
            stack.members.insert(index, member);
        }
        if let Some(node) = self.nodes.get_mut(member) {
            node.set_parent(Some(stack_id));
        }
    }

    /// Removes `member` from a stack's member list, clamping the active
    /// index into the shrunk range. Returns the remaining member count.
    pub fn stack_remove_member(&mut self, stack_id: NodeId, member: NodeId) -> usize {
        let Some(stack) = self.stack_mut(stack_id) else {
            return 0;
        };
        if let Some(idx) = stack.members.iter().position(|&id| id == member) {
            stack.members.remove(idx);
            if idx < stack.active_index || stack.active_index >= stack.members.len() {
                stack.active_index = stack.active_index.saturating_sub(1);
            }
        }
        stack.members.len()
    }

    /// Replaces `old` with `new` in `parent`'s child slot or member list.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        match self.nodes.get_mut(parent) {
            Some(PaneNode::Split(split)) => {
                if split.first == old {
                    split.first = new;
                } else if split.second == old {
                    split.second = new;
                }
            }
            Some(PaneNode::Stack(stack)) => {
                if let Some(idx) = stack.members.iter().position(|&id| id == old) {
                    stack.members[idx] = new;
                }
            }
            _ => {}
        }
        if let Some(node) = self.nodes.get_mut(new) {
            node.set_parent(Some(parent));
        }
    }

    /// Promotes `survivor` into `removed`'s place: `removed`'s parent (or
    /// the root slot) now holds `survivor`. Purely structural; `removed`
    /// stays in the arena until the caller discards it.
    pub fn promote(&mut self, removed: NodeId, survivor: NodeId) {
        match self.parent_of(removed) {
            Some(parent) => self.replace_child(parent, removed, survivor),
            None => {
                self.root = Some(survivor);
                if let Some(node) = self.nodes.get_mut(survivor) {
                    node.set_parent(None);
                }
            }
        }
    }

    /// Removes a leaf node from the arena and the view map, returning its
    /// contents for teardown.
    pub fn release_leaf(&mut self, id: NodeId) -> Option<Leaf<B>> {
        if !self.nodes.get(id).is_some_and(PaneNode::is_leaf) {
            return None;
        }
        let Some(PaneNode::Leaf(mut leaf)) = self.nodes.remove(id) else {
            unreachable!();
        };
        self.view_to_leaf.remove(&leaf.view.id());
        leaf.widget_valid = false;
        leaf.parent = None;
        if self.root == Some(id) {
            self.root = None;
        }
        Some(leaf)
    }

    /// Removes an interior node (split or stack) left without children.
    pub fn discard_node(&mut self, id: NodeId) -> Option<PaneNode<B>> {
        if self.root == Some(id) {
            self.root = None;
        }
        self.nodes.remove(id)
    }

    /// Drops every remaining node. Used when a whole workspace retires;
    /// individual teardown has already released the leaves.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.view_to_leaf.clear();
        self.root = None;
    }

    /// Starts a cleanup pass; the returned generation tags log lines so
    /// interleaved teardowns can be told apart.
    pub fn next_cleanup_generation(&mut self) -> u64 {
        self.cleanup_generation += 1;
        self.cleanup_generation
    }

    /// All leaves in depth-first order.
    pub fn collect_leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.view_to_leaf.len());
        if let Some(root) = self.root {
            self.collect_leaves_under(root, &mut out, 0);
        }
        out
    }

    fn collect_leaves_under(&self, id: NodeId, out: &mut Vec<NodeId>, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match self.nodes.get(id) {
            Some(PaneNode::Leaf(_)) => out.push(id),
            Some(PaneNode::Split(split)) => {
                self.collect_leaves_under(split.first, out, depth + 1);
                self.collect_leaves_under(split.second, out, depth + 1);
            }
            Some(PaneNode::Stack(stack)) => {
                for &member in &stack.members {
                    self.collect_leaves_under(member, out, depth + 1);
                }
            }
            None => {}
        }
    }

    /// All leaves of the subtree rooted at `id`, depth-first.
    pub fn leaves_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_leaves_under(id, &mut out, 0);
        out
    }

    /// Leaves that count toward the "last pane" check; popups do not.
    pub fn non_popup_leaf_count(&self) -> usize {
        self.collect_leaves()
            .into_iter()
            .filter(|&id| self.leaf(id).is_some_and(|leaf| !leaf.is_popup))
            .count()
    }

    /// First leaf of the subtree in visual order; the focus target after a
    /// sibling promotion.
    pub fn leftmost_leaf(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        for _ in 0..=MAX_DEPTH {
            match self.nodes.get(current)? {
                PaneNode::Leaf(_) => return Some(current),
                PaneNode::Split(split) => current = split.first,
                PaneNode::Stack(stack) => current = stack.active_member()?,
            }
        }
        None
    }

    pub fn leaf_count(&self) -> usize {
        self.view_to_leaf.len()
    }

    /// Serializable dump of the tree, marking `focused`.
    pub fn snapshot(&self, focused: Option<NodeId>) -> PaneTreeSnapshot {
        PaneTreeSnapshot {
            root: self.root.and_then(|root| self.snapshot_node(root, focused)),
        }
    }

    fn snapshot_node(&self, id: NodeId, focused: Option<NodeId>) -> Option<PaneTreeNode> {
        match self.nodes.get(id)? {
            PaneNode::Leaf(leaf) => Some(PaneTreeNode::Leaf {
                view: leaf.view.id().to_string(),
                focused: focused == Some(id),
                popup: leaf.is_popup,
            }),
            PaneNode::Split(split) => Some(PaneTreeNode::Split {
                orientation: split.orientation,
                children: [split.first, split.second]
                    .into_iter()
                    .filter_map(|child| self.snapshot_node(child, focused))
                    .collect(),
            }),
            PaneNode::Stack(stack) => Some(PaneTreeNode::Stack {
                active: stack.active_index,
                members: stack
                    .members
                    .iter()
                    .filter_map(|&member| self.snapshot_node(member, focused))
                    .collect(),
            }),
        }
    }

    /// Checks every structural invariant of the tree. Panics on violation;
    /// the fuzz tests run this after every operation.
    pub fn verify_invariants(&self) {
        let Some(root) = self.root else {
            assert!(
                self.view_to_leaf.is_empty(),
                "view map has entries but the tree is empty"
            );
            return;
        };

        assert!(
            self.parent_of(root).is_none(),
            "root must not have a parent"
        );

        let mut visited = Vec::new();
        let mut leaves = 0;
        self.verify_node(root, None, 0, &mut visited, &mut leaves);

        assert_eq!(
            leaves,
            self.view_to_leaf.len(),
            "view map size does not match live leaf count"
        );
        assert_eq!(
            visited.len(),
            self.nodes.len(),
            "arena contains nodes unreachable from the root"
        );
    }

    fn verify_node(
        &self,
        id: NodeId,
        expected_parent: Option<NodeId>,
        depth: usize,
        visited: &mut Vec<NodeId>,
        leaves: &mut usize,
    ) {
        assert!(depth <= MAX_DEPTH, "tree deeper than {MAX_DEPTH}; cycle?");
        assert!(
            !visited.contains(&id),
            "node {id:?} reachable through two paths"
        );
        visited.push(id);

        let node = self.nodes.get(id).expect("child id not in arena");
        assert_eq!(
            node.parent(),
            expected_parent,
            "parent back-pointer of {id:?} does not match its owner"
        );

        match node {
            PaneNode::Leaf(leaf) => {
                *leaves += 1;
                assert!(leaf.widget_valid, "torn-down leaf {id:?} still in tree");
                assert_eq!(
                    self.view_to_leaf.get(&leaf.view.id()).copied(),
                    Some(id),
                    "leaf {id:?} missing from the view map"
                );
                if let Some(parent_leaf) = leaf.parent_leaf {
                    assert!(
                        leaf.is_popup,
                        "non-popup leaf {id:?} carries a parent_leaf"
                    );
                    assert!(
                        self.is_live_leaf(parent_leaf),
                        "popup {id:?} points at a dead parent leaf"
                    );
                }
                if self.enclosing_stack(id).is_some() {
                    assert!(
                        leaf.title_bar.is_some(),
                        "stack member {id:?} has no title bar"
                    );
                } else {
                    assert!(
                        leaf.title_bar.is_none(),
                        "free leaf {id:?} still owns a title bar"
                    );
                }
            }
            PaneNode::Split(split) => {
                assert_ne!(split.first, split.second, "split {id:?} children alias");
                self.verify_node(split.first, Some(id), depth + 1, visited, leaves);
                self.verify_node(split.second, Some(id), depth + 1, visited, leaves);
            }
            PaneNode::Stack(stack) => {
                assert!(!stack.members.is_empty(), "stack {id:?} has no members");
                assert!(
                    stack.active_index < stack.members.len(),
                    "stack {id:?} active_index out of range"
                );
                for &member in &stack.members {
                    assert!(
                        self.node(member).is_some_and(PaneNode::is_leaf),
                        "stack {id:?} member {member:?} is not a leaf"
                    );
                    self.verify_node(member, Some(id), depth + 1, visited, leaves);
                }
            }
        }
    }
}
