//! Focus: the single-active-pane state machine.
//!
//! [`Workspace::set_active`] is the only place focus changes. It grabs host
//! focus, moves the `active` style class, fires the script-world focus
//! events in blur-then-focus order, updates the application's active-pane
//! pointer, and then verifies the invariant this whole module exists for:
//! exactly one pane per workspace carries the active style. That check is
//! fatal on violation: historically this bug class silently routed
//! keyboard input into the wrong pane, which is far worse than a crash.
//!
//! The focused-leaf identity is owned state here; the CSS class is only a
//! projection of it and is re-derived after reparents.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};
use trellis_bridge::{WorkspaceFocusPayload, WORKSPACE_FOCUS_EVENT};

use crate::geometry::Point;
use crate::host::{HostBackend, PaneView, ViewIdOf};

use super::tree::{Direction, NodeId, PaneNode};
use super::Workspace;

/// Style class marking the focused pane's container (or stack wrapper).
pub const ACTIVE_CLASS: &str = "active";

/// Minimum spacing between mouse-sourced focus changes per leaf; hover
/// noise otherwise floods the event stream while crossing panes.
const MOUSE_FOCUS_DEBOUNCE: Duration = Duration::from_millis(150);

/// Candidates closer than this along the primary axis do not count as
/// being in that direction at all.
const AXIS_EPSILON: f64 = 0.5;

/// Who asked for the focus change. Carried to observers; never changes
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusSource {
    Keyboard,
    Mouse,
    StackNav,
    Split,
    Close,
    ScriptBridge,
}

/// Payload handed to registered focus observers.
pub struct FocusChange<B: HostBackend> {
    pub workspace: u64,
    pub leaf: NodeId,
    pub view: ViewIdOf<B>,
    pub source: FocusSource,
}

pub type FocusCallback<B> = Box<dyn FnMut(&FocusChange<B>)>;

/// Per-workspace focus state.
pub struct FocusController<B: HostBackend> {
    focused: Option<NodeId>,
    /// Set while this workspace is in the background; focus changes are
    /// ignored until the tab manager restores it.
    suspended: bool,
    last_mouse_change: HashMap<NodeId, Duration>,
    callbacks: Vec<FocusCallback<B>>,
}

impl<B: HostBackend> FocusController<B> {
    pub fn new() -> Self {
        Self {
            focused: None,
            suspended: false,
            last_mouse_change: HashMap::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Drops all references to a leaf being torn down.
    pub fn forget(&mut self, leaf: NodeId) {
        if self.focused == Some(leaf) {
            self.focused = None;
        }
        self.last_mouse_change.remove(&leaf);
    }

    /// Records a focused leaf without any host side effects. Used while
    /// the workspace is suspended; visuals and events catch up on restore.
    pub(crate) fn note_focused(&mut self, leaf: NodeId) {
        self.focused = Some(leaf);
    }
}

impl<B: HostBackend> Default for FocusController<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: HostBackend> Workspace<B> {
    /// The focused leaf of this workspace.
    pub fn focused_leaf(&self) -> Option<NodeId> {
        self.focus.focused()
    }

    /// True while this workspace is in the background.
    pub fn focus_suspended(&self) -> bool {
        self.focus.is_suspended()
    }

    /// Registers an observer of focus changes.
    pub fn register_focus_callback(&mut self, callback: impl FnMut(&FocusChange<B>) + 'static) {
        self.focus.callbacks.push(Box::new(callback));
    }

    /// The sole entry point for focus changes.
    ///
    /// Ignores leaves that are not live in this workspace and everything
    /// while the workspace is suspended. Idempotent for the current focus.
    /// Mouse-sourced changes are debounced per leaf.
    pub fn set_active(&mut self, host: &mut B, leaf: NodeId, source: FocusSource) {
        if self.focus.suspended {
            trace!(workspace = self.id, "focus change ignored while suspended");
            return;
        }
        if !self.tree.is_live_leaf(leaf) {
            if self.options.workspace_debug {
                debug!(
                    workspace = self.id,
                    ?source,
                    "focus request for dead pane {leaf:?} ignored"
                );
            }
            return;
        }

        let now = self.clock.now();
        if source == FocusSource::Mouse {
            if let Some(&last) = self.focus.last_mouse_change.get(&leaf) {
                if now.saturating_sub(last) < MOUSE_FOCUS_DEBOUNCE {
                    return;
                }
            }
        }

        let previous = self.focus.focused();
        let styled = self.styled_widget(leaf);
        if previous == Some(leaf) && host.has_css_class(&styled, ACTIVE_CLASS) {
            return;
        }

        let view = self
            .tree
            .leaf(leaf)
            .map(|l| l.view.clone())
            .expect("live leaf has a view");

        host.grab_focus(&view.widget());

        self.clear_active_style(host);
        host.add_css_class(&styled, ACTIVE_CLASS);

        // Blur first, focus second.
        let timestamp = self.clock.now_millis();
        if let Some(prev) = previous.filter(|&p| p != leaf) {
            if let Some(prev_leaf) = self.tree.leaf(prev) {
                let prev_view = prev_leaf.view.clone();
                self.send_focus_event(&prev_view, prev, false, timestamp);
                prev_view.set_active(false);
            }
        }
        self.send_focus_event(&view, leaf, true, timestamp);
        view.set_active(true);

        self.shared.set(Some(view.id()));

        self.focus.focused = Some(leaf);
        if source == FocusSource::Mouse {
            self.focus.last_mouse_change.insert(leaf, now);
        }

        if self.options.workspace_debug {
            debug!(
                workspace = self.id,
                ?source,
                "focus {:?} -> {leaf:?} ({})",
                previous,
                view.id()
            );
        }

        let change = FocusChange {
            workspace: self.id,
            leaf,
            view: view.id(),
            source,
        };
        let mut callbacks = std::mem::take(&mut self.focus.callbacks);
        for callback in &mut callbacks {
            callback(&change);
        }
        self.focus.callbacks = callbacks;

        self.verify_single_active(host);
    }

    /// Focus hand-off after a structural mutation. In a suspended
    /// (background) workspace the identity is recorded quietly and the
    /// full activation sequence runs when the tab comes back.
    pub(crate) fn focus_after_mutation(&mut self, host: &mut B, leaf: NodeId, source: FocusSource) {
        if self.focus.suspended {
            if self.tree.is_live_leaf(leaf) {
                self.focus.note_focused(leaf);
            }
        } else {
            self.set_active(host, leaf, source);
        }
    }

    /// Resolves a view to its leaf and focuses it.
    pub fn set_active_by_view(&mut self, host: &mut B, view: &ViewIdOf<B>, source: FocusSource) {
        if let Some(leaf) = self.tree.leaf_for_view(view) {
            self.set_active(host, leaf, source);
        }
    }

    /// Hover-enter entry point; the host wires its hover controllers here.
    pub fn on_view_focused(&mut self, host: &mut B, view: &ViewIdOf<B>) {
        self.set_active_by_view(host, view, FocusSource::Mouse);
    }

    /// Re-sends the workspace-focus event into a pane's script world
    /// without changing focus; collaborators use this to resync.
    pub fn dispatch_focus_event(&self, leaf: NodeId, active: bool) {
        let Some(view) = self.tree.leaf(leaf).map(|l| l.view.clone()) else {
            return;
        };
        self.send_focus_event(&view, leaf, active, self.clock.now_millis());
    }

    fn send_focus_event(&self, view: &B::View, leaf: NodeId, active: bool, timestamp: u64) {
        let payload = WorkspaceFocusPayload {
            active,
            webview_id: view.id().to_string(),
            pane_id: leaf.display(),
            timestamp,
        };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(err) = view.dispatch_custom_event(WORKSPACE_FOCUS_EVENT, &value) {
                    warn!("workspace-focus dispatch into {} failed: {err:#}", view.id());
                }
            }
            Err(err) => warn!("workspace-focus payload serialization failed: {err}"),
        }
    }

    /// Moves focus toward `direction`: stack navigation first for vertical
    /// moves, then geometric navigation over the pane layout.
    pub fn focus_neighbor(&mut self, host: &mut B, direction: Direction) -> bool {
        if direction.is_vertical() && self.navigate_stack(host, direction) {
            return true;
        }
        self.navigate_geometric(host, direction)
    }

    /// Picks the nearest pane in `direction` by window-absolute geometry.
    /// A stack counts as a single target; entering one lands on the member
    /// appropriate for the approach direction.
    pub fn navigate_geometric(&mut self, host: &mut B, direction: Direction) -> bool {
        let Some(focused) = self.focus.focused() else {
            return false;
        };
        let origin = self.tree.enclosing_stack(focused).unwrap_or(focused);
        let Some(origin_widget) = self
            .tree
            .node(origin)
            .map(|node| node.container_widget().clone())
        else {
            return false;
        };
        let Some(origin_bounds) = host.bounds_in_window(&origin_widget) else {
            return false;
        };
        let origin_center = origin_bounds.center();

        let mut best: Option<(NodeId, f64)> = None;
        for target in self.navigation_units(Some(origin)) {
            let Some(widget) = self
                .tree
                .node(target)
                .map(|node| node.container_widget().clone())
            else {
                continue;
            };
            let Some(bounds) = host.bounds_in_window(&widget) else {
                continue;
            };
            let Some(score) = directional_score(direction, origin_center, bounds.center()) else {
                continue;
            };
            if best.is_none_or(|(_, b)| score < b) {
                best = Some((target, score));
            }
        }

        let chosen = best
            .map(|(target, _)| target)
            .or_else(|| self.structural_neighbor(host, origin, origin_center, direction));
        let Some(target) = chosen else {
            return false;
        };

        self.enter_navigation_target(host, target, direction);
        true
    }

    /// Fallback when no candidate qualifies geometrically: walk up to the
    /// nearest ancestor split along the movement axis under which the
    /// current subtree sits on the opposite side, then pick the closest
    /// unit inside that ancestor's other child.
    fn structural_neighbor(
        &self,
        host: &B,
        origin: NodeId,
        origin_center: Point,
        direction: Direction,
    ) -> Option<NodeId> {
        let mut current = origin;
        loop {
            let parent = self.tree.parent_of(current)?;
            if let Some(split) = self.tree.split(parent) {
                let matches_axis = (split.orientation
                    == trellis_bridge::SplitOrientation::Horizontal)
                    == direction.is_horizontal();
                let opposite_side = match direction {
                    Direction::Right | Direction::Down => split.first == current,
                    Direction::Left | Direction::Up => split.second == current,
                };
                if matches_axis && opposite_side {
                    let other = split.other_child(current)?;
                    let units = self.navigation_units_under(other);

                    let mut best: Option<(NodeId, f64)> = None;
                    for &target in &units {
                        let Some(widget) = self
                            .tree
                            .node(target)
                            .map(|node| node.container_widget().clone())
                        else {
                            continue;
                        };
                        let Some(bounds) = host.bounds_in_window(&widget) else {
                            continue;
                        };
                        let Some(score) =
                            directional_score(direction, origin_center, bounds.center())
                        else {
                            continue;
                        };
                        if best.is_none_or(|(_, b)| score < b) {
                            best = Some((target, score));
                        }
                    }

                    return best
                        .map(|(target, _)| target)
                        .or_else(|| units.first().copied());
                }
            }
            current = parent;
        }
    }

    fn enter_navigation_target(&mut self, host: &mut B, target: NodeId, direction: Direction) {
        match self.tree.node(target) {
            Some(PaneNode::Leaf(_)) => self.set_active(host, target, FocusSource::Keyboard),
            Some(PaneNode::Stack(stack)) => {
                let index = match direction {
                    // Entering from above lands on the first member, from
                    // below on the last; horizontal entry keeps the
                    // stack's own active member.
                    Direction::Down => 0,
                    Direction::Up => stack.members.len().saturating_sub(1),
                    Direction::Left | Direction::Right => stack.active_index,
                };
                self.activate_stack_member(host, target, index, FocusSource::Keyboard);
            }
            _ => {}
        }
    }

    /// Navigation targets: free leaves plus stacks as single units,
    /// excluding `origin`.
    fn navigation_units(&self, origin: Option<NodeId>) -> Vec<NodeId> {
        let mut units = Vec::new();
        for leaf in self.tree.collect_leaves() {
            let unit = self.tree.enclosing_stack(leaf).unwrap_or(leaf);
            if Some(unit) != origin && !units.contains(&unit) {
                units.push(unit);
            }
        }
        units
    }

    fn navigation_units_under(&self, node: NodeId) -> Vec<NodeId> {
        let mut units = Vec::new();
        for leaf in self.tree.leaves_under(node) {
            let unit = self.tree.enclosing_stack(leaf).unwrap_or(leaf);
            if !units.contains(&unit) {
                units.push(unit);
            }
        }
        units
    }

    /// Widget that carries the active style for `leaf`: its container, or
    /// the enclosing stack's wrapper for stack members.
    pub(crate) fn styled_widget(&self, leaf: NodeId) -> B::Widget {
        if let Some(stack_id) = self.tree.enclosing_stack(leaf) {
            if let Some(stack) = self.tree.stack(stack_id) {
                return stack.wrapper.clone();
            }
        }
        self.tree
            .leaf(leaf)
            .map(|l| l.container.clone())
            .expect("styled_widget called for a live leaf")
    }

    fn style_candidates(&self) -> Vec<B::Widget> {
        let mut candidates = Vec::new();
        let mut seen_stacks = Vec::new();
        for leaf in self.tree.collect_leaves() {
            match self.tree.enclosing_stack(leaf) {
                Some(stack_id) => {
                    if !seen_stacks.contains(&stack_id) {
                        seen_stacks.push(stack_id);
                        if let Some(stack) = self.tree.stack(stack_id) {
                            candidates.push(stack.wrapper.clone());
                        }
                    }
                    // Member containers can retain a stale class from
                    // before they were stacked.
                    if let Some(leaf) = self.tree.leaf(leaf) {
                        candidates.push(leaf.container.clone());
                    }
                }
                None => {
                    if let Some(leaf) = self.tree.leaf(leaf) {
                        candidates.push(leaf.container.clone());
                    }
                }
            }
        }
        candidates
    }

    pub(crate) fn clear_active_style(&self, host: &mut B) {
        for widget in self.style_candidates() {
            if host.has_css_class(&widget, ACTIVE_CLASS) {
                host.remove_css_class(&widget, ACTIVE_CLASS);
            }
        }
    }

    /// Restores the active class after deferred layout settles; the move
    /// stripped it from the focused pane's widget.
    pub(crate) fn reapply_active_style(&self, host: &mut B) {
        if self.focus.suspended {
            return;
        }
        let Some(focused) = self.focus.focused() else {
            return;
        };
        if !self.tree.is_live_leaf(focused) {
            return;
        }
        let styled = self.styled_widget(focused);
        if !host.has_css_class(&styled, ACTIVE_CLASS) {
            host.add_css_class(&styled, ACTIVE_CLASS);
        }
    }

    /// Deactivates focus visuals while this workspace goes to the
    /// background. The focused-leaf identity is kept for restoration.
    pub fn suspend_focus(&mut self, host: &mut B) {
        if self.focus.suspended {
            return;
        }
        self.focus.suspended = true;

        let Some(leaf) = self.focus.focused() else {
            return;
        };
        if let Some(view) = self.tree.leaf(leaf).map(|l| l.view.clone()) {
            self.send_focus_event(&view, leaf, false, self.clock.now_millis());
            view.set_active(false);
        }
        if self.tree.is_live_leaf(leaf) {
            let styled = self.styled_widget(leaf);
            if host.has_css_class(&styled, ACTIVE_CLASS) {
                host.remove_css_class(&styled, ACTIVE_CLASS);
            }
        }
    }

    /// Brings focus back after a tab switch, re-running the full
    /// activation sequence for the remembered leaf.
    pub fn restore_focus(&mut self, host: &mut B, source: FocusSource) {
        self.focus.suspended = false;
        let Some(leaf) = self.focus.focused() else {
            return;
        };
        self.set_active(host, leaf, source);
    }

    /// O(leaves) check of the single-active invariant. A violation means
    /// input is being routed to the wrong pane; it is unrecoverable by
    /// design.
    pub(crate) fn verify_single_active(&self, host: &B) {
        if self.focus.suspended {
            return;
        }
        let Some(focused) = self.focus.focused() else {
            return;
        };
        let styled = self.styled_widget(focused);

        let mut count = 0;
        for widget in self.style_candidates() {
            if host.has_css_class(&widget, ACTIVE_CLASS) {
                assert!(
                    widget == styled,
                    "active style found on a pane that is not the focused one"
                );
                count += 1;
            }
        }
        assert!(
            count == 1,
            "exactly one pane must carry the active style, found {count}"
        );
    }
}

/// Scores a candidate center against the origin center for a movement
/// direction; primary-axis distance dominates. `None` when the candidate
/// is not in that direction.
fn directional_score(direction: Direction, from: Point, to: Point) -> Option<f64> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    match direction {
        Direction::Right if dx > AXIS_EPSILON => Some(dx.abs() * 1000.0 + dy.abs()),
        Direction::Left if dx < -AXIS_EPSILON => Some(dx.abs() * 1000.0 + dy.abs()),
        Direction::Down if dy > AXIS_EPSILON => Some(dy.abs() * 1000.0 + dx.abs()),
        Direction::Up if dy < -AXIS_EPSILON => Some(dy.abs() * 1000.0 + dx.abs()),
        _ => None,
    }
}
