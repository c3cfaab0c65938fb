//! Tabbed stacks: a column of panes with one member visible and the rest
//! collapsed to title bars.
//!
//! A stack contributes exactly two widgets per member to its inner box
//! (title bar first, container second) and keeps the visibility rule that
//! the active member shows its container and hides its title bar while
//! every other member does the opposite. The stack exists only while it
//! has at least two members; dropping to one collapses it back to a plain
//! pane in the same slot.

use tracing::trace;

use crate::host::{HostBackend, PaneView};

use super::focus::FocusSource;
use super::reparent::WidgetBinder;
use super::tree::{Direction, Leaf, NodeId};
use super::{LayoutError, Workspace};

impl<B: HostBackend> Workspace<B> {
    /// Stacks a new pane with `target`: converts a free leaf into a
    /// two-member stack, or inserts right after `target` when it already
    /// is a stack member. The new member becomes active.
    pub fn stack(&mut self, host: &mut B, target: NodeId) -> Result<NodeId, LayoutError> {
        if !self.tree.is_live_leaf(target) {
            return Err(LayoutError::InvalidTarget);
        }

        let view = host.create_view().map_err(LayoutError::ViewFactory)?;
        view.show();
        let new_leaf = self.tree.insert_leaf(Leaf::new(view));

        if let Some(stack_id) = self.tree.enclosing_stack(target) {
            let index = self
                .tree
                .stack(stack_id)
                .and_then(|stack| stack.member_index(target))
                .expect("target is a member of its enclosing stack");
            self.insert_stack_member(host, stack_id, new_leaf, index + 1);
            WidgetBinder::schedule_post_reparent(&mut self.queue, vec![new_leaf]);
            self.activate_stack_member(host, stack_id, index + 1, FocusSource::Split);
            return Ok(new_leaf);
        }

        // Convert the free leaf into a stack of one, then grow it.
        let old_slot = WidgetBinder::slot_for(&self.tree, self.content.as_ref(), target);

        let wrapper = host.create_box();
        host.set_hexpand(&wrapper, true);
        host.set_vexpand(&wrapper, true);
        let inner_box = host.create_box();
        host.set_hexpand(&inner_box, true);
        host.set_vexpand(&inner_box, true);
        host.box_append(&wrapper, &inner_box);

        // Structure first.
        let stack_id = self
            .tree
            .wrap_in_stack(target, wrapper.clone(), inner_box.clone());

        if let Some(slot) = &old_slot {
            WidgetBinder::detach(host, &mut self.tree, target, slot);
        }

        let title_bar = host.create_title_bar();
        let title = self
            .tree
            .leaf(target)
            .map(member_title::<B>)
            .unwrap_or_default();
        host.set_title_bar_text(&title_bar, &title);
        let target_container = self
            .tree
            .leaf_mut(target)
            .map(|leaf| {
                leaf.title_bar = Some(title_bar.clone());
                leaf.container.clone()
            })
            .expect("stack target is a live leaf");
        host.box_append(&inner_box, &title_bar);
        host.box_append(&inner_box, &target_container);

        if let Some(slot) = &old_slot {
            WidgetBinder::attach(host, &wrapper, slot);
        }

        // Hold the existing member visible through the transition so the
        // swap to the new member happens in one paint.
        self.refresh_stack_visibility(host, stack_id);

        self.insert_stack_member(host, stack_id, new_leaf, 1);
        WidgetBinder::schedule_post_reparent(&mut self.queue, vec![stack_id]);
        self.activate_stack_member(host, stack_id, 1, FocusSource::Split);

        trace!(workspace = self.id, "stacked {target:?} into {stack_id:?}");
        Ok(new_leaf)
    }

    /// Inserts an existing free leaf into a stack at `index`, wiring its
    /// title bar and the two-widgets-per-member box layout.
    pub(crate) fn insert_stack_member(
        &mut self,
        host: &mut B,
        stack_id: NodeId,
        member: NodeId,
        index: usize,
    ) {
        self.tree.stack_insert_member(stack_id, member, index);

        let Some(stack) = self.tree.stack(stack_id) else {
            return;
        };
        let inner_box = stack.inner_box.clone();
        let index = stack
            .member_index(member)
            .expect("member was just inserted");
        // Anchor after the previous member's container, or at the front.
        let sibling = index
            .checked_sub(1)
            .and_then(|prev| stack.members.get(prev).copied())
            .and_then(|prev| self.tree.leaf(prev))
            .map(|leaf| leaf.container.clone());

        let title_bar = host.create_title_bar();
        let title = self
            .tree
            .leaf(member)
            .map(member_title::<B>)
            .unwrap_or_default();
        host.set_title_bar_text(&title_bar, &title);

        let container = self
            .tree
            .leaf_mut(member)
            .map(|leaf| {
                leaf.title_bar = Some(title_bar.clone());
                leaf.container.clone()
            })
            .expect("stack member is a live leaf");

        host.box_insert_after(&inner_box, &title_bar, sibling.as_ref());
        host.box_insert_after(&inner_box, &container, Some(&title_bar));
        host.set_hexpand(&container, true);
        host.set_vexpand(&container, true);
    }

    /// Makes the member at `index` the visible one and focuses it.
    pub(crate) fn activate_stack_member(
        &mut self,
        host: &mut B,
        stack_id: NodeId,
        index: usize,
        source: FocusSource,
    ) {
        let Some(stack) = self.tree.stack(stack_id) else {
            return;
        };
        let index = index.min(stack.members.len().saturating_sub(1));
        let outgoing = stack.active_member();
        let incoming = stack.members.get(index).copied();

        // Refresh the outgoing member's label before it collapses so the
        // title bar shows where the page ended up.
        if let Some(outgoing) = outgoing.filter(|&member| Some(member) != incoming) {
            self.refresh_member_title(host, outgoing);
        }

        if let Some(stack) = self.tree.stack_mut(stack_id) {
            stack.active_index = index;
        }
        self.refresh_stack_visibility(host, stack_id);

        if let Some(member) = self
            .tree
            .stack(stack_id)
            .and_then(|stack| stack.active_member())
        {
            self.focus_after_mutation(host, member, source);
        }
    }

    /// Moves within the focused leaf's stack with wraparound. Returns
    /// false when the focused leaf is not stacked, the stack has a single
    /// member, or the direction is horizontal; the caller then falls back
    /// to geometric navigation.
    pub fn navigate_stack(&mut self, host: &mut B, direction: Direction) -> bool {
        if !direction.is_vertical() {
            return false;
        }
        let Some(focused) = self.focused_leaf() else {
            return false;
        };
        let Some(stack_id) = self.tree.enclosing_stack(focused) else {
            return false;
        };
        let Some(stack) = self.tree.stack(stack_id) else {
            return false;
        };
        let len = stack.members.len();
        if len < 2 {
            return false;
        }
        let Some(index) = stack.member_index(focused) else {
            return false;
        };

        let next = match direction {
            Direction::Up => (index + len - 1) % len,
            Direction::Down => (index + 1) % len,
            _ => unreachable!(),
        };
        self.activate_stack_member(host, stack_id, next, FocusSource::StackNav);
        true
    }

    /// Title-bar click: activate and focus the clicked member.
    pub fn on_title_bar_clicked(&mut self, host: &mut B, widget: &B::Widget) {
        let hit = self.tree.collect_leaves().into_iter().find_map(|leaf_id| {
            let leaf = self.tree.leaf(leaf_id)?;
            if leaf.title_bar.as_ref() == Some(widget) {
                let stack_id = self.tree.enclosing_stack(leaf_id)?;
                let index = self.tree.stack(stack_id)?.member_index(leaf_id)?;
                Some((stack_id, index))
            } else {
                None
            }
        });

        if let Some((stack_id, index)) = hit {
            self.activate_stack_member(host, stack_id, index, FocusSource::Mouse);
        }
    }

    /// Applies the visibility rule: exactly one member's container is
    /// visible with its title bar hidden; every other member shows only
    /// its title bar, refreshed with the latest page title.
    pub(crate) fn refresh_stack_visibility(&mut self, host: &mut B, stack_id: NodeId) {
        let Some(stack) = self.tree.stack(stack_id) else {
            return;
        };
        let members: Vec<(usize, NodeId)> = stack.members.iter().copied().enumerate().collect();
        let active_index = stack.active_index;

        for (index, member) in members {
            let Some(leaf) = self.tree.leaf(member) else {
                continue;
            };
            let container = leaf.container.clone();
            let title_bar = leaf.title_bar.clone();
            let is_active = index == active_index;

            host.set_visible(&container, is_active);
            if let Some(title_bar) = title_bar {
                host.set_visible(&title_bar, !is_active);
            }
            if !is_active {
                self.refresh_member_title(host, member);
            }
        }
    }

    /// Pushes the latest page titles into every member's title bar.
    pub(crate) fn refresh_stack_titles(&mut self, host: &mut B, stack_id: NodeId) {
        let members: Vec<NodeId> = self
            .tree
            .stack(stack_id)
            .map(|stack| stack.members.clone())
            .unwrap_or_default();
        for member in members {
            self.refresh_member_title(host, member);
        }
    }

    fn refresh_member_title(&mut self, host: &mut B, member: NodeId) {
        let Some(leaf) = self.tree.leaf(member) else {
            return;
        };
        let Some(title_bar) = leaf.title_bar.clone() else {
            return;
        };
        let title = member_title::<B>(leaf);
        host.set_title_bar_text(&title_bar, &title);
    }

    /// Close path for stack members: shrink, collapse, or delegate to
    /// sibling promotion when the stack empties.
    pub(crate) fn remove_stack_member(&mut self, host: &mut B, stack_id: NodeId, member: NodeId) {
        let Some(stack) = self.tree.stack(stack_id) else {
            return;
        };
        let inner_box = stack.inner_box.clone();

        // Pull the member's two widgets out of the box.
        if let Some(leaf) = self.tree.leaf(member) {
            if let Some(title_bar) = leaf.title_bar.clone() {
                host.box_remove(&inner_box, &title_bar);
            }
            host.box_remove(&inner_box, &leaf.container.clone());
        }

        let remaining = self.tree.stack_remove_member(stack_id, member);

        match remaining {
            0 => {
                // Nothing left; the stack node itself goes through the
                // sibling-promotion path.
                match self.tree.parent_of(stack_id) {
                    Some(parent) => self.remove_from_split(host, stack_id, parent),
                    None => {}
                }
                self.queue.cancel_guarded(stack_id);
                self.tree.discard_node(stack_id);
            }
            1 => self.collapse_stack(host, stack_id),
            _ => {
                self.refresh_stack_visibility(host, stack_id);
                if let Some(active) = self
                    .tree
                    .stack(stack_id)
                    .and_then(|stack| stack.active_member())
                {
                    self.focus_after_mutation(host, active, FocusSource::Close);
                }
            }
        }

        self.teardown_leaf(host, member);
    }

    /// Unwraps a single-member stack back into a plain pane occupying the
    /// stack's old slot.
    fn collapse_stack(&mut self, host: &mut B, stack_id: NodeId) {
        let Some(stack) = self.tree.stack(stack_id) else {
            return;
        };
        let Some(survivor) = stack.members.first().copied() else {
            return;
        };
        let inner_box = stack.inner_box.clone();

        let slot = WidgetBinder::slot_for(&self.tree, self.content.as_ref(), stack_id);

        // Strip the member out of the stack's box and drop its title bar.
        WidgetBinder::prepare_move(host, &mut self.tree, survivor);
        let container = self
            .tree
            .leaf(survivor)
            .map(|leaf| leaf.container.clone())
            .expect("collapsing stack holds a live leaf");
        if let Some(title_bar) = self
            .tree
            .leaf_mut(survivor)
            .and_then(|leaf| leaf.title_bar.take())
        {
            host.box_remove(&inner_box, &title_bar);
        }
        host.box_remove(&inner_box, &container);

        // Structure: the survivor takes the stack's place.
        self.tree.promote(stack_id, survivor);
        self.queue.cancel_guarded(stack_id);
        self.tree.discard_node(stack_id);

        // Attaching into the slot replaces the now-orphaned wrapper; the
        // host auto-unparents it.
        if let Some(slot) = &slot {
            WidgetBinder::attach(host, &container, slot);
        }
        host.set_visible(&container, true);

        WidgetBinder::schedule_post_reparent(&mut self.queue, vec![survivor]);
        self.focus_after_mutation(host, survivor, FocusSource::Close);

        trace!(workspace = self.id, "stack {stack_id:?} collapsed into {survivor:?}");
    }
}

/// Label shown on a collapsed member's title bar.
fn member_title<B: HostBackend>(leaf: &Leaf<B>) -> String {
    leaf.view
        .title()
        .filter(|title| !title.trim().is_empty())
        .or_else(|| leaf.view.current_url())
        .unwrap_or_else(|| String::from("Untitled"))
}
