//! The workspace layout engine.
//!
//! A workspace is one pane tree plus its focus state, popup router, and
//! deferred-work queue. The [`tabs::TabManager`] multiplexes several
//! workspaces over one content container; everything here runs on the
//! single UI context, with the embedder driving [`Workspace::on_idle`] and
//! [`Workspace::on_frame_tick`] from the host's idle and frame-tick hooks.
//!
//! Operations follow a strict order: tree structure is updated first, the
//! widget host is called next, and re-show / re-layout / controller
//! re-attachment happen from the deferred queue once allocations settle.
//! The tree is therefore always consistent whenever control returns to the
//! event loop.

pub mod defer;
pub mod focus;
pub mod popup;
pub mod reparent;
pub mod stack;
pub mod tabs;
pub mod tree;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace, warn};
use trellis_bridge::{PaneModeEvent, PaneModePayload, PaneTreeSnapshot, PANE_MODE_EVENT};
use trellis_config::{Config, TabBarPosition};

use crate::clock::Clock;
use crate::host::{HostBackend, PaneView, ViewIdOf};

use self::defer::{DeferredKind, WorkQueue};
use self::focus::{FocusController, FocusSource};
use self::popup::PopupRouter;
use self::reparent::WidgetBinder;
use self::tree::{Direction, Leaf, NodeId, PaneTree};

/// Flattened engine options, built once from the config and injected as
/// `Rc` into every workspace so tree code never reads global state.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// When false, script-initiated windows are left to the host.
    pub open_popups_in_new_pane: bool,
    pub popup_placement: Direction,
    pub smart_detection: bool,
    /// Split the originating pane (true) or the focused pane (false).
    pub follow_pane_context: bool,
    pub oauth_auto_close: bool,
    pub tab_bar_position: TabBarPosition,
    /// Verbose focus-event logging.
    pub workspace_debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Options {
    pub fn from_config(config: &Config) -> Self {
        let popups = &config.workspace.popups;
        Self {
            open_popups_in_new_pane: popups.open_in_new_pane,
            popup_placement: Direction::from_placement(popups.placement),
            smart_detection: popups.enable_smart_detection,
            follow_pane_context: popups.follow_pane_context,
            oauth_auto_close: popups.oauth_auto_close,
            tab_bar_position: config.workspace.tab_bar_position,
            workspace_debug: config.debug.enable_workspace_debug,
        }
    }
}

/// Errors of the synchronous, structural kind. Everything else (host
/// reparent trouble, controller refusals, script bridge failures) is
/// absorbed and logged, with the tree remaining the source of truth.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// Split, close, or stack was called on something that is not a live
    /// leaf. The tree was not touched.
    #[error("target pane is not a live leaf")]
    InvalidTarget,
    #[error("view factory failed")]
    ViewFactory(#[source] anyhow::Error),
    /// The sole remaining tab cannot be closed.
    #[error("the last tab cannot be closed")]
    LastTab,
}

/// Result of closing a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The pane was removed and focus handed to its surviving neighbor.
    Closed,
    /// The target was the last countable pane of this workspace; nothing
    /// was mutated. The caller closes the tab, or exits if this was the
    /// last one.
    LastLeaf,
}

/// The application's active-pane pointer, shared between the tab manager,
/// workspaces, and the embedder. One per application, injected everywhere.
pub struct ActivePane<B: HostBackend> {
    inner: Rc<RefCell<Option<ViewIdOf<B>>>>,
}

impl<B: HostBackend> Clone for ActivePane<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: HostBackend> Default for ActivePane<B> {
    fn default() -> Self {
        Self {
            inner: Rc::new(RefCell::new(None)),
        }
    }
}

impl<B: HostBackend> ActivePane<B> {
    pub fn get(&self) -> Option<ViewIdOf<B>> {
        self.inner.borrow().clone()
    }

    pub fn set(&self, view: Option<ViewIdOf<B>>) {
        *self.inner.borrow_mut() = view;
    }
}

/// One pane tree with its focus machine, router, and work queue.
pub struct Workspace<B: HostBackend> {
    pub(crate) id: u64,
    pub(crate) tree: PaneTree<B>,
    pub(crate) focus: FocusController<B>,
    pub(crate) router: PopupRouter<B>,
    pub(crate) queue: WorkQueue<B>,
    pub(crate) options: Rc<Options>,
    pub(crate) clock: Clock,
    pub(crate) shared: ActivePane<B>,
    /// Content container this workspace's root is attached to, when it is
    /// the visible workspace.
    pub(crate) content: Option<B::Widget>,
}

impl<B: HostBackend> Workspace<B> {
    /// Builds a workspace with one initial pane loading `url`.
    pub fn bootstrap(
        host: &mut B,
        id: u64,
        options: Rc<Options>,
        clock: Clock,
        shared: ActivePane<B>,
        url: Option<&str>,
    ) -> Result<Self, LayoutError> {
        let view = host.create_view().map_err(LayoutError::ViewFactory)?;
        view.load_url(url.unwrap_or("about:blank"));
        view.show();

        let mut workspace = Self {
            id,
            tree: PaneTree::new(),
            focus: FocusController::new(),
            router: PopupRouter::new(),
            queue: WorkQueue::default(),
            options,
            clock,
            shared,
            content: None,
        };

        let leaf = workspace.tree.insert_leaf(Leaf::new(view));
        workspace.tree.set_root(Some(leaf));
        let container = workspace
            .tree
            .leaf(leaf)
            .map(|l| l.container.clone())
            .expect("bootstrap leaf exists");
        host.set_hexpand(&container, true);
        host.set_vexpand(&container, true);
        WidgetBinder::schedule_post_reparent(&mut workspace.queue, vec![leaf]);
        workspace.set_active(host, leaf, FocusSource::Split);

        Ok(workspace)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tree(&self) -> &PaneTree<B> {
        &self.tree
    }

    pub fn options(&self) -> &Rc<Options> {
        &self.options
    }

    /// The current root's container widget. Always re-query this before
    /// attaching; splits change the root.
    pub fn root_widget(&self) -> Option<B::Widget> {
        let root = self.tree.root()?;
        self.tree
            .node(root)
            .map(|node| node.container_widget().clone())
    }

    /// Attaches this workspace's root to the shared content container.
    pub fn attach(&mut self, host: &mut B, content: &B::Widget) {
        self.content = Some(content.clone());
        if let Some(root) = self.root_widget() {
            host.container_set_child(content, Some(&root));
            host.set_visible(&root, true);
        }
    }

    /// Detaches the current root from the content container.
    pub fn detach(&mut self, host: &mut B) {
        if let Some(content) = self.content.take() {
            host.container_set_child(&content, None);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.content.is_some()
    }

    /// Splits `target` in `direction`. The new pane wraps `existing_view`
    /// when the router supplies one, otherwise a fresh independent view.
    /// If the target is a stack member the split wraps the whole stack.
    /// Focus transfers to the new pane.
    pub fn split(
        &mut self,
        host: &mut B,
        target: NodeId,
        direction: Direction,
        existing_view: Option<B::View>,
    ) -> Result<NodeId, LayoutError> {
        if !self.tree.is_live_leaf(target) {
            return Err(LayoutError::InvalidTarget);
        }

        let split_target = self.tree.enclosing_stack(target).unwrap_or(target);

        let view = match existing_view {
            Some(view) => view,
            None => host.create_view().map_err(LayoutError::ViewFactory)?,
        };
        view.show();

        let new_leaf = self.tree.insert_leaf(Leaf::new(view));
        let new_widget = self
            .tree
            .leaf(new_leaf)
            .map(|l| l.container.clone())
            .expect("just inserted");

        let old_slot = WidgetBinder::slot_for(&self.tree, self.content.as_ref(), split_target);
        let orientation = direction.orientation();
        let paned = host.create_paned(orientation.into());
        host.set_hexpand(&paned, true);
        host.set_vexpand(&paned, true);

        // Structure first; host calls follow.
        let split_id = self.tree.wrap_in_split(
            split_target,
            new_leaf,
            orientation,
            direction.existing_first(),
            paned.clone(),
        );

        if let Some(slot) = &old_slot {
            WidgetBinder::detach(host, &mut self.tree, split_target, slot);
            WidgetBinder::attach(host, &paned, slot);
        }

        let target_widget = self
            .tree
            .node(split_target)
            .map(|node| node.container_widget().clone())
            .expect("split target exists");
        host.set_hexpand(&new_widget, true);
        host.set_vexpand(&new_widget, true);

        let (first, second) = if direction.existing_first() {
            (&target_widget, &new_widget)
        } else {
            (&new_widget, &target_widget)
        };
        host.paned_set_start_child(&paned, Some(first));
        host.paned_set_end_child(&paned, Some(second));

        WidgetBinder::schedule_post_reparent(
            &mut self.queue,
            vec![split_target, new_leaf, split_id],
        );
        WidgetBinder::schedule_divider_sync(&mut self.queue, split_id);

        if self.options.workspace_debug {
            debug!(
                workspace = self.id,
                ?direction,
                "split {split_target:?} -> split node {split_id:?}, new leaf {new_leaf:?}"
            );
        }

        self.focus_after_mutation(host, new_leaf, FocusSource::Split);
        Ok(new_leaf)
    }

    /// Closes a pane, promoting its sibling or shrinking its stack. Focus
    /// moves to the nearest survivor on the next idle pass.
    pub fn close(&mut self, host: &mut B, target: NodeId) -> Result<CloseOutcome, LayoutError> {
        if !self.tree.is_live_leaf(target) {
            return Err(LayoutError::InvalidTarget);
        }

        let is_popup = self.tree.leaf(target).is_some_and(|leaf| leaf.is_popup);
        if !is_popup && self.tree.non_popup_leaf_count() <= 1 {
            return Ok(CloseOutcome::LastLeaf);
        }

        if let Some(stack_id) = self.tree.enclosing_stack(target) {
            self.remove_stack_member(host, stack_id, target);
            return Ok(CloseOutcome::Closed);
        }

        match self.tree.parent_of(target) {
            None => {
                // A popup left alone at the root; tear it down and leave
                // the workspace empty for the caller to retire.
                self.teardown_leaf(host, target);
                Ok(CloseOutcome::Closed)
            }
            Some(parent) => {
                self.remove_from_split(host, target, parent);
                self.teardown_leaf(host, target);
                Ok(CloseOutcome::Closed)
            }
        }
    }

    /// Detaches `target` from the split `parent`, promotes the sibling
    /// into the split's slot, cascades degenerate promotions upward, and
    /// defers focus to the survivor. The caller tears `target` down.
    pub(crate) fn remove_from_split(&mut self, host: &mut B, target: NodeId, parent: NodeId) {
        let Some(split) = self.tree.split(parent) else {
            warn!("close target {target:?} parented by a non-split; dropping the op");
            return;
        };
        let Some(sibling) = split.other_child(target) else {
            warn!("close target {target:?} not among its parent's children");
            return;
        };
        let paned = split.divider.clone();
        let grandparent = split.parent;
        let target_is_first = split.first == target;

        let parent_slot = WidgetBinder::slot_for(&self.tree, self.content.as_ref(), parent);

        // Clear any focus-child pointer the grandparent still holds into
        // the subtree being dismantled.
        let focus_parent = match grandparent {
            Some(gp) => self.tree.node(gp).map(|node| node.container_widget().clone()),
            None => self.content.clone(),
        };
        if let Some(widget) = focus_parent {
            host.set_focus_child(&widget, None);
        }

        // Detach both children from the paned.
        let target_slot = if target_is_first {
            reparent::AttachSlot::PanedStart(paned.clone())
        } else {
            reparent::AttachSlot::PanedEnd(paned.clone())
        };
        let sibling_slot = if target_is_first {
            reparent::AttachSlot::PanedEnd(paned.clone())
        } else {
            reparent::AttachSlot::PanedStart(paned.clone())
        };
        WidgetBinder::detach(host, &mut self.tree, target, &target_slot);
        WidgetBinder::detach(host, &mut self.tree, sibling, &sibling_slot);

        // Structure: the sibling takes the split's place.
        self.tree.promote(parent, sibling);
        self.queue.cancel_guarded(parent);
        self.tree.discard_node(parent);

        if let Some(slot) = &parent_slot {
            if let Some(widget) = self
                .tree
                .node(sibling)
                .map(|node| node.container_widget().clone())
            {
                WidgetBinder::attach(host, &widget, slot);
            }
        }

        self.cascade_promote(host, sibling);

        WidgetBinder::schedule_post_reparent(&mut self.queue, vec![sibling]);
        if let Some(focus_target) = self.tree.leftmost_leaf(sibling) {
            self.queue.push(
                DeferredKind::FocusLeaf {
                    leaf: focus_target,
                    source: FocusSource::Close,
                },
                vec![focus_target],
            );
        }
    }

    /// Collapses any split left with a dangling child back into its
    /// surviving child, walking upward until the tree is sound again.
    /// Splits are strictly binary, so this loop runs zero iterations
    /// unless a close was interrupted halfway.
    fn cascade_promote(&mut self, host: &mut B, from: NodeId) {
        let mut current = from;
        while let Some(parent) = self.tree.parent_of(current) {
            let Some(split) = self.tree.split(parent) else {
                break;
            };
            let first_alive = self.tree.contains(split.first);
            let second_alive = self.tree.contains(split.second);
            if first_alive && second_alive {
                break;
            }

            let survivor = if first_alive { split.first } else { split.second };
            let slot = WidgetBinder::slot_for(&self.tree, self.content.as_ref(), parent);
            warn!("collapsing degenerate split {parent:?} into {survivor:?}");

            self.tree.promote(parent, survivor);
            self.queue.cancel_guarded(parent);
            self.tree.discard_node(parent);

            if let Some(slot) = &slot {
                if let Some(widget) = self
                    .tree
                    .node(survivor)
                    .map(|node| node.container_widget().clone())
                {
                    WidgetBinder::attach(host, &widget, slot);
                }
            }
            current = survivor;
        }
    }

    /// Final teardown of a leaf: cancels its deferred work, releases its
    /// popup bookkeeping, and drops the view handle.
    pub(crate) fn teardown_leaf(&mut self, host: &mut B, leaf_id: NodeId) {
        let generation = self.tree.next_cleanup_generation();
        let cancelled = self.queue.cancel_guarded(leaf_id);
        self.focus.forget(leaf_id);

        let Some(leaf) = self.tree.release_leaf(leaf_id) else {
            return;
        };

        if host.has_css_class(&leaf.container, focus::ACTIVE_CLASS) {
            host.remove_css_class(&leaf.container, focus::ACTIVE_CLASS);
        }

        let view_id = leaf.view.id();
        self.router.release_view(&view_id, leaf.request_id.as_deref());

        // Pop this popup out of its opener's guard list.
        if let Some(parent_leaf) = leaf.parent_leaf {
            if let Some(parent) = self.tree.leaf_mut(parent_leaf) {
                parent.remove_popup_child(&view_id);
            }
        }

        // Orphan any popups this leaf had opened; their guard entries die
        // with this leaf's list.
        let orphans: Vec<NodeId> = self
            .tree
            .collect_leaves()
            .into_iter()
            .filter(|&id| {
                self.tree
                    .leaf(id)
                    .is_some_and(|l| l.parent_leaf == Some(leaf_id))
            })
            .collect();
        for orphan in orphans {
            if let Some(l) = self.tree.leaf_mut(orphan) {
                l.parent_leaf = None;
            }
        }

        leaf.view.set_active(false);
        trace!(
            workspace = self.id,
            generation,
            cancelled,
            "pane {leaf_id:?} torn down ({})",
            view_id
        );
        // The view handle drops here; the host reclaims the actual widget.
    }

    /// Tears the whole workspace down: every pane is released, all
    /// deferred work is dropped, and the root leaves the content area.
    pub fn retire(&mut self, host: &mut B) {
        self.detach(host);
        for leaf in self.tree.collect_leaves() {
            self.teardown_leaf(host, leaf);
        }
        self.tree.clear();
        self.queue = WorkQueue::default();
        trace!(workspace = self.id, "workspace retired");
    }

    /// Executes queued deferred work whose guards are still alive. Driven
    /// from the host's idle callback.
    pub fn on_idle(&mut self, host: &mut B) {
        let now = self.clock.now();
        let mut items = self.queue.take_all();

        while let Some(item) = items.pop_front() {
            if item.guards.iter().any(|&guard| !self.guard_alive(guard)) {
                trace!("deferred item {} dropped; guard died", item.id);
                continue;
            }

            match &item.kind {
                DeferredKind::PostReparent { nodes } => {
                    let nodes = nodes.clone();
                    if !self.run_post_reparent(host, &nodes) {
                        self.queue.requeue(item);
                    }
                }
                DeferredKind::DividerSync { .. } => {
                    // Frame-tick work; keep it queued.
                    self.queue.requeue(item);
                }
                DeferredKind::FocusLeaf { leaf, source } => {
                    let (leaf, source) = (*leaf, *source);
                    self.focus_after_mutation(host, leaf, source);
                }
                DeferredKind::ClosePopup { leaf, due } => {
                    let (leaf, due) = (*leaf, *due);
                    if now >= due {
                        self.finish_popup_close(host, leaf);
                    } else {
                        self.queue.requeue(item);
                    }
                }
                DeferredKind::DetectionFallback { view, due } => {
                    if now >= *due {
                        let view = view.clone();
                        self.finish_detection_fallback(host, &view);
                    } else {
                        self.queue.requeue(item);
                    }
                }
            }
        }
    }

    /// Polls divider positions. Driven from the host's frame-tick callback.
    pub fn on_frame_tick(&mut self, host: &mut B) {
        let mut items = self.queue.take_all();

        while let Some(item) = items.pop_front() {
            match &item.kind {
                DeferredKind::DividerSync { split, frames_left } => {
                    let (split, frames_left) = (*split, *frames_left);
                    if item.guards.iter().any(|&guard| !self.guard_alive(guard)) {
                        continue;
                    }
                    let frames_left = frames_left.saturating_sub(1);
                    if !WidgetBinder::sync_divider(host, &mut self.tree, split, frames_left) {
                        self.queue.push(
                            DeferredKind::DividerSync { split, frames_left },
                            item.guards,
                        );
                    }
                }
                _ => self.queue.requeue(item),
            }
        }
    }

    /// Map-event fallback for divider centering: if `widget` is the paned
    /// of a split that never got centered, center it now.
    pub fn on_widget_mapped(&mut self, host: &mut B, widget: &B::Widget) {
        let split_id = self.tree.collect_leaves().into_iter().find_map(|leaf| {
            let mut current = self.tree.parent_of(leaf);
            while let Some(id) = current {
                if let Some(split) = self.tree.split(id) {
                    if &split.divider == widget && !split.divider_synced {
                        return Some(id);
                    }
                }
                current = self.tree.parent_of(id);
            }
            None
        });

        if let Some(split_id) = split_id {
            WidgetBinder::sync_divider(host, &mut self.tree, split_id, 1);
        }
    }

    /// Earliest pending deadline, so the embedder can arm a wake-up.
    pub fn next_deadline(&self) -> Option<std::time::Duration> {
        self.queue.next_deadline()
    }

    pub fn has_pending_work(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Announces a pane-mode transition to the focused page.
    pub fn announce_pane_mode(&self, event: PaneModeEvent, detail: &str) {
        let Some(leaf) = self.focus.focused() else {
            return;
        };
        let Some(view) = self.tree.leaf(leaf).map(|l| l.view.clone()) else {
            return;
        };
        let payload = PaneModePayload {
            event,
            detail: detail.to_string(),
        };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(err) = view.dispatch_custom_event(PANE_MODE_EVENT, &value) {
                    warn!("pane-mode event dispatch failed: {err:#}");
                }
            }
            Err(err) => warn!("pane-mode payload serialization failed: {err}"),
        }
    }

    /// Refreshes stack title bars after a page title change. Tab titles
    /// are owned by the tab manager and deliberately unaffected.
    pub fn on_title_changed(&mut self, host: &mut B, view: &ViewIdOf<B>) {
        let Some(leaf) = self.tree.leaf_for_view(view) else {
            return;
        };
        if let Some(stack_id) = self.tree.enclosing_stack(leaf) {
            self.refresh_stack_titles(host, stack_id);
        }
    }

    /// Serializable dump of this workspace's tree.
    pub fn snapshot(&self) -> PaneTreeSnapshot {
        self.tree.snapshot(self.focus.focused())
    }

    fn guard_alive(&self, guard: NodeId) -> bool {
        match self.tree.node(guard) {
            Some(node) => node.as_leaf().is_none_or(|leaf| leaf.widget_valid),
            None => false,
        }
    }

    /// Deferred show / re-layout / controller pass. Returns false while
    /// any widget that is about to be shown still has no allocation.
    fn run_post_reparent(&mut self, host: &mut B, nodes: &[NodeId]) -> bool {
        // Inactive stack members stay hidden; their visibility belongs to
        // the stack's visibility pass, and they never allocate.
        let shown = |tree: &PaneTree<B>, node: NodeId| match tree.enclosing_stack(node) {
            Some(stack_id) => tree.stack(stack_id).and_then(|s| s.active_member()) == Some(node),
            None => true,
        };

        for &node in nodes {
            if let Some(n) = self.tree.node(node) {
                if shown(&self.tree, node) && host.allocation(n.container_widget()).is_empty() {
                    return false;
                }
            }
        }

        for &node in nodes {
            let Some(n) = self.tree.node(node) else {
                continue;
            };
            let widget = n.container_widget().clone();
            host.set_visible(&widget, shown(&self.tree, node));
            host.queue_resize(&widget);
            host.queue_draw(&widget);

            for leaf in self.tree.leaves_under(node) {
                WidgetBinder::reattach_controllers(host, &mut self.tree, leaf);
            }
        }

        // Reparenting strips the active class; restore the projection.
        self.reapply_active_style(host);
        true
    }

    /// Runs every internal consistency check. Violations panic; the fuzz
    /// tests call this after every operation.
    pub fn verify_invariants(&self, host: &B) {
        self.tree.verify_invariants();

        if let Some(focused) = self.focus.focused() {
            assert!(
                self.tree.is_live_leaf(focused),
                "focused node {focused:?} is not a live leaf"
            );
        }

        let focus_pending = self
            .queue
            .iter()
            .any(|item| matches!(item.kind, DeferredKind::FocusLeaf { .. }));
        if !self.tree.is_empty() && !focus_pending {
            assert!(
                self.focus.focused().is_some(),
                "workspace {} has panes but no focused leaf",
                self.id
            );
        }

        // Style and visibility projections are only meaningful once
        // deferred layout has settled.
        if self.queue.is_empty() {
            self.verify_single_active(host);
            self.verify_stack_visibility(host);
        }
    }

    /// Checks that every stack shows exactly its active member's container
    /// and collapses the rest to title bars.
    fn verify_stack_visibility(&self, host: &B) {
        for leaf_id in self.tree.collect_leaves() {
            let Some(stack_id) = self.tree.enclosing_stack(leaf_id) else {
                continue;
            };
            let Some(stack) = self.tree.stack(stack_id) else {
                continue;
            };
            let Some(leaf) = self.tree.leaf(leaf_id) else {
                continue;
            };
            let is_active = stack.active_member() == Some(leaf_id);
            assert_eq!(
                host.is_visible(&leaf.container),
                is_active,
                "stack member {leaf_id:?} container visibility out of sync"
            );
            if let Some(title_bar) = &leaf.title_bar {
                assert_eq!(
                    host.is_visible(title_bar),
                    !is_active,
                    "stack member {leaf_id:?} title bar visibility out of sync"
                );
            }
        }
    }
}
