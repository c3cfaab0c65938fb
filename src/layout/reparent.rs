//! Widget reparenting against the retained-mode host.
//!
//! The host auto-unparents a widget that is attached while still parented,
//! and silently removes event controllers from anything it unparents. The
//! binder turns every tree mutation into the one safe call sequence:
//!
//! 1. strip position-dependent style classes from the moving widget;
//! 2. mark the subtree's controllers pending re-attach (never deregister:
//!    the host already did, and a double-deregister is unsound);
//! 3. detach from the old slot;
//! 4. attach to the new slot;
//! 5. queue a deferred step that re-shows, re-layouts, and re-attaches
//!    controllers once the widget has an allocation.

use tracing::{trace, warn};

use crate::host::{ControllerKind, HostBackend};

use super::defer::{DeferredKind, WorkQueue};
use super::focus::ACTIVE_CLASS;
use super::tree::{NodeId, PaneNode, PaneTree, PendingReattach};

/// Minimum allocation, on the short side, before a divider position is
/// meaningful.
pub(crate) const DIVIDER_MIN_ALLOC: f64 = 32.0;

/// Frame ticks spent polling for an allocation before giving up on
/// centering a divider.
pub(crate) const DIVIDER_SYNC_FRAMES: u8 = 60;

/// Where a node's container widget is (or should be) attached.
#[derive(Debug, Clone)]
pub(crate) enum AttachSlot<B: HostBackend> {
    PanedStart(B::Widget),
    PanedEnd(B::Widget),
    /// Inside a stack's inner box, right after `sibling`.
    BoxAfter {
        bx: B::Widget,
        sibling: Option<B::Widget>,
    },
    /// The workspace's content container.
    Content(B::Widget),
}

pub(crate) struct WidgetBinder;

impl WidgetBinder {
    /// Computes the slot a node currently occupies. `content` is the
    /// content container the workspace root is attached to, if the
    /// workspace is the visible one.
    pub fn slot_for<B: HostBackend>(
        tree: &PaneTree<B>,
        content: Option<&B::Widget>,
        node: NodeId,
    ) -> Option<AttachSlot<B>> {
        match tree.parent_of(node) {
            Some(parent) => match tree.node(parent)? {
                PaneNode::Split(split) => {
                    let paned = split.divider.clone();
                    if split.first == node {
                        Some(AttachSlot::PanedStart(paned))
                    } else {
                        Some(AttachSlot::PanedEnd(paned))
                    }
                }
                PaneNode::Stack(stack) => {
                    let sibling = tree
                        .leaf(node)
                        .and_then(|leaf| leaf.title_bar.clone());
                    Some(AttachSlot::BoxAfter {
                        bx: stack.inner_box.clone(),
                        sibling,
                    })
                }
                PaneNode::Leaf(_) => None,
            },
            None => content.cloned().map(AttachSlot::Content),
        }
    }

    /// Steps 1–2 only: strip transient style and mark the subtree's
    /// controllers as dropped. For moves where the caller detaches through
    /// a different host call (box removal, slot replacement).
    pub fn prepare_move<B: HostBackend>(host: &mut B, tree: &mut PaneTree<B>, node: NodeId) {
        let Some(widget) = tree.node(node).map(|n| n.container_widget().clone()) else {
            return;
        };
        if host.has_css_class(&widget, ACTIVE_CLASS) {
            host.remove_css_class(&widget, ACTIVE_CLASS);
        }
        Self::mark_controllers_dropped(tree, node);
    }

    /// Steps 1–3 of the protocol for `node`'s container widget, detaching
    /// it from `slot`.
    pub fn detach<B: HostBackend>(
        host: &mut B,
        tree: &mut PaneTree<B>,
        node: NodeId,
        slot: &AttachSlot<B>,
    ) {
        let Some(widget) = tree.node(node).map(|n| n.container_widget().clone()) else {
            return;
        };

        // Transient style depends on the widget's position; leaving it in
        // place corrupts the host's style cache across the move.
        if host.has_css_class(&widget, ACTIVE_CLASS) {
            host.remove_css_class(&widget, ACTIVE_CLASS);
        }

        Self::mark_controllers_dropped(tree, node);

        match slot {
            AttachSlot::PanedStart(paned) => host.paned_set_start_child(paned, None),
            AttachSlot::PanedEnd(paned) => host.paned_set_end_child(paned, None),
            AttachSlot::BoxAfter { bx, .. } => host.box_remove(bx, &widget),
            AttachSlot::Content(container) => host.container_set_child(container, None),
        }
    }

    /// Step 4. The host auto-unparents if the widget somehow still has a
    /// parent, so a skipped or failed detach is recoverable here.
    pub fn attach<B: HostBackend>(host: &mut B, widget: &B::Widget, slot: &AttachSlot<B>) {
        match slot {
            AttachSlot::PanedStart(paned) => host.paned_set_start_child(paned, Some(widget)),
            AttachSlot::PanedEnd(paned) => host.paned_set_end_child(paned, Some(widget)),
            AttachSlot::BoxAfter { bx, sibling } => {
                host.box_insert_after(bx, widget, sibling.as_ref())
            }
            AttachSlot::Content(container) => host.container_set_child(container, Some(widget)),
        }
    }

    /// Step 5: queue the post-reparent pass for `nodes`, guarded by the
    /// same nodes so a teardown cancels it.
    pub fn schedule_post_reparent<B: HostBackend>(queue: &mut WorkQueue<B>, nodes: Vec<NodeId>) {
        let guards = nodes.clone();
        queue.push(DeferredKind::PostReparent { nodes }, guards);
    }

    /// Queues divider centering for a freshly created split.
    pub fn schedule_divider_sync<B: HostBackend>(queue: &mut WorkQueue<B>, split: NodeId) {
        queue.push(
            DeferredKind::DividerSync {
                split,
                frames_left: DIVIDER_SYNC_FRAMES,
            },
            vec![split],
        );
    }

    /// Flags every leaf under `node` as needing its controllers back. The
    /// host dropped them during the unparent; re-attachment happens from
    /// the deferred step once the subtree is re-realized.
    fn mark_controllers_dropped<B: HostBackend>(tree: &mut PaneTree<B>, node: NodeId) {
        for leaf_id in tree.leaves_under(node) {
            if let Some(leaf) = tree.leaf_mut(leaf_id) {
                leaf.pending_reattach = PendingReattach::all();
            }
        }
    }

    /// Re-attaches controllers for a leaf whose pending flags are set.
    /// Flags clear only on success so transient refusals retry on the next
    /// scheduled pass.
    pub fn reattach_controllers<B: HostBackend>(
        host: &mut B,
        tree: &mut PaneTree<B>,
        leaf_id: NodeId,
    ) {
        let Some(leaf) = tree.leaf(leaf_id) else {
            return;
        };
        if !leaf.widget_valid || leaf.pending_reattach.is_empty() {
            return;
        }
        let widget = leaf.container.clone();
        let pending = leaf.pending_reattach;

        let mut attached = PendingReattach::empty();
        if pending.contains(PendingReattach::HOVER) {
            match host.attach_controller(&widget, ControllerKind::Hover) {
                Ok(()) => attached |= PendingReattach::HOVER,
                Err(err) => trace!("hover controller re-attach refused: {err:#}"),
            }
        }
        if pending.contains(PendingReattach::FOCUS) {
            match host.attach_controller(&widget, ControllerKind::Focus) {
                Ok(()) => attached |= PendingReattach::FOCUS,
                Err(err) => trace!("focus controller re-attach refused: {err:#}"),
            }
        }

        if let Some(leaf) = tree.leaf_mut(leaf_id) {
            leaf.pending_reattach.remove(attached);
        }
    }

    /// One frame-tick poll of a split's divider. Returns true once the
    /// divider is centered (or the split is gone) and polling should stop.
    pub fn sync_divider<B: HostBackend>(
        host: &mut B,
        tree: &mut PaneTree<B>,
        split_id: NodeId,
        frames_left: u8,
    ) -> bool {
        let Some(split) = tree.split(split_id) else {
            return true;
        };
        if split.divider_synced {
            return true;
        }

        let paned = split.divider.clone();
        let orientation = split.orientation;
        let alloc = host.allocation(&paned);

        if alloc.short_side() >= DIVIDER_MIN_ALLOC {
            let half = match orientation {
                trellis_bridge::SplitOrientation::Horizontal => alloc.w / 2.0,
                trellis_bridge::SplitOrientation::Vertical => alloc.h / 2.0,
            };
            host.paned_set_position(&paned, half as i32);
            if let Some(split) = tree.split_mut(split_id) {
                split.divider_synced = true;
            }
            trace!("divider of {split_id:?} centered at {half}");
            return true;
        }

        if frames_left == 0 {
            warn!("divider of {split_id:?} never got an allocation; giving up");
            return true;
        }

        false
    }
}
