//! Deferred work, expressed as data instead of nested idle closures.
//!
//! Reparenting cannot finish synchronously: widgets only become showable
//! once the host has allocated them, controllers can only re-attach after
//! re-realization, and some router actions wait on wall-clock deadlines.
//! Each pending step is queued here with a list of guard nodes; tearing a
//! node down cancels every item that referenced it, which is what keeps
//! stale callbacks from ever touching a dead widget.

use std::collections::VecDeque;
use std::time::Duration;

use crate::host::{HostBackend, ViewIdOf};

use super::focus::FocusSource;
use super::tree::NodeId;

#[derive(Debug)]
pub(crate) enum DeferredKind<B: HostBackend> {
    /// Once the moved widgets have a non-zero allocation: show them, queue
    /// a resize and redraw, re-attach pending controllers, and restore the
    /// active style if the focused pane moved.
    PostReparent { nodes: Vec<NodeId> },
    /// Poll the paned's allocation on frame ticks and center the divider;
    /// gives up after `frames_left` ticks.
    DividerSync { split: NodeId, frames_left: u8 },
    /// Hand focus to a leaf after the current operation settles.
    FocusLeaf { leaf: NodeId, source: FocusSource },
    /// Close a popup leaf after its grace delay.
    ClosePopup { leaf: NodeId, due: Duration },
    /// Treat an undetected view as a popup once the window elapses.
    DetectionFallback { view: ViewIdOf<B>, due: Duration },
}

impl<B: HostBackend> DeferredKind<B> {
    /// Deadline, for items that wait on the clock rather than on layout.
    pub fn due(&self) -> Option<Duration> {
        match self {
            DeferredKind::ClosePopup { due, .. } | DeferredKind::DetectionFallback { due, .. } => {
                Some(*due)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DeferredItem<B: HostBackend> {
    pub id: u64,
    pub guards: Vec<NodeId>,
    pub kind: DeferredKind<B>,
}

#[derive(Debug)]
pub(crate) struct WorkQueue<B: HostBackend> {
    items: VecDeque<DeferredItem<B>>,
    next_id: u64,
}

impl<B: HostBackend> Default for WorkQueue<B> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            next_id: 0,
        }
    }
}

impl<B: HostBackend> WorkQueue<B> {
    pub fn push(&mut self, kind: DeferredKind<B>, guards: Vec<NodeId>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.items.push_back(DeferredItem { id, guards, kind });
        id
    }

    /// Re-queues an item that was taken but is not ready yet.
    pub fn requeue(&mut self, item: DeferredItem<B>) {
        self.items.push_back(item);
    }

    /// Drops every item guarded by `node`. Returns how many were dropped.
    pub fn cancel_guarded(&mut self, node: NodeId) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.guards.contains(&node));
        before - self.items.len()
    }

    /// Drops every item whose kind matches the predicate.
    pub fn cancel_where(&mut self, pred: impl Fn(&DeferredKind<B>) -> bool) {
        self.items.retain(|item| !pred(&item.kind));
    }

    /// Takes everything currently queued. The caller executes, requeues, or
    /// drops each item; anything pushed during execution is picked up on
    /// the next drain.
    pub fn take_all(&mut self) -> VecDeque<DeferredItem<B>> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Earliest clock deadline among queued items, so the embedder can arm
    /// a wake-up timer instead of polling.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.items.iter().filter_map(|item| item.kind.due()).min()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredItem<B>> {
        self.items.iter()
    }
}
