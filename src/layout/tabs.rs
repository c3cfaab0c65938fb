//! Tabs: independent workspaces multiplexed over one content container.
//!
//! Each tab owns a full [`Workspace`]: its own pane tree, focus state,
//! and popup router. Exactly one tab's root widget is attached to the
//! shared content area at a time; switching always re-queries the
//! workspace for its *current* root, because splits change it.
//!
//! The tab list is mirrored into an `Arc<RwLock<Vec<TabMeta>>>` so
//! external observers (session savers, UI overlays) can read it without
//! touching the UI context. Queries take the read side; every mutation
//! here takes the write side.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::host::{HostBackend, ViewIdOf};

use super::focus::FocusSource;
use super::tree::NodeId;
use super::{ActivePane, CloseOutcome, LayoutError, Options, Workspace};

/// Style class on the active tab's bar button.
const ACTIVE_TAB_CLASS: &str = "active-tab";

/// Minimum spacing between tab creations; double-taps on the shortcut
/// otherwise produce ghost tabs.
const TAB_CREATE_DEBOUNCE: Duration = Duration::from_millis(200);

/// Stable tab identifier: creation sequence number plus the engine-clock
/// timestamp at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(String);

impl TabId {
    fn new(seq: u64, millis: u64) -> Self {
        Self(format!("tab-{seq}-{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Externally observable tab record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabMeta {
    pub id: TabId,
    pub title: String,
    pub index: usize,
    pub active: bool,
}

/// Outcome of closing a pane through the tab manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppCloseOutcome {
    PaneClosed,
    /// The pane was the tab's last; the tab was closed instead.
    TabClosed,
    /// Last pane of the last tab: the application should exit. Nothing
    /// was mutated.
    Exit,
}

struct Tab<B: HostBackend> {
    id: TabId,
    /// Default title, `Tab N`. Page titles never overwrite it.
    title: String,
    /// User-supplied override from a rename.
    custom_title: Option<String>,
    workspace: Workspace<B>,
    button: B::Widget,
}

impl<B: HostBackend> Tab<B> {
    fn effective_title(&self) -> String {
        self.custom_title.clone().unwrap_or_else(|| self.title.clone())
    }
}

/// Ordered list of tabs plus the shared chrome they are multiplexed over.
pub struct TabManager<B: HostBackend> {
    tabs: Vec<Tab<B>>,
    active: usize,
    content_area: B::Widget,
    tab_bar: B::Widget,
    progress: Option<B::Widget>,
    options: Rc<Options>,
    clock: Clock,
    shared: ActivePane<B>,
    next_workspace_id: u64,
    next_tab_seq: u64,
    last_created: Option<Duration>,
    meta: Arc<RwLock<Vec<TabMeta>>>,
}

impl<B: HostBackend> TabManager<B> {
    /// `content_area` hosts the active workspace's root; `tab_bar` is the
    /// box tab buttons go into; `progress` is the optional loading
    /// indicator overlaid on the content area.
    pub fn new(
        content_area: B::Widget,
        tab_bar: B::Widget,
        progress: Option<B::Widget>,
        options: Rc<Options>,
        clock: Clock,
    ) -> Self {
        Self {
            tabs: Vec::new(),
            active: 0,
            content_area,
            tab_bar,
            progress,
            options,
            clock,
            shared: ActivePane::default(),
            next_workspace_id: 0,
            next_tab_seq: 0,
            last_created: None,
            meta: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// The application-wide active-pane pointer.
    pub fn active_pane(&self) -> ActivePane<B> {
        self.shared.clone()
    }

    /// Shared handle for external tab-list observers.
    pub fn meta_handle(&self) -> Arc<RwLock<Vec<TabMeta>>> {
        self.meta.clone()
    }

    /// Snapshot of the tab list.
    pub fn tabs(&self) -> Vec<TabMeta> {
        self.meta.read().clone()
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_workspace(&self) -> Option<&Workspace<B>> {
        self.tabs.get(self.active).map(|tab| &tab.workspace)
    }

    pub fn active_workspace_mut(&mut self) -> Option<&mut Workspace<B>> {
        self.tabs.get_mut(self.active).map(|tab| &mut tab.workspace)
    }

    pub fn workspace_at(&self, index: usize) -> Option<&Workspace<B>> {
        self.tabs.get(index).map(|tab| &tab.workspace)
    }

    pub fn workspace_at_mut(&mut self, index: usize) -> Option<&mut Workspace<B>> {
        self.tabs.get_mut(index).map(|tab| &mut tab.workspace)
    }

    /// Workspace owning `view`, across all tabs.
    pub fn workspace_for_view(&mut self, view: &ViewIdOf<B>) -> Option<&mut Workspace<B>> {
        self.tabs
            .iter_mut()
            .map(|tab| &mut tab.workspace)
            .find(|workspace| workspace.tree().leaf_for_view(view).is_some())
    }

    /// Where the embedder should place the tab bar.
    pub fn tab_bar_position(&self) -> trellis_config::TabBarPosition {
        self.options.tab_bar_position
    }

    /// Creates a tab with an initial pane loading `url` and switches to
    /// it. Returns `None` when debounced.
    pub fn create_tab(
        &mut self,
        host: &mut B,
        url: Option<&str>,
    ) -> Result<Option<TabId>, LayoutError> {
        let now = self.clock.now();
        if let Some(last) = self.last_created {
            if now.saturating_sub(last) < TAB_CREATE_DEBOUNCE {
                debug!("tab creation debounced");
                return Ok(None);
            }
        }
        self.last_created = Some(now);

        self.next_workspace_id += 1;
        self.next_tab_seq += 1;
        let seq = self.next_tab_seq;
        let id = TabId::new(seq, self.clock.now_millis());
        let title = format!("Tab {seq}");

        let workspace = Workspace::bootstrap(
            host,
            self.next_workspace_id,
            self.options.clone(),
            self.clock.clone(),
            self.shared.clone(),
            url,
        )?;

        let button = host.create_tab_button();
        host.set_tab_button_title(&button, &title);
        host.box_append(&self.tab_bar, &button);

        self.tabs.push(Tab {
            id: id.clone(),
            title,
            custom_title: None,
            workspace,
            button,
        });

        let index = self.tabs.len() - 1;
        self.switch_to(host, index, FocusSource::Keyboard);
        self.update_tab_bar(host);
        trace!("created {id}");
        Ok(Some(id))
    }

    /// Makes the tab at `index` the visible one.
    pub fn switch_to(&mut self, host: &mut B, index: usize, source: FocusSource) -> bool {
        if index >= self.tabs.len() {
            return false;
        }

        if index == self.active {
            if let Some(tab) = self.tabs.get(self.active) {
                if tab.workspace.is_attached() {
                    return true;
                }
            }
        }

        if index != self.active {
            if let Some(outgoing) = self.tabs.get_mut(self.active) {
                outgoing.workspace.suspend_focus(host);
                outgoing.workspace.detach(host);
                let button = outgoing.button.clone();
                host.remove_css_class(&button, ACTIVE_TAB_CLASS);
            }
        }

        self.active = index;
        self.attach_active(host, source);
        self.update_meta();
        true
    }

    fn attach_active(&mut self, host: &mut B, source: FocusSource) {
        let content = self.content_area.clone();
        let Some(tab) = self.tabs.get_mut(self.active) else {
            return;
        };
        // Re-query the current root; splits replaced it since last time.
        tab.workspace.attach(host, &content);
        let button = tab.button.clone();
        host.add_css_class(&button, ACTIVE_TAB_CLASS);
        tab.workspace.restore_focus(host, source);

        if let Some(progress) = self.progress.clone() {
            // Fresh tab: nothing is known to be loading.
            host.set_visible(&progress, false);
        }
    }

    /// Closes the tab at `index`. The sole remaining tab cannot close.
    pub fn close_tab(&mut self, host: &mut B, index: usize) -> Result<(), LayoutError> {
        if self.tabs.len() <= 1 {
            return Err(LayoutError::LastTab);
        }
        if index >= self.tabs.len() {
            return Err(LayoutError::InvalidTarget);
        }

        let was_active = index == self.active;
        let mut tab = self.tabs.remove(index);
        host.box_remove(&self.tab_bar, &tab.button);
        tab.workspace.retire(host);
        trace!("closed {}", tab.id);

        if index < self.active {
            self.active -= 1;
        }
        if was_active {
            // Prefer the tab that slid into this index, else the last.
            self.active = index.min(self.tabs.len() - 1);
            self.attach_active(host, FocusSource::Keyboard);
        }

        self.update_tab_bar(host);
        self.update_meta();
        Ok(())
    }

    /// Closes a pane of the active workspace, folding the last-pane case
    /// into tab closing or application exit.
    pub fn close_pane(&mut self, host: &mut B, leaf: NodeId) -> Result<AppCloseOutcome, LayoutError> {
        let active = self.active;
        let workspace = self
            .tabs
            .get_mut(active)
            .map(|tab| &mut tab.workspace)
            .ok_or(LayoutError::InvalidTarget)?;

        match workspace.close(host, leaf)? {
            CloseOutcome::Closed => Ok(AppCloseOutcome::PaneClosed),
            CloseOutcome::LastLeaf => {
                if self.tabs.len() > 1 {
                    self.close_tab(host, active)?;
                    Ok(AppCloseOutcome::TabClosed)
                } else {
                    Ok(AppCloseOutcome::Exit)
                }
            }
        }
    }

    /// Closes the focused pane of the active tab.
    pub fn close_focused_pane(&mut self, host: &mut B) -> Result<AppCloseOutcome, LayoutError> {
        let leaf = self
            .active_workspace()
            .and_then(Workspace::focused_leaf)
            .ok_or(LayoutError::InvalidTarget)?;
        self.close_pane(host, leaf)
    }

    /// Sets a user-supplied title override. Page-title changes never
    /// rename tabs; this is the only way a tab title moves.
    pub fn rename_tab(&mut self, host: &mut B, index: usize, title: &str) -> bool {
        let Some(tab) = self.tabs.get_mut(index) else {
            return false;
        };
        tab.custom_title = Some(title.to_string());
        let button = tab.button.clone();
        let effective = tab.effective_title();
        host.set_tab_button_title(&button, &effective);
        self.update_meta();
        true
    }

    /// Tab-bar click entry point.
    pub fn on_tab_button_clicked(&mut self, host: &mut B, widget: &B::Widget) -> bool {
        let Some(index) = self.tabs.iter().position(|tab| &tab.button == widget) else {
            return false;
        };
        self.switch_to(host, index, FocusSource::Mouse)
    }

    /// Page-title change: stack title bars update; tab titles do not.
    pub fn on_title_changed(&mut self, host: &mut B, view: &ViewIdOf<B>) {
        let Some(workspace) = self.workspace_for_view(view) else {
            return;
        };
        workspace.on_title_changed(host, view);
    }

    /// Routes a script window request to the workspace owning its source
    /// view; falls back to the active workspace for unknown views.
    pub fn handle_window_intent(
        &mut self,
        host: &mut B,
        source_view: &ViewIdOf<B>,
        intent: trellis_bridge::WindowIntent,
    ) -> super::popup::RouterOutcome {
        let active = self.active;
        let workspace = match self
            .tabs
            .iter_mut()
            .position(|tab| tab.workspace.tree().leaf_for_view(source_view).is_some())
        {
            Some(index) => &mut self.tabs[index].workspace,
            None => match self.tabs.get_mut(active) {
                Some(tab) => &mut tab.workspace,
                None => return super::popup::RouterOutcome::AllowNative,
            },
        };
        workspace.handle_window_intent(host, source_view, intent)
    }

    /// `window.close()` from a pane's script, routed to its workspace.
    pub fn on_close_requested(&mut self, view: &ViewIdOf<B>) {
        if let Some(workspace) = self.workspace_for_view(view) {
            workspace.on_close_requested(view);
        }
    }

    /// Window-type detection result for a probe view.
    pub fn on_window_type_detected(
        &mut self,
        host: &mut B,
        view: &ViewIdOf<B>,
        kind: trellis_bridge::WindowKind,
    ) {
        for tab in &mut self.tabs {
            if tab
                .workspace
                .on_window_type_detected(host, view, kind)
                .is_some()
            {
                return;
            }
        }
    }

    /// Navigation-policy query for a pane, defaulting to allow.
    pub fn navigation_policy(
        &mut self,
        view: &ViewIdOf<B>,
        user_gesture: bool,
    ) -> super::popup::NavigationPolicy {
        match self.workspace_for_view(view) {
            Some(workspace) => workspace.navigation_policy(view, user_gesture),
            None => super::popup::NavigationPolicy::Allow,
        }
    }

    /// Hover-enter on a pane; only the active workspace takes focus from
    /// the mouse.
    pub fn on_view_focused(&mut self, host: &mut B, view: &ViewIdOf<B>) {
        if let Some(workspace) = self.active_workspace_mut() {
            workspace.on_view_focused(host, view);
        }
    }

    /// Load-progress report for a view. Only the active tab's panes drive
    /// the indicator; it hides outside (0, 1).
    pub fn on_load_progress(&mut self, host: &mut B, view: &ViewIdOf<B>, fraction: f64) {
        let Some(progress) = self.progress.clone() else {
            return;
        };
        let in_active_tab = self
            .active_workspace()
            .is_some_and(|workspace| workspace.tree().leaf_for_view(view).is_some());
        if !in_active_tab {
            return;
        }

        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= 0.0 || fraction >= 1.0 {
            host.set_visible(&progress, false);
        } else {
            host.set_progress_fraction(&progress, fraction);
            host.set_visible(&progress, true);
        }
    }

    /// Drives deferred work in every workspace; background tabs keep
    /// their timers (popup close grace, detection fallbacks) running.
    pub fn on_idle(&mut self, host: &mut B) {
        for tab in &mut self.tabs {
            tab.workspace.on_idle(host);
        }
    }

    pub fn on_frame_tick(&mut self, host: &mut B) {
        for tab in &mut self.tabs {
            tab.workspace.on_frame_tick(host);
        }
    }

    /// Earliest deadline across all workspaces.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.tabs
            .iter()
            .filter_map(|tab| tab.workspace.next_deadline())
            .min()
    }

    fn update_tab_bar(&mut self, host: &mut B) {
        // The bar only earns its pixels with something to switch between.
        host.set_visible(&self.tab_bar, self.tabs.len() > 1);
    }

    fn update_meta(&self) {
        let metas = self
            .tabs
            .iter()
            .enumerate()
            .map(|(index, tab)| TabMeta {
                id: tab.id.clone(),
                title: tab.effective_title(),
                index,
                active: index == self.active,
            })
            .collect();
        *self.meta.write() = metas;
    }

    /// Consistency checks across all tabs.
    pub fn verify_invariants(&self, host: &B) {
        if !self.tabs.is_empty() {
            assert!(self.active < self.tabs.len(), "active tab out of range");
        }
        assert_eq!(
            self.meta.read().len(),
            self.tabs.len(),
            "tab meta mirror out of sync"
        );
        for tab in &self.tabs {
            tab.workspace.verify_invariants(host);
        }
        let attached = self
            .tabs
            .iter()
            .filter(|tab| tab.workspace.is_attached())
            .count();
        assert!(attached <= 1, "more than one workspace attached");
    }
}
