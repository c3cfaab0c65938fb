//! Script-initiated window intents: tabs, popups, and the guards around
//! them.
//!
//! An intent arrives from the page bridge, gets deduplicated by request
//! id, classified (declared kind, or smart detection with a timeout
//! fallback), and lands as a split of the source pane with a freshly
//! created view. Popups stay related to their opener, get a minimum size,
//! an OAuth auto-close marking plus a storage handoff record, and an
//! opener-hijack guard: while a pane has live popup children, its own
//! script-initiated navigations are rejected so a provider page cannot
//! redirect the opener through `window.opener.location`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};
use trellis_bridge::{popup_mapping_key, PopupMapping, WindowIntent, WindowKind};

use crate::host::{HostBackend, PaneView, ViewIdOf, WindowFeatures};

use super::defer::DeferredKind;
use super::tree::{NodeId, PaneKind};
use super::{LayoutError, Workspace};

/// Identical request ids arriving within this window are the same intent
/// delivered twice by racing bridges.
const DEDUP_WINDOW: Duration = Duration::from_millis(200);

/// Delay between a script `window.close()` and the pane actually closing,
/// so final redirects can land.
const CLOSE_GRACE: Duration = Duration::from_millis(200);

/// How long smart detection may run before the view is treated as a popup.
const DETECTION_FALLBACK: Duration = Duration::from_millis(1500);

/// Minimum popup size; intents may only enlarge it.
const POPUP_MIN_WIDTH: i32 = 500;
const POPUP_MIN_HEIGHT: i32 = 600;

/// Case-insensitive URL substrings marking OAuth/OIDC flows. Deliberately
/// broad (see `redirect`, `callback`); the whole behavior is configurable
/// off via `workspace.popups.oauth-auto-close`.
const OAUTH_URL_PATTERNS: &[&str] = &[
    "oauth",
    "authorize",
    "authorization",
    "callback",
    "redirect",
    "auth/callback",
    "oidc",
    "openid",
    "response_type=",
    "client_id=",
    "redirect_uri=",
    "scope=",
    "state=",
    "code=",
    "access_token=",
    "id_token=",
    "token_type=",
    "error=",
    "error_description=",
];

/// What the router did with an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterOutcome {
    /// A pane was created for the request.
    PaneCreated(NodeId),
    /// Dropped as a duplicate of a request seen moments ago.
    Duplicate,
    /// Pane creation is disabled or impossible; the host should fall back
    /// to its native window behavior.
    AllowNative,
    /// Smart detection is running; a pane may appear later.
    DetectionPending,
}

/// Verdict for a navigation request on a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationPolicy {
    Allow,
    Block,
}

#[derive(Debug)]
struct PendingDetection<B: HostBackend> {
    /// Temporary related view probing the page.
    view: B::View,
    /// View that originated the intent; resolved to a leaf at
    /// classification time so tree mutations in between stay sound.
    source_view: ViewIdOf<B>,
    intent: WindowIntent,
}

/// Per-workspace router state.
#[derive(Debug)]
pub struct PopupRouter<B: HostBackend> {
    dedup: HashMap<String, Duration>,
    pending_detections: HashMap<ViewIdOf<B>, PendingDetection<B>>,
}

impl<B: HostBackend> PopupRouter<B> {
    pub fn new() -> Self {
        Self {
            dedup: HashMap::new(),
            pending_detections: HashMap::new(),
        }
    }

    /// Releases bookkeeping for a view leaving the workspace.
    pub fn release_view(&mut self, view: &ViewIdOf<B>, request_id: Option<&str>) {
        if let Some(request_id) = request_id {
            self.dedup.remove(request_id);
        }
        self.pending_detections.remove(view);
    }

    fn is_duplicate(&mut self, request_id: &str, now: Duration) -> bool {
        // Old entries whose popups never materialized expire with the
        // window; live popups release their id on close instead.
        if let Some(&seen) = self.dedup.get(request_id) {
            if now.saturating_sub(seen) < DEDUP_WINDOW {
                return true;
            }
        }
        self.dedup.insert(request_id.to_string(), now);
        false
    }
}

impl<B: HostBackend> Default for PopupRouter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: HostBackend> Workspace<B> {
    /// Entry point for a script-initiated window request originating from
    /// `source_view`.
    pub fn handle_window_intent(
        &mut self,
        host: &mut B,
        source_view: &ViewIdOf<B>,
        intent: WindowIntent,
    ) -> RouterOutcome {
        if !self.options.open_popups_in_new_pane {
            return RouterOutcome::AllowNative;
        }

        let now = self.clock.now();
        if let Some(request_id) = &intent.request_id {
            if self.router.is_duplicate(request_id, now) {
                debug!("dropping duplicate window intent {request_id}");
                return RouterOutcome::Duplicate;
            }
        }

        let Some(source_leaf) = self.intent_target_leaf(source_view) else {
            warn!("window intent from unknown view {source_view}; allowing native");
            return RouterOutcome::AllowNative;
        };

        match intent.kind {
            WindowKind::Tab => match self.create_tab_pane(host, source_leaf, &intent) {
                Ok(leaf) => RouterOutcome::PaneCreated(leaf),
                Err(err) => {
                    warn!("tab pane creation failed: {err}");
                    RouterOutcome::AllowNative
                }
            },
            WindowKind::Popup => {
                match self.create_popup_pane(host, source_leaf, &intent, None) {
                    Ok(leaf) => RouterOutcome::PaneCreated(leaf),
                    Err(err) => {
                        warn!("popup pane creation failed: {err}");
                        RouterOutcome::AllowNative
                    }
                }
            }
            WindowKind::Unspecified => {
                if !self.options.smart_detection {
                    // Without detection an undeclared window is a popup,
                    // matching the detection-timeout outcome.
                    return match self.create_popup_pane(host, source_leaf, &intent, None) {
                        Ok(leaf) => RouterOutcome::PaneCreated(leaf),
                        Err(err) => {
                            warn!("popup pane creation failed: {err}");
                            RouterOutcome::AllowNative
                        }
                    };
                }
                self.begin_detection(host, source_view.clone(), source_leaf, intent)
            }
        }
    }

    /// The leaf new panes split: the source view's leaf, or the focused
    /// leaf when `follow-pane-context` is off.
    fn intent_target_leaf(&self, source_view: &ViewIdOf<B>) -> Option<NodeId> {
        if self.options.follow_pane_context {
            self.tree
                .leaf_for_view(source_view)
                .or_else(|| self.focused_leaf())
        } else {
            self.focused_leaf()
                .or_else(|| self.tree.leaf_for_view(source_view))
        }
    }

    fn create_tab_pane(
        &mut self,
        host: &mut B,
        source_leaf: NodeId,
        intent: &WindowIntent,
    ) -> Result<NodeId, LayoutError> {
        let view = host.create_view().map_err(LayoutError::ViewFactory)?;
        view.load_url(&intent.url);

        let leaf = self.split(host, source_leaf, self.options.popup_placement, Some(view))?;
        if let Some(leaf) = self.tree.leaf_mut(leaf) {
            leaf.kind = PaneKind::Tab;
            leaf.is_popup = false;
            leaf.is_related = false;
            leaf.request_id = intent.request_id.clone();
        }
        trace!("created tab pane {leaf:?} for {}", intent.url);
        Ok(leaf)
    }

    /// Builds a popup pane next to `source_leaf`. `existing_view` carries
    /// the already-loaded probe view out of smart detection; otherwise a
    /// fresh related view is created and pointed at the intent URL.
    fn create_popup_pane(
        &mut self,
        host: &mut B,
        source_leaf: NodeId,
        intent: &WindowIntent,
        existing_view: Option<B::View>,
    ) -> Result<NodeId, LayoutError> {
        let source_view = self
            .tree
            .leaf(source_leaf)
            .map(|leaf| leaf.view.clone())
            .ok_or(LayoutError::InvalidTarget)?;

        let view = match existing_view {
            Some(view) => view,
            None => {
                let view = host
                    .create_related_view(&source_view)
                    .map_err(LayoutError::ViewFactory)?;
                view.load_url(&intent.url);
                view
            }
        };
        let popup_view_id = view.id();

        let leaf = self.split(
            host,
            source_leaf,
            self.options.popup_placement,
            Some(view.clone()),
        )?;

        let auto_close = self.should_auto_close(&intent.url);
        let container = {
            let entry = self.tree.leaf_mut(leaf).expect("pane was just created");
            entry.kind = PaneKind::Popup;
            entry.is_popup = true;
            entry.is_related = true;
            entry.parent_leaf = Some(source_leaf);
            entry.auto_close_on_oauth = auto_close;
            entry.request_id = intent.request_id.clone();
            entry.container.clone()
        };

        view.set_window_features(&WindowFeatures::from_intent(intent));

        // Keep the popup from being compressed below a usable size.
        let width = intent.width.unwrap_or(0).max(POPUP_MIN_WIDTH);
        let height = intent.height.unwrap_or(0).max(POPUP_MIN_HEIGHT);
        host.set_size_request(&container, width, height);
        host.set_size_request(&view.widget(), width, height);

        // Arm the opener-hijack guard.
        if let Some(source) = self.tree.leaf_mut(source_leaf) {
            source.add_popup_child(popup_view_id.clone());
        }

        if auto_close {
            self.write_popup_mapping(&source_view, &popup_view_id, &intent.url);
        }

        trace!(
            auto_close,
            "created popup pane {leaf:?} under {source_leaf:?} for {}",
            intent.url
        );
        Ok(leaf)
    }

    /// Starts smart detection with a temporary related view and arms the
    /// fallback timer.
    fn begin_detection(
        &mut self,
        host: &mut B,
        source_view: ViewIdOf<B>,
        source_leaf: NodeId,
        intent: WindowIntent,
    ) -> RouterOutcome {
        let Some(source_handle) = self.tree.leaf(source_leaf).map(|leaf| leaf.view.clone())
        else {
            return RouterOutcome::AllowNative;
        };

        let probe = match host.create_related_view(&source_handle) {
            Ok(view) => view,
            Err(err) => {
                warn!("detection view creation failed: {err:#}");
                return RouterOutcome::AllowNative;
            }
        };
        probe.load_url(&intent.url);

        let probe_id = probe.id();
        self.router.pending_detections.insert(
            probe_id.clone(),
            PendingDetection {
                view: probe,
                source_view,
                intent,
            },
        );
        self.queue.push(
            DeferredKind::DetectionFallback {
                view: probe_id,
                due: self.clock.now() + DETECTION_FALLBACK,
            },
            Vec::new(),
        );
        RouterOutcome::DetectionPending
    }

    /// Host callback: the probe view reported its window type.
    pub fn on_window_type_detected(
        &mut self,
        host: &mut B,
        view: &ViewIdOf<B>,
        kind: WindowKind,
    ) -> Option<NodeId> {
        let pending = self.router.pending_detections.remove(view)?;
        self.queue.cancel_where(|item| {
            matches!(item, DeferredKind::DetectionFallback { view: v, .. } if v == view)
        });
        self.classify_detected(host, pending, kind)
    }

    /// Fallback-timer expiry: no detection fired, treat as popup.
    pub(crate) fn finish_detection_fallback(&mut self, host: &mut B, view: &ViewIdOf<B>) {
        if let Some(pending) = self.router.pending_detections.remove(view) {
            trace!("window type detection timed out for {view}; assuming popup");
            self.classify_detected(host, pending, WindowKind::Popup);
        }
    }

    fn classify_detected(
        &mut self,
        host: &mut B,
        pending: PendingDetection<B>,
        kind: WindowKind,
    ) -> Option<NodeId> {
        let Some(source_leaf) = self.intent_target_leaf(&pending.source_view) else {
            debug!(
                "source pane of detected window vanished; discarding probe {}",
                pending.view.id()
            );
            return None;
        };

        let result = match kind {
            WindowKind::Tab => {
                // A related view cannot back an independent tab; the probe
                // is discarded and a fresh view takes its place.
                drop(pending.view);
                self.create_tab_pane(host, source_leaf, &pending.intent)
            }
            WindowKind::Popup | WindowKind::Unspecified => {
                self.create_popup_pane(host, source_leaf, &pending.intent, Some(pending.view))
            }
        };

        match result {
            Ok(leaf) => Some(leaf),
            Err(err) => {
                warn!("detected window could not be placed: {err}");
                None
            }
        }
    }

    /// Host callback for `window.close()` from a pane's script. Popups are
    /// torn down after a grace delay; anything else ignores the request.
    pub fn on_close_requested(&mut self, view: &ViewIdOf<B>) {
        let Some(leaf) = self.tree.leaf_for_view(view) else {
            return;
        };
        let is_popup = self.tree.leaf(leaf).is_some_and(|l| l.is_popup);
        if !is_popup {
            debug!("ignoring window.close() from non-popup pane {leaf:?}");
            return;
        }
        self.queue.push(
            DeferredKind::ClosePopup {
                leaf,
                due: self.clock.now() + CLOSE_GRACE,
            },
            vec![leaf],
        );
    }

    /// Grace delay elapsed; actually close the popup. Failures in the
    /// close handler path must not keep the pane alive.
    pub(crate) fn finish_popup_close(&mut self, host: &mut B, leaf: NodeId) {
        match self.close(host, leaf) {
            Ok(_) => {}
            Err(err) => warn!("deferred popup close failed: {err}"),
        }
    }

    /// Navigation policy for `view`. User gestures always pass; script
    /// navigations are rejected while the pane has open popup children.
    /// Unknown views default to allow; the user is never trapped.
    pub fn navigation_policy(&self, view: &ViewIdOf<B>, user_gesture: bool) -> NavigationPolicy {
        if user_gesture {
            return NavigationPolicy::Allow;
        }
        let Some(leaf) = self
            .tree
            .leaf_for_view(view)
            .and_then(|id| self.tree.leaf(id))
        else {
            return NavigationPolicy::Allow;
        };
        if leaf.active_popup_children.is_empty() {
            NavigationPolicy::Allow
        } else {
            NavigationPolicy::Block
        }
    }

    /// True when `url` looks like an OAuth/OIDC flow and auto-close is
    /// enabled.
    pub fn should_auto_close(&self, url: &str) -> bool {
        if !self.options.oauth_auto_close {
            return false;
        }
        let lower = url.to_lowercase();
        OAUTH_URL_PATTERNS
            .iter()
            .any(|pattern| lower.contains(pattern))
    }

    /// Leaves the cross-view handoff record in the parent view's local
    /// storage for the callback page's content script.
    fn write_popup_mapping(
        &self,
        source_view: &B::View,
        popup_view: &ViewIdOf<B>,
        url: &str,
    ) {
        let mapping = PopupMapping {
            parent_id: source_view.id().to_string(),
            popup_id: popup_view.to_string(),
            timestamp: self.clock.now_millis(),
            url: url.to_string(),
        };
        let key = popup_mapping_key(&mapping.parent_id);

        let script = match (
            serde_json::to_string(&key),
            serde_json::to_string(&mapping).and_then(|json| serde_json::to_string(&json)),
        ) {
            (Ok(key_literal), Ok(value_literal)) => {
                format!("localStorage.setItem({key_literal}, {value_literal});")
            }
            _ => {
                warn!("popup mapping serialization failed");
                return;
            }
        };

        if let Err(err) = source_view.inject_script(&script) {
            warn!("popup mapping handoff failed: {err:#}");
        }
    }
}
