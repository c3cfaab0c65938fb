//! Types and helpers for interfacing trellis with the in-page script world.
//!
//! Everything that crosses the boundary between the workspace engine and
//! injected page scripts is defined here: window-open intents coming in,
//! custom events going out, and the ephemeral OAuth handoff record. The
//! engine also exposes its pane tree through [`PaneTreeSnapshot`], which
//! external tooling (and the engine's own tests) consume as plain data.

use serde::{Deserialize, Serialize};

/// Name of the custom event dispatched into a page when its pane gains or
/// loses workspace focus.
pub const WORKSPACE_FOCUS_EVENT: &str = "trellis:workspace-focus";

/// Name of the custom event announcing keyboard pane-mode transitions.
pub const PANE_MODE_EVENT: &str = "trellis:pane-mode";

/// Key under which the OAuth popup handoff record is stored in the parent
/// view's local storage. Not durable state; consumed by the injected
/// content script on the callback page.
pub fn popup_mapping_key(parent_id: &str) -> String {
    format!("popup_mapping_{parent_id}")
}

/// Window kind declared by a script-initiated window request.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// An independent browsing context; becomes a regular pane.
    Tab,
    /// A related context sharing the opener's session; becomes a popup pane.
    Popup,
    /// The script did not say; subject to smart detection.
    #[default]
    Unspecified,
}

/// A script-initiated window request, as delivered by the content bridge.
///
/// Mirrors the subset of `window.open()` features the engine cares about.
/// Unknown fields are ignored so the bridge script can evolve independently.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WindowIntent {
    pub url: String,
    #[serde(default)]
    pub kind: WindowKind,
    /// Deduplication key; racing bridges may deliver the same request twice.
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub toolbar: Option<bool>,
    #[serde(default)]
    pub location: Option<bool>,
    #[serde(default)]
    pub menubar: Option<bool>,
    #[serde(default)]
    pub resizable: Option<bool>,
}

impl WindowIntent {
    pub fn new(url: impl Into<String>, kind: WindowKind) -> Self {
        Self {
            url: url.into(),
            kind,
            request_id: None,
            width: None,
            height: None,
            toolbar: None,
            location: None,
            menubar: None,
            resizable: None,
        }
    }
}

/// Payload of [`WORKSPACE_FOCUS_EVENT`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFocusPayload {
    pub active: bool,
    pub webview_id: String,
    pub pane_id: String,
    /// Milliseconds on the engine clock at dispatch time.
    pub timestamp: u64,
}

/// Kind of pane-mode transition carried by [`PANE_MODE_EVENT`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum PaneModeEvent {
    Entered,
    Exited,
    Action,
}

/// Payload of [`PANE_MODE_EVENT`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
pub struct PaneModePayload {
    pub event: PaneModeEvent,
    pub detail: String,
}

/// Ephemeral record handed to the OAuth callback page through the parent
/// view's local storage, under [`popup_mapping_key`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PopupMapping {
    pub parent_id: String,
    pub popup_id: String,
    pub timestamp: u64,
    pub url: String,
}

/// Orientation of a binary split.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum SplitOrientation {
    Horizontal,
    Vertical,
}

/// Serializable dump of a workspace's pane tree.
///
/// `root` is `None` for an empty workspace (possible only transiently,
/// between teardown and exit).
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
pub struct PaneTreeSnapshot {
    pub root: Option<PaneTreeNode>,
}

/// One node of a [`PaneTreeSnapshot`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PaneTreeNode {
    Leaf {
        view: String,
        focused: bool,
        popup: bool,
    },
    Split {
        orientation: SplitOrientation,
        children: Vec<PaneTreeNode>,
    },
    Stack {
        active: usize,
        members: Vec<PaneTreeNode>,
    },
}

impl PaneTreeNode {
    /// Number of leaves in this subtree.
    pub fn leaf_count(&self) -> usize {
        match self {
            PaneTreeNode::Leaf { .. } => 1,
            PaneTreeNode::Split { children, .. } => {
                children.iter().map(PaneTreeNode::leaf_count).sum()
            }
            PaneTreeNode::Stack { members, .. } => {
                members.iter().map(PaneTreeNode::leaf_count).sum()
            }
        }
    }

    /// View ids of all leaves in depth-first order.
    pub fn collect_views(&self, out: &mut Vec<String>) {
        match self {
            PaneTreeNode::Leaf { view, .. } => out.push(view.clone()),
            PaneTreeNode::Split { children, .. } => {
                for child in children {
                    child.collect_views(out);
                }
            }
            PaneTreeNode::Stack { members, .. } => {
                for member in members {
                    member.collect_views(out);
                }
            }
        }
    }

    /// Number of leaves marked focused in this subtree.
    pub fn focused_leaf_count(&self) -> usize {
        match self {
            PaneTreeNode::Leaf { focused, .. } => usize::from(*focused),
            PaneTreeNode::Split { children, .. } => {
                children.iter().map(PaneTreeNode::focused_leaf_count).sum()
            }
            PaneTreeNode::Stack { members, .. } => {
                members.iter().map(PaneTreeNode::focused_leaf_count).sum()
            }
        }
    }
}
