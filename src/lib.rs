//! trellis: the workspace engine of a tiling, multi-pane web browser.
//!
//! The engine maintains, per tab, a tree of web-view panes arranged as
//! recursive binary splits, tabbed stacks, and popup attachments, and it
//! coordinates focus, navigation, pane lifecycle, and the creation of
//! tabs and popups requested by in-page scripts.
//!
//! The concrete widget toolkit and web view are not part of this crate:
//! the embedding browser implements the [`host::HostBackend`] and
//! [`host::PaneView`] traits and forwards host signals (hover, clicks,
//! window intents, title changes) into the engine's entry points. All
//! engine state lives on the single UI context; the embedder drives
//! deferred work from its idle and frame-tick hooks and advances the
//! engine [`clock::Clock`] from its frame loop.
//!
//! Start at [`layout::tabs::TabManager`] for the embedding surface, or at
//! [`layout::Workspace`] for a single workspace.

pub mod clock;
pub mod geometry;
pub mod host;
pub mod layout;

pub use clock::Clock;
pub use layout::focus::{FocusChange, FocusSource};
pub use layout::popup::{NavigationPolicy, RouterOutcome};
pub use layout::tabs::{AppCloseOutcome, TabId, TabManager, TabMeta};
pub use layout::tree::{Direction, NodeId, PaneKind};
pub use layout::{ActivePane, CloseOutcome, LayoutError, Options, Workspace};
