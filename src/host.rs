//! Interfaces the engine consumes from its host.
//!
//! The engine never talks to a concrete toolkit or web view. It drives a
//! retained-mode widget host through [`HostBackend`] and individual pages
//! through [`PaneView`]; the embedding browser implements both, and the
//! test suite substitutes an in-memory double.
//!
//! Two host behaviors shape the whole reparenting protocol and are part of
//! this contract:
//!
//! - attaching a widget that still has a parent auto-unparents it first;
//! - unparenting removes any event controllers attached under the widget,
//!   so the engine re-attaches them from a deferred step rather than ever
//!   deregistering them itself.

use std::fmt;
use std::hash::Hash;

use anyhow::Result;

use crate::geometry::{Rect, Size};

/// View id type of a backend.
pub type ViewIdOf<B> = <<B as HostBackend>::View as PaneView>::Id;

/// Orientation of a divider (paned) widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Event controllers the host can attach to a widget on the engine's
/// behalf. The host owns their lifetime; it drops them on unparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Hover,
    Focus,
}

/// `window.open()` feature subset forwarded to a popup view.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowFeatures {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub toolbar: Option<bool>,
    pub location: Option<bool>,
    pub menubar: Option<bool>,
    pub resizable: Option<bool>,
}

impl WindowFeatures {
    pub fn from_intent(intent: &trellis_bridge::WindowIntent) -> Self {
        Self {
            width: intent.width,
            height: intent.height,
            toolbar: intent.toolbar,
            location: intent.location,
            menubar: intent.menubar,
            resizable: intent.resizable,
        }
    }
}

/// A single web view, as seen from the engine.
///
/// Handles are cheap clones of the same underlying view (the host keeps
/// them reference-counted), so `&self` methods may still mutate view-side
/// state.
pub trait PaneView: Clone + fmt::Debug {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display;
    type Widget: Clone + PartialEq + Eq + Hash + fmt::Debug;

    fn id(&self) -> Self::Id;

    /// The widget rendering page content; focus grabs target this.
    fn widget(&self) -> Self::Widget;

    /// The outermost widget of the view, used for reparenting. This is the
    /// pane container the tree tracks.
    fn root_widget(&self) -> Self::Widget;

    fn load_url(&self, url: &str);
    fn show(&self);
    fn title(&self) -> Option<String>;
    fn current_url(&self) -> Option<String>;

    /// Runs a script in the page. Failures are the caller's to log; the
    /// engine never aborts an operation over a script error.
    fn inject_script(&self, source: &str) -> Result<()>;

    /// Dispatches a custom DOM event into the page's script world.
    fn dispatch_custom_event(&self, name: &str, payload: &serde_json::Value) -> Result<()>;

    /// Mirrors workspace focus into view-internal state.
    fn set_active(&self, active: bool);

    fn set_window_features(&self, features: &WindowFeatures);
}

/// The retained-mode widget host plus the two view factories.
///
/// Widget handles are opaque and cheap to clone; equality identifies the
/// underlying widget. Every engine entry point that can touch widgets
/// takes `&mut` backend, so the embedder keeps single ownership and the
/// engine never stores host callbacks.
pub trait HostBackend {
    type Widget: Clone + PartialEq + Eq + Hash + fmt::Debug;
    type View: PaneView<Widget = Self::Widget>;

    /// Creates an independent view with its own session context.
    fn create_view(&mut self) -> Result<Self::View>;

    /// Creates a view sharing `source`'s session context, for popups that
    /// must stay authenticated with their opener (OAuth).
    fn create_related_view(&mut self, source: &Self::View) -> Result<Self::View>;

    fn create_paned(&mut self, orientation: Orientation) -> Self::Widget;

    /// Creates an ordered vertical box.
    fn create_box(&mut self) -> Self::Widget;

    fn create_title_bar(&mut self) -> Self::Widget;
    fn set_title_bar_text(&mut self, bar: &Self::Widget, title: &str);

    fn create_tab_button(&mut self) -> Self::Widget;
    fn set_tab_button_title(&mut self, button: &Self::Widget, title: &str);

    fn set_progress_fraction(&mut self, widget: &Self::Widget, fraction: f64);

    /// Setting a child that is parented elsewhere auto-unparents it.
    fn paned_set_start_child(&mut self, paned: &Self::Widget, child: Option<&Self::Widget>);
    fn paned_set_end_child(&mut self, paned: &Self::Widget, child: Option<&Self::Widget>);
    fn paned_set_position(&mut self, paned: &Self::Widget, position: i32);

    fn box_append(&mut self, bx: &Self::Widget, child: &Self::Widget);
    fn box_remove(&mut self, bx: &Self::Widget, child: &Self::Widget);
    /// Inserts after `sibling`, or at the front when `sibling` is `None`.
    fn box_insert_after(
        &mut self,
        bx: &Self::Widget,
        child: &Self::Widget,
        sibling: Option<&Self::Widget>,
    );

    /// Single-child container; setting a child auto-unparents both the
    /// previous child and the new child's previous parent edge.
    fn container_set_child(&mut self, container: &Self::Widget, child: Option<&Self::Widget>);

    fn parent(&self, widget: &Self::Widget) -> Option<Self::Widget>;
    fn allocation(&self, widget: &Self::Widget) -> Size;
    fn bounds_in_window(&self, widget: &Self::Widget) -> Option<Rect>;

    fn set_visible(&mut self, widget: &Self::Widget, visible: bool);
    fn is_visible(&self, widget: &Self::Widget) -> bool;

    fn queue_allocate(&mut self, widget: &Self::Widget);
    fn queue_resize(&mut self, widget: &Self::Widget);
    fn queue_draw(&mut self, widget: &Self::Widget);

    fn set_hexpand(&mut self, widget: &Self::Widget, expand: bool);
    fn set_vexpand(&mut self, widget: &Self::Widget, expand: bool);
    fn set_size_request(&mut self, widget: &Self::Widget, width: i32, height: i32);

    fn add_css_class(&mut self, widget: &Self::Widget, class: &str);
    fn remove_css_class(&mut self, widget: &Self::Widget, class: &str);
    fn has_css_class(&self, widget: &Self::Widget, class: &str) -> bool;

    fn grab_focus(&mut self, widget: &Self::Widget) -> bool;
    fn set_focus_child(&mut self, parent: &Self::Widget, child: Option<&Self::Widget>);

    /// Attaches an event controller. The host removes it again whenever the
    /// widget is unparented; the engine re-attaches from its deferred
    /// post-reparent step.
    fn attach_controller(&mut self, widget: &Self::Widget, kind: ControllerKind) -> Result<()>;
}
