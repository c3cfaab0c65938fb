use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use insta::assert_snapshot;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use trellis_bridge::{PaneTreeNode, PaneTreeSnapshot, SplitOrientation, WindowIntent, WindowKind};

use crate::clock::Clock;
use crate::geometry::{Rect, Size};
use crate::host::{ControllerKind, HostBackend, Orientation, PaneView, WindowFeatures};

use super::focus::FocusSource;
use super::popup::{NavigationPolicy, RouterOutcome};
use super::tabs::{AppCloseOutcome, TabManager};
use super::tree::{Direction, NodeId};
use super::{LayoutError, Options, Workspace};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Test doubles: an in-memory widget host and web view
// ============================================================================

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TestWidget(u64);

impl fmt::Debug for TestWidget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WidgetKind {
    Paned(Orientation),
    BoxV,
    TitleBar,
    TabButton,
    Progress,
    Content,
    ViewRoot,
    ViewWidget,
}

#[derive(Debug)]
struct WidgetRecord {
    kind: WidgetKind,
    parent: Option<TestWidget>,
    /// Ordered children for boxes and single-child containers.
    children: Vec<TestWidget>,
    start_child: Option<TestWidget>,
    end_child: Option<TestWidget>,
    divider_pos: Option<i32>,
    visible: bool,
    css: Vec<String>,
    hexpand: bool,
    vexpand: bool,
    size_request: Option<(i32, i32)>,
    bounds: Option<Rect>,
    label: String,
    controllers: Vec<ControllerKind>,
    progress: f64,
}

impl WidgetRecord {
    fn new(kind: WidgetKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            start_child: None,
            end_child: None,
            divider_pos: None,
            visible: true,
            css: Vec::new(),
            hexpand: false,
            vexpand: false,
            size_request: None,
            bounds: None,
            label: String::new(),
            controllers: Vec::new(),
            progress: 0.0,
        }
    }
}

#[derive(Debug)]
struct TestViewInner {
    id: u64,
    widget: TestWidget,
    root_widget: TestWidget,
    related_to: Option<u64>,
    urls: RefCell<Vec<String>>,
    title: RefCell<Option<String>>,
    active: Cell<bool>,
    shown: Cell<bool>,
    events: RefCell<Vec<(String, serde_json::Value)>>,
    scripts: RefCell<Vec<String>>,
    features: RefCell<Option<WindowFeatures>>,
}

#[derive(Debug, Clone)]
pub struct TestView(Rc<TestViewInner>);

impl TestView {
    fn set_title(&self, title: &str) {
        *self.0.title.borrow_mut() = Some(title.to_string());
    }

    fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.0.events.borrow().clone()
    }

    fn scripts(&self) -> Vec<String> {
        self.0.scripts.borrow().clone()
    }

    fn loaded_urls(&self) -> Vec<String> {
        self.0.urls.borrow().clone()
    }

    fn is_related(&self) -> bool {
        self.0.related_to.is_some()
    }

    fn is_active(&self) -> bool {
        self.0.active.get()
    }
}

impl PaneView for TestView {
    type Id = u64;
    type Widget = TestWidget;

    fn id(&self) -> u64 {
        self.0.id
    }

    fn widget(&self) -> TestWidget {
        self.0.widget.clone()
    }

    fn root_widget(&self) -> TestWidget {
        self.0.root_widget.clone()
    }

    fn load_url(&self, url: &str) {
        self.0.urls.borrow_mut().push(url.to_string());
    }

    fn show(&self) {
        self.0.shown.set(true);
    }

    fn title(&self) -> Option<String> {
        self.0.title.borrow().clone()
    }

    fn current_url(&self) -> Option<String> {
        self.0.urls.borrow().last().cloned()
    }

    fn inject_script(&self, source: &str) -> anyhow::Result<()> {
        self.0.scripts.borrow_mut().push(source.to_string());
        Ok(())
    }

    fn dispatch_custom_event(&self, name: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        self.0
            .events
            .borrow_mut()
            .push((name.to_string(), payload.clone()));
        Ok(())
    }

    fn set_active(&self, active: bool) {
        self.0.active.set(active);
    }

    fn set_window_features(&self, features: &WindowFeatures) {
        *self.0.features.borrow_mut() = Some(*features);
    }
}

/// In-memory widget host with the two behaviors the binder is built
/// around: attaching auto-unparents, and unparenting drops controllers.
#[derive(Debug)]
pub struct TestBackend {
    widgets: HashMap<TestWidget, WidgetRecord>,
    next_widget: u64,
    views: HashMap<u64, TestView>,
    next_view: u64,
    window: Size,
    focus_grabbed: Option<TestWidget>,
    fail_next_view: bool,
}

const TITLE_BAR_HEIGHT: f64 = 24.0;

impl TestBackend {
    pub fn new() -> Self {
        Self {
            widgets: HashMap::new(),
            next_widget: 0,
            views: HashMap::new(),
            next_view: 0,
            window: Size::new(1280.0, 720.0),
            focus_grabbed: None,
            fail_next_view: false,
        }
    }

    fn alloc(&mut self, kind: WidgetKind) -> TestWidget {
        self.next_widget += 1;
        let widget = TestWidget(self.next_widget);
        self.widgets.insert(widget.clone(), WidgetRecord::new(kind));
        widget
    }

    pub fn create_content(&mut self) -> TestWidget {
        let w = self.alloc(WidgetKind::Content);
        self.relayout();
        w
    }

    pub fn create_progress(&mut self) -> TestWidget {
        self.alloc(WidgetKind::Progress)
    }

    fn record(&self, widget: &TestWidget) -> &WidgetRecord {
        self.widgets.get(widget).expect("unknown widget")
    }

    fn record_mut(&mut self, widget: &TestWidget) -> &mut WidgetRecord {
        self.widgets.get_mut(widget).expect("unknown widget")
    }

    pub fn view(&self, id: u64) -> TestView {
        self.views.get(&id).expect("unknown view").clone()
    }

    pub fn last_view_id(&self) -> u64 {
        self.next_view
    }

    pub fn label(&self, widget: &TestWidget) -> String {
        self.record(widget).label.clone()
    }

    pub fn controllers(&self, widget: &TestWidget) -> Vec<ControllerKind> {
        self.record(widget).controllers.clone()
    }

    pub fn size_request(&self, widget: &TestWidget) -> Option<(i32, i32)> {
        self.record(widget).size_request
    }

    pub fn paned_position(&self, widget: &TestWidget) -> Option<i32> {
        self.record(widget).divider_pos
    }

    pub fn content_child(&self, content: &TestWidget) -> Option<TestWidget> {
        self.record(content).children.first().cloned()
    }

    pub fn progress_fraction(&self, widget: &TestWidget) -> f64 {
        self.record(widget).progress
    }

    fn make_view(&mut self, related_to: Option<u64>) -> anyhow::Result<TestView> {
        if self.fail_next_view {
            self.fail_next_view = false;
            anyhow::bail!("view factory unavailable");
        }
        let root = self.alloc(WidgetKind::ViewRoot);
        let widget = self.alloc(WidgetKind::ViewWidget);
        self.record_mut(&widget).parent = Some(root.clone());
        self.record_mut(&root).children.push(widget.clone());

        self.next_view += 1;
        let view = TestView(Rc::new(TestViewInner {
            id: self.next_view,
            widget,
            root_widget: root,
            related_to,
            urls: RefCell::new(Vec::new()),
            title: RefCell::new(None),
            active: Cell::new(false),
            shown: Cell::new(false),
            events: RefCell::new(Vec::new()),
            scripts: RefCell::new(Vec::new()),
            features: RefCell::new(None),
        }));
        self.views.insert(view.id(), view.clone());
        self.relayout();
        Ok(view)
    }

    /// Unparenting removes the widget's (and its subtree's) controllers,
    /// mirroring the host contract the engine is written against.
    fn unparent(&mut self, widget: &TestWidget) {
        let parent = self.record_mut(widget).parent.take();
        if let Some(parent) = parent {
            let record = self.record_mut(&parent);
            record.children.retain(|c| c != widget);
            if record.start_child.as_ref() == Some(widget) {
                record.start_child = None;
            }
            if record.end_child.as_ref() == Some(widget) {
                record.end_child = None;
            }
        }
        self.drop_controllers(widget);
    }

    fn drop_controllers(&mut self, widget: &TestWidget) {
        let mut pending = vec![widget.clone()];
        while let Some(current) = pending.pop() {
            let record = self.record_mut(&current);
            record.controllers.clear();
            pending.extend(record.children.iter().cloned());
            pending.extend(record.start_child.iter().cloned());
            pending.extend(record.end_child.iter().cloned());
        }
    }

    fn adopt(&mut self, parent: &TestWidget, child: &TestWidget) {
        self.unparent(child);
        self.record_mut(child).parent = Some(parent.clone());
    }

    fn relayout(&mut self) {
        let roots: Vec<TestWidget> = self
            .widgets
            .iter()
            .filter(|(_, record)| record.parent.is_none())
            .map(|(widget, _)| widget.clone())
            .collect();
        let window = Rect::from_size(self.window);
        for root in roots {
            self.layout_widget(&root, window);
        }
    }

    fn layout_widget(&mut self, widget: &TestWidget, rect: Rect) {
        let (kind, children, start, end, divider) = {
            let record = self.record(widget);
            (
                record.kind,
                record.children.clone(),
                record.start_child.clone(),
                record.end_child.clone(),
                record.divider_pos,
            )
        };
        self.record_mut(widget).bounds = Some(rect);

        match kind {
            WidgetKind::Paned(orientation) => {
                let (first_rect, second_rect) = match orientation {
                    Orientation::Horizontal => {
                        let first_w = divider.map(f64::from).unwrap_or(rect.size.w / 2.0);
                        let first_w = first_w.clamp(0.0, rect.size.w);
                        (
                            Rect::new((rect.loc.x, rect.loc.y), (first_w, rect.size.h)),
                            Rect::new(
                                (rect.loc.x + first_w, rect.loc.y),
                                (rect.size.w - first_w, rect.size.h),
                            ),
                        )
                    }
                    Orientation::Vertical => {
                        let first_h = divider.map(f64::from).unwrap_or(rect.size.h / 2.0);
                        let first_h = first_h.clamp(0.0, rect.size.h);
                        (
                            Rect::new((rect.loc.x, rect.loc.y), (rect.size.w, first_h)),
                            Rect::new(
                                (rect.loc.x, rect.loc.y + first_h),
                                (rect.size.w, rect.size.h - first_h),
                            ),
                        )
                    }
                };
                if let Some(start) = start {
                    self.layout_widget(&start, first_rect);
                }
                if let Some(end) = end {
                    self.layout_widget(&end, second_rect);
                }
            }
            WidgetKind::BoxV => {
                let mut title_bars = 0usize;
                let mut fills = 0usize;
                for child in &children {
                    let record = self.record(child);
                    if !record.visible {
                        continue;
                    }
                    if record.kind == WidgetKind::TitleBar {
                        title_bars += 1;
                    } else {
                        fills += 1;
                    }
                }
                let fill_height = ((rect.size.h - TITLE_BAR_HEIGHT * title_bars as f64)
                    / fills.max(1) as f64)
                    .max(0.0);

                let mut y = rect.loc.y;
                for child in children {
                    let record = self.record(&child);
                    if !record.visible {
                        let zero = Rect::new((rect.loc.x, y), (rect.size.w, 0.0));
                        self.layout_widget(&child, zero);
                        continue;
                    }
                    let height = if record.kind == WidgetKind::TitleBar {
                        TITLE_BAR_HEIGHT
                    } else {
                        fill_height
                    };
                    let child_rect = Rect::new((rect.loc.x, y), (rect.size.w, height));
                    self.layout_widget(&child, child_rect);
                    y += height;
                }
            }
            _ => {
                for child in children {
                    self.layout_widget(&child, rect);
                }
            }
        }
    }
}

impl HostBackend for TestBackend {
    type Widget = TestWidget;
    type View = TestView;

    fn create_view(&mut self) -> anyhow::Result<TestView> {
        self.make_view(None)
    }

    fn create_related_view(&mut self, source: &TestView) -> anyhow::Result<TestView> {
        let source_id = source.id();
        self.make_view(Some(source_id))
    }

    fn create_paned(&mut self, orientation: Orientation) -> TestWidget {
        self.alloc(WidgetKind::Paned(orientation))
    }

    fn create_box(&mut self) -> TestWidget {
        self.alloc(WidgetKind::BoxV)
    }

    fn create_title_bar(&mut self) -> TestWidget {
        self.alloc(WidgetKind::TitleBar)
    }

    fn set_title_bar_text(&mut self, bar: &TestWidget, title: &str) {
        self.record_mut(bar).label = title.to_string();
    }

    fn create_tab_button(&mut self) -> TestWidget {
        self.alloc(WidgetKind::TabButton)
    }

    fn set_tab_button_title(&mut self, button: &TestWidget, title: &str) {
        self.record_mut(button).label = title.to_string();
    }

    fn set_progress_fraction(&mut self, widget: &TestWidget, fraction: f64) {
        self.record_mut(widget).progress = fraction;
    }

    fn paned_set_start_child(&mut self, paned: &TestWidget, child: Option<&TestWidget>) {
        if let Some(old) = self.record(paned).start_child.clone() {
            self.unparent(&old);
        }
        if let Some(child) = child {
            self.adopt(paned, child);
            self.record_mut(paned).start_child = Some(child.clone());
        }
        self.relayout();
    }

    fn paned_set_end_child(&mut self, paned: &TestWidget, child: Option<&TestWidget>) {
        if let Some(old) = self.record(paned).end_child.clone() {
            self.unparent(&old);
        }
        if let Some(child) = child {
            self.adopt(paned, child);
            self.record_mut(paned).end_child = Some(child.clone());
        }
        self.relayout();
    }

    fn paned_set_position(&mut self, paned: &TestWidget, position: i32) {
        self.record_mut(paned).divider_pos = Some(position);
        self.relayout();
    }

    fn box_append(&mut self, bx: &TestWidget, child: &TestWidget) {
        self.adopt(bx, child);
        self.record_mut(bx).children.push(child.clone());
        self.relayout();
    }

    fn box_remove(&mut self, bx: &TestWidget, child: &TestWidget) {
        if self.record(bx).children.contains(child) {
            self.unparent(child);
        }
        self.relayout();
    }

    fn box_insert_after(
        &mut self,
        bx: &TestWidget,
        child: &TestWidget,
        sibling: Option<&TestWidget>,
    ) {
        self.adopt(bx, child);
        let record = self.record_mut(bx);
        let index = match sibling {
            Some(sibling) => record
                .children
                .iter()
                .position(|c| c == sibling)
                .map(|i| i + 1)
                .unwrap_or(record.children.len()),
            None => 0,
        };
        record.children.insert(index, child.clone());
        self.relayout();
    }

    fn container_set_child(&mut self, container: &TestWidget, child: Option<&TestWidget>) {
        if let Some(old) = self.record(container).children.first().cloned() {
            self.unparent(&old);
        }
        if let Some(child) = child {
            self.adopt(container, child);
            self.record_mut(container).children.push(child.clone());
        }
        self.relayout();
    }

    fn parent(&self, widget: &TestWidget) -> Option<TestWidget> {
        self.record(widget).parent.clone()
    }

    fn allocation(&self, widget: &TestWidget) -> Size {
        self.record(widget)
            .bounds
            .map(|bounds| bounds.size)
            .unwrap_or_default()
    }

    fn bounds_in_window(&self, widget: &TestWidget) -> Option<Rect> {
        self.record(widget).bounds
    }

    fn set_visible(&mut self, widget: &TestWidget, visible: bool) {
        self.record_mut(widget).visible = visible;
        self.relayout();
    }

    fn is_visible(&self, widget: &TestWidget) -> bool {
        self.record(widget).visible
    }

    fn queue_allocate(&mut self, _widget: &TestWidget) {}
    fn queue_resize(&mut self, _widget: &TestWidget) {}
    fn queue_draw(&mut self, _widget: &TestWidget) {}

    fn set_hexpand(&mut self, widget: &TestWidget, expand: bool) {
        self.record_mut(widget).hexpand = expand;
    }

    fn set_vexpand(&mut self, widget: &TestWidget, expand: bool) {
        self.record_mut(widget).vexpand = expand;
    }

    fn set_size_request(&mut self, widget: &TestWidget, width: i32, height: i32) {
        self.record_mut(widget).size_request = Some((width, height));
    }

    fn add_css_class(&mut self, widget: &TestWidget, class: &str) {
        let record = self.record_mut(widget);
        if !record.css.iter().any(|c| c == class) {
            record.css.push(class.to_string());
        }
    }

    fn remove_css_class(&mut self, widget: &TestWidget, class: &str) {
        self.record_mut(widget).css.retain(|c| c != class);
    }

    fn has_css_class(&self, widget: &TestWidget, class: &str) -> bool {
        self.record(widget).css.iter().any(|c| c == class)
    }

    fn grab_focus(&mut self, widget: &TestWidget) -> bool {
        self.focus_grabbed = Some(widget.clone());
        true
    }

    fn set_focus_child(&mut self, _parent: &TestWidget, _child: Option<&TestWidget>) {}

    fn attach_controller(
        &mut self,
        widget: &TestWidget,
        kind: ControllerKind,
    ) -> anyhow::Result<()> {
        let record = self.record_mut(widget);
        if !record.controllers.contains(&kind) {
            record.controllers.push(kind);
        }
        Ok(())
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    host: TestBackend,
    manager: TabManager<TestBackend>,
    clock: Clock,
    content: TestWidget,
    tab_bar: TestWidget,
    progress: TestWidget,
    pending_probes: Vec<u64>,
    next_request: u64,
}

impl Fixture {
    fn new() -> Self {
        Self::with_options(Options::default())
    }

    fn with_options(options: Options) -> Self {
        init_logging();
        let mut host = TestBackend::new();
        let content = host.create_content();
        let tab_bar = HostBackend::create_box(&mut host);
        let progress = host.create_progress();
        let clock = Clock::with_time(Duration::ZERO);
        let manager = TabManager::new(
            content.clone(),
            tab_bar.clone(),
            Some(progress.clone()),
            Rc::new(options),
            clock.clone(),
        );

        let mut fixture = Self {
            host,
            manager,
            clock,
            content,
            tab_bar,
            progress,
            pending_probes: Vec::new(),
            next_request: 0,
        };
        fixture
            .manager
            .create_tab(&mut fixture.host, Some("https://example.com/"))
            .unwrap()
            .expect("first tab is never debounced");
        fixture.settle();
        fixture
    }

    fn ws(&mut self) -> &mut Workspace<TestBackend> {
        self.manager
            .active_workspace_mut()
            .expect("active workspace")
    }

    fn focused(&mut self) -> NodeId {
        self.ws().focused_leaf().expect("a focused leaf")
    }

    /// Focused leaf, tolerating the window between a close and the
    /// deferred focus hand-off. Used by the op fuzzer.
    fn try_focused(&mut self) -> Option<NodeId> {
        self.ws().focused_leaf()
    }

    fn focused_view(&mut self) -> u64 {
        let leaf = self.focused();
        self.manager
            .active_workspace()
            .unwrap()
            .tree()
            .leaf(leaf)
            .unwrap()
            .view
            .id()
    }

    fn leaf_of(&self, view: u64) -> NodeId {
        self.manager
            .active_workspace()
            .unwrap()
            .tree()
            .leaf_for_view(&view)
            .expect("leaf for view")
    }

    fn split(&mut self, direction: Direction) -> NodeId {
        let target = self.focused();
        let Self { host, manager, .. } = self;
        manager
            .active_workspace_mut()
            .unwrap()
            .split(host, target, direction, None)
            .expect("split")
    }

    fn stack(&mut self) -> NodeId {
        let target = self.focused();
        let Self { host, manager, .. } = self;
        manager
            .active_workspace_mut()
            .unwrap()
            .stack(host, target)
            .expect("stack")
    }

    fn close(&mut self, leaf: NodeId) -> AppCloseOutcome {
        let Self { host, manager, .. } = self;
        manager.close_pane(host, leaf).expect("close")
    }

    fn navigate(&mut self, direction: Direction) -> bool {
        let Self { host, manager, .. } = self;
        manager
            .active_workspace_mut()
            .unwrap()
            .focus_neighbor(host, direction)
    }

    fn navigate_stack(&mut self, direction: Direction) -> bool {
        let Self { host, manager, .. } = self;
        manager
            .active_workspace_mut()
            .unwrap()
            .navigate_stack(host, direction)
    }

    fn send_intent(&mut self, source: u64, intent: WindowIntent) -> RouterOutcome {
        let views_before = self.host.last_view_id();
        let outcome = {
            let Self { host, manager, .. } = self;
            manager.handle_window_intent(host, &source, intent)
        };
        if outcome == RouterOutcome::DetectionPending {
            let probe = self.host.last_view_id();
            assert!(probe > views_before, "detection must create a probe view");
            self.pending_probes.push(probe);
        }
        outcome
    }

    fn request_id(&mut self) -> String {
        self.next_request += 1;
        format!("req-{}", self.next_request)
    }

    fn new_tab(&mut self) -> usize {
        self.clock.advance(Duration::from_millis(250));
        self.manager
            .create_tab(&mut self.host, None)
            .unwrap()
            .expect("tab creation past the debounce window");
        self.settle();
        self.manager.active_index()
    }

    fn settle(&mut self) {
        let Self { host, manager, .. } = self;
        for _ in 0..4 {
            manager.on_idle(host);
            manager.on_frame_tick(host);
        }
    }

    fn advance(&mut self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
        self.settle();
    }

    fn verify(&self) {
        self.manager.verify_invariants(&self.host);
    }

    fn snapshot(&self) -> PaneTreeSnapshot {
        self.manager.active_workspace().unwrap().snapshot()
    }

    fn compact(&self) -> String {
        render(&self.snapshot())
    }
}

fn render(snapshot: &PaneTreeSnapshot) -> String {
    snapshot
        .root
        .as_ref()
        .map(render_node)
        .unwrap_or_else(|| String::from("empty"))
}

fn render_node(node: &PaneTreeNode) -> String {
    match node {
        PaneTreeNode::Leaf {
            view,
            focused,
            popup,
        } => format!(
            "v{view}{}{}",
            if *popup { "!" } else { "" },
            if *focused { "*" } else { "" }
        ),
        PaneTreeNode::Split {
            orientation,
            children,
        } => {
            let tag = match orientation {
                SplitOrientation::Horizontal => "h",
                SplitOrientation::Vertical => "v",
            };
            let inner: Vec<String> = children.iter().map(render_node).collect();
            format!("{tag}({})", inner.join(" "))
        }
        PaneTreeNode::Stack { active, members } => {
            let inner: Vec<String> = members.iter().map(render_node).collect();
            format!("stack@{active}[{}]", inner.join(" "))
        }
    }
}

fn popup_intent(url: &str) -> WindowIntent {
    WindowIntent::new(url, WindowKind::Popup)
}

// ============================================================================
// Splits and closes
// ============================================================================

#[test]
fn split_right_then_close_restores_single_pane() {
    let mut f = Fixture::new();
    let before = f.snapshot();

    let new_leaf = f.split(Direction::Right);
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"h(v1 v2*)");

    f.close(new_leaf);
    f.settle();
    f.verify();
    assert_eq!(f.snapshot(), before);
    assert_eq!(f.focused_view(), 1);
}

#[test]
fn split_left_and_up_place_new_pane_first() {
    let mut f = Fixture::new();
    f.split(Direction::Left);
    f.settle();
    assert_snapshot!(f.compact(), @"h(v2* v1)");

    let mut f = Fixture::new();
    f.split(Direction::Up);
    f.settle();
    assert_snapshot!(f.compact(), @"v(v2* v1)");

    let mut f = Fixture::new();
    f.split(Direction::Down);
    f.settle();
    assert_snapshot!(f.compact(), @"v(v1 v2*)");
}

#[test]
fn root_split_replaces_content_child() {
    let mut f = Fixture::new();
    let leaf_widget = f.host.content_child(&f.content).unwrap();
    f.split(Direction::Right);
    f.settle();

    let new_child = f.host.content_child(&f.content).unwrap();
    assert_ne!(
        leaf_widget, new_child,
        "root split must swap the content child"
    );

    let ws = f.manager.active_workspace().unwrap();
    assert_eq!(ws.root_widget().unwrap(), new_child);
}

#[test]
fn cascade_promotion_across_nested_splits() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.split(Direction::Down);
    f.settle();
    assert_snapshot!(f.compact(), @"h(v1 v(v2 v3*))");

    let b = f.leaf_of(2);
    f.close(b);
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"h(v1 v3*)");

    let c = f.leaf_of(3);
    f.close(c);
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"v1*");
}

#[test]
fn close_preserves_remaining_leaves() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.split(Direction::Down);
    f.settle();

    let middle = f.leaf_of(2);
    f.close(middle);
    f.settle();

    let mut views = Vec::new();
    if let Some(root) = &f.snapshot().root {
        root.collect_views(&mut views);
    }
    assert_eq!(views, ["1", "3"]);
}

#[test]
fn last_pane_close_signals_exit_without_mutation() {
    let mut f = Fixture::new();
    let before = f.snapshot();
    let leaf = f.focused();
    assert_eq!(f.close(leaf), AppCloseOutcome::Exit);
    assert_eq!(f.snapshot(), before);
    f.verify();
}

#[test]
fn last_pane_of_secondary_tab_closes_the_tab() {
    let mut f = Fixture::new();
    f.new_tab();
    assert_eq!(f.manager.tab_count(), 2);

    let leaf = f.focused();
    assert_eq!(f.close(leaf), AppCloseOutcome::TabClosed);
    f.settle();
    assert_eq!(f.manager.tab_count(), 1);
    f.verify();
}

#[test]
fn invalid_targets_fail_without_mutation() {
    let mut f = Fixture::new();
    let doomed = f.split(Direction::Right);
    f.settle();
    f.close(doomed);
    f.settle();
    let before = f.snapshot();

    {
        let Fixture { host, manager, .. } = &mut f;
        let ws = manager.active_workspace_mut().unwrap();
        assert!(matches!(
            ws.close(host, doomed),
            Err(LayoutError::InvalidTarget)
        ));
        assert!(matches!(
            ws.split(host, doomed, Direction::Right, None),
            Err(LayoutError::InvalidTarget)
        ));
        assert!(matches!(
            ws.stack(host, doomed),
            Err(LayoutError::InvalidTarget)
        ));
    }

    assert_eq!(f.snapshot(), before);
    f.verify();
}

#[test]
fn view_factory_failure_leaves_tree_unchanged() {
    let mut f = Fixture::new();
    let before = f.snapshot();
    let target = f.focused();

    f.host.fail_next_view = true;
    {
        let Fixture { host, manager, .. } = &mut f;
        let result = manager
            .active_workspace_mut()
            .unwrap()
            .split(host, target, Direction::Right, None);
        assert!(matches!(result, Err(LayoutError::ViewFactory(_))));
    }
    assert_eq!(f.snapshot(), before);
    f.verify();
}

#[test]
fn divider_centers_after_split() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.settle();

    let ws = f.manager.active_workspace().unwrap();
    let root = ws.tree().root().unwrap();
    let split = ws.tree().split(root).expect("root is a split");
    assert!(split.divider_synced);
    assert_eq!(f.host.paned_position(&split.divider), Some(640));
}

#[test]
fn split_shows_view_and_grabs_host_focus() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.settle();

    let view = f.host.view(2);
    assert!(view.0.shown.get());
    assert_eq!(f.host.focus_grabbed, Some(view.widget()));
}

#[test]
fn controllers_reattach_after_split() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.settle();

    let ws = f.manager.active_workspace().unwrap();
    for leaf_id in ws.tree().collect_leaves() {
        let leaf = ws.tree().leaf(leaf_id).unwrap();
        let controllers = f.host.controllers(&leaf.container);
        assert!(controllers.contains(&ControllerKind::Hover), "{leaf_id:?}");
        assert!(controllers.contains(&ControllerKind::Focus), "{leaf_id:?}");
        assert!(leaf.pending_reattach.is_empty());
    }
}

// ============================================================================
// Stacks
// ============================================================================

#[test]
fn stack_and_navigate_wraps() {
    let mut f = Fixture::new();
    f.stack();
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"stack@1[v1 v2*]");

    assert!(f.navigate_stack(Direction::Up));
    assert_snapshot!(f.compact(), @"stack@0[v1* v2]");

    assert!(f.navigate_stack(Direction::Up));
    assert_snapshot!(f.compact(), @"stack@1[v1 v2*]");
}

#[test]
fn stack_close_member_collapses_to_plain_pane() {
    let mut f = Fixture::new();
    let before = f.snapshot();

    let member = f.stack();
    f.settle();
    f.close(member);
    f.settle();
    f.verify();

    assert_eq!(f.snapshot(), before);
    let ws = f.manager.active_workspace().unwrap();
    let root = ws.tree().root().unwrap();
    assert!(ws.tree().leaf(root).unwrap().title_bar.is_none());
}

#[test]
fn stacking_a_member_inserts_after_it() {
    let mut f = Fixture::new();
    f.stack();
    f.settle();
    // Focused member is v2 at index 1; the next member lands at index 2.
    f.stack();
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"stack@2[v1 v2 v3*]");

    // Stacking from the middle member inserts between it and the last.
    f.navigate_stack(Direction::Up);
    f.stack();
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"stack@2[v1 v2 v4* v3]");
}

#[test]
fn stack_visibility_rule_holds() {
    let mut f = Fixture::new();
    f.stack();
    f.stack();
    f.settle();

    let ws = f.manager.active_workspace().unwrap();
    let root = ws.tree().root().unwrap();
    let stack = ws.tree().stack(root).expect("root is a stack");
    for (index, &member) in stack.members.iter().enumerate() {
        let leaf = ws.tree().leaf(member).unwrap();
        let container_visible = f.host.is_visible(&leaf.container);
        let title_visible = f.host.is_visible(leaf.title_bar.as_ref().unwrap());
        if index == stack.active_index {
            assert!(container_visible && !title_visible);
        } else {
            assert!(!container_visible && title_visible);
        }
    }
}

#[test]
fn stack_member_close_clamps_active_index() {
    let mut f = Fixture::new();
    f.stack();
    f.stack();
    f.settle();

    // Close the last member (active, index 2); focus falls to index 1.
    let focused = f.focused();
    f.close(focused);
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"stack@1[v1 v2*]");
}

#[test]
fn title_bar_click_activates_member() {
    let mut f = Fixture::new();
    f.stack();
    f.settle();

    let (first_member_bar, first_member) = {
        let ws = f.manager.active_workspace().unwrap();
        let root = ws.tree().root().unwrap();
        let stack = ws.tree().stack(root).unwrap();
        let first = stack.members[0];
        (
            ws.tree().leaf(first).unwrap().title_bar.clone().unwrap(),
            first,
        )
    };

    {
        let Fixture { host, manager, .. } = &mut f;
        manager
            .active_workspace_mut()
            .unwrap()
            .on_title_bar_clicked(host, &first_member_bar);
    }
    assert_eq!(f.focused(), first_member);
    f.verify();
}

#[test]
fn title_change_refreshes_stack_bar_only() {
    let mut f = Fixture::new();
    f.stack();
    f.settle();

    // v1 is the collapsed member; update its page title.
    f.host.view(1).set_title("Issue 42 - tracker");
    {
        let Fixture { host, manager, .. } = &mut f;
        manager.on_title_changed(host, &1);
    }

    let ws = f.manager.active_workspace().unwrap();
    let root = ws.tree().root().unwrap();
    let stack = ws.tree().stack(root).unwrap();
    let first = ws.tree().leaf(stack.members[0]).unwrap();
    assert_eq!(
        f.host.label(first.title_bar.as_ref().unwrap()),
        "Issue 42 - tracker"
    );

    // The tab keeps its default title.
    assert_eq!(f.manager.tabs()[0].title, "Tab 1");
}

#[test]
fn stack_navigate_outside_stack_returns_false() {
    let mut f = Fixture::new();
    assert!(!f.navigate_stack(Direction::Up));
    f.split(Direction::Right);
    f.settle();
    assert!(!f.navigate_stack(Direction::Down));
}

// ============================================================================
// Focus and navigation
// ============================================================================

#[test]
fn workspace_focus_events_fire_blur_then_focus() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.settle();

    let first = f.host.view(1);
    let second = f.host.view(2);

    // v1 got its bootstrap focus event, then a blur when v2 took over.
    let events = first.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, trellis_bridge::WORKSPACE_FOCUS_EVENT);
    assert_eq!(events[0].1["active"], true);
    assert_eq!(events[1].1["active"], false);
    assert_eq!(events[1].1["webviewId"], "1");
    assert!(events[1].1["paneId"].is_string());

    let events = second.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1["active"], true);
    assert!(!first.is_active());
    assert!(second.is_active());
}

#[test]
fn geometric_navigation_moves_left_and_right() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.settle();
    assert_eq!(f.focused_view(), 2);

    assert!(f.navigate(Direction::Left));
    assert_eq!(f.focused_view(), 1);

    assert!(f.navigate(Direction::Right));
    assert_eq!(f.focused_view(), 2);

    // Nothing further right; a repeat is a no-op.
    assert!(!f.navigate(Direction::Right));
    assert_eq!(f.focused_view(), 2);
}

#[test]
fn navigation_on_single_pane_returns_false() {
    let mut f = Fixture::new();
    for direction in [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ] {
        assert!(!f.navigate(direction));
    }
}

#[test]
fn vertical_navigation_prefers_stack_over_geometry() {
    let mut f = Fixture::new();
    // Top pane v1, bottom is a stack of v2/v3.
    f.split(Direction::Down);
    f.stack();
    f.settle();
    assert_snapshot!(f.compact(), @"v(v1 stack@1[v2 v3*])");

    // Inside a stack, vertical movement cycles members (with wraparound)
    // before any geometric motion happens.
    assert!(f.navigate(Direction::Up));
    assert_eq!(f.focused_view(), 2);
    assert!(f.navigate(Direction::Down));
    assert_eq!(f.focused_view(), 3);
}

#[test]
fn vertical_navigation_enters_stack_at_edge_member() {
    let mut f = Fixture::new();
    f.split(Direction::Down);
    f.stack();
    f.settle();

    // Focus the plain top pane directly.
    let top = f.leaf_of(1);
    {
        let Fixture { host, manager, .. } = &mut f;
        manager
            .active_workspace_mut()
            .unwrap()
            .set_active(host, top, FocusSource::Keyboard);
    }
    assert_eq!(f.focused_view(), 1);

    // Nothing above the top pane.
    assert!(!f.navigate(Direction::Up));

    // Moving down enters the stack from above, at its first member.
    assert!(f.navigate(Direction::Down));
    assert_eq!(f.focused_view(), 2);
    assert_snapshot!(f.compact(), @"v(v1 stack@0[v2* v3])");
}

#[test]
fn horizontal_navigation_treats_stack_as_one_target() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.stack();
    f.settle();
    assert_snapshot!(f.compact(), @"h(v1 stack@1[v2 v3*])");

    assert!(f.navigate(Direction::Left));
    assert_eq!(f.focused_view(), 1);

    // Entering horizontally keeps the stack's active member.
    assert!(f.navigate(Direction::Right));
    assert_eq!(f.focused_view(), 3);
}

#[test]
fn mouse_focus_is_debounced_per_leaf() {
    let mut f = Fixture::new();
    f.split(Direction::Right);
    f.settle();

    {
        let Fixture { host, manager, .. } = &mut f;
        let ws = manager.active_workspace_mut().unwrap();
        ws.on_view_focused(host, &1);
        assert_eq!(ws.focused_leaf(), ws.tree().leaf_for_view(&1));

        // Hopping to another pane is fine; hopping straight back is
        // hover noise and stays put.
        ws.on_view_focused(host, &2);
        ws.on_view_focused(host, &1);
        assert_eq!(ws.focused_leaf(), ws.tree().leaf_for_view(&2));
    }

    f.advance(200);
    let Fixture { host, manager, .. } = &mut f;
    let ws = manager.active_workspace_mut().unwrap();
    ws.on_view_focused(host, &1);
    assert_eq!(ws.focused_leaf(), ws.tree().leaf_for_view(&1));
}

#[test]
fn set_active_ignores_dead_panes() {
    let mut f = Fixture::new();
    let victim = f.split(Direction::Right);
    f.settle();
    f.close(victim);
    f.settle();
    let focused = f.focused();

    let Fixture { host, manager, .. } = &mut f;
    let ws = manager.active_workspace_mut().unwrap();
    ws.set_active(host, victim, FocusSource::Keyboard);
    assert_eq!(ws.focused_leaf(), Some(focused));
    f.verify();
}

#[test]
fn pane_mode_event_reaches_focused_view() {
    let mut f = Fixture::new();
    f.ws()
        .announce_pane_mode(trellis_bridge::PaneModeEvent::Entered, "split");

    let events = f.host.view(1).events();
    let (name, payload) = events.last().expect("a pane-mode event");
    assert_eq!(name, trellis_bridge::PANE_MODE_EVENT);
    assert_eq!(payload["event"], "entered");
    assert_eq!(payload["detail"], "split");
}

// ============================================================================
// Popups and intents
// ============================================================================

#[test]
fn popup_intent_creates_related_pane_with_guards() {
    let mut f = Fixture::new();
    let request = f.request_id();
    let mut intent = popup_intent("https://accounts.example.com/oauth/authorize?client_id=x");
    intent.request_id = Some(request);

    let outcome = f.send_intent(1, intent);
    let RouterOutcome::PaneCreated(popup) = outcome else {
        panic!("expected a pane, got {outcome:?}");
    };
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"h(v1 v2!*)");

    let ws = f.manager.active_workspace().unwrap();
    let leaf = ws.tree().leaf(popup).unwrap();
    assert!(leaf.is_popup);
    assert!(leaf.is_related);
    assert!(leaf.auto_close_on_oauth);
    assert_eq!(leaf.parent_leaf, ws.tree().leaf_for_view(&1));
    assert!(f.host.view(2).is_related());

    let source = ws
        .tree()
        .leaf(ws.tree().leaf_for_view(&1).unwrap())
        .unwrap();
    assert_eq!(source.active_popup_children, vec![2]);

    // Script navigation on the opener is blocked while the popup lives.
    assert_eq!(
        f.manager.navigation_policy(&1, false),
        NavigationPolicy::Block
    );
    assert_eq!(
        f.manager.navigation_policy(&1, true),
        NavigationPolicy::Allow
    );

    // The OAuth handoff record landed in the opener's storage.
    let scripts = f.host.view(1).scripts();
    let handoff = scripts.iter().find(|s| s.contains("popup_mapping_1"));
    assert!(handoff.is_some(), "missing handoff script: {scripts:?}");
}

#[test]
fn popup_close_runs_after_grace_delay() {
    let mut f = Fixture::new();
    let request = f.request_id();
    let mut intent = popup_intent("https://accounts.example.com/oauth/authorize");
    intent.request_id = Some(request);
    f.send_intent(1, intent);
    f.settle();

    f.manager.on_close_requested(&2);
    f.settle();
    // Grace delay has not elapsed; the popup is still there.
    assert_eq!(f.snapshot().root.as_ref().unwrap().leaf_count(), 2);

    f.advance(200);
    f.verify();
    assert_snapshot!(f.compact(), @"v1*");
    assert_eq!(
        f.manager.navigation_policy(&1, false),
        NavigationPolicy::Allow
    );
}

#[test]
fn duplicate_request_ids_are_dropped_within_window() {
    let mut f = Fixture::new();
    let mut intent = popup_intent("https://example.com/popup");
    intent.request_id = Some(String::from("req-dup"));

    assert!(matches!(
        f.send_intent(1, intent.clone()),
        RouterOutcome::PaneCreated(_)
    ));
    assert_eq!(f.send_intent(1, intent.clone()), RouterOutcome::Duplicate);

    // Past the window the id is considered a fresh request again.
    f.advance(250);
    assert!(matches!(
        f.send_intent(1, intent),
        RouterOutcome::PaneCreated(_)
    ));
    f.settle();
    f.verify();
}

#[test]
fn window_close_releases_request_id() {
    let mut f = Fixture::new();
    let mut intent = popup_intent("https://example.com/popup");
    intent.request_id = Some(String::from("req-oauth"));
    f.send_intent(1, intent.clone());
    f.settle();

    f.manager.on_close_requested(&2);
    f.advance(200);

    // The id was released on close, not merely expired.
    assert!(matches!(
        f.send_intent(1, intent),
        RouterOutcome::PaneCreated(_)
    ));
}

#[test]
fn tab_intent_creates_independent_pane() {
    let mut f = Fixture::new();
    let outcome = f.send_intent(1, WindowIntent::new("https://example.org/", WindowKind::Tab));
    let RouterOutcome::PaneCreated(leaf) = outcome else {
        panic!("expected a pane");
    };
    f.settle();
    f.verify();

    let ws = f.manager.active_workspace().unwrap();
    let entry = ws.tree().leaf(leaf).unwrap();
    assert!(!entry.is_popup);
    assert!(!entry.is_related);
    assert!(!f.host.view(2).is_related());
    assert_eq!(
        f.host.view(2).current_url().as_deref(),
        Some("https://example.org/")
    );
}

#[test]
fn smart_detection_timeout_yields_popup() {
    let mut f = Fixture::new();
    let outcome = f.send_intent(
        1,
        WindowIntent::new("https://example.com/unknown", WindowKind::Unspecified),
    );
    assert_eq!(outcome, RouterOutcome::DetectionPending);
    f.settle();
    // Still a single pane while detection runs.
    assert_eq!(f.snapshot().root.as_ref().unwrap().leaf_count(), 1);

    f.advance(1500);
    f.verify();
    assert_snapshot!(f.compact(), @"h(v1 v2!*)");

    let ws = f.manager.active_workspace().unwrap();
    let leaf = ws.tree().leaf(f.leaf_of(2)).unwrap();
    assert!(leaf.is_popup && leaf.is_related);
    // The probe view was reused, not reloaded.
    assert_eq!(f.host.view(2).loaded_urls().len(), 1);
}

#[test]
fn detected_tab_discards_related_probe() {
    let mut f = Fixture::new();
    f.send_intent(
        1,
        WindowIntent::new("https://example.com/app", WindowKind::Unspecified),
    );
    let probe = *f.pending_probes.last().unwrap();

    {
        let Fixture { host, manager, .. } = &mut f;
        manager.on_window_type_detected(host, &probe, WindowKind::Tab);
    }
    f.settle();
    f.verify();

    // A fresh independent view backs the pane; the related probe is gone
    // from the workspace.
    let ws = f.manager.active_workspace().unwrap();
    assert!(ws.tree().leaf_for_view(&probe).is_none());
    let pane_view = f.host.view(probe + 1);
    assert!(!pane_view.is_related());
    assert_eq!(f.snapshot().root.as_ref().unwrap().leaf_count(), 2);

    // The fallback timer was cancelled along with the detection.
    f.advance(2000);
    assert_eq!(f.snapshot().root.as_ref().unwrap().leaf_count(), 2);
}

#[test]
fn popup_minimum_size_is_enforced() {
    let mut f = Fixture::new();
    let mut intent = popup_intent("https://example.com/small");
    intent.width = Some(200);
    intent.height = Some(800);
    let RouterOutcome::PaneCreated(leaf) = f.send_intent(1, intent) else {
        panic!("expected a pane");
    };
    f.settle();

    let container = {
        let ws = f.manager.active_workspace().unwrap();
        ws.tree().leaf(leaf).unwrap().container.clone()
    };
    assert_eq!(f.host.size_request(&container), Some((500, 800)));
    assert_eq!(
        f.host.size_request(&f.host.view(2).widget()),
        Some((500, 800))
    );

    // The raw intent features are forwarded to the view untouched.
    let view = f.host.view(2);
    let features = (*view.0.features.borrow()).expect("features forwarded");
    assert_eq!(features.width, Some(200));
    assert_eq!(features.height, Some(800));
}

#[test]
fn disabled_popup_panes_allow_native_windows() {
    let options = Options {
        open_popups_in_new_pane: false,
        ..Options::default()
    };
    let mut f = Fixture::with_options(options);

    let outcome = f.send_intent(1, popup_intent("https://example.com/popup"));
    assert_eq!(outcome, RouterOutcome::AllowNative);
    assert_eq!(f.snapshot().root.as_ref().unwrap().leaf_count(), 1);
}

#[test]
fn placement_config_controls_split_side() {
    let options = Options {
        popup_placement: Direction::Left,
        ..Options::default()
    };
    let mut f = Fixture::with_options(options);

    f.send_intent(1, popup_intent("https://example.com/popup"));
    f.settle();
    assert_snapshot!(f.compact(), @"h(v2!* v1)");
}

#[test]
fn follow_pane_context_false_splits_focused_pane() {
    let options = Options {
        follow_pane_context: false,
        ..Options::default()
    };
    let mut f = Fixture::with_options(options);
    f.split(Direction::Right);
    f.settle();

    // Focus is on v2; an intent sourced from v1 still splits the focused
    // pane.
    assert_eq!(f.focused_view(), 2);
    f.send_intent(1, popup_intent("https://example.com/popup"));
    f.settle();
    f.verify();
    assert_snapshot!(f.compact(), @"h(v1 h(v2 v3!*))");
}

#[test]
fn smart_detection_disabled_treats_unknown_as_popup() {
    let options = Options {
        smart_detection: false,
        ..Options::default()
    };
    let mut f = Fixture::with_options(options);

    let outcome = f.send_intent(
        1,
        WindowIntent::new("https://example.com/unknown", WindowKind::Unspecified),
    );
    assert!(matches!(outcome, RouterOutcome::PaneCreated(_)));
    f.settle();
    assert_snapshot!(f.compact(), @"h(v1 v2!*)");
}

#[test]
fn should_auto_close_matches_oauth_urls() {
    let f = Fixture::new();
    let ws = f.manager.active_workspace().unwrap();

    for url in [
        "https://accounts.example.com/oauth/authorize",
        "https://id.example.com/AUTH/CALLBACK",
        "https://example.com/login?response_type=code",
        "https://example.com/cb?access_token=abc",
    ] {
        assert!(ws.should_auto_close(url), "{url}");
    }

    assert!(!ws.should_auto_close("https://example.com/docs"));
    // Known false-positive class: plain redirect endpoints still match.
    assert!(ws.should_auto_close("https://example.com/redirect?to=/home"));
}

#[test]
fn oauth_auto_close_config_disables_matching() {
    let options = Options {
        oauth_auto_close: false,
        ..Options::default()
    };
    let f = Fixture::with_options(options);
    let ws = f.manager.active_workspace().unwrap();
    assert!(!ws.should_auto_close("https://accounts.example.com/oauth/authorize"));
}

#[test]
fn navigation_policy_for_unknown_view_allows() {
    let mut f = Fixture::new();
    assert_eq!(
        f.manager.navigation_policy(&999, false),
        NavigationPolicy::Allow
    );
}

// ============================================================================
// Tabs
// ============================================================================

#[test]
fn tab_switch_reattaches_current_root() {
    let mut f = Fixture::new();
    let tab1_root = f.host.content_child(&f.content).unwrap();

    f.new_tab();
    f.split(Direction::Right);
    f.settle();
    let tab2_root = f.host.content_child(&f.content).unwrap();
    assert_ne!(tab1_root, tab2_root);

    {
        let Fixture { host, manager, .. } = &mut f;
        manager.switch_to(host, 0, FocusSource::Keyboard);
    }
    assert_eq!(f.host.content_child(&f.content), Some(tab1_root));

    // Switching back re-queries the current root: the split, not the
    // stale bootstrap leaf.
    {
        let Fixture { host, manager, .. } = &mut f;
        manager.switch_to(host, 1, FocusSource::Keyboard);
    }
    assert_eq!(f.host.content_child(&f.content), Some(tab2_root));
    f.verify();
}

#[test]
fn tab_creation_is_debounced() {
    let mut f = Fixture::new();
    f.clock.advance(Duration::from_millis(250));
    {
        let Fixture { host, manager, .. } = &mut f;
        assert!(manager.create_tab(host, None).unwrap().is_some());
        assert!(manager.create_tab(host, None).unwrap().is_none());
    }
    assert_eq!(f.manager.tab_count(), 2);
}

#[test]
fn tab_bar_visible_only_with_multiple_tabs() {
    let mut f = Fixture::new();
    assert!(!f.host.is_visible(&f.tab_bar));
    f.new_tab();
    assert!(f.host.is_visible(&f.tab_bar));
    let Fixture { host, manager, .. } = &mut f;
    manager.close_tab(host, 1).unwrap();
    assert!(!f.host.is_visible(&f.tab_bar));
}

#[test]
fn sole_tab_cannot_close() {
    let mut f = Fixture::new();
    let Fixture { host, manager, .. } = &mut f;
    assert!(matches!(
        manager.close_tab(host, 0),
        Err(LayoutError::LastTab)
    ));
}

#[test]
fn closing_active_tab_prefers_same_index() {
    let mut f = Fixture::new();
    f.new_tab();
    f.new_tab();
    let ids: Vec<_> = f.manager.tabs().iter().map(|t| t.id.clone()).collect();

    {
        let Fixture { host, manager, .. } = &mut f;
        manager.switch_to(host, 1, FocusSource::Keyboard);
        manager.close_tab(host, 1).unwrap();
    }

    let tabs = f.manager.tabs();
    assert_eq!(tabs.len(), 2);
    assert_eq!(f.manager.active_index(), 1);
    assert_eq!(tabs[1].id, ids[2], "the next tab slides into the slot");
    f.verify();
}

#[test]
fn rename_overrides_default_title() {
    let mut f = Fixture::new();
    {
        let Fixture { host, manager, .. } = &mut f;
        assert!(manager.rename_tab(host, 0, "research"));
    }
    assert_eq!(f.manager.tabs()[0].title, "research");

    // Page titles still do not touch tab titles.
    f.host.view(1).set_title("Some Page");
    {
        let Fixture { host, manager, .. } = &mut f;
        manager.on_title_changed(host, &1);
    }
    assert_eq!(f.manager.tabs()[0].title, "research");
}

#[test]
fn progress_indicator_tracks_active_tab_only() {
    let mut f = Fixture::new();

    {
        let Fixture { host, manager, .. } = &mut f;
        manager.on_load_progress(host, &1, 0.4);
    }
    assert!(f.host.is_visible(&f.progress));
    assert!((f.host.progress_fraction(&f.progress) - 0.4).abs() < f64::EPSILON);

    {
        let Fixture { host, manager, .. } = &mut f;
        manager.on_load_progress(host, &1, 1.0);
    }
    assert!(!f.host.is_visible(&f.progress));

    // A background tab's views do not drive the indicator.
    f.new_tab();
    {
        let Fixture { host, manager, .. } = &mut f;
        manager.on_load_progress(host, &1, 0.5);
    }
    assert!(!f.host.is_visible(&f.progress));

    // Out-of-range values are clamped and treated as idle.
    let active_view = f.focused_view();
    let Fixture { host, manager, .. } = &mut f;
    manager.on_load_progress(host, &active_view, 7.5);
    assert!(!f.host.is_visible(&f.progress));
}

#[test]
fn suspended_workspace_ignores_focus_changes() {
    let mut f = Fixture::new();
    f.new_tab();

    // Tab 1 is in the background now; hover events there are ignored.
    {
        let Fixture { host, manager, .. } = &mut f;
        let background = manager.workspace_at_mut(0).unwrap();
        let leaf = background.tree().leaf_for_view(&1).unwrap();
        background.set_active(host, leaf, FocusSource::Mouse);
        assert!(background.focus_suspended());
    }

    let shared = f.manager.active_pane();
    assert_ne!(shared.get(), Some(1));
    f.verify();
}

// ============================================================================
// Randomized operations
// ============================================================================

fn arbitrary_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Left),
        Just(Direction::Right),
        Just(Direction::Up),
        Just(Direction::Down),
    ]
}

fn arbitrary_vertical() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Up), Just(Direction::Down)]
}

fn arbitrary_kind() -> impl Strategy<Value = WindowKind> {
    prop_oneof![
        Just(WindowKind::Tab),
        Just(WindowKind::Popup),
        Just(WindowKind::Unspecified),
    ]
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    SplitFocused(#[proptest(strategy = "arbitrary_direction()")] Direction),
    StackFocused,
    CloseFocused,
    CloseNth(#[proptest(strategy = "0..6usize")] usize),
    NavigateStack(#[proptest(strategy = "arbitrary_vertical()")] Direction),
    FocusNeighbor(#[proptest(strategy = "arbitrary_direction()")] Direction),
    FocusNth(#[proptest(strategy = "0..6usize")] usize),
    HoverNth(#[proptest(strategy = "0..6usize")] usize),
    OpenIntent {
        #[proptest(strategy = "arbitrary_kind()")]
        kind: WindowKind,
        oauth: bool,
        with_request_id: bool,
    },
    ResolveDetection {
        as_tab: bool,
    },
    CloseRequestNth(#[proptest(strategy = "0..6usize")] usize),
    TitleChangedNth(#[proptest(strategy = "0..6usize")] usize),
    ProgressNth {
        #[proptest(strategy = "0..6usize")]
        nth: usize,
        #[proptest(strategy = "0..=100u32")]
        percent: u32,
    },
    CreateTab,
    CloseActiveTab,
    SwitchTab(#[proptest(strategy = "0..4usize")] usize),
    RenameActiveTab,
    AdvanceClock(#[proptest(strategy = "0..2000u64")] u64),
    Idle,
    FrameTick,
}

fn nth_leaf(f: &mut Fixture, nth: usize) -> Option<NodeId> {
    let leaves = f
        .manager
        .active_workspace()
        .unwrap()
        .tree()
        .collect_leaves();
    if leaves.is_empty() {
        None
    } else {
        Some(leaves[nth % leaves.len()])
    }
}

fn nth_view(f: &mut Fixture, nth: usize) -> Option<u64> {
    let leaf = nth_leaf(f, nth)?;
    f.manager
        .active_workspace()
        .unwrap()
        .tree()
        .leaf(leaf)
        .map(|l| l.view.id())
}

fn apply(f: &mut Fixture, op: Op) {
    match op {
        Op::SplitFocused(direction) => {
            if let Some(target) = f.try_focused() {
                let Fixture { host, manager, .. } = f;
                let _ = manager
                    .active_workspace_mut()
                    .unwrap()
                    .split(host, target, direction, None);
            }
        }
        Op::StackFocused => {
            if let Some(target) = f.try_focused() {
                let Fixture { host, manager, .. } = f;
                let _ = manager.active_workspace_mut().unwrap().stack(host, target);
            }
        }
        Op::CloseFocused => {
            if let Some(leaf) = f.try_focused() {
                let Fixture { host, manager, .. } = f;
                let _ = manager.close_pane(host, leaf);
            }
        }
        Op::CloseNth(nth) => {
            if let Some(leaf) = nth_leaf(f, nth) {
                let Fixture { host, manager, .. } = f;
                let _ = manager.close_pane(host, leaf);
            }
        }
        Op::NavigateStack(direction) => {
            f.navigate_stack(direction);
        }
        Op::FocusNeighbor(direction) => {
            f.navigate(direction);
        }
        Op::FocusNth(nth) => {
            if let Some(leaf) = nth_leaf(f, nth) {
                let Fixture { host, manager, .. } = f;
                manager
                    .active_workspace_mut()
                    .unwrap()
                    .set_active(host, leaf, FocusSource::Keyboard);
            }
        }
        Op::HoverNth(nth) => {
            if let Some(view) = nth_view(f, nth) {
                let Fixture { host, manager, .. } = f;
                manager.on_view_focused(host, &view);
            }
        }
        Op::OpenIntent {
            kind,
            oauth,
            with_request_id,
        } => {
            let Some(source) = nth_view(f, 0) else {
                return;
            };
            let url = if oauth {
                "https://accounts.example.com/oauth/authorize?client_id=x"
            } else {
                "https://example.com/page"
            };
            let mut intent = WindowIntent::new(url, kind);
            if with_request_id {
                intent.request_id = Some(f.request_id());
            }
            f.send_intent(source, intent);
        }
        Op::ResolveDetection { as_tab } => {
            if let Some(probe) = f.pending_probes.pop() {
                let kind = if as_tab {
                    WindowKind::Tab
                } else {
                    WindowKind::Popup
                };
                let Fixture { host, manager, .. } = f;
                manager.on_window_type_detected(host, &probe, kind);
            }
        }
        Op::CloseRequestNth(nth) => {
            if let Some(view) = nth_view(f, nth) {
                f.manager.on_close_requested(&view);
            }
        }
        Op::TitleChangedNth(nth) => {
            if let Some(view) = nth_view(f, nth) {
                f.host.view(view).set_title("changed");
                let Fixture { host, manager, .. } = f;
                manager.on_title_changed(host, &view);
            }
        }
        Op::ProgressNth { nth, percent } => {
            if let Some(view) = nth_view(f, nth) {
                let Fixture { host, manager, .. } = f;
                manager.on_load_progress(host, &view, f64::from(percent) / 100.0);
            }
        }
        Op::CreateTab => {
            let Fixture { host, manager, .. } = f;
            let _ = manager.create_tab(host, None);
        }
        Op::CloseActiveTab => {
            let active = f.manager.active_index();
            let Fixture { host, manager, .. } = f;
            let _ = manager.close_tab(host, active);
        }
        Op::SwitchTab(index) => {
            let Fixture { host, manager, .. } = f;
            manager.switch_to(host, index, FocusSource::Keyboard);
        }
        Op::RenameActiveTab => {
            let active = f.manager.active_index();
            let Fixture { host, manager, .. } = f;
            manager.rename_tab(host, active, "renamed");
        }
        Op::AdvanceClock(ms) => {
            f.clock.advance(Duration::from_millis(ms));
        }
        Op::Idle => {
            let Fixture { host, manager, .. } = f;
            manager.on_idle(host);
        }
        Op::FrameTick => {
            let Fixture { host, manager, .. } = f;
            manager.on_frame_tick(host);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        ..ProptestConfig::default()
    })]

    #[test]
    fn random_operations_preserve_invariants(
        ops in proptest::collection::vec(any::<Op>(), 1..40)
    ) {
        let mut f = Fixture::new();
        for op in ops {
            apply(&mut f, op);
            f.verify();
        }
        f.settle();
        f.verify();
    }
}
