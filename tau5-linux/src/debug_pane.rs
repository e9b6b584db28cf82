use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use gtk4::glib;
use gtk4::prelude::*;
use webkit6::prelude::*;

use tau5_core::backend::{LogLine, Severity};
use tau5_core::debug_pane::{DebugPane, DebugPaneEvent, LogRing, Sink, DEFAULT_SINK_LINES};
use tau5_core::log_tail::LogTail;
use tau5_core::session_log::{self, GUI_LOG};
use tau5_core::url_policy::UrlPolicy;

use crate::overlay::FontSizeCss;
use crate::phx_webview::{self, FilteredWebView};
use crate::run_guarded_ui;
use crate::settings::{MAX_FONT_SIZE, MIN_FONT_SIZE};

const LOG_CLASS: &str = "tau5-debug-log";

/// One scrolling, bounded text log.
struct LogPanel {
    scroll: gtk4::ScrolledWindow,
    view: gtk4::TextView,
    buffer: gtk4::TextBuffer,
    end_mark: gtk4::TextMark,
    ring: RefCell<LogRing>,
}

impl LogPanel {
    fn new(capacity: usize) -> Self {
        let buffer = gtk4::TextBuffer::new(None);
        buffer.create_tag(Some("error"), &[("foreground", &"#ff6b6b")]);
        let end_mark = buffer.create_mark(Some("end"), &buffer.end_iter(), false);
        let view = gtk4::TextView::with_buffer(&buffer);
        view.set_editable(false);
        view.set_cursor_visible(false);
        view.set_monospace(true);
        view.set_wrap_mode(gtk4::WrapMode::WordChar);
        view.add_css_class(LOG_CLASS);
        let scroll = gtk4::ScrolledWindow::builder()
            .child(&view)
            .hexpand(true)
            .vexpand(true)
            .build();
        LogPanel {
            scroll,
            view,
            buffer,
            end_mark,
            ring: RefCell::new(LogRing::new(capacity)),
        }
    }

    fn append(&self, line: &LogLine) {
        let evicted_rows = self.ring.borrow_mut().push(line.clone());
        if evicted_rows > 0 {
            let mut start = self.buffer.start_iter();
            let mut end = i32::try_from(evicted_rows)
                .ok()
                .and_then(|row| self.buffer.iter_at_line(row))
                .unwrap_or_else(|| self.buffer.end_iter());
            self.buffer.delete(&mut start, &mut end);
        }

        let mut iter = self.buffer.end_iter();
        let text = format!("{}\n", line.text);
        match line.severity {
            Severity::Error => self
                .buffer
                .insert_with_tags_by_name(&mut iter, &text, &["error"]),
            Severity::Info => self.buffer.insert(&mut iter, &text),
        }
        self.buffer.move_mark(&self.end_mark, &self.buffer.end_iter());
        self.view.scroll_mark_onscreen(&self.end_mark);
    }

    fn clear(&self) {
        self.ring.borrow_mut().clear();
        self.buffer.set_text("");
    }
}

pub struct GtkDebugPane {
    root: gtk4::Box,
    notebook: gtk4::Notebook,
    backend_log: LogPanel,
    host_log: LogPanel,
    files_log: LogPanel,
    dashboard: FilteredWebView,
    console: Option<FilteredWebView>,
    inspector_box: gtk4::Box,
    app_view: webkit6::WebView,
    font: FontSizeCss,
    font_size: RefCell<i32>,
    tails: RefCell<BTreeMap<PathBuf, LogTail>>,
    watcher: RefCell<Option<notify::RecommendedWatcher>>,
    watcher_timer: RefCell<Option<glib::SourceId>>,
}

impl GtkDebugPane {
    pub fn new(
        policy: UrlPolicy,
        repl: bool,
        app_view: &webkit6::WebView,
        font_size: i32,
        on_event: impl Fn(DebugPaneEvent) + 'static,
    ) -> Rc<Self> {
        let on_event: Rc<dyn Fn(DebugPaneEvent)> = Rc::new(on_event);
        let root = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
        root.set_width_request(200);

        let notebook = gtk4::Notebook::new();
        notebook.set_vexpand(true);
        notebook.set_scrollable(true);

        let backend_log = LogPanel::new(DEFAULT_SINK_LINES);
        let host_log = LogPanel::new(DEFAULT_SINK_LINES);
        let files_log = LogPanel::new(DEFAULT_SINK_LINES);
        let dashboard = phx_webview::build_webview(policy, true);
        let console = repl.then(|| phx_webview::build_webview(policy, true));
        let inspector_box = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
        inspector_box.set_vexpand(true);

        notebook.append_page(&backend_log.scroll, Some(&gtk4::Label::new(Some("BEAM"))));
        notebook.append_page(&host_log.scroll, Some(&gtk4::Label::new(Some("GUI"))));
        notebook.append_page(&files_log.scroll, Some(&gtk4::Label::new(Some("Logs"))));
        notebook.append_page(dashboard.widget(), Some(&gtk4::Label::new(Some("Dashboard"))));
        if let Some(console) = &console {
            notebook.append_page(console.widget(), Some(&gtk4::Label::new(Some("Console"))));
        }
        notebook.append_page(&inspector_box, Some(&gtk4::Label::new(Some("Inspector"))));

        let font_size = font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        let pane = Rc::new(GtkDebugPane {
            root: root.clone(),
            notebook: notebook.clone(),
            backend_log,
            host_log,
            files_log,
            dashboard,
            console,
            inspector_box,
            app_view: app_view.clone(),
            font: FontSizeCss::new(LOG_CLASS, font_size),
            font_size: RefCell::new(font_size),
            tails: RefCell::new(BTreeMap::new()),
            watcher: RefCell::new(None),
            watcher_timer: RefCell::new(None),
        });

        root.append(&pane.build_toolbar(on_event));
        root.append(&notebook);
        pane.embed_inspector();
        pane
    }

    pub fn widget(&self) -> &gtk4::Box {
        &self.root
    }

    pub fn font_size(&self) -> i32 {
        *self.font_size.borrow()
    }

    pub fn zoom(&self, delta: i32) -> i32 {
        let size = (self.font_size() + delta).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        *self.font_size.borrow_mut() = size;
        self.font.set(size);
        size
    }

    fn build_toolbar(self: &Rc<Self>, on_event: Rc<dyn Fn(DebugPaneEvent)>) -> gtk4::Box {
        let toolbar = gtk4::Box::new(gtk4::Orientation::Horizontal, 4);
        toolbar.add_css_class("tau5-debug-toolbar");

        let restart = gtk4::Button::with_label("Restart BEAM");
        restart.set_tooltip_text(Some("Stop the backend and start a fresh one"));
        {
            let on_event = on_event.clone();
            restart.connect_clicked(move |_| {
                run_guarded_ui("debug-pane-restart", || {
                    on_event(DebugPaneEvent::RestartBeamRequested)
                });
            });
        }
        toolbar.append(&restart);

        let reset = gtk4::Button::with_label("Reload App");
        {
            let on_event = on_event.clone();
            reset.connect_clicked(move |_| {
                run_guarded_ui("debug-pane-reset-browser", || {
                    on_event(DebugPaneEvent::ResetBrowserRequested)
                });
            });
        }
        toolbar.append(&reset);

        let spacer = gtk4::Box::new(gtk4::Orientation::Horizontal, 0);
        spacer.set_hexpand(true);
        toolbar.append(&spacer);

        let clear = gtk4::Button::from_icon_name("edit-clear-symbolic");
        clear.set_tooltip_text(Some("Clear the current log"));
        {
            let weak = Rc::downgrade(self);
            clear.connect_clicked(move |_| {
                if let Some(pane) = weak.upgrade() {
                    match pane.notebook.current_page() {
                        Some(0) => pane.backend_log.clear(),
                        Some(1) => pane.host_log.clear(),
                        Some(2) => pane.files_log.clear(),
                        _ => {}
                    }
                }
            });
        }
        toolbar.append(&clear);

        for (icon, delta) in [("zoom-out-symbolic", -1), ("zoom-in-symbolic", 1)] {
            let button = gtk4::Button::from_icon_name(icon);
            let weak = Rc::downgrade(self);
            button.connect_clicked(move |_| {
                if let Some(pane) = weak.upgrade() {
                    pane.zoom(delta);
                }
            });
            toolbar.append(&button);
        }
        toolbar
    }

    /// Host the main view's inspector in the Inspector tab instead of a
    /// separate window.
    fn embed_inspector(&self) {
        let Some(inspector) = self.app_view.inspector() else {
            return;
        };
        let inspector_box = self.inspector_box.clone();
        inspector.connect_attach(move |inspector| {
            let Some(view) = inspector.web_view() else {
                return false;
            };
            while let Some(child) = inspector_box.first_child() {
                inspector_box.remove(&child);
            }
            view.set_vexpand(true);
            inspector_box.append(&view);
            true
        });
        let inspector_box = self.inspector_box.clone();
        inspector.connect_detach(move |_| {
            while let Some(child) = inspector_box.first_child() {
                inspector_box.remove(&child);
            }
            true
        });
    }

    /// Tail every `*.log` in `dir` (except our own `gui.log`, already shown
    /// in the GUI tab) into the Logs tab.
    pub fn watch_log_dir(self: &Rc<Self>, dir: &Path) {
        use notify::{RecursiveMode, Watcher};

        if let Some(id) = self.watcher_timer.borrow_mut().take() {
            id.remove();
        }
        *self.watcher.borrow_mut() = None;

        let (tx, rx) = std_mpsc::channel::<()>();
        let mut watcher =
            match notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                    ) {
                        let _ = tx.send(());
                    }
                }
            }) {
                Ok(w) => w,
                Err(e) => {
                    log::warn!("Failed to create log directory watcher: {}", e);
                    return;
                }
            };
        if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
            log::warn!("Failed to watch {}: {}", dir.display(), e);
            return;
        }

        let watched = dir.to_path_buf();
        let weak = Rc::downgrade(self);
        let timer_id = glib::timeout_add_local(Duration::from_millis(500), move || {
            let Some(pane) = weak.upgrade() else {
                return glib::ControlFlow::Break;
            };
            let mut changed = false;
            while rx.try_recv().is_ok() {
                changed = true;
            }
            if changed {
                run_guarded_ui("debug-pane-tail-logs", || pane.poll_log_files(&watched));
            }
            glib::ControlFlow::Continue
        });

        *self.watcher.borrow_mut() = Some(watcher);
        *self.watcher_timer.borrow_mut() = Some(timer_id);
        self.poll_log_files(dir);
    }

    fn poll_log_files(&self, dir: &Path) {
        let mut tails = self.tails.borrow_mut();
        for path in session_log::log_files(dir) {
            let is_own = path.file_name().is_some_and(|name| name == GUI_LOG);
            if !is_own && !tails.contains_key(&path) {
                tails.insert(path.clone(), LogTail::new(path));
            }
        }
        for (path, tail) in tails.iter_mut() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match tail.poll() {
                Ok(lines) => {
                    for line in lines {
                        self.files_log
                            .append(&LogLine::info(format!("[{}] {}", name, line)));
                    }
                }
                Err(e) => log::debug!("{}", e),
            }
        }
    }
}

impl DebugPane for GtkDebugPane {
    fn append(&self, sink: Sink, line: &LogLine) {
        match sink {
            Sink::Backend => self.backend_log.append(line),
            Sink::Host => self.host_log.append(line),
        }
    }

    fn attach_dev_tools(&self) {
        if let Some(inspector) = self.app_view.inspector() {
            inspector.attach();
            inspector.show();
        }
    }

    fn load_dashboard(&self, url: &str) {
        self.dashboard.load_uri(url);
    }

    fn load_console(&self, url: &str) {
        match &self.console {
            Some(console) => console.load_uri(url),
            None => log::debug!("REPL console disabled, not loading {}", phx_webview::redact_token(url)),
        }
    }
}
