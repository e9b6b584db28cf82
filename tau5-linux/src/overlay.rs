//! GTK renditions of the transition overlay and the boot console.
//!
//! Both widgets are thin views over the toolkit-free models in
//! `tau5_core`; a ~60 Hz glib timer advances the model while an animation
//! is running and applies the resulting opacity.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use gtk4::glib;
use gtk4::prelude::*;

use tau5_core::animation::{OverlayEvent, TransitionOverlay};
use tau5_core::backend::{LogLine, Severity};
use tau5_core::console::{ConsoleEvent, ConsoleOverlay};

const FRAME: Duration = Duration::from_millis(16);

pub fn load_css() -> Option<gtk4::CssProvider> {
    let css = r#"
        .tau5-transition {
            background-color: #000000;
        }
        .tau5-console {
            background-color: rgba(0, 0, 0, 0.55);
            border-radius: 6px;
            padding: 8px;
        }
        .tau5-console text {
            background-color: transparent;
            color: #ffa500;
        }
        .tau5-debug-log text {
            background-color: #101010;
            color: #d0d0d0;
        }
        .tau5-debug-toolbar {
            padding: 4px;
        }
    "#;
    let display = gtk4::gdk::Display::default()?;
    let provider = gtk4::CssProvider::new();
    provider.load_from_string(css);
    gtk4::style_context_add_provider_for_display(
        &display,
        &provider,
        gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
    );
    Some(provider)
}

/// Font-size rule for one CSS class, replaceable at runtime.
pub struct FontSizeCss {
    class: &'static str,
    provider: gtk4::CssProvider,
}

impl FontSizeCss {
    pub fn new(class: &'static str, size_pt: i32) -> Self {
        let provider = gtk4::CssProvider::new();
        if let Some(display) = gtk4::gdk::Display::default() {
            gtk4::style_context_add_provider_for_display(
                &display,
                &provider,
                gtk4::STYLE_PROVIDER_PRIORITY_USER,
            );
        }
        let css = FontSizeCss { class, provider };
        css.set(size_pt);
        css
    }

    pub fn set(&self, size_pt: i32) {
        self.provider.load_from_string(&format!(
            ".{} text {{ font-family: monospace; font-size: {}pt; }}",
            self.class, size_pt
        ));
    }
}

fn stop_timer(timer: &RefCell<Option<glib::SourceId>>) {
    if let Some(id) = timer.borrow_mut().take() {
        id.remove();
    }
}

// ---------------------------------------------------------------------------
// Transition overlay
// ---------------------------------------------------------------------------

pub struct TransitionLayer {
    widget: gtk4::Box,
    model: RefCell<TransitionOverlay>,
    timer: RefCell<Option<glib::SourceId>>,
    on_event: Box<dyn Fn(OverlayEvent)>,
}

impl TransitionLayer {
    pub fn new(on_event: impl Fn(OverlayEvent) + 'static) -> Rc<Self> {
        let widget = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
        widget.add_css_class("tau5-transition");
        widget.set_hexpand(true);
        widget.set_vexpand(true);
        widget.set_can_target(false);

        let layer = Rc::new(TransitionLayer {
            widget,
            model: RefCell::new(TransitionOverlay::new()),
            timer: RefCell::new(None),
            on_event: Box::new(on_event),
        });
        layer.apply();
        layer
    }

    pub fn widget(&self) -> &gtk4::Box {
        &self.widget
    }

    fn apply(&self) {
        let model = self.model.borrow();
        self.widget.set_opacity(model.opacity());
        self.widget.set_visible(model.is_visible());
    }

    pub fn set_immediate(&self, opacity: f64) {
        stop_timer(&self.timer);
        self.model.borrow_mut().set_immediate(opacity);
        self.apply();
    }

    pub fn fade_in(self: &Rc<Self>, duration_ms: u64) {
        self.model.borrow_mut().fade_in(duration_ms);
        self.apply();
        self.animate();
    }

    pub fn fade_out(self: &Rc<Self>, duration_ms: u64) {
        self.model.borrow_mut().fade_out(duration_ms);
        self.apply();
        self.animate();
    }

    fn animate(self: &Rc<Self>) {
        stop_timer(&self.timer);
        let weak = Rc::downgrade(self);
        let mut last = Instant::now();
        let id = glib::timeout_add_local(FRAME, move || {
            let Some(layer) = weak.upgrade() else {
                return glib::ControlFlow::Break;
            };
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64() * 1000.0;
            last = now;

            let event = layer.model.borrow_mut().tick(dt);
            layer.apply();
            let running = layer.model.borrow().is_animating();
            if !running {
                // The source ends with Break; forget its id so nobody removes it twice.
                layer.timer.borrow_mut().take();
            }
            if let Some(event) = event {
                (layer.on_event)(event);
            }
            if running {
                glib::ControlFlow::Continue
            } else {
                glib::ControlFlow::Break
            }
        });
        *self.timer.borrow_mut() = Some(id);
    }
}

// ---------------------------------------------------------------------------
// Console overlay
// ---------------------------------------------------------------------------

pub struct ConsoleView {
    container: gtk4::ScrolledWindow,
    buffer: gtk4::TextBuffer,
    text_view: gtk4::TextView,
    end_mark: gtk4::TextMark,
    model: RefCell<ConsoleOverlay>,
    timer: RefCell<Option<glib::SourceId>>,
}

impl ConsoleView {
    pub fn new(max_lines: usize, fade_ms: u64, font_size: i32) -> Rc<Self> {
        let buffer = gtk4::TextBuffer::new(None);
        buffer.create_tag(Some("error"), &[("foreground", &"#ff5555")]);
        let end_mark = buffer.create_mark(Some("end"), &buffer.end_iter(), false);

        let text_view = gtk4::TextView::with_buffer(&buffer);
        text_view.set_editable(false);
        text_view.set_cursor_visible(false);
        text_view.set_monospace(true);
        text_view.set_wrap_mode(gtk4::WrapMode::WordChar);
        text_view.add_css_class("tau5-console");

        let container = gtk4::ScrolledWindow::builder()
            .child(&text_view)
            .hscrollbar_policy(gtk4::PolicyType::Never)
            .vscrollbar_policy(gtk4::PolicyType::External)
            .halign(gtk4::Align::Start)
            .valign(gtk4::Align::End)
            .margin_start(24)
            .margin_bottom(24)
            .width_request(640)
            .height_request(220)
            .build();
        container.set_can_target(false);

        let view = Rc::new(ConsoleView {
            container,
            buffer,
            text_view,
            end_mark,
            model: RefCell::new(ConsoleOverlay::new(max_lines, fade_ms)),
            timer: RefCell::new(None),
        });
        // The display keeps the provider; the size is fixed for the session.
        FontSizeCss::new("tau5-console", font_size);
        view.render();
        view
    }

    pub fn widget(&self) -> &gtk4::ScrolledWindow {
        &self.container
    }

    pub fn append(&self, line: &LogLine) {
        if self.model.borrow_mut().append(line) {
            self.render();
        }
    }

    pub fn fade_out(self: &Rc<Self>) {
        if !self.model.borrow_mut().fade_out() {
            return;
        }
        stop_timer(&self.timer);
        let weak = Rc::downgrade(self);
        let mut last = Instant::now();
        let id = glib::timeout_add_local(FRAME, move || {
            let Some(view) = weak.upgrade() else {
                return glib::ControlFlow::Break;
            };
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64() * 1000.0;
            last = now;
            let event = view.model.borrow_mut().tick(dt);
            view.apply_visibility();
            match event {
                Some(ConsoleEvent::FadeOutComplete) => {
                    view.timer.borrow_mut().take();
                    log::debug!("Console overlay hidden");
                    glib::ControlFlow::Break
                }
                None => glib::ControlFlow::Continue,
            }
        });
        *self.timer.borrow_mut() = Some(id);
    }

    pub fn show_error(&self, context: &str) {
        stop_timer(&self.timer);
        self.model.borrow_mut().show_error(context);
        self.render();
    }

    fn apply_visibility(&self) {
        let model = self.model.borrow();
        self.container.set_opacity(model.opacity());
        self.container.set_visible(model.is_visible());
    }

    /// Rebuild the buffer from the model. The model holds at most a few
    /// hundred lines, so a full redraw is cheap.
    fn render(&self) {
        self.buffer.set_text("");
        let model = self.model.borrow();
        let mut iter = self.buffer.end_iter();
        for (i, line) in model.lines().enumerate() {
            if i > 0 {
                self.buffer.insert(&mut iter, "\n");
            }
            match line.severity {
                Severity::Error => {
                    self.buffer
                        .insert_with_tags_by_name(&mut iter, &line.text, &["error"])
                }
                Severity::Info => self.buffer.insert(&mut iter, &line.text),
            }
        }
        drop(model);
        self.buffer.move_mark(&self.end_mark, &self.buffer.end_iter());
        self.text_view.scroll_mark_onscreen(&self.end_mark);
        self.apply_visibility();
    }
}
