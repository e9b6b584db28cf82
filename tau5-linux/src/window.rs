use gtk4::gdk;
use gtk4::glib;
use gtk4::prelude::*;
use libadwaita as adw;
use libadwaita::prelude::*;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tau5_core::animation::OverlayEvent;
use tau5_core::backend::{BackendEvent, BackendHandle, LogLine, RuntimeLauncher, Supervisor};
use tau5_core::banner::{self, BannerInfo};
use tau5_core::config::{BackendConfig, Timings, MAX_STOP_TIMEOUT_MS};
use tau5_core::debug_pane::{self as pane, DebugPane, DebugPaneEvent, Sink};
use tau5_core::error::ExitCode;
use tau5_core::launch::Runtime;
use tau5_core::lifecycle::{Action, LifecycleController, LifecycleEvent, LifecycleOptions};
use tau5_core::session_log::LogSession;
use tau5_core::url_policy::UrlPolicy;
use tau5_core::APP_NAME;
use tau5_web::protocol::{PageEvent, ShellCommand};
use tau5_web::splash::is_splash_uri;

use crate::debug_pane::GtkDebugPane;
use crate::logging::HostLog;
use crate::overlay::{ConsoleView, TransitionLayer};
use crate::phx_webview::{self, LoadReport, PhxWebView};
use crate::run_guarded_ui;
use crate::settings::Settings;

const BACKEND_POLL: Duration = Duration::from_millis(50);

/// Everything resolved before the window exists.
pub struct Startup {
    pub config: BackendConfig,
    pub runtime: Runtime,
    pub timings: Timings,
    pub session: Option<LogSession>,
    pub host_log: HostLog,
    pub exit_code: Rc<Cell<ExitCode>>,
}

pub fn window_title(channel: u8) -> String {
    if channel > 0 {
        format!("{} - [{}]", APP_NAME, channel)
    } else {
        APP_NAME.to_string()
    }
}

/// Paned position that leaves `pane_width` pixels for the debug pane.
fn paned_position(window_width: i32, pane_width: i32) -> i32 {
    (window_width - pane_width).max(window_width / 4)
}

/// Owns the widgets and the lifecycle controller. All methods run on the
/// GTK main thread.
struct Shell {
    app: adw::Application,
    window: adw::ApplicationWindow,
    toasts: adw::ToastOverlay,
    paned: gtk4::Paned,
    web: Rc<PhxWebView>,
    transition: Rc<TransitionLayer>,
    console: Rc<ConsoleView>,
    debug_pane: Option<Rc<GtkDebugPane>>,
    controller: RefCell<LifecycleController>,
    backend: BackendHandle,
    config: BackendConfig,
    timings: Timings,
    log_dir: Option<PathBuf>,
    settings: RefCell<Settings>,
    timers: RefCell<Vec<(u64, glib::SourceId)>>,
    next_timer: Cell<u64>,
    queue: RefCell<VecDeque<LifecycleEvent>>,
    dispatching: Cell<bool>,
    fatal_dialog_open: Cell<bool>,
    exit_code: Rc<Cell<ExitCode>>,
}

impl Shell {
    /// Feed an event to the controller and run the resulting actions.
    /// Events raised while actions run are queued, so transitions stay in
    /// order.
    fn dispatch(self: &Rc<Self>, event: LifecycleEvent) {
        self.queue.borrow_mut().push_back(event);
        if self.dispatching.replace(true) {
            return;
        }
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            log::debug!("Lifecycle event: {:?}", event);
            let actions = self.controller.borrow_mut().handle(event);
            for action in actions {
                run_guarded_ui("lifecycle-action", || self.execute(action));
            }
        }
        self.dispatching.set(false);
    }

    fn execute(self: &Rc<Self>, action: Action) {
        match action {
            Action::SetOverlayOpacity(opacity) => self.transition.set_immediate(opacity),
            Action::FadeOverlayIn { duration_ms } => {
                self.web.send_command(&ShellCommand::SetFade { value: 1.0 });
                self.transition.fade_in(duration_ms);
            }
            Action::FadeOverlayOut { duration_ms } => self.transition.fade_out(duration_ms),
            Action::ShowSplash => self.web.show_splash(),
            Action::LoadUrl(url) => self.web.load_url(&url),
            Action::StartBackend => {
                if !self.backend.start() {
                    log::error!("Backend supervisor is gone, cannot start");
                }
            }
            Action::RestartBackend => {
                if self.backend.restart() {
                    self.console.append(&LogLine::info("[TAU5] Restarting BEAM..."));
                }
            }
            Action::StopBackend => {
                // The supervisor fits SIGTERM, SIGKILL and the reap into this.
                let timeout =
                    Duration::from_millis(self.timings.stop_timeout_ms.min(MAX_STOP_TIMEOUT_MS));
                if !self.backend.stop_blocking(timeout) {
                    log::warn!("Backend did not confirm shutdown within {:?}", timeout);
                }
            }
            Action::ScheduleTimer { kind, delay_ms } => {
                let id = self.next_timer.get();
                self.next_timer.set(id + 1);
                let weak = Rc::downgrade(self);
                let source = glib::timeout_add_local_once(Duration::from_millis(delay_ms), move || {
                    if let Some(shell) = weak.upgrade() {
                        shell.timers.borrow_mut().retain(|(i, _)| *i != id);
                        run_guarded_ui("lifecycle-timer", || {
                            shell.dispatch(LifecycleEvent::TimerFired(kind))
                        });
                    }
                });
                self.timers.borrow_mut().push((id, source));
            }
            Action::CancelTimers => {
                for (_, source) in self.timers.borrow_mut().drain(..) {
                    source.remove();
                }
                // Freeze any running fade where it is.
                self.transition.set_immediate(self.transition.widget().opacity());
            }
            Action::FadeConsoleOut => self.console.fade_out(),
            Action::ShowConsoleError(context) => {
                self.console.show_error(&context);
                if let Some(dp) = &self.debug_pane {
                    dp.append(Sink::Backend, &LogLine::error(context));
                }
            }
            Action::AttachDebugPane {
                dashboard_url,
                console_url,
            } => {
                if let Some(dp) = &self.debug_pane {
                    pane::attach(&**dp, &dashboard_url, console_url.as_deref());
                }
            }
            Action::PrintBanner { port, token } => {
                let info = BannerInfo::new(&self.config, port, &token)
                    .with_beam_pid(self.backend.status().beam_pid)
                    .with_log_dir(self.log_dir.clone());
                println!("{}", banner::render(&info));
            }
            Action::ReportError(error) => {
                log::error!("{}", error);
                self.toasts.add_toast(adw::Toast::new(&error.to_string()));
            }
            Action::ReportFatal(error) => self.show_fatal(&error.to_string()),
            Action::Exit(code) => {
                self.exit_code.set(code);
                if !self.fatal_dialog_open.get() {
                    self.app.quit();
                }
            }
        }
    }

    fn show_fatal(self: &Rc<Self>, message: &str) {
        log::error!("Fatal: {}", message);
        self.fatal_dialog_open.set(true);
        let dialog = adw::AlertDialog::builder()
            .heading(format!("{} could not start", APP_NAME))
            .body(message)
            .build();
        dialog.add_response("quit", "Quit");
        dialog.set_response_appearance("quit", adw::ResponseAppearance::Destructive);
        dialog.set_default_response(Some("quit"));
        dialog.set_close_response("quit");
        let app = self.app.clone();
        dialog.connect_response(None, move |_dialog, _response| {
            app.quit();
        });
        dialog.present(Some(&self.window));
    }

    fn on_backend_event(self: &Rc<Self>, event: BackendEvent) {
        match event {
            BackendEvent::Spawned {
                generation,
                pid,
                port,
            } => {
                log::info!(
                    "Backend generation {} spawned (pid {:?}, port {})",
                    generation,
                    pid,
                    port
                );
                self.web.send_command(&ShellCommand::SetStatus {
                    text: format!("Starting BEAM on port {}", port),
                });
                self.dispatch(LifecycleEvent::BackendSpawned { generation });
            }
            BackendEvent::Output { line, .. } => {
                self.console.append(&line);
                if let Some(dp) = &self.debug_pane {
                    dp.append(Sink::Backend, &line);
                }
            }
            BackendEvent::BeamPid { generation, pid } => {
                log::debug!("Backend generation {} reports BEAM pid {}", generation, pid);
            }
            BackendEvent::Ready {
                generation,
                port,
                token,
            } => self.dispatch(LifecycleEvent::BackendReady {
                generation,
                port,
                token,
            }),
            BackendEvent::RestartComplete {
                generation,
                port,
                token,
            } => self.dispatch(LifecycleEvent::RestartComplete {
                generation,
                port,
                token,
            }),
            BackendEvent::StartFailed { generation, error } => {
                self.dispatch(LifecycleEvent::BackendStartFailed { generation, error })
            }
            BackendEvent::Exited {
                generation,
                code,
                expected,
            } => {
                if expected {
                    log::info!("Backend generation {} stopped", generation);
                } else {
                    self.dispatch(LifecycleEvent::BackendExited { generation, code });
                }
            }
        }
    }

    fn toggle_debug_pane(&self) {
        if let Some(dp) = &self.debug_pane {
            let visible = !dp.widget().is_visible();
            dp.widget().set_visible(visible);
            log::debug!("Debug pane {}", if visible { "shown" } else { "hidden" });
        }
    }

    fn save_settings(&self) {
        let mut settings = self.settings.borrow_mut();
        settings.window_maximized = self.window.is_maximized();
        if !settings.window_maximized {
            settings.window_width = self.window.width();
            settings.window_height = self.window.height();
        }
        if let Some(dp) = &self.debug_pane {
            settings.debug_pane_visible = dp.widget().is_visible();
            if dp.widget().is_visible() {
                settings.debug_pane_width = (self.paned.width() - self.paned.position()).max(120);
            }
            settings.debug_pane_font_size = dp.font_size();
        }
        crate::settings::save(&settings);
    }
}

fn spawn_supervisor(
    config: &BackendConfig,
    runtime: Runtime,
    timings: Timings,
    log_dir: Option<PathBuf>,
) -> Result<(BackendHandle, std::sync::mpsc::Receiver<BackendEvent>), String> {
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
    // std mpsc back to GTK; a glib timeout polls the receiver.
    let (event_tx, event_rx) = std::sync::mpsc::channel::<BackendEvent>();

    let launcher = RuntimeLauncher::new(config.clone(), runtime, log_dir.clone());
    let mut supervisor = Supervisor::new(launcher, timings, event_tx);
    if let Some(dir) = &log_dir {
        supervisor = supervisor.with_log_dir(dir);
    }
    let handle = supervisor.handle(command_tx);

    std::thread::Builder::new()
        .name("tau5-backend".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to create tokio runtime for the backend: {}", e);
                    return;
                }
            };
            rt.block_on(supervisor.run(command_rx));
            log::debug!("Backend supervisor finished");
        })
        .map_err(|e| format!("Failed to spawn backend thread: {}", e))?;

    Ok((handle, event_rx))
}

pub fn build_window(app: &adw::Application, startup: Startup) -> Result<(), String> {
    let Startup {
        config,
        runtime,
        timings,
        session,
        host_log,
        exit_code,
    } = startup;

    let settings = crate::settings::load();
    let options = LifecycleOptions::from_config(&config, timings);
    let policy = UrlPolicy::new(config.is_dev(), config.features.remote_access);
    let log_dir = session.as_ref().map(|s| s.dir().to_path_buf());

    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title(window_title(config.channel))
        .default_width(settings.window_width)
        .default_height(settings.window_height)
        .build();
    if settings.window_maximized {
        window.maximize();
    }

    let (backend, backend_rx) = spawn_supervisor(&config, runtime, timings, log_dir.clone())?;

    let shell = Rc::new_cyclic(|weak: &Weak<Shell>| {
        let dispatcher = |label: &'static str| {
            let weak = weak.clone();
            move |event: LifecycleEvent| {
                if let Some(shell) = weak.upgrade() {
                    run_guarded_ui(label, || shell.dispatch(event));
                }
            }
        };

        let on_page_load = dispatcher("web-load");
        let web = PhxWebView::new(
            policy,
            config.is_dev(),
            move |report: LoadReport| {
                // The splash is local; only backend pages drive the lifecycle.
                if is_splash_uri(&report.url) {
                    if !report.ok {
                        log::warn!("Boot splash failed to load");
                    }
                    return;
                }
                on_page_load(LifecycleEvent::PageLoaded {
                    url: report.url,
                    ok: report.ok,
                })
            },
            |event| match event {
                PageEvent::SplashReady { webgl } => {
                    log::info!("Boot splash ready (webgl: {})", webgl)
                }
                PageEvent::SplashError { message } => {
                    log::warn!("Boot splash fell back to static rendering: {}", message)
                }
            },
        );
        phx_webview::install_download_handler(web.widget(), &window);

        let on_overlay = dispatcher("transition-overlay");
        let transition = TransitionLayer::new(move |event| {
            on_overlay(match event {
                OverlayEvent::FadeInComplete => LifecycleEvent::OverlayFadeInComplete,
                OverlayEvent::FadeOutComplete => LifecycleEvent::OverlayFadeOutComplete,
            })
        });
        let console = ConsoleView::new(
            timings.console_max_lines,
            timings.console_fade_ms,
            settings.console_font_size,
        );

        let debug_pane = options.debug_pane.then(|| {
            let on_pane = dispatcher("debug-pane");
            let dp = GtkDebugPane::new(
                policy,
                options.repl,
                web.widget(),
                settings.debug_pane_font_size,
                move |event| {
                    on_pane(match event {
                        DebugPaneEvent::RestartBeamRequested => LifecycleEvent::RestartRequested,
                        DebugPaneEvent::ResetBrowserRequested => LifecycleEvent::ResetBrowser,
                    })
                },
            );
            if let Some(dir) = &log_dir {
                dp.watch_log_dir(dir);
            }
            dp
        });

        let app_overlay = gtk4::Overlay::new();
        app_overlay.set_child(Some(web.widget()));
        app_overlay.add_overlay(transition.widget());
        app_overlay.add_overlay(console.widget());

        let paned = gtk4::Paned::new(gtk4::Orientation::Horizontal);
        paned.set_start_child(Some(&app_overlay));
        paned.set_resize_end_child(false);
        paned.set_shrink_end_child(false);
        if let Some(dp) = &debug_pane {
            paned.set_end_child(Some(dp.widget()));
            paned.set_position(paned_position(
                settings.window_width,
                settings.debug_pane_width,
            ));
            dp.widget().set_visible(settings.debug_pane_visible);
        }

        let toasts = adw::ToastOverlay::new();
        toasts.set_child(Some(&paned));
        window.set_content(Some(&toasts));

        Shell {
            app: app.clone(),
            window: window.clone(),
            toasts,
            paned,
            web,
            transition,
            console,
            debug_pane,
            controller: RefCell::new(LifecycleController::new(options)),
            backend,
            config: config.clone(),
            timings,
            log_dir: log_dir.clone(),
            settings: RefCell::new(settings),
            timers: RefCell::new(Vec::new()),
            next_timer: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            fatal_dialog_open: Cell::new(false),
            exit_code,
        }
    });

    // Supervisor events and host log lines, drained on the UI thread.
    {
        let weak = Rc::downgrade(&shell);
        glib::timeout_add_local(BACKEND_POLL, move || {
            let Some(shell) = weak.upgrade() else {
                return glib::ControlFlow::Break;
            };
            run_guarded_ui("backend-events", || {
                while let Ok(event) = backend_rx.try_recv() {
                    shell.on_backend_event(event);
                }
                for line in host_log.drain() {
                    if let Some(dp) = &shell.debug_pane {
                        dp.append(Sink::Host, &line);
                    }
                }
            });
            glib::ControlFlow::Continue
        });
    }

    {
        let key_controller = gtk4::EventControllerKey::new();
        key_controller.set_propagation_phase(gtk4::PropagationPhase::Capture);
        let weak = Rc::downgrade(&shell);
        key_controller.connect_key_pressed(move |_, key, _, modifier| {
            let Some(shell) = weak.upgrade() else {
                return glib::Propagation::Proceed;
            };
            let ctrl_shift = gdk::ModifierType::CONTROL_MASK | gdk::ModifierType::SHIFT_MASK;
            if key == gdk::Key::F10 {
                run_guarded_ui("toggle-debug-pane", || shell.toggle_debug_pane());
                return glib::Propagation::Stop;
            }
            if modifier.contains(ctrl_shift) && key.to_lower() == gdk::Key::r {
                run_guarded_ui("reset-browser", || shell.dispatch(LifecycleEvent::ResetBrowser));
                return glib::Propagation::Stop;
            }
            glib::Propagation::Proceed
        });
        window.add_controller(key_controller);
    }

    {
        let weak = Rc::downgrade(&shell);
        window.connect_close_request(move |_window| {
            if let Some(shell) = weak.upgrade() {
                run_guarded_ui("close-request", || {
                    shell.save_settings();
                    shell.dispatch(LifecycleEvent::Shutdown);
                });
            }
            glib::Propagation::Proceed
        });
    }

    // The application owns the shell from here on. Quitting through the
    // application (fatal dialog, Exit) skips close-request; the controller
    // ignores a second Shutdown.
    {
        let shell = shell.clone();
        app.connect_shutdown(move |_app| {
            run_guarded_ui("app-shutdown", || shell.dispatch(LifecycleEvent::Shutdown));
        });
    }

    window.present();
    shell.dispatch(LifecycleEvent::Boot);
    Ok(())
}
