mod cli;
mod debug_pane;
mod logging;
mod overlay;
mod phx_webview;
mod settings;
mod window;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use clap::Parser;
use gtk4::gio;
use libadwaita as adw;
use libadwaita::prelude::*;

use tau5_core::config::{BackendConfig, Timings, SERVER_PATH_ENV};
use tau5_core::error::ExitCode;
use tau5_core::health::{self, CheckResult, HealthReport};
use tau5_core::heartbeat::Heartbeat;
use tau5_core::launch::{self, LaunchContext};
use tau5_core::session_log::LogSession;
use tau5_core::util::non_empty_env;

const APP_ID: &str = "dev.tau5.Tau5";

fn run_guarded_ui<F: FnOnce()>(label: &str, f: F) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "non-string panic payload"
        };
        log::error!("UI callback panic in '{}': {}", label, msg);
    }
}

fn exit_with(code: ExitCode) -> std::process::ExitCode {
    std::process::ExitCode::from(code.code() as u8)
}

/// `--check`: verify the runtime and the GUI stack, print the launch plan
/// when there is one, and exit without opening a window.
fn run_check(config: &BackendConfig, session: Option<&LogSession>) -> ExitCode {
    let mut report = health::run(config, session.map(|s| s.dir()));
    check_gui(&mut report);
    println!("{}", report.render());

    if let Some(runtime) = report.runtime() {
        let heartbeat = Heartbeat {
            port: 0,
            token: "<heartbeat-token>".to_string(),
        };
        let ctx = LaunchContext {
            port: config.port,
            token: "<token>",
            secret_key_base: "<secret-key-base>",
            log_dir: session.map(|s| s.dir()),
            heartbeat: Some(&heartbeat),
        };
        println!("[Launch Plan]\n{}", launch::build_plan(config, runtime, &ctx).describe());
    }
    report.exit_code()
}

fn check_gui(report: &mut HealthReport) {
    const CATEGORY: &str = "GUI Systems";
    if std::env::var_os("WAYLAND_DISPLAY").is_none() && std::env::var_os("DISPLAY").is_none() {
        report.push(CheckResult::warning(
            CATEGORY,
            "Display server",
            "neither WAYLAND_DISPLAY nor DISPLAY is set",
        ));
    }
    if let Err(e) = gtk4::init() {
        report.push(CheckResult::failed(
            CATEGORY,
            "GTK",
            e.to_string(),
            ExitCode::WebViewInitFailed,
        ));
        return;
    }
    report.push(CheckResult::passed(
        CATEGORY,
        "GTK",
        format!(
            "{}.{}.{}",
            gtk4::major_version(),
            gtk4::minor_version(),
            gtk4::micro_version()
        ),
    ));
    // Building a view loads the WebKit libraries.
    let webview = webkit6::WebView::new();
    report.push(CheckResult::passed(CATEGORY, "WebKitGTK", "web view created"));
    drop(webview);
}

fn main() -> std::process::ExitCode {
    let cli = cli::Cli::parse();

    // The session directory has to exist before the logger opens gui.log.
    let session = LogSession::create(Timings::load().max_log_sessions);
    let gui_log = session.as_ref().ok().map(|s| s.gui_log());
    let host_log = match logging::init(cli.verbose, gui_log.as_deref()) {
        Ok(host_log) => host_log,
        Err(e) => {
            eprintln!("{}", e);
            return exit_with(ExitCode::LoggerInitFailed);
        }
    };
    let session = match session {
        Ok(session) => {
            log::info!("Logging to {}", session.dir().display());
            Some(session)
        }
        Err(e) => {
            log::warn!("Session logs disabled: {}", e);
            None
        }
    };
    // Read again now that warnings about shell.toml have somewhere to go.
    let timings = Timings::load();

    let config = match cli.to_flags().into_config(non_empty_env(SERVER_PATH_ENV)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return exit_with(e.exit_code());
        }
    };
    if cli.check {
        return exit_with(run_check(&config, session.as_ref()));
    }

    let runtime = match launch::discover_runtime(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("{}", e);
            return exit_with(e.exit_code());
        }
    };
    log::info!(
        "Starting {} ({} mode, server at {})",
        tau5_core::APP_NAME,
        config.env.as_str(),
        config.base_path.display()
    );

    let exit_code = Rc::new(Cell::new(ExitCode::Success));
    let startup = Rc::new(RefCell::new(Some(window::Startup {
        config,
        runtime,
        timings,
        session,
        host_log,
        exit_code: exit_code.clone(),
    })));

    // Several channels may run side by side.
    let app = adw::Application::builder()
        .application_id(APP_ID)
        .flags(gio::ApplicationFlags::NON_UNIQUE)
        .build();

    app.connect_startup(|_app| {
        let style_manager = adw::StyleManager::default();
        style_manager.set_color_scheme(adw::ColorScheme::ForceDark);
        overlay::load_css();
    });

    {
        let exit_code = exit_code.clone();
        app.connect_activate(move |app| {
            let Some(startup) = startup.borrow_mut().take() else {
                if let Some(window) = app.active_window() {
                    window.present();
                }
                return;
            };
            if let Err(e) = window::build_window(app, startup) {
                log::error!("{}", e);
                exit_code.set(ExitCode::GeneralError);
                app.quit();
            }
        });
    }

    // Our flags are not GTK's; keep them away from GApplication.
    app.run_with_args::<&str>(&[]);
    exit_with(exit_code.get())
}
