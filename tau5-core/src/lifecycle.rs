//! The lifecycle controller: the only component that decides what the window
//! shows and when.
//!
//! It is a pure state machine. The frontend feeds it [`LifecycleEvent`]s in
//! the order they happen on the UI thread and executes the returned
//! [`Action`]s (timers, overlay fades, web view loads, backend commands).
//! Nothing here blocks, sleeps or touches a toolkit, which keeps every
//! transition observable and testable.

use crate::config::{BackendConfig, Timings};
use crate::error::{ExitCode, ShellError};
use crate::urls;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    SplashShown,
    BackendReady,
    FadingToBlack,
    SwitchingUrl,
    AppLoading,
    AppReady,
    Restarting,
    ShuttingDown,
}

impl LifecycleState {
    fn before_app_ready(self) -> bool {
        matches!(
            self,
            LifecycleState::SplashShown
                | LifecycleState::BackendReady
                | LifecycleState::FadingToBlack
                | LifecycleState::SwitchingUrl
                | LifecycleState::AppLoading
        )
    }
}

/// Whether `from -> to` is an edge of the lifecycle graph.
///
/// Besides the main path and the restart loop, a crash or readiness timeout
/// before the app is ready may move any pre-ready state to `Restarting` for
/// another start attempt, and shutdown is reachable from everywhere.
pub fn can_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    if to == ShuttingDown {
        return from != ShuttingDown;
    }
    match (from, to) {
        (SplashShown, BackendReady)
        | (BackendReady, FadingToBlack)
        | (FadingToBlack, SwitchingUrl)
        | (SwitchingUrl, AppLoading)
        | (AppLoading, AppReady)
        | (AppReady, Restarting)
        | (Restarting, SwitchingUrl) => true,
        (from, Restarting) => from.before_app_ready(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    MinSplash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Boot,
    BackendSpawned {
        generation: u64,
    },
    BackendReady {
        generation: u64,
        port: u16,
        token: String,
    },
    RestartComplete {
        generation: u64,
        port: u16,
        token: String,
    },
    BackendStartFailed {
        generation: u64,
        error: ShellError,
    },
    BackendExited {
        generation: u64,
        code: Option<i32>,
    },
    TimerFired(TimerKind),
    OverlayFadeInComplete,
    OverlayFadeOutComplete,
    /// Top-level load finished in the main web view.
    PageLoaded {
        url: String,
        ok: bool,
    },
    /// The debug pane's restart button, or any other user restart.
    RestartRequested,
    /// Reload the live app page with the current token.
    ResetBrowser,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetOverlayOpacity(f64),
    FadeOverlayIn { duration_ms: u64 },
    FadeOverlayOut { duration_ms: u64 },
    ShowSplash,
    LoadUrl(String),
    StartBackend,
    RestartBackend,
    StopBackend,
    ScheduleTimer { kind: TimerKind, delay_ms: u64 },
    CancelTimers,
    FadeConsoleOut,
    ShowConsoleError(String),
    AttachDebugPane {
        dashboard_url: String,
        console_url: Option<String>,
    },
    PrintBanner { port: u16, token: String },
    /// Non-fatal, user-visible error.
    ReportError(ShellError),
    /// Error dialog followed by process exit.
    ReportFatal(ShellError),
    Exit(ExitCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LiveBackend {
    generation: u64,
    port: u16,
    token: String,
}

/// Options that shape the controller's behaviour, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    pub timings: Timings,
    pub debug_pane: bool,
    pub repl: bool,
}

impl LifecycleOptions {
    pub fn from_config(config: &BackendConfig, timings: Timings) -> Self {
        LifecycleOptions {
            timings,
            // The pane only exists in dev builds.
            debug_pane: config.features.debug_pane && config.is_dev(),
            repl: config.features.repl,
        }
    }
}

pub struct LifecycleController {
    options: LifecycleOptions,
    state: LifecycleState,
    history: Vec<LifecycleState>,
    generation: u64,
    backend: Option<LiveBackend>,
    min_splash_elapsed: bool,
    overlay_opaque: bool,
    /// Restart finished before the minimum splash time ran out.
    pending_switch: bool,
    app_url: Option<String>,
    load_attempts: u32,
    start_attempts: u32,
    load_failure_reported: bool,
}

impl LifecycleController {
    pub fn new(options: LifecycleOptions) -> Self {
        LifecycleController {
            options,
            state: LifecycleState::SplashShown,
            history: vec![LifecycleState::SplashShown],
            generation: 0,
            backend: None,
            min_splash_elapsed: false,
            overlay_opaque: true,
            pending_switch: false,
            app_url: None,
            load_attempts: 0,
            start_attempts: 0,
            load_failure_reported: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state entered so far, starting with `SplashShown`.
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Port and token of the backend the UI is currently bound to.
    pub fn backend(&self) -> Option<(u16, &str)> {
        self.backend.as_ref().map(|b| (b.port, b.token.as_str()))
    }

    pub fn app_url(&self) -> Option<&str> {
        self.app_url.as_deref()
    }

    fn transition(&mut self, to: LifecycleState) -> bool {
        if !can_transition(self.state, to) {
            log::error!("Ignoring illegal lifecycle transition {:?} -> {:?}", self.state, to);
            return false;
        }
        log::info!("Lifecycle: {:?} -> {:?}", self.state, to);
        self.state = to;
        self.history.push(to);
        true
    }

    fn is_stale(&self, generation: u64) -> bool {
        generation < self.generation
    }

    /// Feed one event; returns the actions to perform, in order.
    pub fn handle(&mut self, event: LifecycleEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == LifecycleState::ShuttingDown {
            return actions;
        }

        match event {
            LifecycleEvent::Boot => self.on_boot(&mut actions),
            LifecycleEvent::BackendSpawned { generation } => {
                self.generation = self.generation.max(generation);
            }
            LifecycleEvent::BackendReady {
                generation,
                port,
                token,
            } => self.on_backend_ready(generation, port, token, &mut actions),
            LifecycleEvent::RestartComplete {
                generation,
                port,
                token,
            } => self.on_restart_complete(generation, port, token, &mut actions),
            LifecycleEvent::BackendStartFailed { generation, error } => {
                if !self.is_stale(generation) {
                    self.on_backend_failure(error, &mut actions);
                }
            }
            LifecycleEvent::BackendExited { generation, code } => {
                if !self.is_stale(generation) {
                    self.on_backend_exited(code, &mut actions);
                }
            }
            LifecycleEvent::TimerFired(TimerKind::MinSplash) => self.on_min_splash(&mut actions),
            LifecycleEvent::OverlayFadeInComplete => {
                self.overlay_opaque = true;
                if matches!(
                    self.state,
                    LifecycleState::FadingToBlack | LifecycleState::SwitchingUrl
                ) {
                    if self.state == LifecycleState::FadingToBlack {
                        self.transition(LifecycleState::SwitchingUrl);
                    }
                    self.load_app(&mut actions);
                }
            }
            LifecycleEvent::OverlayFadeOutComplete => {
                self.overlay_opaque = false;
            }
            LifecycleEvent::PageLoaded { url, ok } => self.on_page_loaded(&url, ok, &mut actions),
            LifecycleEvent::RestartRequested => self.on_restart_requested(&mut actions),
            LifecycleEvent::ResetBrowser => {
                if self.state == LifecycleState::AppReady {
                    if let Some(url) = self.app_url.clone() {
                        log::info!("Reloading app page");
                        actions.push(Action::LoadUrl(url));
                    }
                }
            }
            LifecycleEvent::Shutdown => {
                self.transition(LifecycleState::ShuttingDown);
                actions.push(Action::CancelTimers);
                actions.push(Action::StopBackend);
            }
        }
        actions
    }

    fn on_boot(&mut self, actions: &mut Vec<Action>) {
        if self.start_attempts > 0 {
            log::warn!("Boot received twice, ignoring");
            return;
        }
        let t = self.options.timings;
        self.start_attempts = 1;
        actions.push(Action::SetOverlayOpacity(1.0));
        actions.push(Action::ShowSplash);
        actions.push(Action::FadeOverlayOut {
            duration_ms: t.splash_reveal_ms,
        });
        self.overlay_opaque = false;
        actions.push(Action::StartBackend);
        actions.push(Action::ScheduleTimer {
            kind: TimerKind::MinSplash,
            delay_ms: t.min_splash_ms,
        });
    }

    fn on_backend_ready(&mut self, generation: u64, port: u16, token: String, actions: &mut Vec<Action>) {
        if self.is_stale(generation) {
            return;
        }
        self.generation = generation;
        if self.state != LifecycleState::SplashShown {
            // Restarts are completed by RestartComplete.
            return;
        }
        if token.is_empty() || port == 0 {
            let error = ShellError::InvalidPort(format!("backend reported port {} without a usable token", port));
            self.fail(error, actions);
            return;
        }
        self.backend = Some(LiveBackend {
            generation,
            port,
            token,
        });
        self.transition(LifecycleState::BackendReady);
        if self.min_splash_elapsed {
            self.begin_fade_to_black(actions);
        } else {
            log::info!("Backend ready before minimum splash time, queueing transition");
        }
    }

    fn on_min_splash(&mut self, actions: &mut Vec<Action>) {
        self.min_splash_elapsed = true;
        match self.state {
            LifecycleState::BackendReady => self.begin_fade_to_black(actions),
            LifecycleState::Restarting if self.pending_switch => {
                self.pending_switch = false;
                self.enter_switching_url(actions);
            }
            _ => {}
        }
    }

    fn begin_fade_to_black(&mut self, actions: &mut Vec<Action>) {
        if self.transition(LifecycleState::FadingToBlack) {
            actions.push(Action::FadeOverlayIn {
                duration_ms: self.options.timings.fade_to_black_ms,
            });
        }
    }

    fn enter_switching_url(&mut self, actions: &mut Vec<Action>) {
        if !self.transition(LifecycleState::SwitchingUrl) {
            return;
        }
        if self.overlay_opaque {
            self.load_app(actions);
        } else {
            actions.push(Action::FadeOverlayIn {
                duration_ms: self.options.timings.fade_to_black_ms,
            });
        }
    }

    /// Issue the token-bound app URL and enter `AppLoading`.
    fn load_app(&mut self, actions: &mut Vec<Action>) {
        let Some(url) = self
            .backend
            .as_ref()
            .map(|backend| urls::app_url(backend.port, &backend.token))
        else {
            log::error!("No backend to load the app from");
            return;
        };
        if !self.transition(LifecycleState::AppLoading) {
            return;
        }
        self.app_url = Some(url.clone());
        self.load_attempts = 1;
        self.load_failure_reported = false;
        actions.push(Action::LoadUrl(url));
    }

    fn on_page_loaded(&mut self, url: &str, ok: bool, actions: &mut Vec<Action>) {
        if self.state != LifecycleState::AppLoading {
            return;
        }
        let (Some(backend), Some(app_url)) = (&self.backend, self.app_url.clone()) else {
            return;
        };
        let expected = urls::is_app_page(url, backend.port, &backend.token);

        if ok {
            if !expected {
                log::debug!("Ignoring load of {} while waiting for the app page", url);
                return;
            }
            self.enter_app_ready(actions);
            return;
        }

        // Failures for the splash or a superseded token are not ours.
        if !expected && !url.is_empty() && url != app_url {
            return;
        }
        let max = self.options.timings.max_load_attempts;
        if self.load_attempts < max {
            self.load_attempts += 1;
            log::warn!(
                "App page failed to load, retrying ({}/{})",
                self.load_attempts,
                max
            );
            actions.push(Action::LoadUrl(app_url));
        } else if !self.load_failure_reported {
            self.load_failure_reported = true;
            let error = ShellError::LoadFailed {
                url: app_url,
                attempts: self.load_attempts,
            };
            log::error!("{}", error);
            actions.push(Action::ShowConsoleError(error.to_string()));
            actions.push(Action::ReportError(error));
        }
    }

    fn enter_app_ready(&mut self, actions: &mut Vec<Action>) {
        if !self.transition(LifecycleState::AppReady) {
            return;
        }
        let Some(backend) = &self.backend else {
            return;
        };
        self.start_attempts = 0;
        self.overlay_opaque = false;
        actions.push(Action::FadeOverlayOut {
            duration_ms: self.options.timings.reveal_app_ms,
        });
        actions.push(Action::FadeConsoleOut);
        if self.options.debug_pane {
            actions.push(Action::AttachDebugPane {
                dashboard_url: urls::dashboard_url(backend.port, &backend.token),
                console_url: self
                    .options
                    .repl
                    .then(|| urls::console_url(backend.port, &backend.token)),
            });
        }
        actions.push(Action::PrintBanner {
            port: backend.port,
            token: backend.token.clone(),
        });
    }

    fn on_restart_requested(&mut self, actions: &mut Vec<Action>) {
        match self.state {
            LifecycleState::AppReady => {
                log::info!("Restart requested");
                self.enter_restarting(actions);
            }
            LifecycleState::Restarting => {
                log::warn!("Restart already in progress, ignoring request");
            }
            other => {
                log::warn!("Ignoring restart request in state {:?}", other);
            }
        }
    }

    fn enter_restarting(&mut self, actions: &mut Vec<Action>) {
        if !self.transition(LifecycleState::Restarting) {
            return;
        }
        // Anything in flight for the old token is now stale.
        self.app_url = None;
        self.load_attempts = 0;
        self.pending_switch = false;
        self.overlay_opaque = false;
        actions.push(Action::ShowSplash);
        actions.push(Action::FadeOverlayOut {
            duration_ms: self.options.timings.splash_reveal_ms,
        });
        actions.push(Action::RestartBackend);
    }

    fn on_restart_complete(&mut self, generation: u64, port: u16, token: String, actions: &mut Vec<Action>) {
        if self.is_stale(generation) || self.state != LifecycleState::Restarting {
            return;
        }
        self.generation = generation;
        if let Some(old) = &self.backend {
            if old.token == token {
                log::error!("Restarted backend reused the previous session token");
            }
        }
        self.backend = Some(LiveBackend {
            generation,
            port,
            token,
        });
        if self.min_splash_elapsed {
            self.enter_switching_url(actions);
        } else {
            self.pending_switch = true;
        }
    }

    fn on_backend_exited(&mut self, code: Option<i32>, actions: &mut Vec<Action>) {
        let after_ready = self.state == LifecycleState::AppReady;
        let error = ShellError::BackendCrash { code, after_ready };
        if after_ready {
            log::error!("{}", error);
            actions.push(Action::ShowConsoleError(error.to_string()));
            return;
        }
        self.on_backend_failure(error, actions);
    }

    fn on_backend_failure(&mut self, error: ShellError, actions: &mut Vec<Action>) {
        let retry_allowed = (self.state.before_app_ready() || self.state == LifecycleState::Restarting)
            && error.is_retryable()
            && self.start_attempts < self.options.timings.max_start_attempts;

        if retry_allowed {
            self.start_attempts += 1;
            log::warn!(
                "{}; retrying start ({}/{})",
                error,
                self.start_attempts,
                self.options.timings.max_start_attempts
            );
            actions.push(Action::ShowConsoleError(error.to_string()));
            if self.state == LifecycleState::Restarting {
                actions.push(Action::RestartBackend);
            } else {
                self.enter_restarting(actions);
            }
            return;
        }

        if self.state == LifecycleState::AppReady {
            log::error!("{}", error);
            actions.push(Action::ShowConsoleError(error.to_string()));
            return;
        }
        self.fail(error, actions);
    }

    fn fail(&mut self, error: ShellError, actions: &mut Vec<Action>) {
        log::error!("Fatal: {}", error);
        let code = error.exit_code();
        actions.push(Action::ShowConsoleError(error.to_string()));
        actions.push(Action::ReportFatal(error));
        self.transition(LifecycleState::ShuttingDown);
        actions.push(Action::CancelTimers);
        actions.push(Action::StopBackend);
        actions.push(Action::Exit(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    fn options() -> LifecycleOptions {
        LifecycleOptions {
            timings: Timings::default(),
            debug_pane: false,
            repl: false,
        }
    }

    fn ready(generation: u64, port: u16, token: &str) -> LifecycleEvent {
        LifecycleEvent::BackendReady {
            generation,
            port,
            token: token.to_string(),
        }
    }

    fn loaded(url: &str, ok: bool) -> LifecycleEvent {
        LifecycleEvent::PageLoaded {
            url: url.to_string(),
            ok,
        }
    }

    fn load_urls(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::LoadUrl(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    fn assert_legal_history(lc: &LifecycleController) {
        for pair in lc.history().windows(2) {
            assert!(
                can_transition(pair[0], pair[1]),
                "illegal transition {:?} -> {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    /// Drive a controller from boot to AppReady.
    fn boot_to_app_ready(lc: &mut LifecycleController, port: u16, token: &str) -> Vec<Action> {
        let mut all = lc.handle(LifecycleEvent::Boot);
        all.extend(lc.handle(LifecycleEvent::BackendSpawned { generation: 1 }));
        all.extend(lc.handle(ready(1, port, token)));
        all.extend(lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash)));
        all.extend(lc.handle(LifecycleEvent::OverlayFadeInComplete));
        all.extend(lc.handle(loaded(&urls::app_url(port, token), true)));
        all
    }

    #[test]
    fn s1_happy_path_prod() {
        let mut lc = LifecycleController::new(options());
        let boot = lc.handle(LifecycleEvent::Boot);
        assert_eq!(
            boot,
            vec![
                Action::SetOverlayOpacity(1.0),
                Action::ShowSplash,
                Action::FadeOverlayOut { duration_ms: 1000 },
                Action::StartBackend,
                Action::ScheduleTimer {
                    kind: TimerKind::MinSplash,
                    delay_ms: 5000
                },
            ]
        );

        // Ready before the splash minimum: queued.
        assert!(lc.handle(ready(1, 41000, "T1")).is_empty());
        assert_eq!(lc.state(), BackendReady);

        let fade = lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash));
        assert_eq!(fade, vec![Action::FadeOverlayIn { duration_ms: 500 }]);
        assert_eq!(lc.state(), FadingToBlack);

        let switch = lc.handle(LifecycleEvent::OverlayFadeInComplete);
        assert_eq!(
            load_urls(&switch),
            vec!["http://localhost:41000/app?token=T1".to_string()]
        );
        assert_eq!(lc.state(), AppLoading);

        let app = lc.handle(loaded("http://localhost:41000/app?token=T1", true));
        assert_eq!(lc.state(), AppReady);
        assert_eq!(app[0], Action::FadeOverlayOut { duration_ms: 600 });
        assert!(app.contains(&Action::FadeConsoleOut));
        assert!(app.contains(&Action::PrintBanner {
            port: 41000,
            token: "T1".to_string()
        }));
        assert!(!app.iter().any(|a| matches!(a, Action::AttachDebugPane { .. })));
        assert_eq!(
            lc.history(),
            &[SplashShown, BackendReady, FadingToBlack, SwitchingUrl, AppLoading, AppReady]
        );
    }

    #[test]
    fn ready_after_min_splash_fades_immediately() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        assert!(lc
            .handle(LifecycleEvent::TimerFired(TimerKind::MinSplash))
            .is_empty());
        let actions = lc.handle(ready(1, 4000, "T1"));
        assert_eq!(actions, vec![Action::FadeOverlayIn { duration_ms: 500 }]);
        assert_eq!(lc.state(), FadingToBlack);
    }

    #[test]
    fn s2_dev_mode_attaches_debug_pane() {
        let mut lc = LifecycleController::new(LifecycleOptions {
            debug_pane: true,
            repl: true,
            ..options()
        });
        let actions = boot_to_app_ready(&mut lc, 4321, "T1");
        assert!(actions.contains(&Action::AttachDebugPane {
            dashboard_url: "http://localhost:4321/dev/dashboard?token=T1".to_string(),
            console_url: Some("http://localhost:4321/dev/console?token=T1".to_string()),
        }));
    }

    #[test]
    fn debug_pane_without_repl_has_no_console() {
        let mut lc = LifecycleController::new(LifecycleOptions {
            debug_pane: true,
            ..options()
        });
        let actions = boot_to_app_ready(&mut lc, 4321, "T1");
        assert!(actions.contains(&Action::AttachDebugPane {
            dashboard_url: "http://localhost:4321/dev/dashboard?token=T1".to_string(),
            console_url: None,
        }));
    }

    #[test]
    fn s3_restart_uses_new_token() {
        let mut lc = LifecycleController::new(options());
        boot_to_app_ready(&mut lc, 4000, "T1");

        let restart = lc.handle(LifecycleEvent::RestartRequested);
        assert_eq!(lc.state(), Restarting);
        assert!(restart.contains(&Action::ShowSplash));
        assert_eq!(
            restart
                .iter()
                .filter(|a| **a == Action::RestartBackend)
                .count(),
            1
        );

        // A second request while in flight does nothing.
        assert!(lc.handle(LifecycleEvent::RestartRequested).is_empty());

        // The new generation's plain Ready does not advance the restart.
        lc.handle(LifecycleEvent::BackendSpawned { generation: 2 });
        assert!(lc.handle(ready(2, 4000, "T2")).is_empty());

        let switch = lc.handle(LifecycleEvent::RestartComplete {
            generation: 2,
            port: 4000,
            token: "T2".to_string(),
        });
        assert_eq!(lc.state(), SwitchingUrl);
        assert_eq!(switch, vec![Action::FadeOverlayIn { duration_ms: 500 }]);

        let load = lc.handle(LifecycleEvent::OverlayFadeInComplete);
        assert_eq!(
            load_urls(&load),
            vec!["http://localhost:4000/app?token=T2".to_string()]
        );

        // A late load for the old token must not count.
        assert!(lc
            .handle(loaded("http://localhost:4000/app?token=T1", true))
            .is_empty());
        assert_eq!(lc.state(), AppLoading);

        lc.handle(loaded("http://localhost:4000/app?token=T2", true));
        assert_eq!(lc.state(), AppReady);
        assert_eq!(lc.backend(), Some((4000, "T2")));

        // A duplicate completion is stale now.
        assert!(lc
            .handle(LifecycleEvent::RestartComplete {
                generation: 2,
                port: 4000,
                token: "T2".to_string(),
            })
            .is_empty());
        assert_legal_history(&lc);
    }

    #[test]
    fn s5_load_failures_retry_same_url() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        lc.handle(ready(1, 4000, "T1"));
        lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash));
        let mut urls_loaded = load_urls(&lc.handle(LifecycleEvent::OverlayFadeInComplete));

        for _ in 0..4 {
            let actions = lc.handle(loaded("http://localhost:4000/app?token=T1", false));
            urls_loaded.extend(load_urls(&actions));
        }
        lc.handle(loaded("http://localhost:4000/app?token=T1", true));

        assert_eq!(urls_loaded.len(), 5);
        assert!(urls_loaded
            .iter()
            .all(|u| u == "http://localhost:4000/app?token=T1"));
        assert_eq!(lc.state(), AppReady);
    }

    #[test]
    fn load_failures_beyond_budget_are_surfaced_once() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash));
        lc.handle(ready(1, 4000, "T1"));
        lc.handle(LifecycleEvent::OverlayFadeInComplete);
        let url = "http://localhost:4000/app?token=T1";
        for _ in 0..4 {
            lc.handle(loaded(url, false));
        }
        let surfaced = lc.handle(loaded(url, false));
        assert!(load_urls(&surfaced).is_empty());
        assert!(surfaced.iter().any(|a| matches!(
            a,
            Action::ReportError(ShellError::LoadFailed { attempts: 5, .. })
        )));
        assert!(lc.handle(loaded(url, false)).is_empty());
        assert_eq!(lc.state(), AppLoading);
    }

    #[test]
    fn splash_load_does_not_satisfy_app_ready() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        lc.handle(ready(1, 4000, "T1"));
        lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash));
        lc.handle(LifecycleEvent::OverlayFadeInComplete);
        assert!(lc.handle(loaded("tau5://splash/", true)).is_empty());
        assert!(lc.handle(loaded("about:blank", true)).is_empty());
        assert!(lc.handle(loaded("tau5://splash/", false)).is_empty());
        assert_eq!(lc.state(), AppLoading);
    }

    #[test]
    fn never_loads_app_before_ready() {
        let mut lc = LifecycleController::new(options());
        let mut actions = lc.handle(LifecycleEvent::Boot);
        actions.extend(lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash)));
        actions.extend(lc.handle(LifecycleEvent::OverlayFadeInComplete));
        actions.extend(lc.handle(LifecycleEvent::OverlayFadeOutComplete));
        assert!(load_urls(&actions).is_empty());
        assert_eq!(lc.state(), SplashShown);
    }

    #[test]
    fn spawn_failure_is_fatal() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        let actions = lc.handle(LifecycleEvent::BackendStartFailed {
            generation: 1,
            error: ShellError::SpawnFailed("no such file".into()),
        });
        assert!(actions.contains(&Action::Exit(ExitCode::ProcessSpawnFailed)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ReportFatal(ShellError::SpawnFailed(_)))));
        assert_eq!(lc.state(), ShuttingDown);
        assert!(lc.handle(ready(1, 4000, "T1")).is_empty());
    }

    #[test]
    fn early_crash_retries_within_budget_then_fails() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        lc.handle(LifecycleEvent::BackendSpawned { generation: 1 });

        let first = lc.handle(LifecycleEvent::BackendExited {
            generation: 1,
            code: Some(1),
        });
        assert_eq!(lc.state(), Restarting);
        assert!(first.contains(&Action::RestartBackend));

        lc.handle(LifecycleEvent::BackendSpawned { generation: 2 });
        let second = lc.handle(LifecycleEvent::BackendExited {
            generation: 2,
            code: Some(1),
        });
        assert_eq!(second.iter().filter(|a| **a == Action::RestartBackend).count(), 1);

        lc.handle(LifecycleEvent::BackendSpawned { generation: 3 });
        let last = lc.handle(LifecycleEvent::BackendExited {
            generation: 3,
            code: Some(1),
        });
        assert!(last.contains(&Action::Exit(ExitCode::BeamCrashed)));
        assert_eq!(lc.state(), ShuttingDown);
        assert_legal_history(&lc);
    }

    #[test]
    fn retry_after_crash_honours_min_splash_then_loads_app() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        lc.handle(LifecycleEvent::BackendSpawned { generation: 1 });
        lc.handle(LifecycleEvent::BackendExited {
            generation: 1,
            code: None,
        });
        lc.handle(LifecycleEvent::BackendSpawned { generation: 2 });
        let early = lc.handle(LifecycleEvent::RestartComplete {
            generation: 2,
            port: 4000,
            token: "T2".to_string(),
        });
        assert!(early.is_empty());
        assert_eq!(lc.state(), Restarting);

        let fade = lc.handle(LifecycleEvent::TimerFired(TimerKind::MinSplash));
        assert_eq!(fade, vec![Action::FadeOverlayIn { duration_ms: 500 }]);
        let load = lc.handle(LifecycleEvent::OverlayFadeInComplete);
        assert_eq!(
            load_urls(&load),
            vec!["http://localhost:4000/app?token=T2".to_string()]
        );
        assert_legal_history(&lc);
    }

    #[test]
    fn stale_exit_is_ignored() {
        let mut lc = LifecycleController::new(options());
        boot_to_app_ready(&mut lc, 4000, "T1");
        lc.handle(LifecycleEvent::RestartRequested);
        lc.handle(LifecycleEvent::BackendSpawned { generation: 2 });
        let actions = lc.handle(LifecycleEvent::BackendExited {
            generation: 1,
            code: None,
        });
        assert!(actions.is_empty());
        assert_eq!(lc.state(), Restarting);
    }

    #[test]
    fn crash_after_app_ready_shows_console_without_restart() {
        let mut lc = LifecycleController::new(options());
        boot_to_app_ready(&mut lc, 4000, "T1");
        let actions = lc.handle(LifecycleEvent::BackendExited {
            generation: 1,
            code: Some(137),
        });
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::ShowConsoleError(msg) if msg.contains("137")));
        assert_eq!(lc.state(), AppReady);
    }

    #[test]
    fn reset_browser_reloads_current_app_url() {
        let mut lc = LifecycleController::new(options());
        boot_to_app_ready(&mut lc, 4000, "T1");
        assert_eq!(
            lc.handle(LifecycleEvent::ResetBrowser),
            vec![Action::LoadUrl("http://localhost:4000/app?token=T1".to_string())]
        );
    }

    #[test]
    fn shutdown_stops_backend_and_freezes() {
        let mut lc = LifecycleController::new(options());
        lc.handle(LifecycleEvent::Boot);
        let actions = lc.handle(LifecycleEvent::Shutdown);
        assert_eq!(actions, vec![Action::CancelTimers, Action::StopBackend]);
        assert!(lc.handle(LifecycleEvent::Shutdown).is_empty());
        assert!(lc.handle(ready(1, 4000, "T1")).is_empty());
    }

    #[test]
    fn transition_table_rejects_shortcuts() {
        assert!(!can_transition(SplashShown, AppLoading));
        assert!(!can_transition(AppReady, SwitchingUrl));
        assert!(!can_transition(Restarting, Restarting));
        assert!(can_transition(AppLoading, Restarting));
        assert!(can_transition(AppReady, ShuttingDown));
        assert!(!can_transition(ShuttingDown, ShuttingDown));
    }
}
