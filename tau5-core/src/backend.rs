use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{BackendConfig, Timings};
use crate::error::ShellError;
use crate::heartbeat::{self, Heartbeat};
use crate::launch::{self, LaunchContext, LaunchPlan, Runtime};
use crate::session;
use crate::session_log::BEAM_LOG;
use crate::util::non_empty_env;

const PORT_RELEASE_ATTEMPTS: u32 = 20;
const PORT_RELEASE_INTERVAL: Duration = Duration::from_millis(500);
const READINESS_REQUEST_TIMEOUT: Duration = Duration::from_millis(800);
const KILL_GRACE: Duration = Duration::from_secs(1);
/// Slack between the supervisor finishing a stop and the caller giving up.
const REPLY_MARGIN: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Output lines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line of backend output. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: SystemTime,
    pub text: String,
    pub severity: Severity,
    pub stream: Stream,
}

impl LogLine {
    pub fn info(text: impl Into<String>) -> Self {
        LogLine {
            timestamp: SystemTime::now(),
            text: text.into(),
            severity: Severity::Info,
            stream: Stream::Stdout,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        LogLine {
            timestamp: SystemTime::now(),
            text: text.into(),
            severity: Severity::Error,
            stream: Stream::Stderr,
        }
    }
}

fn beam_pid_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"\[TAU5_BEAM_PID:(\d+)\]").ok())
        .as_ref()
}

/// Extract the backend VM's own pid from its startup marker line.
pub fn parse_beam_pid(line: &str) -> Option<u32> {
    beam_pid_marker()?
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn is_port_conflict(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("address already in use") || lower.contains("eaddrinuse")
}

// ---------------------------------------------------------------------------
// Events and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Starting,
    Running,
    Restarting,
    Stopped,
    Failed,
}

/// Point-in-time view of the backend, readable from any thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub state: BackendState,
    pub generation: u64,
    pub port: u16,
    pub token: String,
    pub pid: Option<u32>,
    pub beam_pid: Option<u32>,
}

impl Default for BackendStatus {
    fn default() -> Self {
        BackendStatus {
            state: BackendState::Stopped,
            generation: 0,
            port: 0,
            token: String::new(),
            pid: None,
            beam_pid: None,
        }
    }
}

/// Everything the supervisor reports. Each event carries the generation of
/// the child it refers to so consumers can discard stale ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Spawned {
        generation: u64,
        pid: Option<u32>,
        port: u16,
    },
    Output {
        generation: u64,
        line: LogLine,
    },
    BeamPid {
        generation: u64,
        pid: u32,
    },
    Ready {
        generation: u64,
        port: u16,
        token: String,
    },
    RestartComplete {
        generation: u64,
        port: u16,
        token: String,
    },
    StartFailed {
        generation: u64,
        error: ShellError,
    },
    Exited {
        generation: u64,
        code: Option<i32>,
        expected: bool,
    },
}

impl BackendEvent {
    pub fn generation(&self) -> u64 {
        match self {
            BackendEvent::Spawned { generation, .. }
            | BackendEvent::Output { generation, .. }
            | BackendEvent::BeamPid { generation, .. }
            | BackendEvent::Ready { generation, .. }
            | BackendEvent::RestartComplete { generation, .. }
            | BackendEvent::StartFailed { generation, .. }
            | BackendEvent::Exited { generation, .. } => *generation,
        }
    }
}

/// Trait for delivering supervisor events to the frontend.
/// Implement this for your UI framework's event channel.
pub trait BackendEventSender: Send + Sync + 'static {
    fn send(&self, event: BackendEvent);
}

impl BackendEventSender for mpsc::UnboundedSender<BackendEvent> {
    fn send(&self, event: BackendEvent) {
        let _ = mpsc::UnboundedSender::send(self, event);
    }
}

impl BackendEventSender for std::sync::mpsc::Sender<BackendEvent> {
    fn send(&self, event: BackendEvent) {
        let _ = std::sync::mpsc::Sender::send(self, event);
    }
}

// ---------------------------------------------------------------------------
// Launchers
// ---------------------------------------------------------------------------

/// Produces the command line for each backend generation.
pub trait Launcher: Send + 'static {
    /// Port requested by configuration; 0 means pick a free one.
    fn requested_port(&self) -> u16;
    fn plan(&self, port: u16, token: &str, heartbeat: &Heartbeat) -> LaunchPlan;
}

/// Launches the real backend from a discovered runtime.
pub struct RuntimeLauncher {
    config: BackendConfig,
    runtime: Runtime,
    log_dir: Option<PathBuf>,
    secret_key_base: String,
}

impl RuntimeLauncher {
    pub fn new(config: BackendConfig, runtime: Runtime, log_dir: Option<PathBuf>) -> Self {
        RuntimeLauncher {
            config,
            runtime,
            log_dir,
            secret_key_base: session::generate_secret_key_base(),
        }
    }
}

impl Launcher for RuntimeLauncher {
    fn requested_port(&self) -> u16 {
        self.config.port
    }

    fn plan(&self, port: u16, token: &str, heartbeat: &Heartbeat) -> LaunchPlan {
        let ctx = LaunchContext {
            port,
            token,
            secret_key_base: &self.secret_key_base,
            log_dir: self.log_dir.as_deref(),
            heartbeat: Some(heartbeat),
        };
        launch::build_plan(&self.config, &self.runtime, &ctx)
    }
}

// ---------------------------------------------------------------------------
// Handle (used from the UI thread)
// ---------------------------------------------------------------------------

pub enum BackendCommand {
    Start,
    Restart,
    /// Stop the child within `budget`. With a reply the supervisor exits
    /// afterwards.
    Stop {
        reply: Option<std::sync::mpsc::Sender<()>>,
        budget: Duration,
    },
}

/// Cheap, cloneable front door to a running [`Supervisor`].
#[derive(Clone)]
pub struct BackendHandle {
    tx: mpsc::UnboundedSender<BackendCommand>,
    restarting: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    status: Arc<Mutex<BackendStatus>>,
}

impl BackendHandle {
    pub fn start(&self) -> bool {
        self.tx.send(BackendCommand::Start).is_ok()
    }

    /// Request a restart. Returns `false` when one is already in flight, in
    /// which case nothing happens.
    pub fn restart(&self) -> bool {
        if *self.shutdown.borrow() {
            log::warn!("Shutdown in progress, ignoring restart request");
            return false;
        }
        if self
            .restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("Backend restart already in progress, ignoring request");
            return false;
        }
        if self.tx.send(BackendCommand::Restart).is_err() {
            self.restarting.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    /// Shut the backend down for good and block the calling thread until it
    /// has exited or `timeout` elapsed, whichever comes first.
    ///
    /// Any restart in flight is abandoned and no further generation is
    /// spawned afterwards.
    pub fn stop_blocking(&self, timeout: Duration) -> bool {
        self.shutdown.send_replace(true);
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        if self
            .tx
            .send(BackendCommand::Stop {
                reply: Some(reply_tx),
                budget: timeout.saturating_sub(REPLY_MARGIN),
            })
            .is_err()
        {
            return false;
        }
        reply_rx.recv_timeout(timeout).is_ok()
    }

    pub fn status(&self) -> BackendStatus {
        self.status.lock().clone()
    }
}

// ---------------------------------------------------------------------------
// Supervisor (lives on the tokio runtime)
// ---------------------------------------------------------------------------

struct RunningChild {
    generation: u64,
    pid: Option<u32>,
    port: u16,
    kill_tx: Option<oneshot::Sender<()>>,
    exited_rx: watch::Receiver<Option<Option<i32>>>,
    stopping: Arc<AtomicBool>,
}

/// Owns the backend child process. Exactly one child exists at a time.
pub struct Supervisor<L: Launcher, S: BackendEventSender> {
    launcher: L,
    timings: Timings,
    sender: Arc<S>,
    child: Option<RunningChild>,
    generation: u64,
    port: u16,
    restarting: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    status: Arc<Mutex<BackendStatus>>,
    log_file: Option<Arc<Mutex<File>>>,
    port_release_attempts: u32,
    port_release_interval: Duration,
    heartbeat_interval: Duration,
}

impl<L: Launcher, S: BackendEventSender> Supervisor<L, S> {
    pub fn new(launcher: L, timings: Timings, sender: S) -> Self {
        Supervisor {
            launcher,
            timings,
            sender: Arc::new(sender),
            child: None,
            generation: 0,
            port: 0,
            restarting: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(watch::channel(false).0),
            status: Arc::new(Mutex::new(BackendStatus::default())),
            log_file: None,
            port_release_attempts: PORT_RELEASE_ATTEMPTS,
            port_release_interval: PORT_RELEASE_INTERVAL,
            heartbeat_interval: heartbeat::interval_from_env(non_empty_env(heartbeat::INTERVAL_ENV)),
        }
    }

    /// How long a restart waits for the previous generation's port.
    pub fn with_port_release(mut self, attempts: u32, interval: Duration) -> Self {
        self.port_release_attempts = attempts;
        self.port_release_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Mirror every output line into `<dir>/beam.log`.
    pub fn with_log_dir(mut self, dir: &Path) -> Self {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(BEAM_LOG))
        {
            Ok(file) => self.log_file = Some(Arc::new(Mutex::new(file))),
            Err(e) => log::warn!("Failed to open {} in {}: {}", BEAM_LOG, dir.display(), e),
        }
        self
    }

    pub fn handle(&self, tx: mpsc::UnboundedSender<BackendCommand>) -> BackendHandle {
        BackendHandle {
            tx,
            restarting: self.restarting.clone(),
            shutdown: self.shutdown.clone(),
            status: self.status.clone(),
        }
    }

    /// Process commands until the channel closes or a stop is requested
    /// with a reply. The child is always stopped before this returns.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BackendCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                BackendCommand::Start => {
                    let alive = self
                        .child
                        .as_ref()
                        .is_some_and(|c| c.exited_rx.borrow().is_none());
                    if alive {
                        log::warn!("Backend already running, ignoring start");
                        continue;
                    }
                    let _ = self.start().await;
                }
                BackendCommand::Restart => self.restart().await,
                BackendCommand::Stop { reply, budget } => {
                    if reply.is_some() {
                        self.request_shutdown();
                    }
                    self.stop(budget.min(self.stop_timeout())).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        }
        self.stop(self.stop_timeout()).await;
    }

    fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.timings.stop_timeout_ms)
    }

    fn set_state(&self, state: BackendState) {
        self.status.lock().state = state;
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Latch the supervisor into shutdown: later starts and restarts are
    /// refused and any port-release wait is abandoned.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolve a port, mint a token and spawn a new generation.
    pub async fn start(&mut self) -> Result<u64, ShellError> {
        if self.shutdown_requested() {
            log::info!("Shutdown requested, not starting another backend generation");
            self.restarting.store(false, Ordering::SeqCst);
            return Err(ShellError::SpawnFailed("shutdown in progress".to_string()));
        }
        self.generation += 1;
        let generation = self.generation;
        self.set_state(BackendState::Starting);

        let port = match self.pick_port() {
            Ok(port) => port,
            Err(e) => return Err(self.fail_start(generation, e)),
        };
        let heartbeat = match Heartbeat::reserve() {
            Ok(heartbeat) => heartbeat,
            Err(e) => return Err(self.fail_start(generation, e)),
        };
        let token = session::generate_token();
        let plan = self.launcher.plan(port, &token, &heartbeat);
        log::info!(
            "Starting backend generation {} on port {}: {} {:?}",
            generation,
            port,
            plan.program.display(),
            plan.args
        );

        let mut child = match TokioCommand::new(&plan.program)
            .args(&plan.args)
            .current_dir(&plan.cwd)
            .envs(&plan.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = ShellError::SpawnFailed(format!("{}: {}", plan.program.display(), e));
                return Err(self.fail_start(generation, err));
            }
        };

        let pid = child.id();
        self.port = port;
        {
            let mut status = self.status.lock();
            status.generation = generation;
            status.port = port;
            status.token = token.clone();
            status.pid = pid;
            status.beam_pid = None;
        }
        self.sender.send(BackendEvent::Spawned {
            generation,
            pid,
            port,
        });

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_output(
                stdout,
                Stream::Stdout,
                generation,
                port,
                self.sender.clone(),
                self.status.clone(),
                self.log_file.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_output(
                stderr,
                Stream::Stderr,
                generation,
                port,
                self.sender.clone(),
                self.status.clone(),
                self.log_file.clone(),
            ));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = watch::channel::<Option<Option<i32>>>(None);
        let stopping = Arc::new(AtomicBool::new(false));
        {
            let sender = self.sender.clone();
            let status = self.status.clone();
            let stopping = stopping.clone();
            let restarting = self.restarting.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    result = child.wait() => result,
                    _ = kill_rx => {
                        let _ = child.start_kill();
                        child.wait().await
                    }
                };
                let code = match result {
                    Ok(status) => status.code(),
                    Err(e) => {
                        log::warn!("Failed to wait for backend: {}", e);
                        None
                    }
                };
                let expected = stopping.load(Ordering::SeqCst);
                if expected {
                    log::info!("Backend generation {} exited with {:?}", generation, code);
                } else {
                    log::warn!(
                        "Backend generation {} exited unexpectedly with {:?}",
                        generation,
                        code
                    );
                }
                let mut died_starting = false;
                {
                    let mut status = status.lock();
                    if status.generation == generation {
                        died_starting = status.state == BackendState::Starting;
                        status.pid = None;
                        status.state = if expected {
                            BackendState::Stopped
                        } else {
                            BackendState::Failed
                        };
                    }
                }
                // A restart whose new child dies before readiness is over;
                // clear the flag before anyone hears about the exit.
                if died_starting && !expected {
                    restarting.store(false, Ordering::SeqCst);
                }
                let _ = exited_tx.send(Some(code));
                sender.send(BackendEvent::Exited {
                    generation,
                    code,
                    expected,
                });
            });
        }

        tokio::spawn(heartbeat::run(
            heartbeat,
            self.heartbeat_interval,
            exited_rx.clone(),
        ));

        tokio::spawn(watch_readiness(ReadinessWatch {
            generation,
            is_restart: self.restarting.load(Ordering::SeqCst),
            port,
            token,
            timings: self.timings,
            exited_rx: exited_rx.clone(),
            sender: self.sender.clone(),
            status: self.status.clone(),
            restarting: self.restarting.clone(),
            log_file: self.log_file.clone(),
        }));

        self.child = Some(RunningChild {
            generation,
            pid,
            port,
            kill_tx: Some(kill_tx),
            exited_rx,
            stopping,
        });
        Ok(generation)
    }

    fn pick_port(&self) -> Result<u16, ShellError> {
        let requested = self.launcher.requested_port();
        // An explicit port is always reused; an allocated one only while free.
        if self.port != 0 && (requested != 0 || session::is_port_available(self.port)) {
            return Ok(self.port);
        }
        session::resolve_port(requested)
    }

    fn fail_start(&self, generation: u64, error: ShellError) -> ShellError {
        log::error!("Backend generation {} failed to start: {}", generation, error);
        self.set_state(BackendState::Failed);
        self.restarting.store(false, Ordering::SeqCst);
        self.sender.send(BackendEvent::StartFailed {
            generation,
            error: error.clone(),
        });
        error
    }

    /// Graceful termination, escalating to a kill. The whole stop, kill
    /// included, finishes within `budget`.
    pub async fn stop(&mut self, budget: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        child.stopping.store(true, Ordering::SeqCst);
        let already_exited = child.exited_rx.borrow().is_some();
        if already_exited {
            return;
        }

        log::info!(
            "Stopping backend generation {} (pid {:?})",
            child.generation,
            child.pid
        );
        let kill_grace = KILL_GRACE.min(budget);
        let term_wait = budget.saturating_sub(kill_grace);
        let signalled = child.pid.map(terminate).unwrap_or(false);
        if signalled {
            let exited = tokio::time::timeout(term_wait, child.exited_rx.wait_for(|s| s.is_some()))
                .await
                .is_ok();
            if exited {
                return;
            }
            log::warn!(
                "Backend did not exit within {} ms, killing",
                term_wait.as_millis()
            );
        }
        if let Some(kill_tx) = child.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        let killed = tokio::time::timeout(kill_grace, child.exited_rx.wait_for(|s| s.is_some()))
            .await
            .is_ok();
        if !killed {
            log::error!(
                "Backend generation {} still running after kill (pid {:?})",
                child.generation,
                child.pid
            );
        }
    }

    /// Stop, wait for the port to be released and start a new generation
    /// with a new token. `RestartComplete` follows once it is reachable.
    pub async fn restart(&mut self) {
        self.restarting.store(true, Ordering::SeqCst);
        self.set_state(BackendState::Restarting);
        let old_port = self.child.as_ref().map(|c| c.port).unwrap_or(self.port);

        self.stop(self.stop_timeout()).await;

        if old_port != 0 {
            let mut shutdown = self.shutdown.subscribe();
            let released = tokio::select! {
                released = session::wait_for_port_release(
                    old_port,
                    self.port_release_attempts,
                    self.port_release_interval,
                ) => released,
                _ = until_shutdown(&mut shutdown) => {
                    log::info!("Shutdown requested, abandoning restart");
                    self.restarting.store(false, Ordering::SeqCst);
                    self.set_state(BackendState::Stopped);
                    return;
                }
            };
            if !released {
                log::warn!("Port {} was not released after stopping the backend", old_port);
            }
        }

        if self.start().await.is_err() && self.shutdown_requested() {
            self.set_state(BackendState::Stopped);
        }
    }
}

async fn until_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|requested| *requested).await;
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: plain syscall on a pid we spawned.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}

async fn read_output<R: AsyncRead + Unpin>(
    reader: R,
    stream: Stream,
    generation: u64,
    port: u16,
    sender: Arc<impl BackendEventSender>,
    status: Arc<Mutex<BackendStatus>>,
    log_file: Option<Arc<Mutex<File>>>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\n', '\r']).to_string();

                if let Some(file) = &log_file {
                    let _ = writeln!(file.lock(), "{}", text);
                }

                match stream {
                    Stream::Stdout => {
                        if let Some(pid) = parse_beam_pid(&text) {
                            {
                                let mut status = status.lock();
                                if status.generation == generation {
                                    status.beam_pid = Some(pid);
                                }
                            }
                            sender.send(BackendEvent::BeamPid { generation, pid });
                        }
                    }
                    Stream::Stderr => {
                        if is_port_conflict(&text) {
                            let starting = {
                                let status = status.lock();
                                status.generation == generation
                                    && status.state != BackendState::Running
                            };
                            if starting {
                                log::error!("Backend port {} is already in use: {}", port, text);
                                sender.send(BackendEvent::StartFailed {
                                    generation,
                                    error: ShellError::PortInUse(port),
                                });
                            }
                        }
                    }
                }

                let line = LogLine {
                    timestamp: SystemTime::now(),
                    text,
                    severity: match stream {
                        Stream::Stdout => Severity::Info,
                        Stream::Stderr => Severity::Error,
                    },
                    stream,
                };
                sender.send(BackendEvent::Output { generation, line });
            }
            Err(e) => {
                log::debug!("Backend {:?} reader closed: {}", stream, e);
                break;
            }
        }
    }
}

fn answers_http(port: u16) -> bool {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(READINESS_REQUEST_TIMEOUT))
        .http_status_as_error(false)
        .build()
        .into();
    agent
        .get(format!("http://127.0.0.1:{}/", port))
        .call()
        .is_ok()
}

struct ReadinessWatch<S: BackendEventSender> {
    generation: u64,
    is_restart: bool,
    port: u16,
    token: String,
    timings: Timings,
    exited_rx: watch::Receiver<Option<Option<i32>>>,
    sender: Arc<S>,
    status: Arc<Mutex<BackendStatus>>,
    restarting: Arc<AtomicBool>,
    log_file: Option<Arc<Mutex<File>>>,
}

/// Poll `GET /` until the backend answers, exits or the budget runs out.
/// Emits `Ready` at most once for the generation.
async fn watch_readiness<S: BackendEventSender>(w: ReadinessWatch<S>) {
    let started = Instant::now();
    let budget = Duration::from_millis(w.timings.readiness_timeout_ms);
    let poll = Duration::from_millis(w.timings.readiness_poll_ms);

    loop {
        let exited = w.exited_rx.borrow().is_some();
        if exited {
            // The exit watcher reports this one.
            if w.is_restart {
                w.restarting.store(false, Ordering::SeqCst);
            }
            return;
        }

        let port = w.port;
        let reachable = tokio::task::spawn_blocking(move || answers_http(port))
            .await
            .unwrap_or(false);
        if reachable {
            break;
        }

        if started.elapsed() >= budget {
            let waited_ms = started.elapsed().as_millis() as u64;
            log::error!(
                "Backend generation {} not reachable on port {} after {} ms",
                w.generation,
                w.port,
                waited_ms
            );
            {
                let mut status = w.status.lock();
                if status.generation == w.generation {
                    status.state = BackendState::Failed;
                }
            }
            if w.is_restart {
                w.restarting.store(false, Ordering::SeqCst);
            }
            w.sender.send(BackendEvent::StartFailed {
                generation: w.generation,
                error: ShellError::ReadinessTimeout {
                    port: w.port,
                    waited_ms,
                },
            });
            return;
        }
        tokio::time::sleep(poll).await;
    }

    {
        let mut status = w.status.lock();
        if status.generation != w.generation {
            return;
        }
        status.state = BackendState::Running;
    }
    log::info!(
        "Backend generation {} ready on port {} after {} ms",
        w.generation,
        w.port,
        started.elapsed().as_millis()
    );
    if let Some(file) = &w.log_file {
        let _ = writeln!(file.lock(), "[TAU5] backend ready on port {}", w.port);
    }
    w.sender.send(BackendEvent::Ready {
        generation: w.generation,
        port: w.port,
        token: w.token.clone(),
    });
    if w.is_restart && w.restarting.swap(false, Ordering::SeqCst) {
        w.sender.send(BackendEvent::RestartComplete {
            generation: w.generation,
            port: w.port,
            token: w.token,
        });
    }
}
