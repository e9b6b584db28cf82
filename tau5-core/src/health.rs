//! Pre-flight checks behind `tau5 --check`.
//!
//! Each check yields a [`CheckResult`]; a failed check that would stop the
//! backend from launching carries the exit code the shell would have died
//! with, and the first such code becomes the exit code of the whole run.

use std::fmt::Write as _;
use std::path::Path;

use crate::config::{BackendConfig, Env};
use crate::error::ExitCode;
use crate::heartbeat::Heartbeat;
use crate::launch::{self, Runtime};
use crate::session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub category: &'static str,
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
    /// Exit code reported when this check fails; `None` for advisory checks.
    pub blocking: Option<ExitCode>,
}

impl CheckResult {
    pub fn passed(category: &'static str, name: &str, detail: impl Into<String>) -> Self {
        CheckResult {
            category,
            name: name.to_string(),
            status: CheckStatus::Passed,
            detail: detail.into(),
            blocking: None,
        }
    }

    pub fn warning(category: &'static str, name: &str, detail: impl Into<String>) -> Self {
        CheckResult {
            status: CheckStatus::Warning,
            ..Self::passed(category, name, detail)
        }
    }

    pub fn failed(category: &'static str, name: &str, detail: impl Into<String>, code: ExitCode) -> Self {
        CheckResult {
            status: CheckStatus::Failed,
            blocking: Some(code),
            ..Self::passed(category, name, detail)
        }
    }
}

#[derive(Debug, Default)]
pub struct HealthReport {
    results: Vec<CheckResult>,
    runtime: Option<Runtime>,
}

impl HealthReport {
    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// The runtime found while checking, if discovery succeeded.
    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_ref()
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn exit_code(&self) -> ExitCode {
        let mut failed = self.results.iter().filter(|r| r.status == CheckStatus::Failed);
        match failed.next() {
            Some(first) => first.blocking.unwrap_or(ExitCode::GeneralError),
            None => ExitCode::Success,
        }
    }

    /// Grouped, one line per check, with a closing summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut category = "";
        for result in &self.results {
            if result.category != category {
                category = result.category;
                let _ = writeln!(out, "\n[{}]", category);
            }
            let mark = match result.status {
                CheckStatus::Passed => "✓",
                CheckStatus::Warning => "⚠",
                CheckStatus::Failed => "✗",
            };
            let _ = write!(out, "  {} {}", mark, result.name);
            if !result.detail.is_empty() {
                let _ = write!(out, ": {}", result.detail);
            }
            out.push('\n');
        }

        let (passed, warnings, failed) = (
            self.count(CheckStatus::Passed),
            self.count(CheckStatus::Warning),
            self.count(CheckStatus::Failed),
        );
        let overall = match (failed, warnings) {
            (0, 0) => "PASSED",
            (0, _) => "PASSED with warnings",
            _ => "FAILED",
        };
        let _ = writeln!(
            out,
            "\n[Summary]\n  Tests: {} passed, {} warnings, {} failed\n  Result: {}",
            passed, warnings, failed, overall
        );
        out
    }
}

/// Run every toolkit-independent check for `config`.
pub fn run(config: &BackendConfig, log_dir: Option<&Path>) -> HealthReport {
    let mut report = HealthReport::default();
    if check_server_dir(config, &mut report) {
        check_runtime(config, &mut report);
    }
    check_networking(config, &mut report);
    check_log_dir(log_dir, &mut report);
    report
}

fn check_server_dir(config: &BackendConfig, report: &mut HealthReport) -> bool {
    const CATEGORY: &str = "Server Components";
    let base = &config.base_path;
    if !base.is_dir() {
        report.push(CheckResult::failed(
            CATEGORY,
            "Server directory",
            format!("{} does not exist", base.display()),
            ExitCode::ServerDirNotFound,
        ));
        return false;
    }
    report.push(CheckResult::passed(CATEGORY, "Server directory", base.display().to_string()));

    // A packaged release ships without its mix project.
    let mix_exs = base.join("mix.exs").is_file();
    report.push(match (mix_exs, config.env) {
        (true, _) => CheckResult::passed(CATEGORY, "Elixir project", "mix.exs found"),
        (false, Env::Prod) => CheckResult::warning(CATEGORY, "Elixir project", "mix.exs not found"),
        (false, Env::Dev) => CheckResult::failed(
            CATEGORY,
            "Elixir project",
            "mix.exs not found (required in dev mode)",
            ExitCode::ServerDirNotFound,
        ),
    });
    if config.env == Env::Dev {
        report.push(if base.join("deps").is_dir() {
            CheckResult::passed(CATEGORY, "Dependencies", "deps/ found")
        } else {
            CheckResult::warning(CATEGORY, "Dependencies", "not installed (run: mix deps.get)")
        });
    }
    true
}

fn check_runtime(config: &BackendConfig, report: &mut HealthReport) {
    const CATEGORY: &str = "Backend Runtime";
    match launch::discover_runtime(config) {
        Ok(runtime) => {
            match &runtime {
                Runtime::Release {
                    erl, version_dir, ..
                } => {
                    report.push(CheckResult::passed(CATEGORY, "ERTS runtime", erl.display().to_string()));
                    report.push(if version_dir.join("vm.args").is_file() {
                        CheckResult::passed(CATEGORY, "VM configuration", version_dir.display().to_string())
                    } else {
                        CheckResult::warning(
                            CATEGORY,
                            "VM configuration",
                            format!("no vm.args in {}", version_dir.display()),
                        )
                    });
                    report.push(if is_executable(erl) {
                        CheckResult::passed(CATEGORY, "Launchable", "erl is executable")
                    } else {
                        CheckResult::failed(
                            CATEGORY,
                            "Launchable",
                            format!("{} is not executable", erl.display()),
                            ExitCode::ProcessSpawnFailed,
                        )
                    });
                }
                Runtime::Mix { mix } => {
                    report.push(CheckResult::passed(CATEGORY, "Mix toolchain", mix.display().to_string()));
                }
            }
            report.runtime = Some(runtime);
        }
        Err(e) => {
            let code = e.exit_code();
            report.push(CheckResult::failed(CATEGORY, "Runtime discovery", e.to_string(), code));
        }
    }
}

fn check_networking(config: &BackendConfig, report: &mut HealthReport) {
    const CATEGORY: &str = "Networking";
    if config.port == 0 {
        report.push(match session::pick_free_port() {
            Ok(port) => CheckResult::passed(CATEGORY, "Port allocation", format!("allocated port {}", port)),
            Err(e) => CheckResult::failed(
                CATEGORY,
                "Port allocation",
                e.to_string(),
                ExitCode::PortAllocationFailed,
            ),
        });
    } else if session::is_port_available(config.port) {
        report.push(CheckResult::passed(
            CATEGORY,
            "Port binding",
            format!("port {} is free", config.port),
        ));
    } else {
        report.push(CheckResult::failed(
            CATEGORY,
            "Port binding",
            format!("port {} is already in use", config.port),
            ExitCode::PortInUse,
        ));
    }

    report.push(match Heartbeat::reserve() {
        Ok(heartbeat) => CheckResult::passed(
            CATEGORY,
            "Heartbeat port",
            format!("UDP port {} available", heartbeat.port),
        ),
        Err(e) => CheckResult::failed(
            CATEGORY,
            "Heartbeat port",
            e.to_string(),
            ExitCode::PortAllocationFailed,
        ),
    });
}

fn check_log_dir(log_dir: Option<&Path>, report: &mut HealthReport) {
    const CATEGORY: &str = "File System";
    let Some(dir) = log_dir else {
        report.push(CheckResult::warning(CATEGORY, "Log directory", "no log session"));
        return;
    };
    let marker = dir.join(format!(".tau5-check-{}", std::process::id()));
    let writable = std::fs::write(&marker, b"").is_ok();
    let _ = std::fs::remove_file(&marker);
    report.push(if writable {
        CheckResult::passed(CATEGORY, "Log directory", format!("writable: {}", dir.display()))
    } else {
        CheckResult::warning(CATEGORY, "Log directory", format!("not writable: {}", dir.display()))
    });
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Features;
    use std::path::PathBuf;

    fn config(base: &Path, env: Env) -> BackendConfig {
        BackendConfig {
            base_path: base.to_path_buf(),
            release_name: "tau5".to_string(),
            version: None,
            port: 0,
            env,
            channel: 0,
            features: Features::default(),
            mcp_port: 5555,
            chrome_devtools_port: 9223,
        }
    }

    fn fake_release(base: &Path) -> PathBuf {
        let rel = base.join("_build/prod/rel/tau5");
        let bin = rel.join("erts-15.1/bin");
        std::fs::create_dir_all(&bin).unwrap();
        let erl = bin.join("erl");
        std::fs::write(&erl, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&erl, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let version = rel.join("releases/0.1.0");
        std::fs::create_dir_all(&version).unwrap();
        std::fs::write(version.join("start.boot"), "").unwrap();
        std::fs::write(version.join("vm.args"), "").unwrap();
        erl
    }

    #[test]
    fn missing_server_dir_fails_with_its_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(&config(&dir.path().join("absent"), Env::Prod), Some(dir.path()));
        assert_eq!(report.exit_code(), ExitCode::ServerDirNotFound);
        assert!(report.runtime().is_none());
        assert!(report.render().contains("Result: FAILED"));
    }

    #[test]
    fn empty_server_dir_has_no_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(&config(dir.path(), Env::Prod), None);
        assert_eq!(report.exit_code(), ExitCode::ServerDirNotFound);
        assert!(report
            .results()
            .iter()
            .any(|r| r.name == "Runtime discovery" && r.status == CheckStatus::Failed));
    }

    #[test]
    fn valid_release_passes() {
        let dir = tempfile::tempdir().unwrap();
        let erl = fake_release(dir.path());
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();

        let report = run(&config(dir.path(), Env::Prod), Some(&logs));
        assert_eq!(report.exit_code(), ExitCode::Success, "{}", report.render());
        assert!(matches!(report.runtime(), Some(Runtime::Release { erl: e, .. }) if *e == erl));
        // No mix.exs in a packaged release is only a warning.
        assert!(report.render().contains("PASSED with warnings"));
        assert_eq!(std::fs::read_dir(&logs).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_erl_is_not_launchable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let erl = fake_release(dir.path());
        std::fs::set_permissions(&erl, std::fs::Permissions::from_mode(0o644)).unwrap();

        let report = run(&config(dir.path(), Env::Prod), None);
        assert_eq!(report.exit_code(), ExitCode::ProcessSpawnFailed);
    }

    #[test]
    fn busy_requested_port_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fake_release(dir.path());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut cfg = config(dir.path(), Env::Prod);
        cfg.port = listener.local_addr().unwrap().port();

        let report = run(&cfg, None);
        assert_eq!(report.exit_code(), ExitCode::PortInUse);
    }
}
