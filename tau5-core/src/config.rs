use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ShellError;

pub const DEFAULT_RELEASE_NAME: &str = "tau5";
pub const DEFAULT_MCP_PORT: u16 = 5555;
pub const DEFAULT_CHROME_DEVTOOLS_PORT: u16 = 9223;
pub const MAX_CHANNEL: u8 = 9;
pub const SERVER_PATH_ENV: &str = "TAU5_SERVER_PATH";

/// Upper bound on how long a stop may block the UI thread during shutdown.
pub const MAX_STOP_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Dev,
    Prod,
}

impl Env {
    pub fn as_str(self) -> &'static str {
        match self {
            Env::Dev => "dev",
            Env::Prod => "prod",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub debug_pane: bool,
    pub repl: bool,
    pub mcp: bool,
    pub tidewave: bool,
    pub chrome_devtools: bool,
    pub remote_access: bool,
}

/// Everything needed to launch and talk to the backend.
///
/// Built once from the command line and never mutated afterwards; restarts
/// reuse it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_path: PathBuf,
    pub release_name: String,
    /// Release version directory; discovered from `releases/` when `None`.
    pub version: Option<String>,
    /// Requested local port. 0 asks the OS for a free one.
    pub port: u16,
    pub env: Env,
    pub channel: u8,
    pub features: Features,
    pub mcp_port: u16,
    pub chrome_devtools_port: u16,
}

impl BackendConfig {
    pub fn is_dev(&self) -> bool {
        self.env == Env::Dev
    }
}

/// Raw command-line choices, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliFlags {
    pub env: Option<Env>,
    pub devtools: bool,
    pub port_local: Option<u16>,
    pub port_mcp: Option<u16>,
    pub port_chrome_dev: Option<u16>,
    pub mcp: bool,
    pub tidewave: bool,
    pub chrome_devtools: bool,
    pub repl: bool,
    pub allow_remote_access: bool,
    pub debug_pane: Option<bool>,
    pub channel: Option<u8>,
    pub server_path: Option<PathBuf>,
    pub release_name: Option<String>,
    pub release_version: Option<String>,
}

impl CliFlags {
    /// Apply implications and consistency rules and produce the immutable
    /// backend configuration.
    ///
    /// `env_server_path` is the value of `TAU5_SERVER_PATH`, consulted only
    /// when no `--server-path` was given.
    pub fn into_config(self, env_server_path: Option<String>) -> Result<BackendConfig, ShellError> {
        let mut env = self.env;
        let mut features = Features {
            debug_pane: self.debug_pane.unwrap_or(true),
            repl: self.repl,
            mcp: self.mcp,
            tidewave: self.tidewave,
            chrome_devtools: self.chrome_devtools,
            remote_access: self.allow_remote_access,
        };

        if self.devtools {
            if env == Some(Env::Prod) {
                return Err(ShellError::InvalidArguments(
                    "--devtools requires development mode".to_string(),
                ));
            }
            env = Some(Env::Dev);
            features.mcp = true;
            features.tidewave = true;
            features.chrome_devtools = true;
            features.debug_pane = true;
        }

        if features.tidewave {
            features.mcp = true;
        }

        for (enabled, flag) in [(features.repl, "--repl"), (features.tidewave, "--tidewave")] {
            if !enabled {
                continue;
            }
            match env {
                Some(Env::Prod) => {
                    return Err(ShellError::InvalidArguments(format!(
                        "{} requires development mode",
                        flag
                    )));
                }
                Some(Env::Dev) => {}
                None => {
                    log::info!("{} implies development mode, switching to dev", flag);
                    env = Some(Env::Dev);
                }
            }
        }

        let channel = self.channel.unwrap_or(0);
        if channel > MAX_CHANNEL {
            return Err(ShellError::InvalidArguments(format!(
                "channel must be between 0 and {}, got {}",
                MAX_CHANNEL, channel
            )));
        }

        let port = self.port_local.unwrap_or(0);
        let mcp_port = self.port_mcp.unwrap_or(DEFAULT_MCP_PORT);
        let chrome_devtools_port = self.port_chrome_dev.unwrap_or(DEFAULT_CHROME_DEVTOOLS_PORT);
        check_port_conflicts(&[
            ("local", port, true),
            ("MCP", mcp_port, features.mcp),
            ("Chrome DevTools", chrome_devtools_port, features.chrome_devtools),
        ])?;

        let base_path = match self.server_path {
            Some(path) => path,
            None => match env_server_path.filter(|p| !p.trim().is_empty()) {
                Some(path) => PathBuf::from(path),
                None => {
                    return Err(ShellError::Configuration(format!(
                        "no server path given; pass --server-path or set {}",
                        SERVER_PATH_ENV
                    )))
                }
            },
        };

        Ok(BackendConfig {
            base_path,
            release_name: self
                .release_name
                .unwrap_or_else(|| DEFAULT_RELEASE_NAME.to_string()),
            version: self.release_version,
            port,
            env: env.unwrap_or(Env::Prod),
            channel,
            features,
            mcp_port,
            chrome_devtools_port,
        })
    }
}

fn check_port_conflicts(ports: &[(&str, u16, bool)]) -> Result<(), ShellError> {
    let active: Vec<&(&str, u16, bool)> = ports
        .iter()
        .filter(|(_, port, enabled)| *enabled && *port != 0)
        .collect();
    for (i, (name_a, port_a, _)) in active.iter().enumerate() {
        for (name_b, port_b, _) in &active[i + 1..] {
            if port_a == port_b {
                return Err(ShellError::InvalidArguments(format!(
                    "{} port and {} port are both {}",
                    name_a, name_b, port_a
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Timing overrides (shell.toml)
// ---------------------------------------------------------------------------

/// Durations and budgets used by the lifecycle controller and supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub min_splash_ms: u64,
    pub splash_reveal_ms: u64,
    pub fade_to_black_ms: u64,
    pub reveal_app_ms: u64,
    pub readiness_timeout_ms: u64,
    pub readiness_poll_ms: u64,
    pub stop_timeout_ms: u64,
    pub max_load_attempts: u32,
    pub max_start_attempts: u32,
    pub console_fade_ms: u64,
    pub console_max_lines: usize,
    pub max_log_sessions: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            min_splash_ms: 5_000,
            splash_reveal_ms: 1_000,
            fade_to_black_ms: 500,
            reveal_app_ms: 600,
            readiness_timeout_ms: 30_000,
            readiness_poll_ms: 300,
            stop_timeout_ms: MAX_STOP_TIMEOUT_MS,
            max_load_attempts: 5,
            max_start_attempts: 3,
            console_fade_ms: 500,
            console_max_lines: 100,
            max_log_sessions: 10,
        }
    }
}

const TIMING_KEYS: &[&str] = &[
    "min_splash_ms",
    "splash_reveal_ms",
    "fade_to_black_ms",
    "reveal_app_ms",
    "readiness_timeout_ms",
    "readiness_poll_ms",
    "stop_timeout_ms",
    "max_load_attempts",
    "max_start_attempts",
    "console_fade_ms",
    "console_max_lines",
    "max_log_sessions",
];

impl Timings {
    /// Parse overrides, returning the timings and any keys that were ignored.
    pub fn from_toml_str(contents: &str) -> Result<(Timings, Vec<String>), String> {
        let table: toml::Table = contents
            .parse()
            .map_err(|e| format!("Failed to parse timing overrides: {}", e))?;
        let unknown: Vec<String> = table
            .keys()
            .filter(|k| !TIMING_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        let timings: Timings = toml::from_str(contents)
            .map_err(|e| format!("Failed to parse timing overrides: {}", e))?;
        Ok((timings.clamped(), unknown))
    }

    /// Load from `path`, falling back to defaults when the file is absent or
    /// malformed.
    pub fn load_from(path: &Path) -> Timings {
        let contents = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return Timings::default(),
        };
        match Self::from_toml_str(&contents) {
            Ok((timings, unknown)) => {
                for key in unknown {
                    log::warn!("Ignoring unknown key '{}' in {}", key, path.display());
                }
                timings
            }
            Err(e) => {
                log::warn!("{} ({}), using defaults", e, path.display());
                Timings::default()
            }
        }
    }

    pub fn load() -> Timings {
        match timings_path() {
            Some(path) => Self::load_from(&path),
            None => Timings::default(),
        }
    }

    fn clamped(mut self) -> Self {
        self.stop_timeout_ms = self.stop_timeout_ms.min(MAX_STOP_TIMEOUT_MS);
        self.max_load_attempts = self.max_load_attempts.clamp(1, 5);
        self.max_start_attempts = self.max_start_attempts.max(1);
        self.console_max_lines = self.console_max_lines.max(1);
        self.readiness_poll_ms = self.readiness_poll_ms.max(50);
        self
    }
}

fn timings_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("tau5").join("shell.toml"));
    }
    dirs::config_dir().map(|dir| dir.join("tau5").join("shell.toml"))
}
