use std::fmt;

/// Process exit codes reported by the shell.
///
/// The numeric values are stable; scripts and the backend's own tooling
/// match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidArguments = 2,
    ConfigurationError = 3,
    ServerDirNotFound = 20,
    PortAllocationFailed = 40,
    PortInUse = 41,
    BeamStartFailed = 60,
    BeamCrashed = 61,
    ProcessSpawnFailed = 62,
    WebViewInitFailed = 81,
    LoggerInitFailed = 100,
    TokenGenerationFailed = 120,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Errors surfaced by the shell's subordinate components.
///
/// Only the lifecycle controller turns these into user-visible outcomes;
/// everything else just returns or emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Flags that cannot be combined or are out of range.
    InvalidArguments(String),
    /// Bad or missing configuration.
    Configuration(String),
    /// The backend runtime binary (or dev toolchain) could not be found.
    MissingRuntime(String),
    /// The backend reported, or we resolved, an unusable port.
    InvalidPort(String),
    /// The port is taken by another process.
    PortInUse(u16),
    /// The child process could not be started.
    SpawnFailed(String),
    /// The backend never accepted HTTP connections within the budget.
    ReadinessTimeout { port: u16, waited_ms: u64 },
    /// The web view could not load the backend page.
    LoadFailed { url: String, attempts: u32 },
    /// The backend exited while it was expected to be running.
    BackendCrash { code: Option<i32>, after_ready: bool },
    /// Filesystem or OS failure not covered above.
    Io(String),
}

impl ShellError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ShellError::InvalidArguments(_) => ExitCode::InvalidArguments,
            ShellError::Configuration(_) => ExitCode::ConfigurationError,
            ShellError::MissingRuntime(_) => ExitCode::ServerDirNotFound,
            ShellError::InvalidPort(_) => ExitCode::PortAllocationFailed,
            ShellError::PortInUse(_) => ExitCode::PortInUse,
            ShellError::SpawnFailed(_) => ExitCode::ProcessSpawnFailed,
            ShellError::ReadinessTimeout { .. } => ExitCode::BeamStartFailed,
            ShellError::LoadFailed { .. } => ExitCode::WebViewInitFailed,
            ShellError::BackendCrash { .. } => ExitCode::BeamCrashed,
            ShellError::Io(_) => ExitCode::GeneralError,
        }
    }

    /// Whether the lifecycle controller may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShellError::ReadinessTimeout { .. }
                | ShellError::LoadFailed { .. }
                | ShellError::BackendCrash {
                    after_ready: false,
                    ..
                }
        )
    }
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            ShellError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ShellError::MissingRuntime(msg) => write!(f, "Backend runtime not found: {}", msg),
            ShellError::InvalidPort(msg) => write!(f, "Invalid port: {}", msg),
            ShellError::PortInUse(port) => write!(f, "Port {} is already in use", port),
            ShellError::SpawnFailed(msg) => write!(f, "Failed to start backend: {}", msg),
            ShellError::ReadinessTimeout { port, waited_ms } => write!(
                f,
                "Backend did not accept connections on port {} within {} ms",
                port, waited_ms
            ),
            ShellError::LoadFailed { url, attempts } => {
                write!(f, "Failed to load {} after {} attempts", url, attempts)
            }
            ShellError::BackendCrash { code, after_ready } => {
                let when = if *after_ready { "while running" } else { "during startup" };
                match code {
                    Some(code) => write!(f, "Backend exited {} with code {}", when, code),
                    None => write!(f, "Backend exited {} (killed by signal)", when),
                }
            }
            ShellError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ShellError {}

impl From<std::io::Error> for ShellError {
    fn from(e: std::io::Error) -> Self {
        ShellError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_runtime_maps_to_server_dir_not_found() {
        let err = ShellError::MissingRuntime("/opt/tau5".into());
        assert_eq!(err.exit_code().code(), 20);
        assert!(err.to_string().contains("/opt/tau5"));
    }

    #[test]
    fn only_pre_ready_crashes_are_retryable() {
        assert!(ShellError::BackendCrash {
            code: Some(1),
            after_ready: false
        }
        .is_retryable());
        assert!(!ShellError::BackendCrash {
            code: Some(1),
            after_ready: true
        }
        .is_retryable());
        assert!(!ShellError::SpawnFailed("nope".into()).is_retryable());
    }

    #[test]
    fn signal_exit_is_described() {
        let err = ShellError::BackendCrash {
            code: None,
            after_ready: true,
        };
        assert_eq!(err.to_string(), "Backend exited while running (killed by signal)");
    }
}
