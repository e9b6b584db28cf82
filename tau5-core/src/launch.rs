use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{BackendConfig, Env};
use crate::error::ShellError;
use crate::heartbeat::Heartbeat;
use crate::util::find_command_in_path;

#[cfg(windows)]
const ERL_EXE: &str = "erl.exe";
#[cfg(not(windows))]
const ERL_EXE: &str = "erl";

/// Where the backend runtime lives on disk, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    /// A compiled release: `<base>/_build/prod/rel/<name>`.
    Release {
        release_root: PathBuf,
        erl: PathBuf,
        version_dir: PathBuf,
    },
    /// A source checkout run through `mix phx.server`.
    Mix { mix: PathBuf },
}

/// A fully resolved command line for one backend generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub token: String,
}

/// Values that change per backend generation.
#[derive(Debug, Clone)]
pub struct LaunchContext<'a> {
    pub port: u16,
    pub token: &'a str,
    pub secret_key_base: &'a str,
    pub log_dir: Option<&'a Path>,
    pub heartbeat: Option<&'a Heartbeat>,
}

/// Values never printed by [`LaunchPlan::describe`].
const SECRET_ENV: &[&str] = &["SECRET_KEY_BASE", "TAU5_TOKEN", "TAU5_HEARTBEAT_TOKEN"];

pub fn release_root(config: &BackendConfig) -> PathBuf {
    config
        .base_path
        .join("_build")
        .join("prod")
        .join("rel")
        .join(&config.release_name)
}

/// Locate the runtime for `config` without starting anything.
pub fn discover_runtime(config: &BackendConfig) -> Result<Runtime, ShellError> {
    if !config.base_path.is_dir() {
        return Err(ShellError::MissingRuntime(format!(
            "server directory {} does not exist",
            config.base_path.display()
        )));
    }
    match config.env {
        Env::Prod => discover_release(config),
        Env::Dev => discover_mix(config),
    }
}

fn discover_release(config: &BackendConfig) -> Result<Runtime, ShellError> {
    let release_root = release_root(config);
    let erl = find_erts_binary(&release_root).ok_or_else(|| {
        ShellError::MissingRuntime(format!(
            "no erts-*/bin/{} under {}",
            ERL_EXE,
            release_root.display()
        ))
    })?;

    let releases_dir = release_root.join("releases");
    let version_dir = match &config.version {
        Some(version) => releases_dir.join(version),
        None => find_release_version(&releases_dir).ok_or_else(|| {
            ShellError::MissingRuntime(format!(
                "no release version with start.boot under {}",
                releases_dir.display()
            ))
        })?,
    };
    if !version_dir.join("start.boot").is_file() {
        return Err(ShellError::MissingRuntime(format!(
            "{} is missing start.boot",
            version_dir.display()
        )));
    }

    Ok(Runtime::Release {
        release_root,
        erl,
        version_dir,
    })
}

fn discover_mix(config: &BackendConfig) -> Result<Runtime, ShellError> {
    if !config.base_path.join("mix.exs").is_file() {
        return Err(ShellError::MissingRuntime(format!(
            "{} has no mix.exs",
            config.base_path.display()
        )));
    }
    let mix = find_command_in_path("mix").ok_or_else(|| {
        ShellError::MissingRuntime("`mix` not found on PATH (required in dev mode)".to_string())
    })?;
    Ok(Runtime::Mix { mix })
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return Vec::new(),
    };
    entries.sort();
    entries
}

fn find_erts_binary(release_root: &Path) -> Option<PathBuf> {
    // Newest erts first when several are bundled.
    sorted_entries(release_root)
        .into_iter()
        .rev()
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("erts-"))
        })
        .map(|p| p.join("bin").join(ERL_EXE))
        .find(|erl| erl.is_file())
}

fn find_release_version(releases_dir: &Path) -> Option<PathBuf> {
    sorted_entries(releases_dir)
        .into_iter()
        .rev()
        .find(|p| p.is_dir() && p.join("start.boot").is_file())
}

/// Environment handed to the child. The set is fixed; nothing from the
/// host environment is filtered, only added or overridden.
pub fn build_env(config: &BackendConfig, runtime: &Runtime, ctx: &LaunchContext<'_>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let mut set = |k: &str, v: String| {
        env.insert(k.to_string(), v);
    };

    set("TAU5_MODE", "gui".to_string());
    set("TAU5_ENV", config.env.as_str().to_string());
    set("TAU5_TOKEN", ctx.token.to_string());
    set("PORT", ctx.port.to_string());
    set("PHX_HOST", "127.0.0.1".to_string());
    set("MIX_ENV", config.env.as_str().to_string());
    set("RELEASE_DISTRIBUTION", "none".to_string());
    if let Some(dir) = ctx.log_dir {
        set("TAU5_LOG_DIR", dir.to_string_lossy().to_string());
    }
    if config.channel != 0 {
        set("TAU5_CHANNEL", config.channel.to_string());
    }
    if let Some(heartbeat) = ctx.heartbeat {
        set("TAU5_HEARTBEAT_ENABLED", "true".to_string());
        set("TAU5_HEARTBEAT_PORT", heartbeat.port.to_string());
        set("TAU5_HEARTBEAT_TOKEN", heartbeat.token.clone());
    }

    if config.features.mcp {
        set("TAU5_ENABLE_DEV_MCP", "1".to_string());
        set("TAU5_MCP_PORT", config.mcp_port.to_string());
    }
    if config.features.tidewave {
        set("TAU5_TIDEWAVE_ENABLED", "1".to_string());
    }
    if config.features.repl {
        set("TAU5_ENABLE_DEV_REPL", "1".to_string());
    }

    if let Runtime::Release {
        release_root,
        version_dir,
        ..
    } = runtime
    {
        set("PHX_SERVER", "1".to_string());
        set(
            "RELEASE_SYS_CONFIG",
            version_dir.join("sys").to_string_lossy().to_string(),
        );
        set("RELEASE_ROOT", release_root.to_string_lossy().to_string());
        set("SECRET_KEY_BASE", ctx.secret_key_base.to_string());
    }

    env
}

fn release_args(release_root: &Path, version_dir: &Path) -> Vec<String> {
    let p = |path: PathBuf| path.to_string_lossy().to_string();
    vec![
        "-config".to_string(),
        p(version_dir.join("sys")),
        "-boot".to_string(),
        p(version_dir.join("start")),
        "-boot_var".to_string(),
        "RELEASE_LIB".to_string(),
        p(release_root.join("lib")),
        "-args_file".to_string(),
        p(version_dir.join("vm.args")),
        "-noshell".to_string(),
        "-s".to_string(),
        "elixir".to_string(),
        "start_cli".to_string(),
        "-mode".to_string(),
        "embedded".to_string(),
        "-extra".to_string(),
        "--no-halt".to_string(),
    ]
}

/// Assemble the command line for one generation of the backend.
pub fn build_plan(config: &BackendConfig, runtime: &Runtime, ctx: &LaunchContext<'_>) -> LaunchPlan {
    let (program, args) = match runtime {
        Runtime::Release {
            release_root,
            erl,
            version_dir,
        } => (erl.clone(), release_args(release_root, version_dir)),
        Runtime::Mix { mix } => (mix.clone(), vec!["phx.server".to_string()]),
    };

    LaunchPlan {
        program,
        args,
        cwd: config.base_path.clone(),
        env: build_env(config, runtime, ctx),
        port: ctx.port,
        token: ctx.token.to_string(),
    }
}

impl LaunchPlan {
    /// Human readable summary for `--check` and debug logging. The token
    /// and secret are redacted.
    pub fn describe(&self) -> String {
        let mut out = format!("program: {}\n", self.program.display());
        out.push_str(&format!("args:    {}\n", self.args.join(" ")));
        out.push_str(&format!("cwd:     {}\n", self.cwd.display()));
        out.push_str("env:\n");
        for (k, v) in &self.env {
            let shown = if SECRET_ENV.contains(&k.as_str()) {
                "<redacted>"
            } else {
                v.as_str()
            };
            out.push_str(&format!("  {}={}\n", k, shown));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Features;

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
        std::fs::write(bin.join(ERL_EXE), "").unwrap();
        let version = rel.join("releases/0.1.0");
        std::fs::create_dir_all(&version).unwrap();
        std::fs::write(version.join("start.boot"), "").unwrap();
        rel
    }

    fn ctx<'a>(token: &'a str, log_dir: Option<&'a Path>) -> LaunchContext<'a> {
        LaunchContext {
            port: 41234,
            token,
            secret_key_base: "c2VjcmV0",
            log_dir,
            heartbeat: None,
        }
    }

    #[test]
    fn missing_base_path_is_missing_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("nope"), Env::Prod);
        let err = discover_runtime(&cfg).unwrap_err();
        assert_eq!(err.exit_code().code(), 20);
    }

    #[test]
    fn base_without_runtime_dir_is_missing_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_runtime(&config(dir.path(), Env::Prod)).unwrap_err();
        assert!(matches!(err, ShellError::MissingRuntime(_)));
    }

    #[test]
    fn discovers_release_and_builds_prod_plan() {
        let dir = tempfile::tempdir().unwrap();
        let rel = fake_release(dir.path());
        let cfg = config(dir.path(), Env::Prod);
        let runtime = discover_runtime(&cfg).unwrap();
        let plan = build_plan(&cfg, &runtime, &ctx("T1", None));

        assert_eq!(plan.program, rel.join("erts-15.1/bin").join(ERL_EXE));
        assert_eq!(plan.cwd, dir.path());
        assert_eq!(plan.args[0], "-config");
        assert!(plan.args[1].ends_with("releases/0.1.0/sys"));
        assert_eq!(plan.args.last().map(String::as_str), Some("--no-halt"));

        assert_eq!(plan.env["TAU5_ENV"], "prod");
        assert_eq!(plan.env["TAU5_TOKEN"], "T1");
        assert_eq!(plan.env["PORT"], "41234");
        assert_eq!(plan.env["PHX_HOST"], "127.0.0.1");
        assert_eq!(plan.env["PHX_SERVER"], "1");
        assert_eq!(plan.env["RELEASE_DISTRIBUTION"], "none");
        assert_eq!(plan.env["SECRET_KEY_BASE"], "c2VjcmV0");
        assert!(plan.env["RELEASE_ROOT"].ends_with("rel/tau5"));
        assert!(!plan.env.contains_key("TAU5_ENABLE_DEV_REPL"));
    }

    #[test]
    fn explicit_version_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        fake_release(dir.path());
        let mut cfg = config(dir.path(), Env::Prod);
        cfg.version = Some("9.9.9".to_string());
        assert!(discover_runtime(&cfg).is_err());
    }

    #[test]
    fn dev_plan_uses_mix_and_feature_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), Env::Dev);
        cfg.features.repl = true;
        cfg.features.mcp = true;
        let runtime = Runtime::Mix {
            mix: PathBuf::from("/usr/bin/mix"),
        };
        let log_dir = dir.path().join("logs");
        let plan = build_plan(&cfg, &runtime, &ctx("T2", Some(&log_dir)));

        assert_eq!(plan.args, vec!["phx.server".to_string()]);
        assert_eq!(plan.env["TAU5_ENV"], "dev");
        assert_eq!(plan.env["MIX_ENV"], "dev");
        assert_eq!(plan.env["TAU5_ENABLE_DEV_REPL"], "1");
        assert_eq!(plan.env["TAU5_MCP_PORT"], "5555");
        assert_eq!(plan.env["TAU5_LOG_DIR"], log_dir.to_string_lossy());
        assert!(!plan.env.contains_key("PHX_SERVER"));
        assert!(!plan.env.contains_key("SECRET_KEY_BASE"));
    }

    #[test]
    fn dev_without_mix_exs_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_runtime(&config(dir.path(), Env::Dev)).unwrap_err();
        assert!(err.to_string().contains("mix.exs"));
    }

    #[test]
    fn describe_redacts_secrets() {
        let dir = tempfile::tempdir().unwrap();
        fake_release(dir.path());
        let cfg = config(dir.path(), Env::Prod);
        let runtime = discover_runtime(&cfg).unwrap();
        let text = build_plan(&cfg, &runtime, &ctx("supersecret", None)).describe();
        assert!(!text.contains("supersecret"));
        assert!(!text.contains("c2VjcmV0"));
        assert!(text.contains("TAU5_TOKEN=<redacted>"));
    }

    #[test]
    fn heartbeat_is_passed_and_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), Env::Dev);
        let runtime = Runtime::Mix {
            mix: PathBuf::from("/usr/bin/mix"),
        };
        let heartbeat = Heartbeat {
            port: 50123,
            token: "beatbeat".to_string(),
        };
        let with_heartbeat = LaunchContext {
            heartbeat: Some(&heartbeat),
            ..ctx("T3", None)
        };
        let plan = build_plan(&cfg, &runtime, &with_heartbeat);
        assert_eq!(plan.env["TAU5_HEARTBEAT_ENABLED"], "true");
        assert_eq!(plan.env["TAU5_HEARTBEAT_PORT"], "50123");
        assert_eq!(plan.env["TAU5_HEARTBEAT_TOKEN"], "beatbeat");
        assert!(!plan.describe().contains("beatbeat"));

        let plain = build_plan(&cfg, &runtime, &ctx("T3", None));
        assert!(!plain.env.contains_key("TAU5_HEARTBEAT_ENABLED"));
    }
}
