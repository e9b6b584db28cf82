use std::fmt::Write as _;
use std::path::PathBuf;

use crate::config::{BackendConfig, Env};
use crate::urls;

const RULE_HEAVY: &str = "========================================================";
const RULE_LIGHT: &str = "--------------------------------------------------------";

/// Everything the startup banner reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerInfo {
    pub env: Env,
    pub port: u16,
    pub token: String,
    pub host_pid: u32,
    pub beam_pid: Option<u32>,
    pub log_dir: Option<PathBuf>,
    pub channel: u8,
    pub mcp_port: Option<u16>,
    pub tidewave: bool,
    pub chrome_devtools_port: Option<u16>,
    pub repl: bool,
}

impl BannerInfo {
    pub fn new(config: &BackendConfig, port: u16, token: &str) -> Self {
        let features = &config.features;
        BannerInfo {
            env: config.env,
            port,
            token: token.to_string(),
            host_pid: std::process::id(),
            beam_pid: None,
            log_dir: None,
            channel: config.channel,
            mcp_port: features.mcp.then_some(config.mcp_port),
            tidewave: features.tidewave,
            chrome_devtools_port: features
                .chrome_devtools
                .then_some(config.chrome_devtools_port),
            repl: features.repl,
        }
    }

    pub fn with_beam_pid(mut self, pid: Option<u32>) -> Self {
        self.beam_pid = pid;
        self
    }

    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }
}

/// Render the boxed banner printed to stdout once the app is showing.
pub fn render(info: &BannerInfo) -> String {
    let mode = match info.env {
        Env::Dev => "development",
        Env::Prod => "production",
    };
    let title = match info.env {
        Env::Dev => "Tau5 Development",
        Env::Prod => "Tau5",
    };

    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", RULE_HEAVY);
    let _ = writeln!(out, "{} Started", title);
    let _ = writeln!(out, "{}", RULE_LIGHT);
    let _ = writeln!(out, "  Mode:       {}", mode);
    let _ = writeln!(out, "  Local:      {}", urls::app_url(info.port, &info.token));
    let _ = writeln!(out, "  Host PID:   {}", info.host_pid);
    if let Some(pid) = info.beam_pid {
        let _ = writeln!(out, "  BEAM PID:   {}", pid);
    }
    match &info.log_dir {
        Some(dir) => {
            let _ = writeln!(out, "  Logs:       {}", dir.display());
        }
        None => {
            let _ = writeln!(out, "  Logs:       (disabled)");
        }
    }
    if info.channel > 0 {
        let _ = writeln!(out, "  Channel:    {}", info.channel);
    }
    if let Some(port) = info.mcp_port {
        let suffix = if info.tidewave { " (with Tidewave)" } else { "" };
        let _ = writeln!(out, "  MCP:        Port {}{}", port, suffix);
    }
    if let Some(port) = info.chrome_devtools_port {
        let _ = writeln!(out, "  Chrome CDP: Port {}", port);
    }
    if info.repl {
        let _ = writeln!(out, "  Console:    {}", urls::console_url(info.port, &info.token));
    }
    let _ = writeln!(out, "{}", RULE_HEAVY);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Features;

    fn info() -> BannerInfo {
        BannerInfo {
            env: Env::Prod,
            port: 4000,
            token: "abc".into(),
            host_pid: 42,
            beam_pid: None,
            log_dir: Some(PathBuf::from("/tmp/tau5/logs/1_p42")),
            channel: 0,
            mcp_port: None,
            tidewave: false,
            chrome_devtools_port: None,
            repl: false,
        }
    }

    #[test]
    fn minimal_prod_banner() {
        let text = render(&info());
        assert!(text.contains("Tau5 Started"));
        assert!(text.contains("Mode:       production"));
        assert!(text.contains("http://localhost:4000/app?token=abc"));
        assert!(text.contains("Host PID:   42"));
        assert!(text.contains("/tmp/tau5/logs/1_p42"));
        assert!(!text.contains("BEAM PID"));
        assert!(!text.contains("Channel"));
        assert!(!text.contains("MCP"));
        assert!(!text.contains("Console"));
    }

    #[test]
    fn optional_lines_appear_when_enabled() {
        let mut i = info();
        i.env = Env::Dev;
        i.beam_pid = Some(777);
        i.channel = 3;
        i.mcp_port = Some(5555);
        i.tidewave = true;
        i.chrome_devtools_port = Some(9223);
        i.repl = true;
        let text = render(&i);
        assert!(text.contains("Tau5 Development Started"));
        assert!(text.contains("BEAM PID:   777"));
        assert!(text.contains("Channel:    3"));
        assert!(text.contains("MCP:        Port 5555 (with Tidewave)"));
        assert!(text.contains("Chrome CDP: Port 9223"));
        assert!(text.contains("http://localhost:4000/dev/console?token=abc"));
    }

    #[test]
    fn built_from_config_respects_features() {
        let config = BackendConfig {
            base_path: PathBuf::from("/srv/tau5"),
            release_name: "tau5".into(),
            version: None,
            port: 0,
            env: Env::Dev,
            channel: 1,
            features: Features {
                mcp: true,
                ..Features::default()
            },
            mcp_port: 5555,
            chrome_devtools_port: 9223,
        };
        let i = BannerInfo::new(&config, 4100, "t");
        assert_eq!(i.mcp_port, Some(5555));
        assert_eq!(i.chrome_devtools_port, None);
        assert_eq!(i.host_pid, std::process::id());
    }
}
