use std::path::PathBuf;

use clap::Parser;

use tau5_core::config::{
    CliFlags, Env, DEFAULT_CHROME_DEVTOOLS_PORT, DEFAULT_MCP_PORT, SERVER_PATH_ENV,
};

/// Tau5 desktop shell: starts the local backend and shows it in a window.
#[derive(Debug, Parser)]
#[command(name = "tau5", version, about)]
pub struct Cli {
    /// Run the backend in development mode
    #[arg(long, conflicts_with = "env_prod")]
    pub env_dev: bool,

    /// Run the backend in production mode (default)
    #[arg(long)]
    pub env_prod: bool,

    /// Development mode with MCP, Tidewave, Chrome DevTools and the debug pane
    #[arg(long)]
    pub devtools: bool,

    /// Local HTTP port for the backend (0 picks a free port)
    #[arg(long, value_name = "PORT")]
    pub port_local: Option<u16>,

    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_MCP_PORT)]
    pub port_mcp: u16,

    #[arg(long, value_name = "PORT", default_value_t = DEFAULT_CHROME_DEVTOOLS_PORT)]
    pub port_chrome_dev: u16,

    /// Enable the MCP endpoint
    #[arg(long)]
    pub mcp: bool,

    /// Enable Tidewave (implies --mcp)
    #[arg(long)]
    pub tidewave: bool,

    /// Expose the Chrome DevTools protocol
    #[arg(long)]
    pub chrome_devtools: bool,

    /// Enable the backend REPL console (development mode only)
    #[arg(long)]
    pub repl: bool,

    /// Let embedded pages reach non-local hosts (development mode only)
    #[arg(long)]
    pub allow_remote_access: bool,

    #[arg(long, conflicts_with = "no_debug_pane")]
    pub debug_pane: bool,

    /// Hide the debug pane
    #[arg(long)]
    pub no_debug_pane: bool,

    /// Instance channel, 0-9
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=9))]
    pub channel: Option<u8>,

    /// Backend installation directory
    #[arg(long, value_name = "DIR", env = SERVER_PATH_ENV)]
    pub server_path: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, short)]
    pub verbose: bool,

    /// Run the health checks, print the launch plan and exit
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    pub fn to_flags(&self) -> CliFlags {
        let env = if self.env_dev {
            Some(Env::Dev)
        } else if self.env_prod {
            Some(Env::Prod)
        } else {
            None
        };
        let debug_pane = if self.no_debug_pane {
            Some(false)
        } else if self.debug_pane {
            Some(true)
        } else {
            None
        };
        CliFlags {
            env,
            devtools: self.devtools,
            port_local: self.port_local,
            port_mcp: Some(self.port_mcp),
            port_chrome_dev: Some(self.port_chrome_dev),
            mcp: self.mcp,
            tidewave: self.tidewave,
            chrome_devtools: self.chrome_devtools,
            repl: self.repl,
            allow_remote_access: self.allow_remote_access,
            debug_pane,
            channel: self.channel,
            server_path: self.server_path.clone(),
            release_name: None,
            release_version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let mut full = vec!["tau5"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full)
    }

    #[test]
    fn defaults() {
        let cli = parse(&["--server-path", "/srv/tau5"]).unwrap();
        let flags = cli.to_flags();
        assert_eq!(flags.env, None);
        assert_eq!(flags.port_mcp, Some(5555));
        assert_eq!(flags.port_chrome_dev, Some(9223));
        assert_eq!(flags.debug_pane, None);
        assert_eq!(flags.server_path, Some(PathBuf::from("/srv/tau5")));
    }

    #[test]
    fn env_flags_conflict() {
        assert!(parse(&["--env-dev", "--env-prod"]).is_err());
    }

    #[test]
    fn channel_is_range_checked() {
        assert!(parse(&["--channel", "10"]).is_err());
        assert_eq!(parse(&["--channel", "9"]).unwrap().channel, Some(9));
    }

    #[test]
    fn no_debug_pane_disables_pane() {
        let cli = parse(&["--no-debug-pane"]).unwrap();
        assert_eq!(cli.to_flags().debug_pane, Some(false));
    }

    #[test]
    fn devtools_flows_into_config() {
        let cli = parse(&["--devtools", "--server-path", "/srv/tau5"]).unwrap();
        let config = cli.to_flags().into_config(None).unwrap();
        assert!(config.is_dev());
        assert!(config.features.mcp && config.features.tidewave);
        assert!(config.features.chrome_devtools && config.features.debug_pane);
    }
}
