pub mod animation;
pub mod backend;
pub mod banner;
pub mod config;
pub mod console;
pub mod debug_pane;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod launch;
pub mod lifecycle;
pub mod log_tail;
pub mod session;
pub mod session_log;
pub mod url_policy;
pub mod urls;
pub mod util;

/// Product name used for window titles, banners and config directories.
pub const APP_NAME: &str = "Tau5";
