use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// UI settings, persisted to `~/.config/tau5/settings.json`.
///
/// Missing fields in an existing file fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Window ───────────────────────────────────────────────────────────
    pub window_width: i32,
    pub window_height: i32,
    pub window_maximized: bool,

    // ── Debug pane ───────────────────────────────────────────────────────
    pub debug_pane_visible: bool,
    pub debug_pane_width: i32,
    pub debug_pane_font_size: i32,

    // ── Console overlay ──────────────────────────────────────────────────
    pub console_font_size: i32,
}

pub const MIN_FONT_SIZE: i32 = 6;
pub const MAX_FONT_SIZE: i32 = 32;

impl Default for Settings {
    fn default() -> Self {
        Settings {
            window_width: 1280,
            window_height: 800,
            window_maximized: false,

            debug_pane_visible: true,
            debug_pane_width: 480,
            debug_pane_font_size: 10,

            console_font_size: 11,
        }
    }
}

impl Settings {
    fn sanitized(mut self) -> Self {
        self.window_width = self.window_width.max(400);
        self.window_height = self.window_height.max(300);
        self.debug_pane_width = self.debug_pane_width.max(120);
        self.debug_pane_font_size = self.debug_pane_font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self.console_font_size = self.console_font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self
    }
}

fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let tau5_dir = PathBuf::from(home).join(".config").join("tau5");
    let _ = std::fs::create_dir_all(&tau5_dir);
    tau5_dir.join("settings.json")
}

pub fn load() -> Settings {
    load_from(&settings_path())
}

pub fn save(settings: &Settings) {
    if let Err(e) = save_to(&settings_path(), settings) {
        log::warn!("{}", e);
    }
}

pub fn load_from(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) => settings.sanitized(),
            Err(e) => {
                log::warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

pub fn save_to(path: &Path, settings: &Settings) -> Result<(), String> {
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    std::fs::write(path, json)
        .map_err(|e| format!("Failed to write settings to {}: {}", path.display(), e))
}
