//! Per-run log session directories.
//!
//! Every launch gets `<root>/<unix-seconds>_p<pid>/`, holding `gui.log`,
//! `beam.log` and whatever the backend writes there via `TAU5_LOG_DIR`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::util::non_empty_env;

pub const LOG_DIR_ENV: &str = "TAU5_LOG_DIR";
pub const GUI_LOG: &str = "gui.log";
pub const BEAM_LOG: &str = "beam.log";

/// `TAU5_LOG_DIR` if set, otherwise `<data-dir>/tau5/logs`.
pub fn logs_root() -> Option<PathBuf> {
    if let Some(dir) = non_empty_env(LOG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|d| d.join("tau5").join("logs"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSession {
    dir: PathBuf,
}

impl LogSession {
    /// Create a session under the default root and prune old ones.
    pub fn create(max_sessions: usize) -> Result<LogSession, String> {
        let root = logs_root().ok_or_else(|| "Could not determine a log directory".to_string())?;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let session = Self::create_in(&root, secs, std::process::id())?;
        match prune(&root, max_sessions) {
            Ok(0) => {}
            Ok(n) => log::debug!("Pruned {} old log session(s)", n),
            Err(e) => log::warn!("{}", e),
        }
        Ok(session)
    }

    pub fn create_in(root: &Path, unix_secs: u64, pid: u32) -> Result<LogSession, String> {
        let dir = root.join(session_name(unix_secs, pid));
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create log directory {}: {}", dir.display(), e))?;
        Ok(LogSession { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn gui_log(&self) -> PathBuf {
        self.dir.join(GUI_LOG)
    }

}

/// `*.log` files currently in a session directory, sorted by name.
pub fn log_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    files.sort();
    files
}

pub fn session_name(unix_secs: u64, pid: u32) -> String {
    format!("{}_p{}", unix_secs, pid)
}

/// Parse `<secs>_p<pid>`; anything else is not a session directory.
fn parse_session_name(name: &str) -> Option<(u64, u32)> {
    let (secs, pid) = name.split_once("_p")?;
    Some((secs.parse().ok()?, pid.parse().ok()?))
}

/// Delete the oldest session directories so that at most `keep` remain.
/// Returns how many were removed.
pub fn prune(root: &Path, keep: usize) -> Result<usize, String> {
    let entries = fs::read_dir(root)
        .map_err(|e| format!("Failed to read log directory {}: {}", root.display(), e))?;

    let mut sessions: Vec<((u64, u32), PathBuf)> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let key = parse_session_name(&e.file_name().to_string_lossy())?;
            Some((key, e.path()))
        })
        .collect();

    if sessions.len() <= keep {
        return Ok(0);
    }
    sessions.sort();
    let excess = sessions.len() - keep;
    let mut removed = 0;
    for (_, path) in sessions.into_iter().take(excess) {
        match fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("Failed to remove old log session {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_named_session_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let session = LogSession::create_in(tmp.path(), 1700000000, 4242).unwrap();
        assert!(session.dir().is_dir());
        assert!(session.dir().ends_with("1700000000_p4242"));
    }

    #[test]
    fn prunes_oldest_first_and_ignores_foreign_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        for secs in [100u64, 300, 200, 500, 400] {
            LogSession::create_in(tmp.path(), secs, 1).unwrap();
        }
        fs::create_dir(tmp.path().join("keep-me")).unwrap();
        fs::write(tmp.path().join("10_p1"), "a file, not a session").unwrap();

        assert_eq!(prune(tmp.path(), 3).unwrap(), 2);
        let mut left: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["10_p1", "300_p1", "400_p1", "500_p1", "keep-me"]);
        assert_eq!(prune(tmp.path(), 3).unwrap(), 0);
    }

    #[test]
    fn lists_only_log_files() {
        let tmp = tempfile::tempdir().unwrap();
        let session = LogSession::create_in(tmp.path(), 1, 1).unwrap();
        fs::write(session.dir().join("beam.log"), "x").unwrap();
        fs::write(session.dir().join("mcp.log"), "y").unwrap();
        fs::write(session.dir().join("notes.txt"), "z").unwrap();
        let names: Vec<String> = log_files(session.dir())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["beam.log", "mcp.log"]);
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(parse_session_name("12_p34"), Some((12, 34)));
        assert_eq!(parse_session_name("12_34"), None);
        assert_eq!(parse_session_name("x_p1"), None);
    }
}
