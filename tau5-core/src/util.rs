use std::ffi::OsString;
use std::path::{Path, PathBuf};

fn command_looks_like_path(command: &str) -> bool {
    command.contains(std::path::MAIN_SEPARATOR)
}

pub fn is_executable_file(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match path.metadata() {
            Ok(meta) => meta.is_file() && (meta.permissions().mode() & 0o111 != 0),
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Resolve `command` against `PATH`, or check it directly when it already
/// contains a path separator.
pub fn find_command_in_path(command: &str) -> Option<PathBuf> {
    if command_looks_like_path(command) {
        let path = PathBuf::from(command);
        return is_executable_file(&path).then_some(path);
    }

    let path_env: OsString = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_env) {
        let candidate = dir.join(command);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = dir.join(format!("{}.bat", command));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Escape a JSON payload for embedding in a single-quoted JS string literal.
pub fn escape_for_js_literal(json: &str) -> String {
    json.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Read an environment variable, treating empty values as unset.
pub fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_handles_quotes_and_newlines() {
        let escaped = escape_for_js_literal("{\"text\":\"it's\\n\"}\n");
        assert_eq!(escaped, "{\"text\":\"it\\'s\\\\n\"}\\n");
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_is_required() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        assert!(!is_executable_file(&file));

        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&file, perms).unwrap();
        assert!(is_executable_file(&file));
        assert_eq!(
            find_command_in_path(file.to_str().unwrap()),
            Some(file.clone())
        );
    }

    #[test]
    fn missing_command_is_none() {
        assert!(find_command_in_path("tau5-definitely-not-a-real-command").is_none());
    }
}
