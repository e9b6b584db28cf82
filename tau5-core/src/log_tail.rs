use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Incremental reader for a log file that another process appends to.
///
/// Each [`LogTail::poll`] returns the complete lines written since the last
/// call. A trailing partial line is held back until its newline arrives. If
/// the file shrinks (rotated or truncated) reading restarts from the top.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    position: u64,
    partial: String,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogTail {
            path: path.into(),
            position: 0,
            partial: String::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn poll(&mut self) -> Result<Vec<String>, String> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(format!("Failed to open {}: {}", self.path.display(), e)),
        };
        let len = file
            .metadata()
            .map_err(|e| format!("Failed to stat {}: {}", self.path.display(), e))?
            .len();

        if len < self.position {
            log::debug!("{} shrank, re-reading from the start", self.path.display());
            self.position = 0;
            self.partial.clear();
        }
        if len == self.position {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.position))
            .map_err(|e| format!("Failed to seek {}: {}", self.path.display(), e))?;
        let mut bytes = Vec::with_capacity((len - self.position) as usize);
        file.take(len - self.position)
            .read_to_end(&mut bytes)
            .map_err(|e| format!("Failed to read {}: {}", self.path.display(), e))?;
        self.position += bytes.len() as u64;

        self.partial.push_str(&String::from_utf8_lossy(&bytes));
        let Some(last_newline) = self.partial.rfind('\n') else {
            return Ok(Vec::new());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        Ok(complete
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn missing_file_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut tail = LogTail::new(tmp.path().join("absent.log"));
        assert!(tail.poll().unwrap().is_empty());
    }

    #[test]
    fn reads_only_new_complete_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("beam.log");
        append(&path, "one\ntwo\nthr");
        let mut tail = LogTail::new(&path);
        assert_eq!(tail.poll().unwrap(), vec!["one", "two"]);
        assert!(tail.poll().unwrap().is_empty());
        append(&path, "ee\nfour\n");
        assert_eq!(tail.poll().unwrap(), vec!["three", "four"]);
    }

    #[test]
    fn truncation_restarts_from_top() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp.log");
        append(&path, "a long first line\nsecond\n");
        let mut tail = LogTail::new(&path);
        assert_eq!(tail.poll().unwrap().len(), 2);

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["fresh"]);
        assert_eq!(tail.position(), 6);
    }
}
