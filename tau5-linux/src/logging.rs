//! Host logging: `env_logger` with its output teed to stderr, the session's
//! `gui.log` and an in-memory queue the debug pane drains.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use tau5_core::backend::LogLine;

const MAX_PENDING_LINES: usize = 2_000;

/// Lines logged by the host that the UI has not picked up yet.
#[derive(Clone, Default)]
pub struct HostLog {
    pending: Arc<Mutex<VecDeque<LogLine>>>,
}

impl HostLog {
    fn push(&self, text: &str) {
        let line = if text.contains(" ERROR ") || text.contains(" WARN ") {
            LogLine::error(text)
        } else {
            LogLine::info(text)
        };
        let mut pending = self.pending.lock();
        pending.push_back(line);
        while pending.len() > MAX_PENDING_LINES {
            pending.pop_front();
        }
    }

    pub fn drain(&self) -> Vec<LogLine> {
        self.pending.lock().drain(..).collect()
    }
}

struct TeeWriter {
    stderr: bool,
    file: Option<File>,
    host_log: HostLog,
    partial: String,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = self.file.as_mut() {
            let _ = file.write_all(buf);
        }
        self.partial.push_str(&String::from_utf8_lossy(buf));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end();
            if !line.is_empty() {
                self.host_log.push(line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        io::stderr().flush()
    }
}

/// Install the global logger. `RUST_LOG` still overrides the default level.
pub fn init(verbose: bool, gui_log: Option<&Path>) -> Result<HostLog, String> {
    let file = match gui_log {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?,
        ),
        None => None,
    };
    let host_log = HostLog::default();
    let writer = TeeWriter {
        stderr: true,
        file,
        host_log: host_log.clone(),
        partial: String::new(),
    };

    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .try_init()
        .map_err(|e| format!("Failed to initialise logger: {}", e))?;
    Ok(host_log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tau5_core::backend::Severity;

    #[test]
    fn tee_splits_lines_and_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gui.log");
        let host_log = HostLog::default();
        let mut writer = TeeWriter {
            stderr: false,
            file: Some(File::create(&path).unwrap()),
            host_log: host_log.clone(),
            partial: String::new(),
        };
        writer.write_all(b"[t INFO tau5] one\n[t ERROR tau5] tw").unwrap();
        writer.write_all(b"o\n").unwrap();
        writer.flush().unwrap();

        let lines = host_log.drain();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].severity, Severity::Info);
        assert_eq!(lines[1].text, "[t ERROR tau5] two");
        assert_eq!(lines[1].severity, Severity::Error);
        assert!(host_log.drain().is_empty());

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "[t INFO tau5] one\n[t ERROR tau5] two\n");
    }

    #[test]
    fn pending_queue_is_bounded() {
        let host_log = HostLog::default();
        for i in 0..(MAX_PENDING_LINES + 10) {
            host_log.push(&format!("line {}", i));
        }
        let lines = host_log.drain();
        assert_eq!(lines.len(), MAX_PENDING_LINES);
        assert_eq!(lines[0].text, "line 10");
    }
}
