//! The debug pane as seen by the rest of the shell.
//!
//! The frontend owns the widgets; the controller only talks to it through
//! [`DebugPane`] and listens for [`DebugPaneEvent`]s.

use std::collections::VecDeque;

use crate::backend::LogLine;

/// Lines kept per sink before the oldest are dropped.
pub const DEFAULT_SINK_LINES: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugPaneEvent {
    RestartBeamRequested,
    ResetBrowserRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Backend,
    Host,
}

pub trait DebugPane {
    fn append(&self, sink: Sink, line: &LogLine);
    /// Show the inspector for the main web view.
    fn attach_dev_tools(&self);
    fn load_dashboard(&self, url: &str);
    fn load_console(&self, url: &str);
}

/// Point the pane at a freshly ready backend.
pub fn attach(pane: &dyn DebugPane, dashboard_url: &str, console_url: Option<&str>) {
    pane.attach_dev_tools();
    pane.load_dashboard(dashboard_url);
    if let Some(url) = console_url {
        pane.load_console(url);
    }
}

/// Rows an entry occupies once rendered with a trailing newline.
pub fn display_rows(line: &LogLine) -> usize {
    line.text.matches('\n').count() + 1
}

/// Bounded, ordered line store backing one sink.
#[derive(Debug, Clone)]
pub struct LogRing {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        LogRing {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append, returning how many display rows the evicted entries took up
    /// so a text view can drop exactly that many rows from its top.
    pub fn push(&mut self, line: LogLine) -> usize {
        self.lines.push_back(line);
        let mut evicted_rows = 0;
        while self.lines.len() > self.capacity {
            if let Some(old) = self.lines.pop_front() {
                evicted_rows += display_rows(&old);
            }
        }
        evicted_rows
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl DebugPane for Recorder {
        fn append(&self, sink: Sink, line: &LogLine) {
            self.calls.borrow_mut().push(format!("{:?}:{}", sink, line.text));
        }
        fn attach_dev_tools(&self) {
            self.calls.borrow_mut().push("devtools".into());
        }
        fn load_dashboard(&self, url: &str) {
            self.calls.borrow_mut().push(format!("dashboard:{}", url));
        }
        fn load_console(&self, url: &str) {
            self.calls.borrow_mut().push(format!("console:{}", url));
        }
    }

    #[test]
    fn attach_loads_console_only_when_given() {
        let pane = Recorder::default();
        attach(&pane, "http://localhost:1/dev/dashboard?token=t", None);
        assert_eq!(
            *pane.calls.borrow(),
            vec!["devtools", "dashboard:http://localhost:1/dev/dashboard?token=t"]
        );

        let pane = Recorder::default();
        attach(&pane, "d", Some("c"));
        assert_eq!(*pane.calls.borrow(), vec!["devtools", "dashboard:d", "console:c"]);
    }

    #[test]
    fn ring_is_bounded_and_ordered() {
        let mut ring = LogRing::new(3);
        let mut evicted = 0;
        for i in 0..5 {
            evicted += ring.push(LogLine::info(format!("{}", i)));
        }
        assert_eq!(evicted, 2);
        let texts: Vec<&str> = ring.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
    }

    #[test]
    fn eviction_counts_rows_of_multi_line_entries() {
        let mut ring = LogRing::new(2);
        assert_eq!(ring.push(LogLine::error("** (RuntimeError)\n  stack\n  more")), 0);
        assert_eq!(ring.push(LogLine::info("a")), 0);
        assert_eq!(ring.push(LogLine::info("b")), 3);
        assert_eq!(ring.push(LogLine::info("c")), 1);
        assert_eq!(display_rows(&LogLine::info("")), 1);
    }
}
