use std::collections::VecDeque;

use crate::animation::Fade;
use crate::backend::{LogLine, Severity};

pub const DEFAULT_MAX_LINES: usize = 100;
pub const DEFAULT_FADE_MS: u64 = 500;

const INITIAL_LINES: &[&str] = &["[TAU5] System initializing...", "[BEAM] Starting Erlang VM..."];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub text: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent {
    FadeOutComplete,
}

/// Boot-time log overlay: a bounded ring of lines plus a fade-out.
///
/// While attached it accepts lines from the backend; once its fade-out
/// completes it hides and detaches until [`ConsoleOverlay::show_error`].
#[derive(Debug, Clone)]
pub struct ConsoleOverlay {
    lines: VecDeque<ConsoleLine>,
    max_lines: usize,
    fade_ms: u64,
    fade: Option<Fade>,
    opacity: f64,
    visible: bool,
    attached: bool,
}

impl Default for ConsoleOverlay {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_FADE_MS)
    }
}

impl ConsoleOverlay {
    pub fn new(max_lines: usize, fade_ms: u64) -> Self {
        let mut overlay = ConsoleOverlay {
            lines: VecDeque::with_capacity(max_lines.max(1)),
            max_lines: max_lines.max(1),
            fade_ms,
            fade: None,
            opacity: 1.0,
            visible: true,
            attached: true,
        };
        for line in INITIAL_LINES {
            overlay.push(line.to_string(), Severity::Info);
        }
        overlay
    }

    fn push(&mut self, text: String, severity: Severity) {
        self.lines.push_back(ConsoleLine { text, severity });
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Append a backend line. Multi-line text is split on `\n` keeping
    /// inner blank lines; a completely empty input is skipped. Returns
    /// whether anything was appended.
    pub fn append(&mut self, line: &LogLine) -> bool {
        if !self.attached || line.text.is_empty() {
            return false;
        }
        for part in line.text.split('\n') {
            self.push(part.trim_end_matches('\r').to_string(), line.severity);
        }
        true
    }

    /// Start fading out. Ignored while a fade is already running.
    pub fn fade_out(&mut self) -> bool {
        if self.fade.is_some() || !self.visible {
            return false;
        }
        self.fade = Some(Fade::new(self.opacity, 0.0, self.fade_ms));
        true
    }

    pub fn tick(&mut self, dt_ms: f64) -> Option<ConsoleEvent> {
        let fade = self.fade.as_mut()?;
        self.opacity = fade.advance(dt_ms);
        if !fade.is_finished() {
            return None;
        }
        self.fade = None;
        self.visible = false;
        self.attached = false;
        Some(ConsoleEvent::FadeOutComplete)
    }

    /// Bring the overlay back, fully opaque, with `context` appended as an
    /// error. Re-attaches it to the backend output.
    pub fn show_error(&mut self, context: &str) {
        self.fade = None;
        self.opacity = 1.0;
        self.visible = true;
        self.attached = true;
        for part in context.split('\n') {
            self.push(part.to_string(), Severity::Error);
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &ConsoleLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }
}
