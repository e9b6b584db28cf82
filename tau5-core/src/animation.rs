//! Opacity animation for the full-window transition overlay.
//!
//! The model is toolkit-free: the frontend calls [`TransitionOverlay::tick`]
//! from a frame or timer callback with the elapsed milliseconds and applies
//! [`TransitionOverlay::opacity`] to its widget.

/// Opacity at or above which a fade-in counts as complete.
pub const OPAQUE_THRESHOLD: f64 = 0.99;
/// Opacity at or below which a fade-out counts as complete.
pub const TRANSPARENT_THRESHOLD: f64 = 0.01;

/// Quadratic ease-in/ease-out. Monotonic on `[0, 1]`.
pub fn ease_in_out_quad(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// A single interpolation from one value to another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    from: f64,
    to: f64,
    duration_ms: f64,
    elapsed_ms: f64,
}

impl Fade {
    pub fn new(from: f64, to: f64, duration_ms: u64) -> Self {
        Fade {
            from,
            to,
            duration_ms: duration_ms.max(1) as f64,
            elapsed_ms: 0.0,
        }
    }

    /// Advance by `dt_ms` (negative deltas are ignored) and return the new value.
    pub fn advance(&mut self, dt_ms: f64) -> f64 {
        self.elapsed_ms = (self.elapsed_ms + dt_ms.max(0.0)).min(self.duration_ms);
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.is_finished() {
            return self.to;
        }
        let progress = ease_in_out_quad(self.elapsed_ms / self.duration_ms);
        self.from + (self.to - self.from) * progress
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed_ms >= self.duration_ms
    }

    pub fn target(&self) -> f64 {
        self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEvent {
    FadeInComplete,
    FadeOutComplete,
}

/// Full-window black layer. Starts opaque and visible.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOverlay {
    opacity: f64,
    visible: bool,
    animation: Option<Fade>,
}

impl Default for TransitionOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionOverlay {
    pub fn new() -> Self {
        TransitionOverlay {
            opacity: 1.0,
            visible: true,
            animation: None,
        }
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Target of the running animation, or the settled opacity.
    pub fn target(&self) -> f64 {
        self.animation.map(|a| a.target()).unwrap_or(self.opacity)
    }

    /// Fade towards opaque from wherever the overlay currently is.
    /// Supersedes any running animation.
    pub fn fade_in(&mut self, duration_ms: u64) {
        self.visible = true;
        self.animation = Some(Fade::new(self.opacity, 1.0, duration_ms));
    }

    /// Fade towards transparent; the overlay hides itself at the end.
    pub fn fade_out(&mut self, duration_ms: u64) {
        self.visible = true;
        self.animation = Some(Fade::new(self.opacity, 0.0, duration_ms));
    }

    /// Jump to `opacity`, cancelling any animation.
    pub fn set_immediate(&mut self, opacity: f64) {
        self.animation = None;
        self.opacity = opacity.clamp(0.0, 1.0);
        self.visible = self.opacity > TRANSPARENT_THRESHOLD;
    }

    /// Advance the running animation. Returns a completion event when the
    /// animation finishes on this tick.
    pub fn tick(&mut self, dt_ms: f64) -> Option<OverlayEvent> {
        let fade = self.animation.as_mut()?;
        self.opacity = fade.advance(dt_ms);
        if !fade.is_finished() {
            return None;
        }
        self.animation = None;
        if self.opacity >= OPAQUE_THRESHOLD {
            Some(OverlayEvent::FadeInComplete)
        } else if self.opacity <= TRANSPARENT_THRESHOLD {
            self.visible = false;
            Some(OverlayEvent::FadeOutComplete)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easing_is_monotonic_and_bounded() {
        let mut prev = ease_in_out_quad(0.0);
        assert_eq!(prev, 0.0);
        for i in 1..=1000 {
            let v = ease_in_out_quad(i as f64 / 1000.0);
            assert!(v >= prev);
            prev = v;
        }
        assert!((prev - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fade_out_is_monotonic_and_hides() {
        let mut overlay = TransitionOverlay::new();
        overlay.fade_out(1000);
        let mut prev = overlay.opacity();
        let mut event = None;
        // Uneven frame times.
        for dt in [16.0, 17.0, 33.0, 5.0, 120.0].iter().cycle().take(200) {
            if let Some(e) = overlay.tick(*dt) {
                event = Some(e);
                break;
            }
            assert!(overlay.opacity() <= prev);
            prev = overlay.opacity();
        }
        assert_eq!(event, Some(OverlayEvent::FadeOutComplete));
        assert!(overlay.opacity() <= TRANSPARENT_THRESHOLD);
        assert!(!overlay.is_visible());
        assert!(!overlay.is_animating());
    }

    #[test]
    fn fade_in_starts_from_current_opacity() {
        let mut overlay = TransitionOverlay::new();
        overlay.set_immediate(0.0);
        assert!(!overlay.is_visible());
        overlay.fade_in(500);
        assert!(overlay.is_visible());
        assert_eq!(overlay.tick(250.0), None);
        let mid = overlay.opacity();
        assert!(mid > 0.0 && mid < 1.0);
        assert_eq!(overlay.tick(250.0), Some(OverlayEvent::FadeInComplete));
        assert!((overlay.opacity() - 1.0).abs() <= 0.01);
    }

    #[test]
    fn new_call_supersedes_running_animation() {
        let mut overlay = TransitionOverlay::new();
        overlay.fade_out(1000);
        overlay.tick(500.0);
        let partway = overlay.opacity();
        overlay.fade_in(500);
        assert_eq!(overlay.target(), 1.0);
        overlay.tick(1.0);
        assert!(overlay.opacity() >= partway);
        assert_eq!(overlay.tick(1000.0), Some(OverlayEvent::FadeInComplete));
    }

    #[test]
    fn set_immediate_cancels() {
        let mut overlay = TransitionOverlay::new();
        overlay.fade_out(600);
        overlay.set_immediate(1.0);
        assert!(!overlay.is_animating());
        assert_eq!(overlay.tick(1000.0), None);
        assert_eq!(overlay.opacity(), 1.0);
    }

    #[test]
    fn end_opacity_matches_target() {
        for target_in in [true, false] {
            let mut overlay = TransitionOverlay::new();
            overlay.set_immediate(0.4);
            if target_in {
                overlay.fade_in(300);
            } else {
                overlay.fade_out(300);
            }
            while overlay.tick(16.0).is_none() {}
            let target = if target_in { 1.0 } else { 0.0 };
            assert!((overlay.opacity() - target).abs() <= 0.01);
        }
    }
}
