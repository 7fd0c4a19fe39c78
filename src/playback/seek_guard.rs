//! Seek window enforcement during progressive delivery.
//!
//! While the server is still producing segments, only the part of the
//! timeline it has produced can be played. The guard tracks that window from
//! the trailing edge of the buffered range and clamps seeks that land past it.

use crate::config::SeekConfig;

/// Outcome of resolving a seek request.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekResolution {
    /// Where the playhead will actually go.
    pub target: f64,
    /// Whether the request was pulled back inside the window.
    pub clamped: bool,
    /// Transient message for the UI when clamped.
    pub advisory: Option<String>,
}

/// Tracks and enforces the seekable window for one session.
#[derive(Debug, Clone)]
pub struct SeekGuard {
    unrestricted: bool,
    max_seekable: f64,
    lookahead: f64,
    margin: f64,
    hysteresis: f64,
}

impl SeekGuard {
    /// `unrestricted` is true for progressive and pre-transcoded sources.
    pub fn new(config: &SeekConfig, unrestricted: bool) -> Self {
        Self {
            unrestricted,
            max_seekable: if unrestricted { f64::INFINITY } else { 0.0 },
            lookahead: config.lookahead_secs,
            margin: config.clamp_margin_secs,
            hysteresis: config.hysteresis_secs,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    pub fn max_seekable_time(&self) -> f64 {
        self.max_seekable
    }

    /// Feed the trailing edge of the buffered range.
    ///
    /// Returns the new window end when it moved. The window only grows, and
    /// only by more than the hysteresis, so the UI scrubber does not jitter.
    pub fn observe_buffered_end(&mut self, buffered_end: f64) -> Option<f64> {
        if self.unrestricted || !buffered_end.is_finite() {
            return None;
        }

        let candidate = buffered_end + self.lookahead;
        if candidate - self.max_seekable > self.hysteresis {
            self.max_seekable = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    /// Drop the window for good once the whole timeline exists. Returns true
    /// when the guard was restricted until now.
    pub fn lift(&mut self) -> bool {
        if self.unrestricted {
            return false;
        }
        self.unrestricted = true;
        self.max_seekable = f64::INFINITY;
        true
    }

    /// Forget the window. Only a session rebuild may shrink it.
    pub fn reset(&mut self) {
        self.max_seekable = if self.unrestricted { f64::INFINITY } else { 0.0 };
    }

    /// Resolve a seek request (drag or click; both use the same clamp).
    pub fn resolve(&self, target: f64, duration: Option<f64>) -> SeekResolution {
        let target = clamp_to_duration(target.max(0.0), duration);

        if self.unrestricted || target <= self.max_seekable {
            return SeekResolution {
                target,
                clamped: false,
                advisory: None,
            };
        }

        let resolved = (self.max_seekable - self.margin).max(0.0);
        SeekResolution {
            target: resolved,
            clamped: true,
            advisory: Some(format!(
                "Available up to {}",
                format_timestamp(self.max_seekable)
            )),
        }
    }

    /// Clamp a relative skip target to `[0, min(duration, max_seekable)]`.
    pub fn clamp_skip(&self, target: f64, duration: Option<f64>) -> f64 {
        let upper = match duration {
            Some(d) if d.is_finite() => d.min(self.max_seekable),
            _ => self.max_seekable,
        };
        target.max(0.0).min(upper.max(0.0))
    }
}

fn clamp_to_duration(target: f64, duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => target.min(d),
        _ => target,
    }
}

/// Render seconds as `m:ss`, or `h:mm:ss` past the hour.
pub fn format_timestamp(secs: f64) -> String {
    let total = if secs.is_finite() { secs.max(0.0) as u64 } else { 0 };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted() -> SeekGuard {
        SeekGuard::new(&SeekConfig::default(), false)
    }

    #[test]
    fn test_unrestricted_honours_any_target() {
        let guard = SeekGuard::new(&SeekConfig::default(), true);
        let r = guard.resolve(5000.0, Some(6000.0));
        assert_eq!(r.target, 5000.0);
        assert!(!r.clamped);
        assert!(guard.max_seekable_time().is_infinite());
    }

    #[test]
    fn test_unrestricted_clamps_to_duration() {
        let guard = SeekGuard::new(&SeekConfig::default(), true);
        assert_eq!(guard.resolve(700.0, Some(600.0)).target, 600.0);
        assert_eq!(guard.resolve(-3.0, Some(600.0)).target, 0.0);
    }

    #[test]
    fn test_window_grows_with_hysteresis() {
        let mut guard = restricted();
        assert_eq!(guard.observe_buffered_end(20.0), Some(30.0));
        // +3s is inside the hysteresis band
        assert_eq!(guard.observe_buffered_end(23.0), None);
        assert_eq!(guard.max_seekable_time(), 30.0);
        // +6s republishes
        assert_eq!(guard.observe_buffered_end(26.0), Some(36.0));
    }

    #[test]
    fn test_window_never_shrinks() {
        let mut guard = restricted();
        guard.observe_buffered_end(100.0);
        assert_eq!(guard.observe_buffered_end(40.0), None);
        assert_eq!(guard.max_seekable_time(), 110.0);
    }

    #[test]
    fn test_beyond_window_clamps_with_margin() {
        let mut guard = restricted();
        guard.observe_buffered_end(90.0);
        let r = guard.resolve(500.0, Some(3600.0));
        assert_eq!(r.target, 95.0);
        assert!(r.clamped);
        assert_eq!(r.advisory.as_deref(), Some("Available up to 1:40"));
    }

    #[test]
    fn test_inside_window_unchanged() {
        let mut guard = restricted();
        guard.observe_buffered_end(90.0);
        let r = guard.resolve(60.0, Some(3600.0));
        assert_eq!(r.target, 60.0);
        assert!(!r.clamped);
    }

    #[test]
    fn test_reset_on_rebuild() {
        let mut guard = restricted();
        guard.observe_buffered_end(90.0);
        guard.reset();
        assert_eq!(guard.max_seekable_time(), 0.0);
    }

    #[test]
    fn test_lift_opens_the_timeline() {
        let mut guard = restricted();
        guard.observe_buffered_end(20.0);
        assert!(guard.lift());
        assert!(!guard.lift());
        assert!(guard.is_unrestricted());

        let r = guard.resolve(400.0, Some(600.0));
        assert_eq!(r.target, 400.0);
        assert!(!r.clamped);

        // a rebuild does not restore the window
        guard.reset();
        assert!(guard.max_seekable_time().is_infinite());
        assert_eq!(guard.observe_buffered_end(50.0), None);
    }

    #[test]
    fn test_clamp_skip() {
        let mut guard = restricted();
        guard.observe_buffered_end(50.0);
        assert_eq!(guard.clamp_skip(200.0, Some(3600.0)), 60.0);
        assert_eq!(guard.clamp_skip(-10.0, Some(3600.0)), 0.0);
        assert_eq!(guard.clamp_skip(45.0, Some(40.0)), 40.0);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "0:00");
        assert_eq!(format_timestamp(65.4), "1:05");
        assert_eq!(format_timestamp(3725.0), "1:02:05");
        assert_eq!(format_timestamp(f64::INFINITY), "0:00");
    }
}
