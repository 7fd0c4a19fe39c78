//! Fault classification and recovery policy.
//!
//! The supervisor only decides; the controller carries out the returned
//! [`RecoveryAction`]. Every action that moves the playhead carries the
//! position captured at decision time, because the element's own position is
//! meaningless after a decoder reset or a re-attach.
//!
//! | Fault | Policy |
//! |---|---|
//! | network, fatal | retry after 1, 3, 5, 10 s, then surface |
//! | decode, fatal | recover the decoder once, surface a repeat |
//! | unsupported, fatal | rebuild the session after 3 s |
//! | buffer stall | nudge forward from the 5th, recover the decoder at the 10th |
//! | fragment load | restart loading at the 15th |
//! | buffer append | recover the decoder at the 3rd |

use std::time::Duration;

use sceneforged_common::{ErrorCategory, ErrorEvent, TransientKind};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RecoveryConfig;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// A fault as the delivery client reports it, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawFault {
    /// Playlist or segment request failed.
    Network { detail: String, fatal: bool },
    /// The decoder rejected the stream.
    Media { detail: String, fatal: bool },
    /// Playback ran out of buffered data.
    BufferStall,
    /// A segment could not be loaded.
    FragmentLoad { detail: String, fatal: bool },
    /// Appending to the playback buffer failed.
    BufferAppend { detail: String },
    /// Codec or container the platform cannot play.
    Unsupported { detail: String },
    Other { detail: String, fatal: bool },
}

/// Map a raw fault onto the categories the supervisor understands.
pub fn classify(fault: &RawFault) -> ErrorEvent {
    match fault {
        RawFault::Network { detail, fatal: true } => {
            ErrorEvent::fatal(ErrorCategory::Network, detail.clone())
        }
        RawFault::FragmentLoad { detail, fatal: true } => {
            ErrorEvent::fatal(ErrorCategory::Network, detail.clone())
        }
        RawFault::Media { detail, fatal: true } => {
            ErrorEvent::fatal(ErrorCategory::Decode, detail.clone())
        }
        RawFault::Unsupported { detail } | RawFault::Other { detail, fatal: true } => {
            ErrorEvent::fatal(ErrorCategory::Unsupported, detail.clone())
        }
        RawFault::BufferStall => ErrorEvent::transient(TransientKind::BufferStall, "buffer stalled"),
        RawFault::FragmentLoad { detail, .. } => {
            ErrorEvent::transient(TransientKind::FragmentLoad, detail.clone())
        }
        RawFault::BufferAppend { detail } => {
            ErrorEvent::transient(TransientKind::BufferAppend, detail.clone())
        }
        RawFault::Network { detail, .. }
        | RawFault::Media { detail, .. }
        | RawFault::Other { detail, .. } => {
            ErrorEvent::transient(TransientKind::Other, detail.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// What the controller should do about a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Absorb the fault.
    Ignore,
    /// Wait `delay`, then restart loading at `position`.
    RetryNetwork {
        attempt: u32,
        delay: Duration,
        position: f64,
    },
    /// Ask the decoder to recover in place.
    RecoverDecoder,
    /// Wait `delay`, then detach and attach again at `position`.
    Rebuild { delay: Duration, position: f64 },
    /// Move the playhead forward to step over a gap.
    Nudge { to: f64 },
    /// Stop and restart segment loading at `position`.
    RestartLoad { position: f64 },
    /// Give up and show the error.
    Surface { message: String },
}

impl RecoveryAction {
    /// Name used in events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::RetryNetwork { .. } => "retry_network",
            Self::RecoverDecoder => "recover_decoder",
            Self::Rebuild { .. } => "rebuild",
            Self::Nudge { .. } => "nudge",
            Self::RestartLoad { .. } => "restart_load",
            Self::Surface { .. } => "surface",
        }
    }
}

/// Element state sampled when the fault arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultContext {
    /// Last position known to be good; where fatal recovery resumes.
    pub last_known_good: f64,
    pub current_time: f64,
    pub buffered_end: Option<f64>,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// A count that forgets itself after a quiet window.
#[derive(Debug, Clone, Default)]
pub struct WindowedCounter {
    count: u32,
    last: Option<Instant>,
}

impl WindowedCounter {
    /// Record one occurrence and return the running count.
    pub fn hit(&mut self, now: Instant, window: Duration) -> u32 {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) > window {
                self.count = 0;
            }
        }
        self.count += 1;
        self.last = Some(now);
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last = None;
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Per-session recovery bookkeeping.
#[derive(Debug, Clone)]
pub struct RecoverySupervisor {
    config: RecoveryConfig,
    network_attempts: u32,
    /// Position of the last network retry; progress past it resets attempts.
    retry_position: Option<f64>,
    last_decoder_recovery: Option<Instant>,
    stalls: WindowedCounter,
    fragment_failures: WindowedCounter,
    append_failures: WindowedCounter,
}

impl RecoverySupervisor {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            config: config.clone(),
            network_attempts: 0,
            retry_position: None,
            last_decoder_recovery: None,
            stalls: WindowedCounter::default(),
            fragment_failures: WindowedCounter::default(),
            append_failures: WindowedCounter::default(),
        }
    }

    /// Forget everything; called on attach.
    pub fn reset(&mut self) {
        *self = Self::new(&self.config);
    }

    pub fn network_attempts(&self) -> u32 {
        self.network_attempts
    }

    /// Playback moved to `position`. Once it passes the point of the last
    /// network retry the retry budget is restored.
    pub fn note_progress(&mut self, position: f64) {
        if let Some(at) = self.retry_position {
            if position > at {
                debug!(attempts = self.network_attempts, "Playback resumed, resetting network retries");
                self.network_attempts = 0;
                self.retry_position = None;
            }
        }
    }

    pub fn decide(&mut self, error: &ErrorEvent, ctx: &FaultContext, now: Instant) -> RecoveryAction {
        let action = match error.category {
            ErrorCategory::Network => self.on_network(ctx),
            ErrorCategory::Decode => self.on_decode(now),
            ErrorCategory::Unsupported => RecoveryAction::Rebuild {
                delay: self.config.rebuild_delay(),
                position: ctx.last_known_good,
            },
            ErrorCategory::Transient(kind) => self.on_transient(kind, ctx, now),
        };

        debug!(
            category = %error.category,
            fatal = error.fatal,
            detail = %error.detail,
            action = action.name(),
            "Recovery decision"
        );
        action
    }

    fn on_network(&mut self, ctx: &FaultContext) -> RecoveryAction {
        let schedule = self.config.network_backoff();
        match schedule.get(self.network_attempts as usize) {
            Some(delay) => {
                self.network_attempts += 1;
                self.retry_position = Some(ctx.last_known_good);
                RecoveryAction::RetryNetwork {
                    attempt: self.network_attempts,
                    delay: *delay,
                    position: ctx.last_known_good,
                }
            }
            None => {
                warn!(attempts = self.network_attempts, "Network retries exhausted");
                RecoveryAction::Surface {
                    message: format!(
                        "Network connection lost. Playback stopped at {}.",
                        format_mm_ss(ctx.last_known_good)
                    ),
                }
            }
        }
    }

    fn on_decode(&mut self, now: Instant) -> RecoveryAction {
        let repeat = self
            .last_decoder_recovery
            .is_some_and(|at| now.saturating_duration_since(at) <= self.config.decode_repeat_window());

        if repeat {
            RecoveryAction::Surface {
                message: "This video could not be decoded.".to_string(),
            }
        } else {
            self.last_decoder_recovery = Some(now);
            RecoveryAction::RecoverDecoder
        }
    }

    fn on_transient(&mut self, kind: TransientKind, ctx: &FaultContext, now: Instant) -> RecoveryAction {
        let window = self.config.counter_window();
        match kind {
            TransientKind::BufferStall => {
                let count = self.stalls.hit(now, window);
                if count >= self.config.stall_recover_threshold {
                    self.stalls.reset();
                    RecoveryAction::RecoverDecoder
                } else if count >= self.config.stall_nudge_threshold {
                    self.nudge(ctx)
                } else {
                    RecoveryAction::Ignore
                }
            }
            TransientKind::FragmentLoad => {
                if self.fragment_failures.hit(now, window) >= self.config.fragment_restart_threshold {
                    self.fragment_failures.reset();
                    RecoveryAction::RestartLoad {
                        position: ctx.last_known_good,
                    }
                } else {
                    RecoveryAction::Ignore
                }
            }
            TransientKind::BufferAppend => {
                if self.append_failures.hit(now, window) >= self.config.append_recover_threshold {
                    self.append_failures.reset();
                    RecoveryAction::RecoverDecoder
                } else {
                    RecoveryAction::Ignore
                }
            }
            TransientKind::Other => RecoveryAction::Ignore,
        }
    }

    /// Step forward, never past the buffered edge.
    fn nudge(&self, ctx: &FaultContext) -> RecoveryAction {
        match ctx.buffered_end {
            Some(end) if end > ctx.current_time => RecoveryAction::Nudge {
                to: (ctx.current_time + self.config.stall_nudge_secs).min(end),
            },
            _ => RecoveryAction::Ignore,
        }
    }
}

/// `mm:ss`, minutes uncapped.
pub fn format_mm_ss(secs: f64) -> String {
    let total = if secs.is_finite() { secs.max(0.0) as u64 } else { 0 };
    format!("{:02}:{:02}", total / 60, total % 60)
}

// ---------------------------------------------------------------------------
// Position tracking
// ---------------------------------------------------------------------------

/// Result of feeding a position report to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionUpdate {
    Accepted,
    /// The element jumped backwards on its own; seek back to `restore_to`.
    BackwardJump { restore_to: f64 },
}

/// Tracks the last trustworthy playhead position.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    last_known_good: f64,
    last_reported: Option<f64>,
    min_known_good: f64,
    backward_jump: f64,
}

impl PositionTracker {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            last_known_good: 0.0,
            last_reported: None,
            min_known_good: config.min_known_good_secs,
            backward_jump: config.backward_jump_secs,
        }
    }

    pub fn last_known_good(&self) -> f64 {
        self.last_known_good
    }

    /// Start over at `position` (attach, rebuild).
    pub fn reset(&mut self, position: f64) {
        self.last_known_good = position.max(0.0);
        self.last_reported = None;
    }

    /// Record a user seek; the next report is expected near `target`.
    pub fn note_seek(&mut self, target: f64) {
        self.last_known_good = target.max(0.0);
        self.last_reported = Some(target.max(0.0));
    }

    pub fn observe(&mut self, position: f64, seeking: bool) -> PositionUpdate {
        if !position.is_finite() {
            return PositionUpdate::Accepted;
        }

        if !seeking {
            if let Some(previous) = self.last_reported {
                if previous - position > self.backward_jump && self.last_known_good > self.min_known_good {
                    warn!(
                        from = previous,
                        to = position,
                        restore_to = self.last_known_good,
                        "Unexpected backward jump"
                    );
                    return PositionUpdate::BackwardJump {
                        restore_to: self.last_known_good,
                    };
                }
            }
        }

        self.last_reported = Some(position);
        if position > self.min_known_good {
            self.last_known_good = position;
        }
        PositionUpdate::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> RecoverySupervisor {
        RecoverySupervisor::new(&RecoveryConfig::default())
    }

    fn at(position: f64) -> FaultContext {
        FaultContext {
            last_known_good: position,
            current_time: position,
            buffered_end: Some(position + 4.0),
        }
    }

    fn network() -> ErrorEvent {
        ErrorEvent::fatal(ErrorCategory::Network, "manifest load failed")
    }

    #[test]
    fn test_network_retries_follow_schedule() {
        let mut sup = supervisor();
        let now = Instant::now();

        let delays: Vec<u64> = (0..4)
            .map(|_| match sup.decide(&network(), &at(125.0), now) {
                RecoveryAction::RetryNetwork { delay, position, .. } => {
                    assert_eq!(position, 125.0);
                    delay.as_secs()
                }
                other => panic!("expected retry, got {other:?}"),
            })
            .collect();
        assert_eq!(delays, vec![1, 3, 5, 10]);

        match sup.decide(&network(), &at(125.0), now) {
            RecoveryAction::Surface { message } => assert!(message.contains("02:05")),
            other => panic!("expected surface, got {other:?}"),
        }
    }

    #[test]
    fn test_progress_restores_retry_budget() {
        let mut sup = supervisor();
        let now = Instant::now();
        sup.decide(&network(), &at(50.0), now);
        sup.decide(&network(), &at(50.0), now);
        assert_eq!(sup.network_attempts(), 2);

        sup.note_progress(49.0);
        assert_eq!(sup.network_attempts(), 2);
        sup.note_progress(51.0);
        assert_eq!(sup.network_attempts(), 0);
    }

    #[test]
    fn test_decode_repeat_surfaces() {
        let mut sup = supervisor();
        let decode = ErrorEvent::fatal(ErrorCategory::Decode, "bad frame");
        let now = Instant::now();

        assert_eq!(sup.decide(&decode, &at(10.0), now), RecoveryAction::RecoverDecoder);
        assert!(matches!(
            sup.decide(&decode, &at(10.0), now + Duration::from_secs(4)),
            RecoveryAction::Surface { .. }
        ));
    }

    #[test]
    fn test_decode_after_window_recovers_again() {
        let mut sup = supervisor();
        let decode = ErrorEvent::fatal(ErrorCategory::Decode, "bad frame");
        let now = Instant::now();

        sup.decide(&decode, &at(10.0), now);
        assert_eq!(
            sup.decide(&decode, &at(10.0), now + Duration::from_secs(60)),
            RecoveryAction::RecoverDecoder
        );
    }

    #[test]
    fn test_unsupported_rebuilds_at_last_known_good() {
        let mut sup = supervisor();
        let ctx = FaultContext {
            last_known_good: 312.0,
            current_time: 0.0,
            buffered_end: None,
        };
        let action = sup.decide(
            &ErrorEvent::fatal(ErrorCategory::Unsupported, "codec"),
            &ctx,
            Instant::now(),
        );
        assert_eq!(
            action,
            RecoveryAction::Rebuild {
                delay: Duration::from_secs(3),
                position: 312.0
            }
        );
    }

    #[test]
    fn test_stall_thresholds() {
        let mut sup = supervisor();
        let stall = ErrorEvent::transient(TransientKind::BufferStall, "stall");
        let now = Instant::now();

        let actions: Vec<_> = (0..10).map(|_| sup.decide(&stall, &at(20.0), now)).collect();
        assert!(actions[..4].iter().all(|a| *a == RecoveryAction::Ignore));
        assert_eq!(actions[4], RecoveryAction::Nudge { to: 20.5 });
        assert_eq!(actions[8], RecoveryAction::Nudge { to: 20.5 });
        assert_eq!(actions[9], RecoveryAction::RecoverDecoder);

        // counter was reset
        assert_eq!(sup.decide(&stall, &at(20.0), now), RecoveryAction::Ignore);
    }

    #[test]
    fn test_nudge_stays_inside_buffer() {
        let mut sup = supervisor();
        let stall = ErrorEvent::transient(TransientKind::BufferStall, "stall");
        let now = Instant::now();
        let ctx = FaultContext {
            last_known_good: 20.0,
            current_time: 20.0,
            buffered_end: Some(20.2),
        };
        for _ in 0..4 {
            sup.decide(&stall, &ctx, now);
        }
        assert_eq!(sup.decide(&stall, &ctx, now), RecoveryAction::Nudge { to: 20.2 });

        let empty = FaultContext {
            buffered_end: None,
            ..ctx
        };
        assert_eq!(sup.decide(&stall, &empty, now), RecoveryAction::Ignore);
    }

    #[test]
    fn test_counters_reset_after_quiet_window() {
        let mut sup = supervisor();
        let append = ErrorEvent::transient(TransientKind::BufferAppend, "append");
        let now = Instant::now();

        sup.decide(&append, &at(5.0), now);
        sup.decide(&append, &at(5.0), now);
        // quiet for longer than the window
        let later = now + Duration::from_secs(31);
        assert_eq!(sup.decide(&append, &at(5.0), later), RecoveryAction::Ignore);
        sup.decide(&append, &at(5.0), later);
        assert_eq!(
            sup.decide(&append, &at(5.0), later),
            RecoveryAction::RecoverDecoder
        );
    }

    #[test]
    fn test_fragment_restart_threshold() {
        let mut sup = supervisor();
        let frag = ErrorEvent::transient(TransientKind::FragmentLoad, "404");
        let now = Instant::now();

        for _ in 0..14 {
            assert_eq!(sup.decide(&frag, &at(42.0), now), RecoveryAction::Ignore);
        }
        assert_eq!(
            sup.decide(&frag, &at(42.0), now),
            RecoveryAction::RestartLoad { position: 42.0 }
        );
    }

    #[test]
    fn test_classify() {
        let e = classify(&RawFault::FragmentLoad {
            detail: "timeout".into(),
            fatal: true,
        });
        assert_eq!(e.category, ErrorCategory::Network);
        assert!(e.fatal);

        let e = classify(&RawFault::Other {
            detail: "?".into(),
            fatal: true,
        });
        assert_eq!(e.category, ErrorCategory::Unsupported);

        let e = classify(&RawFault::Media {
            detail: "glitch".into(),
            fatal: false,
        });
        assert_eq!(e.category, ErrorCategory::Transient(TransientKind::Other));
        assert!(!e.fatal);
    }

    #[test]
    fn test_position_tracker_ignores_early_reports() {
        let mut tracker = PositionTracker::new(&RecoveryConfig::default());
        tracker.observe(30.0, false);
        assert_eq!(tracker.last_known_good(), 30.0);
        tracker.note_seek(0.5);
        tracker.observe(0.8, false);
        assert_eq!(tracker.last_known_good(), 0.5);
    }

    #[test]
    fn test_backward_jump_detected() {
        let mut tracker = PositionTracker::new(&RecoveryConfig::default());
        tracker.observe(300.0, false);
        assert_eq!(
            tracker.observe(0.0, false),
            PositionUpdate::BackwardJump { restore_to: 300.0 }
        );
        // a jump while seeking is the user's doing
        assert_eq!(tracker.observe(0.0, true), PositionUpdate::Accepted);
    }

    #[test]
    fn test_format_mm_ss() {
        assert_eq!(format_mm_ss(65.0), "01:05");
        assert_eq!(format_mm_ss(3725.0), "62:05");
    }
}
