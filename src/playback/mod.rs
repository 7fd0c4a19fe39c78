//! Playback session components.
//!
//! Leaf-first:
//! - [`seek_guard`] keeps seeks inside what the server has produced so far
//! - [`buffer_gate`] decides when enough data exists to start playing
//! - [`tracks`] resolves audio/subtitle tracks from preferences and heuristics
//! - [`audio_switch`] changes audio either in-band or by re-attaching
//! - [`subtitles`] fetches subtitle payloads, one in flight at a time
//! - [`recovery`] classifies faults and picks the recovery action
//! - [`completion`] runs the end-of-content countdown
//! - [`controller`] is the state machine that composes all of the above

pub mod audio_switch;
pub mod buffer_gate;
pub mod completion;
pub mod controller;
pub mod recovery;
pub mod seek_guard;
pub mod subtitles;
pub mod tracks;

pub use audio_switch::{AudioSwitchStrategy, InBandSwitch, ReattachSwitch};
pub use buffer_gate::{BufferGate, BufferState};
pub use completion::{CompletionAction, CompletionScheduler, CountdownState};
pub use controller::{Command, MediaEvent, SessionController};
pub use recovery::{PositionTracker, RecoveryAction, RecoverySupervisor};
pub use seek_guard::{SeekGuard, SeekResolution};
pub use tracks::{AudioResolution, SubtitleResolution, TrackResolver};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a playback session.
///
/// `Playing` means "playback-eligible": the buffer gate has admitted the
/// source. Whether the element is actually running is the separate
/// `is_playing` flag, so a user pause does not leave this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Attaching,
    Buffering,
    Playing,
    Seeking,
    Recovering,
    Ended,
    Error,
}

impl PlaybackState {
    /// Whether seeks and play/pause take effect in this state.
    pub fn is_playback_eligible(&self) -> bool {
        matches!(self, Self::Playing | Self::Seeking | Self::Ended)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Attaching => write!(f, "attaching"),
            Self::Buffering => write!(f, "buffering"),
            Self::Playing => write!(f, "playing"),
            Self::Seeking => write!(f, "seeking"),
            Self::Recovering => write!(f, "recovering"),
            Self::Ended => write!(f, "ended"),
            Self::Error => write!(f, "error"),
        }
    }
}
