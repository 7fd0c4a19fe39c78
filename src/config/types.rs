use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub seek: SeekConfig,

    #[serde(default)]
    pub tracks: TrackConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Base URL of the sceneforged server (e.g. `http://localhost:8080`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent as `Authorization: Bearer` when set
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Admission thresholds for starting playback.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Seconds buffered ahead before a progressive or pre-transcoded source starts
    pub unrestricted_min_ahead_secs: f64,

    /// Seconds buffered ahead before a finished live transcode starts
    pub complete_min_ahead_secs: f64,

    /// Ready segments before an in-progress transcode starts
    pub in_progress_min_segments: u32,

    /// Seconds buffered ahead that also admit an in-progress transcode
    pub in_progress_min_ahead_secs: f64,

    /// Admission poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Delay before restoring the mute state after autoplay, in milliseconds
    pub unmute_settle_ms: u64,

    /// Transcode status poll interval after admission, in seconds
    pub transcode_watch_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            unrestricted_min_ahead_secs: 2.0,
            complete_min_ahead_secs: 10.0,
            in_progress_min_segments: 15,
            in_progress_min_ahead_secs: 30.0,
            poll_interval_ms: 250,
            unmute_settle_ms: 500,
            transcode_watch_secs: 10,
        }
    }
}

impl BufferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn unmute_settle(&self) -> Duration {
        Duration::from_millis(self.unmute_settle_ms)
    }

    pub fn transcode_watch_interval(&self) -> Duration {
        Duration::from_secs(self.transcode_watch_secs)
    }
}

/// Seek window behaviour while a transcode is still producing segments.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SeekConfig {
    /// Seconds added to the trailing buffered edge to form the seek window
    pub lookahead_secs: f64,

    /// Seconds kept clear of the window edge when clamping a seek
    pub clamp_margin_secs: f64,

    /// Minimum growth before the window is republished
    pub hysteresis_secs: f64,

    /// How long the "available up to" advisory stays visible
    pub advisory_ms: u64,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: 10.0,
            clamp_margin_secs: 5.0,
            hysteresis_secs: 5.0,
            advisory_ms: 3000,
        }
    }
}

impl SeekConfig {
    pub fn advisory_duration(&self) -> Duration {
        Duration::from_millis(self.advisory_ms)
    }
}

/// How the forced-subtitle heuristic behaves when no preference exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleHeuristic {
    /// Forced track for native audio, full track for foreign audio
    #[default]
    Auto,
    /// Never pick a subtitle without an explicit or saved preference
    Off,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Language family treated as the viewer's own language
    pub default_language: String,

    pub subtitle_heuristic: SubtitleHeuristic,

    /// Upper bound for metadata to arrive after a re-attaching audio switch
    pub metadata_timeout_ms: u64,

    /// Metadata poll interval during a re-attaching audio switch
    pub metadata_poll_ms: u64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            subtitle_heuristic: SubtitleHeuristic::Auto,
            metadata_timeout_ms: 5000,
            metadata_poll_ms: 100,
        }
    }
}

impl TrackConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn metadata_poll(&self) -> Duration {
        Duration::from_millis(self.metadata_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Delays before each network retry, in seconds
    pub network_backoff_secs: Vec<u64>,

    /// Delay before a full session rebuild, in seconds
    pub rebuild_delay_secs: u64,

    /// Quiet period after which non-fatal counters reset, in seconds
    pub counter_window_secs: u64,

    /// Stalls before nudging the playhead forward
    pub stall_nudge_threshold: u32,

    /// Stalls before forcing decoder recovery
    pub stall_recover_threshold: u32,

    /// Seconds the playhead is nudged forward on repeated stalls
    pub stall_nudge_secs: f64,

    /// Fragment load failures before loading is restarted
    pub fragment_restart_threshold: u32,

    /// Buffer append failures before decoder recovery
    pub append_recover_threshold: u32,

    /// A decode fault within this many seconds of a recovery surfaces
    pub decode_repeat_window_secs: u64,

    /// Position drop treated as a spurious backward jump
    pub backward_jump_secs: f64,

    /// Reports at or below this position never become the resume point
    pub min_known_good_secs: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            network_backoff_secs: vec![1, 3, 5, 10],
            rebuild_delay_secs: 3,
            counter_window_secs: 30,
            stall_nudge_threshold: 5,
            stall_recover_threshold: 10,
            stall_nudge_secs: 0.5,
            fragment_restart_threshold: 15,
            append_recover_threshold: 3,
            decode_repeat_window_secs: 10,
            backward_jump_secs: 10.0,
            min_known_good_secs: 1.0,
        }
    }
}

impl RecoveryConfig {
    pub fn network_backoff(&self) -> Vec<Duration> {
        self.network_backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    pub fn rebuild_delay(&self) -> Duration {
        Duration::from_secs(self.rebuild_delay_secs)
    }

    pub fn counter_window(&self) -> Duration {
        Duration::from_secs(self.counter_window_secs)
    }

    pub fn decode_repeat_window(&self) -> Duration {
        Duration::from_secs(self.decode_repeat_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Sources shorter than this never show the countdown
    pub min_duration_secs: f64,

    /// Remaining seconds at which the countdown appears
    pub threshold_secs: f64,

    /// Countdown value the UI resets to when hidden
    pub countdown_start: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 60.0,
            threshold_secs: 30.0,
            countdown_start: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval of the play-state reconciliation check, in milliseconds
    pub liveness_interval_ms: u64,

    /// Interval of periodic position saves while playing, in seconds
    pub position_save_secs: u64,

    /// Debounce applied to preference writes, in milliseconds
    pub preference_debounce_ms: u64,

    /// Saved positions within this many seconds of the end restart from zero
    pub resume_end_guard_secs: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: 1000,
            position_save_secs: 10,
            preference_debounce_ms: 500,
            resume_end_guard_secs: 30.0,
        }
    }
}

impl SessionConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn position_save_interval(&self) -> Duration {
        Duration::from_secs(self.position_save_secs)
    }

    pub fn preference_debounce(&self) -> Duration {
        Duration::from_millis(self.preference_debounce_ms)
    }
}
