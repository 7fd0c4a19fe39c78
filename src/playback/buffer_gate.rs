//! Admission control: when is there enough data to start playing?
//!
//! Pre-transcoded and progressive content has a fully realized timeline, so
//! a small buffer is safe. A live transcode needs a larger cushion because
//! segment production rate is uncertain and a stall mid-segment is costly to
//! recover from.

use sceneforged_common::{PlaybackSource, TranscodeStatus};
use serde::{Deserialize, Serialize};

use crate::config::BufferConfig;

/// Buffer readiness derived on every admission poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferState {
    pub buffered_ahead_secs: f64,
    pub segments_ready: u32,
    pub is_transcode_complete: bool,
    pub is_pre_transcoded: bool,
}

impl BufferState {
    /// Initial state for a freshly attached source.
    pub fn for_source(source: &PlaybackSource) -> Self {
        Self {
            is_pre_transcoded: source.is_unrestricted() && source.is_segmented(),
            ..Self::default()
        }
    }

    /// Fold in a new element sample and, for segmented sources, a transcode
    /// status. Segment counts and completion flags never move backwards
    /// within a session; buffered-ahead is always the latest reading.
    pub fn advance(&mut self, buffered_ahead_secs: f64, status: Option<&TranscodeStatus>) {
        self.buffered_ahead_secs = buffered_ahead_secs.max(0.0);
        if let Some(status) = status {
            self.segments_ready = self.segments_ready.max(status.segments_ready);
            self.is_transcode_complete |= status.is_complete;
            self.is_pre_transcoded |= status.pre_transcoded;
        }
    }
}

/// Which admission rule applies to a buffer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRule {
    /// Progressive file or pre-transcoded playlist.
    Unrestricted,
    /// Live transcode that has finished producing.
    TranscodeComplete,
    /// Live transcode still producing.
    TranscodeInProgress,
}

/// Admission policy for one source.
#[derive(Debug, Clone)]
pub struct BufferGate {
    config: BufferConfig,
    progressive: bool,
}

impl BufferGate {
    pub fn new(config: &BufferConfig, source: &PlaybackSource) -> Self {
        Self {
            config: config.clone(),
            progressive: !source.is_segmented(),
        }
    }

    /// Whether the transcode status endpoint is worth polling.
    pub fn needs_transcode_status(&self, state: &BufferState) -> bool {
        !self.progressive && !state.is_pre_transcoded && !state.is_transcode_complete
    }

    pub fn rule(&self, state: &BufferState) -> AdmissionRule {
        if self.progressive || state.is_pre_transcoded {
            AdmissionRule::Unrestricted
        } else if state.is_transcode_complete {
            AdmissionRule::TranscodeComplete
        } else {
            AdmissionRule::TranscodeInProgress
        }
    }

    pub fn admits(&self, state: &BufferState) -> bool {
        let ahead = state.buffered_ahead_secs;
        match self.rule(state) {
            AdmissionRule::Unrestricted => ahead >= self.config.unrestricted_min_ahead_secs,
            AdmissionRule::TranscodeComplete => ahead >= self.config.complete_min_ahead_secs,
            AdmissionRule::TranscodeInProgress => {
                state.segments_ready >= self.config.in_progress_min_segments
                    || ahead >= self.config.in_progress_min_ahead_secs
            }
        }
    }
}

/// Seconds buffered past the playhead.
pub fn buffered_ahead(current_time: f64, buffered_end: Option<f64>) -> f64 {
    buffered_end
        .map(|end| (end - current_time).max(0.0))
        .unwrap_or(0.0)
}

/// Share of the timeline buffered, in percent.
pub fn buffered_percent(buffered_end: Option<f64>, duration: Option<f64>) -> f64 {
    match (buffered_end, duration) {
        (Some(end), Some(d)) if d > 0.0 && d.is_finite() => (end / d * 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    }
}
