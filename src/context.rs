//! Mutable state of the current playback session.
//!
//! [`SessionContext`] is owned by the controller behind a mutex and passed by
//! `&mut` to the playback components. Components never keep their own copy of
//! anything stored here.

use std::sync::Arc;

use sceneforged_common::{
    NextItemHandoff, PlaybackSource, SessionPreferences, SubtitleSelection, TrackSet,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PlayerConfig;
use crate::playback::completion::{CompletionScheduler, CountdownState};
use crate::playback::recovery::{PositionTracker, RecoverySupervisor};
use crate::playback::{BufferState, PlaybackState, SeekGuard};
use crate::resources::ResourceLease;

/// A transient message with an expiry.
#[derive(Debug, Clone)]
pub struct Advisory {
    pub message: String,
    pub expires_at: Instant,
}

pub struct SessionContext {
    /// Bumps on every attach; stale tasks compare against it.
    pub generation: u64,
    pub source: Option<PlaybackSource>,
    pub state: PlaybackState,

    // -- Intent and element mirror -------------------------------------------
    /// Whether the user wants playback running.
    pub is_playing: bool,
    /// Play once admitted (autoplay, or the intent before a rebuild).
    pub resume_playing: bool,
    pub is_remuxing: bool,
    pub seeking: bool,
    pub admitted: bool,
    pub position: f64,
    pub duration: Option<f64>,
    /// Where the source was attached; checked against the duration once known.
    pub start_at: f64,
    pub resume_checked: bool,

    // -- Components ---------------------------------------------------------
    pub tracker: PositionTracker,
    pub seek_guard: SeekGuard,
    pub buffer: BufferState,
    pub recovery: RecoverySupervisor,
    pub completion: CompletionScheduler,

    // -- Tracks -------------------------------------------------------------
    pub tracks: TrackSet,
    pub audio_index: usize,
    pub audio_language: Option<String>,
    pub subtitle: SubtitleSelection,
    pub language_aware: bool,
    /// Preferences passed to attach (e.g. carried from the previous item).
    pub explicit: Option<SessionPreferences>,
    pub fullscreen: bool,

    // -- Completion ---------------------------------------------------------
    pub next_item: Option<PlaybackSource>,
    pub last_handoff: Option<NextItemHandoff>,
    /// The item has been reported finished.
    pub finished: bool,
    /// Signalled when the element reaches the end.
    pub ended: Arc<Notify>,

    pub advisory: Option<Advisory>,
    pub last_error: Option<String>,

    // -- Lifetime -----------------------------------------------------------
    pub token: CancellationToken,
    /// Admission polling; replaced on rebuild.
    pub admission_token: Option<CancellationToken>,
    pub lease: Option<ResourceLease>,
}

impl SessionContext {
    pub fn new(config: &PlayerConfig) -> Self {
        let token = CancellationToken::new();
        token.cancel();

        Self {
            generation: 0,
            source: None,
            state: PlaybackState::Idle,
            is_playing: false,
            resume_playing: false,
            is_remuxing: false,
            seeking: false,
            admitted: false,
            position: 0.0,
            duration: None,
            start_at: 0.0,
            resume_checked: true,
            tracker: PositionTracker::new(&config.recovery),
            seek_guard: SeekGuard::new(&config.seek, true),
            buffer: BufferState::default(),
            recovery: RecoverySupervisor::new(&config.recovery),
            completion: CompletionScheduler::new(&config.completion),
            tracks: TrackSet::default(),
            audio_index: 0,
            audio_language: None,
            subtitle: SubtitleSelection::None,
            language_aware: false,
            explicit: None,
            fullscreen: false,
            next_item: None,
            last_handoff: None,
            finished: false,
            ended: Arc::new(Notify::new()),
            advisory: None,
            last_error: None,
            token,
            admission_token: None,
            lease: None,
        }
    }

    /// Reset everything for a freshly attached `source`.
    ///
    /// Fullscreen and the next item belong to the presentation, not the
    /// source, and survive.
    pub fn begin(
        &mut self,
        config: &PlayerConfig,
        source: PlaybackSource,
        explicit: Option<SessionPreferences>,
        start_at: f64,
    ) -> CancellationToken {
        self.generation += 1;
        self.token = CancellationToken::new();
        self.admission_token = None;

        self.seek_guard = SeekGuard::new(&config.seek, source.is_unrestricted());
        self.buffer = BufferState::for_source(&source);
        self.source = Some(source);
        self.state = PlaybackState::Attaching;

        self.is_playing = false;
        self.resume_playing = true;
        self.is_remuxing = false;
        self.seeking = false;
        self.admitted = false;
        self.position = start_at;
        self.duration = None;
        self.start_at = start_at;
        self.resume_checked = start_at <= 0.0;

        self.tracker.reset(start_at);
        self.recovery.reset();
        self.completion.reset();

        self.tracks = TrackSet::default();
        self.audio_index = explicit
            .as_ref()
            .and_then(|p| p.audio_track_index)
            .unwrap_or(0);
        self.audio_language = None;
        self.subtitle = SubtitleSelection::None;
        self.language_aware = false;
        if let Some(fullscreen) = explicit.as_ref().and_then(|p| p.was_fullscreen) {
            self.fullscreen = fullscreen;
        }
        self.explicit = explicit;

        self.last_handoff = None;
        self.finished = false;
        self.ended = Arc::new(Notify::new());
        self.advisory = None;
        self.last_error = None;

        self.token.clone()
    }

    /// Whether a task started for `generation` may still act.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && !self.token.is_cancelled()
    }

    /// The choices to carry into the next session or persist.
    pub fn preferences(&self) -> SessionPreferences {
        SessionPreferences {
            audio_track_index: Some(self.audio_index),
            audio_language: self.audio_language.clone(),
            subtitle_track_index: Some(self.subtitle),
            was_fullscreen: Some(self.fullscreen),
        }
    }

    pub fn advisory_message(&self, now: Instant) -> Option<String> {
        self.advisory
            .as_ref()
            .filter(|a| a.expires_at > now)
            .map(|a| a.message.clone())
    }

    pub fn snapshot(&self, now: Instant, buffered_percent: f64) -> SessionSnapshot {
        let max_seekable = self.seek_guard.max_seekable_time();
        SessionSnapshot {
            generation: self.generation,
            source: self.source.clone(),
            state: self.state,
            is_playing: self.is_playing,
            is_remuxing: self.is_remuxing,
            position: self.position,
            duration: self.duration,
            buffered_percent,
            max_seekable_time: max_seekable.is_finite().then_some(max_seekable),
            audio_index: self.audio_index,
            subtitle: self.subtitle,
            subtitle_offset_secs: self
                .subtitle
                .index()
                .and_then(|i| self.tracks.subtitle_track(i))
                .map(|t| t.offset_secs)
                .unwrap_or(0.0),
            tracks: self.tracks.clone(),
            fullscreen: self.fullscreen,
            countdown: self.completion.state(),
            advisory: self.advisory_message(now),
            error: self.last_error.clone(),
        }
    }
}

/// Read-only view of the session for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub source: Option<PlaybackSource>,
    pub state: PlaybackState,
    pub is_playing: bool,
    pub is_remuxing: bool,
    pub position: f64,
    pub duration: Option<f64>,
    pub buffered_percent: f64,
    /// `None` when the whole timeline is seekable.
    pub max_seekable_time: Option<f64>,
    pub audio_index: usize,
    pub subtitle: SubtitleSelection,
    pub subtitle_offset_secs: f64,
    pub tracks: TrackSet,
    pub fullscreen: bool,
    pub countdown: CountdownState,
    pub advisory: Option<String>,
    pub error: Option<String>,
}
