//! Core type definitions for playback sources, tracks, and preferences.
//!
//! This module defines the data model shared between the session controller
//! and the endpoints it talks to. Enums serialize in lowercase / snake_case
//! to match the server's JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::MediaId;

// ---------------------------------------------------------------------------
// PlaybackSource
// ---------------------------------------------------------------------------

/// How the media bytes are delivered to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// A single, fully-available media file served directly.
    Progressive,
    /// A segment playlist assembled by the server, possibly still being produced.
    SegmentedAdaptive {
        /// The full segment set existed before playback started.
        pre_transcoded: bool,
    },
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progressive => write!(f, "progressive"),
            Self::SegmentedAdaptive {
                pre_transcoded: true,
            } => write!(f, "segmented(pre-transcoded)"),
            Self::SegmentedAdaptive {
                pre_transcoded: false,
            } => write!(f, "segmented(live)"),
        }
    }
}

/// What a session plays. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackSource {
    /// The media item this source belongs to.
    pub media_id: MediaId,
    /// URL of the file or playlist.
    pub url: String,
    /// Delivery mechanism.
    pub kind: SourceKind,
}

impl PlaybackSource {
    /// A directly served file.
    pub fn progressive(media_id: MediaId, url: impl Into<String>) -> Self {
        Self {
            media_id,
            url: url.into(),
            kind: SourceKind::Progressive,
        }
    }

    /// A segment playlist.
    pub fn segmented(media_id: MediaId, url: impl Into<String>, pre_transcoded: bool) -> Self {
        Self {
            media_id,
            url: url.into(),
            kind: SourceKind::SegmentedAdaptive { pre_transcoded },
        }
    }

    /// Whether the source is a segment playlist.
    pub fn is_segmented(&self) -> bool {
        matches!(self.kind, SourceKind::SegmentedAdaptive { .. })
    }

    /// Whether the whole timeline is available up front (no seek restriction).
    pub fn is_unrestricted(&self) -> bool {
        match self.kind {
            SourceKind::Progressive => true,
            SourceKind::SegmentedAdaptive { pre_transcoded } => pre_transcoded,
        }
    }

    /// Whether the server is producing segments while we play.
    pub fn is_live_transcode(&self) -> bool {
        !self.is_unrestricted()
    }
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

/// An audio track as reported by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Position of the track within the file's audio streams.
    pub index: usize,
    /// Language tag (ISO-639 or BCP-47).
    pub language: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
}

/// A subtitle track, either embedded in the file or downloaded later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// Position of the track within the session's subtitle list.
    pub index: usize,
    /// Language tag (ISO-639 or BCP-47).
    pub language: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Forced tracks only carry foreign-language dialogue and signs.
    #[serde(default)]
    pub forced: bool,
    /// Fetched from an external subtitle source after discovery.
    #[serde(default)]
    pub is_downloaded: bool,
    /// Fetch URL for downloaded tracks.
    #[serde(default)]
    pub source_url: Option<String>,
    /// User-adjustable timing offset in seconds (downloaded tracks only).
    #[serde(default)]
    pub offset_secs: f64,
}

impl SubtitleTrack {
    /// An embedded track.
    pub fn embedded(index: usize, language: impl Into<String>, forced: bool) -> Self {
        Self {
            index,
            language: language.into(),
            title: None,
            forced,
            is_downloaded: false,
            source_url: None,
            offset_secs: 0.0,
        }
    }
}

/// All tracks of a source, discovered once per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSet {
    #[serde(default)]
    pub audio: Vec<AudioTrack>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

impl TrackSet {
    /// Look up an audio track by index.
    pub fn audio_track(&self, index: usize) -> Option<&AudioTrack> {
        self.audio.iter().find(|t| t.index == index)
    }

    /// Look up a subtitle track by index.
    pub fn subtitle_track(&self, index: usize) -> Option<&SubtitleTrack> {
        self.subtitles.iter().find(|t| t.index == index)
    }

    /// Mutable lookup of a subtitle track by index.
    pub fn subtitle_track_mut(&mut self, index: usize) -> Option<&mut SubtitleTrack> {
        self.subtitles.iter_mut().find(|t| t.index == index)
    }

    /// Index the next appended subtitle track will receive.
    pub fn next_subtitle_index(&self) -> usize {
        self.subtitles
            .iter()
            .map(|t| t.index + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Which subtitle track is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "index", rename_all = "lowercase")]
pub enum SubtitleSelection {
    /// Subtitles off.
    #[default]
    None,
    /// The track with this index.
    Track(usize),
}

impl SubtitleSelection {
    /// The selected index, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Track(i) => Some(*i),
        }
    }
}

impl fmt::Display for SubtitleSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Track(i) => write!(f, "{}", i),
        }
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Track and presentation choices carried from one session to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPreferences {
    pub audio_track_index: Option<usize>,
    #[serde(default)]
    pub audio_language: Option<String>,
    /// `None` means no preference was expressed; `Some(SubtitleSelection::None)`
    /// means the user explicitly turned subtitles off.
    #[serde(default)]
    pub subtitle_track_index: Option<SubtitleSelection>,
    #[serde(default)]
    pub was_fullscreen: Option<bool>,
}

impl SessionPreferences {
    /// Whether the preferences carry no audio choice at all.
    pub fn has_audio_preference(&self) -> bool {
        self.audio_track_index.is_some() || self.audio_language.is_some()
    }
}

/// Produced when one item finishes and the next one should start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextItemHandoff {
    pub next_source: PlaybackSource,
    pub preferences: SessionPreferences,
}

// ---------------------------------------------------------------------------
// Endpoint payloads
// ---------------------------------------------------------------------------

/// Response of the track/duration discovery endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Total duration in seconds, when known.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub tracks: TrackSet,
}

/// Response of the transcode/buffer status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeStatus {
    pub segments_ready: u32,
    pub is_complete: bool,
    pub pre_transcoded: bool,
}

/// Subtitle text as returned by the subtitle endpoint (WebVTT).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitlePayload {
    pub content: String,
}

impl SubtitlePayload {
    /// A success-shaped payload that carries no cues.
    pub fn is_empty(&self) -> bool {
        let body = self.content.trim();
        body.is_empty() || body == "WEBVTT"
    }
}

/// A subtitle located by an external subtitle source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSubtitle {
    /// Where the downloaded track can be fetched from.
    pub url: String,
    pub language: String,
    #[serde(default)]
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors reported by the media backend
// ---------------------------------------------------------------------------

/// Sub-kind of a non-fatal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// Playback buffer underrun.
    BufferStall,
    /// A segment could not be loaded (not ready yet, temporarily unavailable).
    FragmentLoad,
    /// Appending to the playback buffer conflicted (typically after a seek).
    BufferAppend,
    /// Anything else that is non-fatal.
    Other,
}

/// Fault classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "category", content = "kind", rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Decode,
    Unsupported,
    Transient(TransientKind),
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Decode => write!(f, "decode"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Transient(kind) => write!(f, "transient({:?})", kind),
        }
    }
}

/// A classified playback or network fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub category: ErrorCategory,
    pub detail: String,
    pub fatal: bool,
}

impl ErrorEvent {
    /// A fatal fault of the given category.
    pub fn fatal(category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
            fatal: true,
        }
    }

    /// A non-fatal fault of the given kind.
    pub fn transient(kind: TransientKind, detail: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Transient(kind),
            detail: detail.into(),
            fatal: false,
        }
    }
}
