//! External collaborators of the session controller.
//!
//! Every endpoint the controller consumes is an `async_trait` so tests and
//! other hosts can substitute their own. [`HttpGateway`] implements all of
//! them against the sceneforged REST surface.

mod http;
mod preferences;

pub use http::HttpGateway;
pub use preferences::PreferenceSaver;

use std::sync::Arc;

use async_trait::async_trait;
use sceneforged_common::{
    ExternalSubtitle, MediaId, MediaInfo, Result, SessionPreferences, SubtitlePayload,
    TranscodeStatus, UserId,
};

/// Track and duration discovery for a media item.
#[async_trait]
pub trait TrackDiscovery: Send + Sync {
    async fn discover(&self, media_id: MediaId) -> Result<MediaInfo>;
}

/// Progress of the server-side transcode feeding a segmented source.
#[async_trait]
pub trait TranscodeStatusSource: Send + Sync {
    async fn transcode_status(&self, media_id: MediaId, audio_index: usize)
        -> Result<TranscodeStatus>;
}

/// Subtitle content.
///
/// Implementations must return `Err` for error-shaped responses and `Ok` with
/// an empty payload only when the server really had no cues.
#[async_trait]
pub trait SubtitleSource: Send + Sync {
    /// Fetch an embedded track.
    async fn fetch_track(
        &self,
        media_id: MediaId,
        index: usize,
        offset_secs: f64,
    ) -> Result<SubtitlePayload>;

    /// Fetch a previously downloaded track from its own URL.
    async fn fetch_url(&self, url: &str, offset_secs: f64) -> Result<SubtitlePayload>;

    /// Ask the external subtitle source for a track in `language`.
    async fn find_external(&self, media_id: MediaId, language: &str) -> Result<ExternalSubtitle>;
}

/// Durable playback position.
#[async_trait]
pub trait PositionGateway: Send + Sync {
    async fn load_position(&self, media_id: MediaId) -> Result<f64>;

    async fn save_position(&self, media_id: MediaId, position_secs: f64) -> Result<()>;

    async fn mark_finished(&self, media_id: MediaId) -> Result<()>;
}

/// Cross-session track/presentation preferences keyed by user.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load_preferences(&self, user_id: UserId) -> Result<Option<SessionPreferences>>;

    async fn save_preferences(&self, user_id: UserId, prefs: &SessionPreferences) -> Result<()>;
}

/// Releases server-side transcode work for a media item.
#[async_trait]
pub trait TranscodeControl: Send + Sync {
    async fn release(&self, media_id: MediaId) -> Result<()>;
}

/// The full set of collaborators handed to a controller.
#[derive(Clone)]
pub struct Gateways {
    pub discovery: Arc<dyn TrackDiscovery>,
    pub transcode: Arc<dyn TranscodeStatusSource>,
    pub subtitles: Arc<dyn SubtitleSource>,
    pub positions: Arc<dyn PositionGateway>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub transcode_control: Arc<dyn TranscodeControl>,
}

impl Gateways {
    /// Route every collaborator through one HTTP gateway.
    pub fn from_http(gateway: Arc<HttpGateway>) -> Self {
        Self {
            discovery: gateway.clone(),
            transcode: gateway.clone(),
            subtitles: gateway.clone(),
            positions: gateway.clone(),
            preferences: gateway.clone(),
            transcode_control: gateway,
        }
    }
}
