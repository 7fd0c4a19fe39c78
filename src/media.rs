//! The media backend seam.
//!
//! [`MediaBackend`] is everything the controller needs from the platform: the
//! media element (position, buffered range, paused/ended, mute) and the
//! adaptive-delivery client that feeds it (attach, decoder recovery, segment
//! loading, in-band audio switching). Implementations wrap whatever the host
//! platform offers; the controller treats them as a black box.

use async_trait::async_trait;
use sceneforged_common::{PlaybackSource, Result, SubtitlePayload};

/// How the platform can change the audio track of a running source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCapability {
    /// The delivery client exposes the alternate audio renditions natively.
    InBand,
    /// Changing audio needs a new source attachment (server-side remux).
    Reattach,
}

/// Parameters for attaching a source to the element.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachRequest {
    pub source: PlaybackSource,
    /// Position to start loading from, in seconds.
    pub start_at: f64,
    /// Audio rendition the server should deliver.
    pub audio_index: usize,
}

/// The platform media element plus its adaptive-delivery client.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    // -- Element state ------------------------------------------------------

    /// Current playhead position in seconds.
    fn current_time(&self) -> f64;

    /// Duration as reported by loaded metadata, if any.
    fn duration(&self) -> Option<f64>;

    /// Trailing edge of the buffered range containing the playhead.
    fn buffered_end(&self) -> Option<f64>;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn is_muted(&self) -> bool;

    // -- Element control ----------------------------------------------------

    /// Start playback. Fails when the platform rejects autoplay.
    async fn play(&self) -> Result<()>;

    fn pause(&self);

    fn seek(&self, position: f64);

    fn set_muted(&self, muted: bool);

    // -- Delivery client ----------------------------------------------------

    /// Which audio switching strategy this platform supports.
    fn audio_capability(&self) -> AudioCapability;

    /// Create the delivery client and attach the source.
    async fn attach(&self, request: AttachRequest) -> Result<()>;

    /// Destroy the delivery client and release the element.
    fn detach(&self);

    /// Ask the decoder to recover in place.
    fn recover_decoder(&self);

    /// (Re)start segment loading from a position.
    fn start_load(&self, position: f64);

    /// Stop segment loading.
    fn stop_load(&self);

    /// Switch to another audio rendition without re-attaching.
    fn switch_audio_in_band(&self, index: usize) -> Result<()>;

    /// Show a subtitle payload. Cue timing already includes any offset.
    fn show_subtitle(&self, payload: SubtitlePayload);

    fn clear_subtitle(&self);
}
