//! Audio track switching strategies.
//!
//! Some platforms expose a source's alternate audio renditions through the
//! delivery client and can switch without interrupting playback. Others need
//! the server to remux a new stream, which means tearing the source down and
//! attaching it again at the same position.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sceneforged_common::{Error, PlaybackSource, Result};
use tracing::{debug, info, warn};

use crate::config::TrackConfig;
use crate::media::{AttachRequest, AudioCapability, MediaBackend};

/// Everything a strategy needs, captured before anything is torn down.
#[derive(Debug, Clone)]
pub struct AudioSwitchRequest {
    pub source: PlaybackSource,
    pub audio_index: usize,
    /// Playhead position at the time of the request.
    pub position: f64,
    /// Whether playback should continue after the switch.
    pub was_playing: bool,
}

/// A way of changing the active audio track.
#[async_trait]
pub trait AudioSwitchStrategy: Send + Sync {
    /// Short name used in logs and events.
    fn name(&self) -> &'static str;

    /// Whether the switch detaches the source. The session reports
    /// `is_remuxing` while such a switch runs.
    fn requires_reattach(&self) -> bool;

    async fn switch(&self, backend: &dyn MediaBackend, request: &AudioSwitchRequest) -> Result<()>;
}

/// Pick the strategy matching the platform's capability.
pub fn for_capability(
    capability: AudioCapability,
    config: &TrackConfig,
) -> Arc<dyn AudioSwitchStrategy> {
    match capability {
        AudioCapability::InBand => Arc::new(InBandSwitch),
        AudioCapability::Reattach => Arc::new(ReattachSwitch::new(config)),
    }
}

// ---------------------------------------------------------------------------
// In-band
// ---------------------------------------------------------------------------

/// Switch through the delivery client's own audio rendition list.
#[derive(Debug, Clone, Copy, Default)]
pub struct InBandSwitch;

#[async_trait]
impl AudioSwitchStrategy for InBandSwitch {
    fn name(&self) -> &'static str {
        "in_band"
    }

    fn requires_reattach(&self) -> bool {
        false
    }

    async fn switch(&self, backend: &dyn MediaBackend, request: &AudioSwitchRequest) -> Result<()> {
        backend.switch_audio_in_band(request.audio_index)?;
        debug!(audio_index = request.audio_index, "Switched audio in-band");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Re-attach
// ---------------------------------------------------------------------------

/// Detach and re-attach the source with a different audio rendition.
#[derive(Debug, Clone)]
pub struct ReattachSwitch {
    metadata_timeout: Duration,
    metadata_poll: Duration,
}

impl ReattachSwitch {
    pub fn new(config: &TrackConfig) -> Self {
        Self {
            metadata_timeout: config.metadata_timeout(),
            metadata_poll: config.metadata_poll(),
        }
    }
}

#[async_trait]
impl AudioSwitchStrategy for ReattachSwitch {
    fn name(&self) -> &'static str {
        "reattach"
    }

    fn requires_reattach(&self) -> bool {
        true
    }

    async fn switch(&self, backend: &dyn MediaBackend, request: &AudioSwitchRequest) -> Result<()> {
        info!(
            media_id = %request.source.media_id,
            audio_index = request.audio_index,
            position = request.position,
            "Re-attaching source for audio switch"
        );

        backend.detach();
        backend
            .attach(AttachRequest {
                source: request.source.clone(),
                start_at: request.position,
                audio_index: request.audio_index,
            })
            .await?;

        wait_for_metadata(backend, self.metadata_timeout, self.metadata_poll).await?;

        backend.seek(request.position);
        if request.was_playing {
            if let Err(e) = backend.play().await {
                warn!(error = %e, "Play after audio switch was rejected");
            }
        }
        Ok(())
    }
}

/// Poll until the backend reports a finite duration.
pub async fn wait_for_metadata(
    backend: &dyn MediaBackend,
    timeout: Duration,
    poll: Duration,
) -> Result<f64> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(duration) = backend.duration().filter(|d| d.is_finite() && *d > 0.0) {
            return Ok(duration);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::MetadataTimeout {
                waited_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(poll).await;
    }
}
