//! Subtitle fetching with supersession.
//!
//! Only the most recent request matters: a user flicking through tracks
//! should never see an older track's cues land after the newer one.

use parking_lot::Mutex;
use sceneforged_common::{Error, MediaId, Result, SubtitlePayload, SubtitleTrack};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gateway::SubtitleSource;

/// Fetch the payload for `track`, routed by where the track lives.
pub async fn fetch(
    source: &dyn SubtitleSource,
    media_id: MediaId,
    track: &SubtitleTrack,
) -> Result<SubtitlePayload> {
    let payload = match (&track.source_url, track.is_downloaded) {
        (Some(url), true) => source.fetch_url(url, track.offset_secs).await?,
        _ => {
            source
                .fetch_track(media_id, track.index, track.offset_secs)
                .await?
        }
    };

    if payload.is_empty() {
        info!(
            media_id = %media_id,
            index = track.index,
            "Subtitle track has no cues"
        );
    }
    Ok(payload)
}

/// Hands out one cancellation token per fetch and cancels the previous one.
#[derive(Debug, Default)]
pub struct SubtitleFetcher {
    current: Mutex<Option<CancellationToken>>,
}

impl SubtitleFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new fetch under `session`, superseding any fetch in flight.
    pub fn begin(&self, session: &CancellationToken) -> CancellationToken {
        let token = session.child_token();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel whatever is in flight.
    pub fn cancel(&self) {
        if let Some(previous) = self.current.lock().take() {
            previous.cancel();
        }
    }

    /// Run `fetch` under a fresh token. Superseded fetches return
    /// [`Error::Cancelled`].
    pub async fn run<F>(&self, session: &CancellationToken, fetch: F) -> Result<SubtitlePayload>
    where
        F: std::future::Future<Output = Result<SubtitlePayload>>,
    {
        let token = self.begin(session);
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Subtitle fetch superseded");
                Err(Error::Cancelled)
            }
            result = fetch => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use sceneforged_common::ExternalSubtitle;
    use std::sync::Arc;
    use std::time::Duration;

    /// Source whose embedded fetches take `delay` and echo the index.
    struct SlowSource {
        delay: Duration,
    }

    #[async_trait]
    impl SubtitleSource for SlowSource {
        async fn fetch_track(
            &self,
            _media_id: MediaId,
            index: usize,
            offset_secs: f64,
        ) -> Result<SubtitlePayload> {
            tokio::time::sleep(self.delay).await;
            Ok(SubtitlePayload {
                content: format!("WEBVTT\n\nNOTE track {index} offset {offset_secs}"),
            })
        }

        async fn fetch_url(&self, url: &str, _offset_secs: f64) -> Result<SubtitlePayload> {
            Ok(SubtitlePayload {
                content: format!("WEBVTT\n\nNOTE {url}"),
            })
        }

        async fn find_external(
            &self,
            _media_id: MediaId,
            language: &str,
        ) -> Result<ExternalSubtitle> {
            Err(Error::Subtitle(format!("no {language} subtitle")))
        }
    }

    #[tokio::test]
    async fn downloaded_tracks_use_their_url() {
        let source = SlowSource {
            delay: Duration::ZERO,
        };
        let mut track = SubtitleTrack::embedded(4, "fr", false);
        track.is_downloaded = true;
        track.source_url = Some("/subs/abc.vtt".into());

        let payload = fetch(&source, MediaId::new(), &track).await.unwrap();
        assert!(payload.content.contains("/subs/abc.vtt"));
    }

    #[tokio::test]
    async fn embedded_tracks_pass_offset() {
        let source = SlowSource {
            delay: Duration::ZERO,
        };
        let mut track = SubtitleTrack::embedded(2, "fr", false);
        track.offset_secs = 1.5;

        let payload = fetch(&source, MediaId::new(), &track).await.unwrap();
        assert!(payload.content.contains("track 2 offset 1.5"));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_fetch_supersedes_older() {
        let fetcher = Arc::new(SubtitleFetcher::new());
        let session = CancellationToken::new();
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(2),
        });
        let media = MediaId::new();

        let first = {
            let fetcher = fetcher.clone();
            let session = session.clone();
            let source = source.clone();
            tokio::spawn(async move {
                let track = SubtitleTrack::embedded(0, "fr", false);
                fetcher
                    .run(&session, fetch(source.as_ref(), media, &track))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let track = SubtitleTrack::embedded(1, "en", false);
        let second = fetcher
            .run(&session, fetch(source.as_ref(), media, &track))
            .await
            .unwrap();

        assert!(first.await.unwrap().unwrap_err().is_cancelled());
        assert!(second.content.contains("track 1"));
    }

    #[tokio::test]
    async fn session_cancel_stops_fetch() {
        let fetcher = SubtitleFetcher::new();
        let session = CancellationToken::new();
        session.cancel();

        let result = fetcher
            .run(&session, std::future::pending::<Result<SubtitlePayload>>())
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
