//! HTTP implementation of the controller's collaborators.
//!
//! Talks to the sceneforged REST surface:
//!
//! | Method | Path | Use |
//! |---|---|---|
//! | GET | `/api/media/{id}/info` | tracks + duration |
//! | GET | `/api/media/{id}/transcode?audio={n}` | transcode status |
//! | DELETE | `/api/media/{id}/transcode` | release transcode work |
//! | GET | `/api/media/{id}/subtitles/{n}?offset={s}` | embedded subtitle |
//! | GET | `/api/media/{id}/subtitles/external?lang={l}` | external subtitle lookup |
//! | GET/PUT | `/api/media/{id}/position` | resume position |
//! | POST | `/api/media/{id}/finished` | watched marker |
//! | GET/PUT | `/api/users/{id}/preferences` | track preferences |

use async_trait::async_trait;
use reqwest::StatusCode;
use sceneforged_common::{
    Error, ExternalSubtitle, MediaId, MediaInfo, Result, SessionPreferences, SubtitlePayload,
    TranscodeStatus, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    PositionGateway, PreferenceStore, SubtitleSource, TrackDiscovery, TranscodeControl,
    TranscodeStatusSource,
};
use crate::config::GatewayConfig;

// ---------------------------------------------------------------------------
// Wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct PositionBody {
    position_secs: f64,
}

/// The subtitle endpoints answer 200 with either `content` or `error`.
#[derive(Debug, Deserialize)]
struct SubtitleResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalSubtitleResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SubtitleResponse {
    fn into_payload(self) -> Result<SubtitlePayload> {
        if let Some(error) = self.error {
            return Err(Error::Subtitle(error));
        }
        Ok(SubtitlePayload {
            content: self.content.unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// HttpGateway
// ---------------------------------------------------------------------------

/// REST client for the sceneforged server.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGateway {
    /// Build a gateway from configuration.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request and fail on transport errors or non-success status.
    async fn send(
        &self,
        endpoint: &'static str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::gateway(endpoint, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::gateway(endpoint, format!("HTTP {}", status.as_u16())));
        }
        Ok(resp)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        endpoint: &'static str,
        resp: reqwest::Response,
    ) -> Result<T> {
        resp.json::<T>()
            .await
            .map_err(|e| Error::gateway(endpoint, format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl TrackDiscovery for HttpGateway {
    async fn discover(&self, media_id: MediaId) -> Result<MediaInfo> {
        let url = self.url(&format!("/api/media/{media_id}/info"));
        let resp = self
            .send("discovery", self.request(reqwest::Method::GET, &url))
            .await?;
        Self::json("discovery", resp).await
    }
}

#[async_trait]
impl TranscodeStatusSource for HttpGateway {
    async fn transcode_status(
        &self,
        media_id: MediaId,
        audio_index: usize,
    ) -> Result<TranscodeStatus> {
        let url = self.url(&format!("/api/media/{media_id}/transcode"));
        let builder = self
            .request(reqwest::Method::GET, &url)
            .query(&[("audio", audio_index)]);
        let resp = self.send("transcode", builder).await?;
        Self::json("transcode", resp).await
    }
}

#[async_trait]
impl TranscodeControl for HttpGateway {
    async fn release(&self, media_id: MediaId) -> Result<()> {
        let url = self.url(&format!("/api/media/{media_id}/transcode"));
        let resp = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| Error::gateway("transcode", e.to_string()))?;

        // Already gone is fine.
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            debug!(media_id = %media_id, "Released transcode");
            Ok(())
        } else {
            Err(Error::gateway(
                "transcode",
                format!("HTTP {}", resp.status().as_u16()),
            ))
        }
    }
}

#[async_trait]
impl SubtitleSource for HttpGateway {
    async fn fetch_track(
        &self,
        media_id: MediaId,
        index: usize,
        offset_secs: f64,
    ) -> Result<SubtitlePayload> {
        let url = self.url(&format!("/api/media/{media_id}/subtitles/{index}"));
        let builder = self
            .request(reqwest::Method::GET, &url)
            .query(&[("offset", offset_secs)]);
        let resp = self.send("subtitles", builder).await?;
        Self::json::<SubtitleResponse>("subtitles", resp)
            .await?
            .into_payload()
    }

    async fn fetch_url(&self, url: &str, offset_secs: f64) -> Result<SubtitlePayload> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.url(url)
        };
        let builder = self
            .request(reqwest::Method::GET, &url)
            .query(&[("offset", offset_secs)]);
        let resp = self.send("subtitles", builder).await?;
        Self::json::<SubtitleResponse>("subtitles", resp)
            .await?
            .into_payload()
    }

    async fn find_external(&self, media_id: MediaId, language: &str) -> Result<ExternalSubtitle> {
        let url = self.url(&format!("/api/media/{media_id}/subtitles/external"));
        let builder = self
            .request(reqwest::Method::GET, &url)
            .query(&[("lang", language)]);
        let resp = self.send("subtitles", builder).await?;
        let body: ExternalSubtitleResponse = Self::json("subtitles", resp).await?;

        if let Some(error) = body.error {
            return Err(Error::Subtitle(error));
        }
        let url = body
            .url
            .ok_or_else(|| Error::Subtitle(format!("no {language} subtitle found")))?;

        Ok(ExternalSubtitle {
            url,
            language: body.language.unwrap_or_else(|| language.to_string()),
            title: body.title,
        })
    }
}

#[async_trait]
impl PositionGateway for HttpGateway {
    async fn load_position(&self, media_id: MediaId) -> Result<f64> {
        let url = self.url(&format!("/api/media/{media_id}/position"));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::gateway("position", e.to_string()))?;

        // Never played.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0.0);
        }
        if !resp.status().is_success() {
            return Err(Error::gateway(
                "position",
                format!("HTTP {}", resp.status().as_u16()),
            ));
        }
        let body: PositionBody = Self::json("position", resp).await?;
        Ok(body.position_secs.max(0.0))
    }

    async fn save_position(&self, media_id: MediaId, position_secs: f64) -> Result<()> {
        let url = self.url(&format!("/api/media/{media_id}/position"));
        let builder = self
            .request(reqwest::Method::PUT, &url)
            .json(&PositionBody { position_secs });
        self.send("position", builder).await?;
        Ok(())
    }

    async fn mark_finished(&self, media_id: MediaId) -> Result<()> {
        let url = self.url(&format!("/api/media/{media_id}/finished"));
        self.send("position", self.request(reqwest::Method::POST, &url))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for HttpGateway {
    async fn load_preferences(&self, user_id: UserId) -> Result<Option<SessionPreferences>> {
        let url = self.url(&format!("/api/users/{user_id}/preferences"));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| Error::gateway("preferences", e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::gateway(
                "preferences",
                format!("HTTP {}", resp.status().as_u16()),
            ));
        }
        Self::json("preferences", resp).await.map(Some)
    }

    async fn save_preferences(&self, user_id: UserId, prefs: &SessionPreferences) -> Result<()> {
        let url = self.url(&format!("/api/users/{user_id}/preferences"));
        self.send(
            "preferences",
            self.request(reqwest::Method::PUT, &url).json(prefs),
        )
        .await?;
        Ok(())
    }
}
