//! Shared test harness for integration tests.
//!
//! Provides [`FakeBackend`], a scripted media element that records every call
//! made to it, [`FakeServer`], an in-memory implementation of every gateway
//! trait, and [`Harness`] which wires both into a [`SessionController`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sceneforged_common::{
    Error, ExternalSubtitle, MediaId, MediaInfo, PlaybackSource, Result, SessionPreferences,
    SubtitlePayload, TranscodeStatus, UserId,
};
use sceneforged_player::config::PlayerConfig;
use sceneforged_player::gateway::{
    Gateways, PositionGateway, PreferenceStore, SubtitleSource, TrackDiscovery, TranscodeControl,
    TranscodeStatusSource,
};
use sceneforged_player::media::{AttachRequest, AudioCapability, MediaBackend};
use sceneforged_player::resources::ResourceManager;
use sceneforged_player::{EventPayload, MediaEvent, SessionController};

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// A call made to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Attach(AttachRequest),
    Detach,
    Play,
    Pause,
    Seek(f64),
    SetMuted(bool),
    RecoverDecoder,
    StartLoad(f64),
    StopLoad,
    SwitchAudio(usize),
    ShowSubtitle(String),
    ClearSubtitle,
}

pub struct ElementState {
    pub current_time: f64,
    pub duration: Option<f64>,
    pub buffered_end: Option<f64>,
    pub paused: bool,
    pub ended: bool,
    pub muted: bool,
    /// Seconds buffered right after an attach.
    pub attach_buffer: f64,
    /// Duration reported after an attach; `None` means metadata never loads.
    pub attach_duration: Option<f64>,
    pub reject_play: bool,
}

pub struct FakeBackend {
    capability: AudioCapability,
    pub state: Mutex<ElementState>,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn new(capability: AudioCapability) -> Self {
        Self {
            capability,
            state: Mutex::new(ElementState {
                current_time: 0.0,
                duration: None,
                buffered_end: None,
                paused: true,
                ended: false,
                muted: false,
                attach_buffer: 10.0,
                attach_duration: Some(600.0),
                reject_play: false,
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn attaches(&self) -> Vec<AttachRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Attach(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Seek(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn subtitles_shown(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::ShowSubtitle(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Move the playhead with some buffer ahead of it.
    pub fn set_time(&self, position: f64, buffered_ahead: f64) {
        let mut state = self.state.lock();
        state.current_time = position;
        state.buffered_end = Some(position + buffered_ahead);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn buffered_end(&self) -> Option<f64> {
        self.state.lock().buffered_end
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    async fn play(&self) -> Result<()> {
        self.record(Call::Play);
        let mut state = self.state.lock();
        if state.reject_play {
            return Err(Error::playback("autoplay rejected"));
        }
        state.paused = false;
        Ok(())
    }

    fn pause(&self) {
        self.record(Call::Pause);
        self.state.lock().paused = true;
    }

    fn seek(&self, position: f64) {
        self.record(Call::Seek(position));
        self.state.lock().current_time = position;
    }

    fn set_muted(&self, muted: bool) {
        self.record(Call::SetMuted(muted));
        self.state.lock().muted = muted;
    }

    fn audio_capability(&self) -> AudioCapability {
        self.capability
    }

    async fn attach(&self, request: AttachRequest) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.current_time = request.start_at;
            state.buffered_end = Some(request.start_at + state.attach_buffer);
            state.duration = state.attach_duration;
            state.paused = true;
            state.ended = false;
        }
        self.record(Call::Attach(request));
        Ok(())
    }

    fn detach(&self) {
        self.record(Call::Detach);
        let mut state = self.state.lock();
        state.duration = None;
        state.buffered_end = None;
        state.paused = true;
    }

    fn recover_decoder(&self) {
        self.record(Call::RecoverDecoder);
    }

    fn start_load(&self, position: f64) {
        self.record(Call::StartLoad(position));
    }

    fn stop_load(&self) {
        self.record(Call::StopLoad);
    }

    fn switch_audio_in_band(&self, index: usize) -> Result<()> {
        self.record(Call::SwitchAudio(index));
        Ok(())
    }

    fn show_subtitle(&self, payload: SubtitlePayload) {
        self.record(Call::ShowSubtitle(payload.content));
    }

    fn clear_subtitle(&self) {
        self.record(Call::ClearSubtitle);
    }
}

// ---------------------------------------------------------------------------
// FakeServer
// ---------------------------------------------------------------------------

/// In-memory stand-in for every server endpoint.
#[derive(Default)]
pub struct FakeServer {
    /// `None` makes discovery fail.
    pub info: Mutex<Option<MediaInfo>>,
    pub status: Mutex<TranscodeStatus>,
    pub status_queries: Mutex<Vec<(MediaId, usize)>>,
    pub external: Mutex<Option<ExternalSubtitle>>,
    pub positions: Mutex<HashMap<MediaId, f64>>,
    pub saved_positions: Mutex<Vec<(MediaId, f64)>>,
    pub finished: Mutex<Vec<MediaId>>,
    pub preferences: Mutex<Option<SessionPreferences>>,
    pub saved_preferences: Mutex<Vec<SessionPreferences>>,
    pub released: Mutex<Vec<MediaId>>,
}

impl FakeServer {
    pub fn gateways(self: &Arc<Self>) -> Gateways {
        Gateways {
            discovery: self.clone(),
            transcode: self.clone(),
            subtitles: self.clone(),
            positions: self.clone(),
            preferences: self.clone(),
            transcode_control: self.clone(),
        }
    }
}

#[async_trait]
impl TrackDiscovery for FakeServer {
    async fn discover(&self, _media_id: MediaId) -> Result<MediaInfo> {
        self.info
            .lock()
            .clone()
            .ok_or_else(|| Error::gateway("discovery", "HTTP 500"))
    }
}

#[async_trait]
impl TranscodeStatusSource for FakeServer {
    async fn transcode_status(
        &self,
        media_id: MediaId,
        audio_index: usize,
    ) -> Result<TranscodeStatus> {
        self.status_queries.lock().push((media_id, audio_index));
        Ok(*self.status.lock())
    }
}

#[async_trait]
impl SubtitleSource for FakeServer {
    async fn fetch_track(
        &self,
        _media_id: MediaId,
        index: usize,
        offset_secs: f64,
    ) -> Result<SubtitlePayload> {
        Ok(SubtitlePayload {
            content: format!("WEBVTT\n\nNOTE track {index} offset {offset_secs}"),
        })
    }

    async fn fetch_url(&self, url: &str, offset_secs: f64) -> Result<SubtitlePayload> {
        Ok(SubtitlePayload {
            content: format!("WEBVTT\n\nNOTE url {url} offset {offset_secs}"),
        })
    }

    async fn find_external(&self, _media_id: MediaId, language: &str) -> Result<ExternalSubtitle> {
        self.external
            .lock()
            .clone()
            .ok_or_else(|| Error::Subtitle(format!("no {language} subtitle found")))
    }
}

#[async_trait]
impl PositionGateway for FakeServer {
    async fn load_position(&self, media_id: MediaId) -> Result<f64> {
        Ok(self.positions.lock().get(&media_id).copied().unwrap_or(0.0))
    }

    async fn save_position(&self, media_id: MediaId, position_secs: f64) -> Result<()> {
        self.saved_positions.lock().push((media_id, position_secs));
        Ok(())
    }

    async fn mark_finished(&self, media_id: MediaId) -> Result<()> {
        self.finished.lock().push(media_id);
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FakeServer {
    async fn load_preferences(&self, _user_id: UserId) -> Result<Option<SessionPreferences>> {
        Ok(self.preferences.lock().clone())
    }

    async fn save_preferences(&self, _user_id: UserId, prefs: &SessionPreferences) -> Result<()> {
        self.saved_preferences.lock().push(prefs.clone());
        Ok(())
    }
}

#[async_trait]
impl TranscodeControl for FakeServer {
    async fn release(&self, media_id: MediaId) -> Result<()> {
        self.released.lock().push(media_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub controller: SessionController,
    pub backend: Arc<FakeBackend>,
    pub server: Arc<FakeServer>,
}

pub struct HarnessBuilder {
    config: PlayerConfig,
    capability: AudioCapability,
    user: Option<UserId>,
    resources: Option<ResourceManager>,
    server: Option<Arc<FakeServer>>,
}

impl HarnessBuilder {
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capability(mut self, capability: AudioCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn resources(mut self, resources: ResourceManager) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn server(mut self, server: Arc<FakeServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn build(self) -> Harness {
        let backend = Arc::new(FakeBackend::new(self.capability));
        let server = self.server.unwrap_or_default();

        let mut builder =
            SessionController::builder(self.config, backend.clone(), server.gateways());
        if let Some(user) = self.user {
            builder = builder.user(user);
        }
        if let Some(resources) = self.resources {
            builder = builder.resources(resources);
        }

        Harness {
            controller: builder.build(),
            backend,
            server,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: PlayerConfig::default(),
            capability: AudioCapability::InBand,
            user: None,
            resources: None,
            server: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Attach and let discovery and the first admission poll run.
    pub async fn attach(&self, source: PlaybackSource) {
        self.controller.attach(source, None).await.unwrap();
        settle().await;
    }

    /// Move the playhead and report it.
    pub fn play_to(&self, position: f64) {
        self.backend.set_time(position, 20.0);
        self.controller
            .handle_media_event(MediaEvent::TimeUpdate { position });
    }

    /// Published payloads, oldest first (time updates are not kept).
    pub fn events(&self) -> Vec<EventPayload> {
        let mut events: Vec<_> = self
            .controller
            .events()
            .recent_events(100)
            .into_iter()
            .map(|e| e.payload)
            .collect();
        events.reverse();
        events
    }
}

/// Let spawned tasks run. Time is paused in these tests, so this also
/// advances the clock by a hair.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

pub async fn advance(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

pub fn progressive() -> PlaybackSource {
    PlaybackSource::progressive(MediaId::new(), "/media/movie.mp4")
}

pub fn live_transcode() -> PlaybackSource {
    PlaybackSource::segmented(MediaId::new(), "/media/playlist.m3u8", false)
}
