//! The session controller.
//!
//! A [`SessionController`] owns one playback session at a time. It receives
//! user commands through its methods (or [`Command`] values through
//! [`SessionController::execute`]) and element notifications through
//! [`SessionController::handle_media_event`], keeps all mutable state in a
//! single [`SessionContext`], and publishes what happened on the
//! [`EventBus`].
//!
//! Background work (discovery, admission polling, liveness, position saves,
//! the completion countdown, recovery timers) runs as tokio tasks bound to the
//! session's cancellation token. Attaching a new source cancels the token, so
//! nothing from the previous session can act on the new one.

mod tasks;

use std::sync::Arc;

use parking_lot::Mutex;
use sceneforged_common::{
    Error, ErrorCategory, ErrorEvent, NextItemHandoff, PlaybackSource, Result, SessionPreferences,
    SubtitleSelection, SubtitleTrack, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PlayerConfig;
use crate::context::{Advisory, SessionContext, SessionSnapshot};
use crate::events::{Event, EventBus, EventPayload};
use crate::gateway::{Gateways, PreferenceSaver};
use crate::media::{AttachRequest, MediaBackend};
use crate::resources::ResourceManager;

use super::audio_switch::{self, AudioSwitchRequest, AudioSwitchStrategy};
use super::buffer_gate::buffered_percent;
use super::completion::CompletionAction;
use super::recovery::{classify, FaultContext, PositionUpdate, RawFault, RecoveryAction};
use super::subtitles::{self, SubtitleFetcher};
use super::tracks::TrackResolver;
use super::{BufferState, PlaybackState, SeekResolution};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Notifications from the media element and its delivery client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaEvent {
    TimeUpdate { position: f64 },
    MetadataLoaded { duration: f64 },
    Playing,
    Paused,
    Seeking,
    Seeked,
    Ended,
    /// An already classified fault.
    Error(ErrorEvent),
    /// A fault straight from the delivery client.
    Fault { fault: RawFault },
}

/// User commands, for hosts that drive the controller with messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Attach {
        source: PlaybackSource,
        #[serde(default)]
        preferences: Option<SessionPreferences>,
    },
    Play,
    Pause,
    Skip { delta_secs: f64 },
    Seek { position: f64 },
    SetAudioTrack { index: usize },
    SetSubtitleTrack { selection: SubtitleSelection },
    AdjustSubtitleOffset { delta_secs: f64 },
    AddDownloadedSubtitle {
        url: String,
        language: String,
        #[serde(default)]
        title: Option<String>,
    },
    FetchExternalSubtitle { language: String },
    SetFullscreen { fullscreen: bool },
    SetNextItem { next: Option<PlaybackSource> },
    CancelCompletion,
    ForceHandoff,
    Retry,
    Close,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct SessionControllerBuilder {
    config: PlayerConfig,
    backend: Arc<dyn MediaBackend>,
    gateways: Gateways,
    user_id: Option<UserId>,
    resources: Option<ResourceManager>,
    events: Option<Arc<EventBus>>,
    audio_switch: Option<Arc<dyn AudioSwitchStrategy>>,
}

impl SessionControllerBuilder {
    /// Persist track choices for this user.
    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Share transcode leases with other controllers.
    pub fn resources(mut self, resources: ResourceManager) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the audio switching strategy picked from the backend.
    pub fn audio_switch(mut self, strategy: Arc<dyn AudioSwitchStrategy>) -> Self {
        self.audio_switch = Some(strategy);
        self
    }

    /// Build the controller. Must be called inside a tokio runtime when a
    /// user is set, since the preference writer is spawned here.
    pub fn build(self) -> SessionController {
        let audio_switch = self.audio_switch.unwrap_or_else(|| {
            audio_switch::for_capability(self.backend.audio_capability(), &self.config.tracks)
        });
        let resources = self
            .resources
            .unwrap_or_else(|| ResourceManager::new(self.gateways.transcode_control.clone()));
        let preferences = self.user_id.map(|user_id| {
            PreferenceSaver::new(
                self.gateways.preferences.clone(),
                user_id,
                self.config.session.preference_debounce(),
            )
        });

        let inner = Inner {
            resolver: TrackResolver::new(&self.config.tracks),
            ctx: Mutex::new(SessionContext::new(&self.config)),
            events: self.events.unwrap_or_default(),
            subtitles: SubtitleFetcher::new(),
            config: self.config,
            backend: self.backend,
            gateways: self.gateways,
            resources,
            audio_switch,
            preferences,
            user_id: self.user_id,
        };

        SessionController {
            inner: Arc::new(inner),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Cheap, cloneable handle to a playback session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn builder(
        config: PlayerConfig,
        backend: Arc<dyn MediaBackend>,
        gateways: Gateways,
    ) -> SessionControllerBuilder {
        SessionControllerBuilder {
            config,
            backend,
            gateways,
            user_id: None,
            resources: None,
            events: None,
            audio_switch: None,
        }
    }

    // -- Observation --------------------------------------------------------

    pub fn events(&self) -> Arc<EventBus> {
        self.inner.events.clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.ctx.lock().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let end = self.inner.backend.buffered_end();
        let ctx = self.inner.ctx.lock();
        ctx.snapshot(Instant::now(), buffered_percent(end, ctx.duration))
    }

    /// The handoff produced by the last completed source, if any.
    pub fn last_handoff(&self) -> Option<NextItemHandoff> {
        self.inner.ctx.lock().last_handoff.clone()
    }

    /// Attach the next item automatically whenever a handoff is published.
    pub fn follow_handoffs(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut rx = self.inner.events.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event {
                        payload: EventPayload::Handoff { handoff },
                        ..
                    }) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let controller = SessionController { inner };
                        if let Err(e) = controller
                            .attach(handoff.next_source, Some(handoff.preferences))
                            .await
                        {
                            warn!(error = %e, "Failed to attach next item");
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Handoff follower lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // -- Commands -----------------------------------------------------------

    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Attach {
                source,
                preferences,
            } => self.attach(source, preferences).await,
            Command::Play => self.play().await,
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Skip { delta_secs } => {
                self.skip(delta_secs);
                Ok(())
            }
            Command::Seek { position } => {
                self.seek(position);
                Ok(())
            }
            Command::SetAudioTrack { index } => self.set_audio_track(index).await,
            Command::SetSubtitleTrack { selection } => self.set_subtitle_track(selection).await,
            Command::AdjustSubtitleOffset { delta_secs } => {
                self.adjust_subtitle_offset(delta_secs).await.map(|_| ())
            }
            Command::AddDownloadedSubtitle {
                url,
                language,
                title,
            } => self
                .add_downloaded_subtitle(url, language, title)
                .await
                .map(|_| ()),
            Command::FetchExternalSubtitle { language } => {
                self.fetch_external_subtitle(&language).await.map(|_| ())
            }
            Command::SetFullscreen { fullscreen } => {
                self.set_fullscreen(fullscreen);
                Ok(())
            }
            Command::SetNextItem { next } => {
                self.set_next_item(next);
                Ok(())
            }
            Command::CancelCompletion => {
                self.cancel_completion();
                Ok(())
            }
            Command::ForceHandoff => {
                self.force_handoff().await;
                Ok(())
            }
            Command::Retry => self.retry().await,
            Command::Close => {
                self.close().await;
                Ok(())
            }
        }
    }

    /// Start a session for `source`.
    ///
    /// Attaching the source that is already playing is a no-op unless the
    /// session is in error. `preferences` carry track choices from the
    /// previous item and win over persisted ones.
    pub async fn attach(
        &self,
        source: PlaybackSource,
        preferences: Option<SessionPreferences>,
    ) -> Result<()> {
        self.inner.attach(source, preferences, None).await
    }

    pub async fn play(&self) -> Result<()> {
        self.inner.play().await
    }

    pub fn pause(&self) {
        {
            let mut ctx = self.inner.ctx.lock();
            ctx.is_playing = false;
            ctx.resume_playing = false;
        }
        self.inner.backend.pause();
    }

    /// Jump relative to the current position. Returns the target, or `None`
    /// when the session cannot seek yet.
    pub fn skip(&self, delta_secs: f64) -> Option<f64> {
        let target = {
            let mut ctx = self.inner.ctx.lock();
            if !ctx.state.is_playback_eligible() {
                debug!(delta = delta_secs, state = %ctx.state, "Ignoring skip before playback");
                return None;
            }
            let duration = ctx.duration.or_else(|| self.inner.backend.duration());
            let target = ctx.seek_guard.clamp_skip(ctx.position + delta_secs, duration);
            ctx.tracker.note_seek(target);
            ctx.position = target;
            target
        };
        self.inner.backend.seek(target);
        Some(target)
    }

    /// Seek to an absolute position, clamped to what has been produced.
    pub fn seek(&self, target: f64) -> Option<SeekResolution> {
        let inner = &self.inner;
        let resolution = {
            let mut ctx = inner.ctx.lock();
            if !ctx.state.is_playback_eligible() {
                debug!(target, state = %ctx.state, "Ignoring seek before playback");
                return None;
            }

            let duration = ctx.duration.or_else(|| inner.backend.duration());
            let resolution = ctx.seek_guard.resolve(target, duration);
            if let Some(message) = &resolution.advisory {
                ctx.advisory = Some(Advisory {
                    message: message.clone(),
                    expires_at: Instant::now() + inner.config.seek.advisory_duration(),
                });
                info!(
                    requested = target,
                    resolved = resolution.target,
                    max_seekable = ctx.seek_guard.max_seekable_time(),
                    "Seek clamped to produced range"
                );
                inner.publish(
                    ctx.generation,
                    EventPayload::SeekClamped {
                        requested: target,
                        resolved: resolution.target,
                        advisory: message.clone(),
                    },
                );
            }

            ctx.tracker.note_seek(resolution.target);
            ctx.position = resolution.target;
            if matches!(ctx.state, PlaybackState::Playing | PlaybackState::Ended) {
                inner.transition(&mut ctx, PlaybackState::Seeking);
            }
            resolution
        };

        inner.backend.seek(resolution.target);
        Some(resolution)
    }

    pub async fn set_audio_track(&self, index: usize) -> Result<()> {
        let (generation, language) = {
            let ctx = self.inner.ctx.lock();
            let generation = self.inner.active_generation(&ctx)?;
            if ctx.audio_index == index {
                return Ok(());
            }
            let language = if ctx.tracks.audio.is_empty() {
                None
            } else {
                let track = ctx
                    .tracks
                    .audio_track(index)
                    .ok_or_else(|| Error::not_found(format!("audio track {index}")))?;
                Some(track.language.clone())
            };
            (generation, language)
        };

        self.inner.switch_audio(generation, index, language).await?;
        self.inner.save_preferences();
        Ok(())
    }

    pub async fn set_subtitle_track(&self, selection: SubtitleSelection) -> Result<()> {
        let generation = {
            let mut ctx = self.inner.ctx.lock();
            let generation = self.inner.active_generation(&ctx)?;
            if let SubtitleSelection::Track(index) = selection {
                if !ctx.tracks.subtitles.is_empty() && ctx.tracks.subtitle_track(index).is_none() {
                    return Err(Error::not_found(format!("subtitle track {index}")));
                }
            }
            ctx.subtitle = selection;
            generation
        };

        match selection {
            SubtitleSelection::None => {
                self.inner.subtitles.cancel();
                self.inner.backend.clear_subtitle();
                self.inner.publish(
                    generation,
                    EventPayload::SubtitleLoaded {
                        subtitle: SubtitleSelection::None,
                        offset_secs: 0.0,
                    },
                );
            }
            SubtitleSelection::Track(index) => self.inner.load_subtitle(generation, index).await?,
        }

        self.inner.save_preferences();
        Ok(())
    }

    /// Shift the selected subtitle track's timing and reload it. Returns the
    /// new offset.
    pub async fn adjust_subtitle_offset(&self, delta_secs: f64) -> Result<f64> {
        let (generation, index, offset) = {
            let mut ctx = self.inner.ctx.lock();
            let generation = self.inner.active_generation(&ctx)?;
            let SubtitleSelection::Track(index) = ctx.subtitle else {
                return Err(Error::invalid_input("no subtitle track selected"));
            };
            let track = ctx
                .tracks
                .subtitle_track_mut(index)
                .ok_or_else(|| Error::not_found(format!("subtitle track {index}")))?;
            track.offset_secs += delta_secs;
            (generation, index, track.offset_secs)
        };

        debug!(index, offset, "Adjusted subtitle offset");
        self.inner.load_subtitle(generation, index).await?;
        Ok(offset)
    }

    /// Append a downloaded subtitle track and select it. Returns its index.
    pub async fn add_downloaded_subtitle(
        &self,
        url: String,
        language: String,
        title: Option<String>,
    ) -> Result<usize> {
        let (generation, index) = {
            let mut ctx = self.inner.ctx.lock();
            let generation = self.inner.active_generation(&ctx)?;
            let index = ctx.tracks.next_subtitle_index();
            ctx.tracks.subtitles.push(SubtitleTrack {
                index,
                language,
                title,
                forced: false,
                is_downloaded: true,
                source_url: Some(url),
                offset_secs: 0.0,
            });
            ctx.subtitle = SubtitleSelection::Track(index);
            (generation, index)
        };

        info!(index, "Added downloaded subtitle track");
        self.inner.load_subtitle(generation, index).await?;
        self.inner.save_preferences();
        Ok(index)
    }

    /// Look up a subtitle in `language` from the external source, add it,
    /// and select it.
    pub async fn fetch_external_subtitle(&self, language: &str) -> Result<usize> {
        let media_id = {
            let ctx = self.inner.ctx.lock();
            self.inner.active_generation(&ctx)?;
            ctx.source
                .as_ref()
                .map(|s| s.media_id)
                .ok_or_else(|| Error::invalid_input("no active session"))?
        };

        let found = self
            .inner
            .gateways
            .subtitles
            .find_external(media_id, language)
            .await?;
        self.add_downloaded_subtitle(found.url, found.language, found.title)
            .await
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.inner.ctx.lock().fullscreen = fullscreen;
        self.inner.save_preferences();
    }

    /// Set or clear the item that follows the current one.
    pub fn set_next_item(&self, next: Option<PlaybackSource>) {
        let mut ctx = self.inner.ctx.lock();
        let action = ctx.completion.arm(next.is_some());
        ctx.next_item = next;
        let generation = ctx.generation;
        self.inner.apply_countdown(&ctx, generation, action);
    }

    /// Hide the countdown and stay on this item.
    pub fn cancel_completion(&self) {
        let mut ctx = self.inner.ctx.lock();
        let action = ctx.completion.cancel();
        let generation = ctx.generation;
        self.inner.apply_countdown(&ctx, generation, action);
    }

    /// Skip the countdown and hand off now.
    pub async fn force_handoff(&self) -> Option<NextItemHandoff> {
        let (generation, action) = {
            let mut ctx = self.inner.ctx.lock();
            (ctx.generation, ctx.completion.force())
        };
        if action != CompletionAction::Handoff {
            return None;
        }
        self.inner.complete(generation, true).await
    }

    /// Leave the error state by re-attaching at the last good position.
    pub async fn retry(&self) -> Result<()> {
        let (source, preferences, position) = {
            let ctx = self.inner.ctx.lock();
            if ctx.state != PlaybackState::Error {
                return Err(Error::invalid_input("session is not in error"));
            }
            let source = ctx
                .source
                .clone()
                .ok_or_else(|| Error::invalid_input("no source to retry"))?;
            (source, ctx.preferences(), ctx.tracker.last_known_good())
        };

        info!(media_id = %source.media_id, position, "Retrying playback");
        self.inner.attach(source, Some(preferences), Some(position)).await
    }

    /// End the session and release everything it holds.
    pub async fn close(&self) {
        self.inner.teardown().await;

        let mut ctx = self.inner.ctx.lock();
        ctx.source = None;
        ctx.next_item = None;
        ctx.completion.arm(false);
        self.inner.transition(&mut ctx, PlaybackState::Idle);
    }

    // -- Element events -----------------------------------------------------

    pub fn handle_media_event(&self, event: MediaEvent) {
        let inner = &self.inner;
        match event {
            MediaEvent::TimeUpdate { position } => inner.on_time_update(position),
            MediaEvent::MetadataLoaded { duration } => {
                let restart = {
                    let mut ctx = inner.ctx.lock();
                    if ctx.source.is_none() {
                        return;
                    }
                    inner.apply_duration(&mut ctx, duration)
                };
                if restart {
                    inner.backend.seek(0.0);
                }
            }
            MediaEvent::Playing => {
                let mut ctx = inner.ctx.lock();
                if ctx.is_remuxing || ctx.source.is_none() {
                    return;
                }
                ctx.is_playing = true;
                if ctx.state == PlaybackState::Recovering && ctx.admitted {
                    inner.transition(&mut ctx, PlaybackState::Playing);
                }
            }
            MediaEvent::Paused => {
                let mut ctx = inner.ctx.lock();
                if !ctx.is_remuxing {
                    ctx.is_playing = false;
                }
            }
            MediaEvent::Seeking => {
                let mut ctx = inner.ctx.lock();
                ctx.seeking = true;
                if ctx.state == PlaybackState::Playing {
                    inner.transition(&mut ctx, PlaybackState::Seeking);
                }
            }
            MediaEvent::Seeked => {
                let position = inner.backend.current_time();
                let mut ctx = inner.ctx.lock();
                ctx.seeking = false;
                if ctx.source.is_none() {
                    return;
                }
                ctx.tracker.note_seek(position);
                ctx.position = position;
                if ctx.state == PlaybackState::Seeking {
                    inner.transition(&mut ctx, PlaybackState::Playing);
                }
            }
            MediaEvent::Ended => inner.on_ended(),
            MediaEvent::Error(error) => inner.on_fault(error),
            MediaEvent::Fault { fault } => inner.on_fault(classify(&fault)),
        }
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

struct Inner {
    config: PlayerConfig,
    backend: Arc<dyn MediaBackend>,
    gateways: Gateways,
    resources: ResourceManager,
    events: Arc<EventBus>,
    resolver: TrackResolver,
    audio_switch: Arc<dyn AudioSwitchStrategy>,
    preferences: Option<PreferenceSaver>,
    user_id: Option<UserId>,
    subtitles: SubtitleFetcher,
    ctx: Mutex<SessionContext>,
}

impl Inner {
    fn publish(&self, generation: u64, payload: EventPayload) {
        self.events.publish(generation, payload);
    }

    fn transition(&self, ctx: &mut SessionContext, to: PlaybackState) {
        if ctx.state == to {
            return;
        }
        let from = ctx.state;
        ctx.state = to;
        debug!(from = %from, to = %to, generation = ctx.generation, "Session state changed");
        self.publish(ctx.generation, EventPayload::StateChanged { from, to });
    }

    /// Generation of a session that accepts track commands.
    fn active_generation(&self, ctx: &SessionContext) -> Result<u64> {
        match ctx.state {
            PlaybackState::Idle => Err(Error::invalid_input("no active session")),
            PlaybackState::Error => Err(Error::playback(
                ctx.last_error
                    .clone()
                    .unwrap_or_else(|| "session is in error".to_string()),
            )),
            _ => Ok(ctx.generation),
        }
    }

    fn save_preferences(&self) {
        if let Some(saver) = &self.preferences {
            saver.submit(self.ctx.lock().preferences());
        }
    }

    // -- Attach / teardown --------------------------------------------------

    async fn attach(
        self: &Arc<Self>,
        source: PlaybackSource,
        explicit: Option<SessionPreferences>,
        start_override: Option<f64>,
    ) -> Result<()> {
        {
            let ctx = self.ctx.lock();
            let same = ctx.source.as_ref() == Some(&source);
            if same
                && start_override.is_none()
                && !matches!(ctx.state, PlaybackState::Error | PlaybackState::Idle)
            {
                debug!(media_id = %source.media_id, "Source already attached");
                return Ok(());
            }
        }

        self.teardown().await;

        let start_at = match start_override {
            Some(position) => position,
            None => self.load_resume_position(&source).await,
        };

        let (generation, audio_index) = {
            let mut ctx = self.ctx.lock();
            let from = ctx.state;
            ctx.begin(&self.config, source.clone(), explicit, start_at);
            if source.is_live_transcode() {
                ctx.lease = Some(self.resources.acquire(source.media_id));
            }
            self.publish(
                ctx.generation,
                EventPayload::StateChanged {
                    from,
                    to: PlaybackState::Attaching,
                },
            );
            (ctx.generation, ctx.audio_index)
        };

        info!(
            media_id = %source.media_id,
            kind = %source.kind,
            start_at,
            generation,
            "Attaching source"
        );

        let request = AttachRequest {
            source,
            start_at,
            audio_index,
        };
        if let Err(e) = self.backend.attach(request).await {
            self.enter_error(
                generation,
                ErrorEvent::fatal(ErrorCategory::Unsupported, e.to_string()),
                format!("Playback could not start: {e}"),
            );
            return Err(e);
        }

        {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return Ok(());
            }
            self.transition(&mut ctx, PlaybackState::Buffering);
        }

        tasks::spawn_discovery(self, generation);
        tasks::spawn_admission(self, generation);
        tasks::spawn_transcode_watch(self, generation);
        tasks::spawn_liveness(self, generation);
        tasks::spawn_position_saver(self, generation);
        tasks::spawn_completion(self, generation);
        Ok(())
    }

    async fn load_resume_position(&self, source: &PlaybackSource) -> f64 {
        match self.gateways.positions.load_position(source.media_id).await {
            Ok(position) => position,
            Err(e) => {
                warn!(media_id = %source.media_id, error = %e, "Failed to load resume position");
                0.0
            }
        }
    }

    /// Cancel the current session's work, save its position and release its
    /// transcode lease.
    async fn teardown(&self) {
        let (save, lease) = {
            let mut ctx = self.ctx.lock();
            let Some(source) = ctx.source.clone() else {
                return;
            };
            ctx.token.cancel();
            if let Some(token) = ctx.admission_token.take() {
                token.cancel();
            }
            let position = ctx.tracker.last_known_good();
            let save = (ctx.admitted && ctx.state != PlaybackState::Ended)
                .then_some((source.media_id, position));
            (save, ctx.lease.take())
        };

        self.subtitles.cancel();
        self.backend.detach();

        if let Some((media_id, position)) = save {
            if let Err(e) = self.gateways.positions.save_position(media_id, position).await {
                warn!(media_id = %media_id, error = %e, "Failed to save position on teardown");
            }
        }
        drop(lease);
    }

    /// Record a known duration. Returns true when the resume point turned out
    /// to be too close to the end and playback should restart from zero.
    fn apply_duration(&self, ctx: &mut SessionContext, duration: f64) -> bool {
        if !duration.is_finite() || duration <= 0.0 {
            return false;
        }
        ctx.duration = Some(duration);
        self.refresh_seek_restriction(ctx);

        if ctx.resume_checked {
            return false;
        }
        ctx.resume_checked = true;
        if duration - ctx.start_at < self.config.session.resume_end_guard_secs {
            info!(
                start_at = ctx.start_at,
                duration, "Resume point is at the end; starting over"
            );
            ctx.start_at = 0.0;
            ctx.position = 0.0;
            ctx.tracker.reset(0.0);
            return true;
        }
        false
    }

    /// Open the whole timeline to seeking once the server has produced all of
    /// it. A finished transcode only counts once the duration is known.
    fn refresh_seek_restriction(&self, ctx: &mut SessionContext) {
        let produced = ctx.buffer.is_pre_transcoded
            || (ctx.buffer.is_transcode_complete && ctx.duration.is_some());
        if produced && ctx.seek_guard.lift() {
            info!(
                generation = ctx.generation,
                pre_transcoded = ctx.buffer.is_pre_transcoded,
                "Transcode fully produced; seeking unrestricted"
            );
            self.publish(ctx.generation, EventPayload::SeekUnrestricted);
        }
    }

    // -- Discovery and tracks -----------------------------------------------

    async fn discover(self: &Arc<Self>, generation: u64) {
        let (media_id, explicit) = {
            let ctx = self.ctx.lock();
            let Some(source) = ctx.source.as_ref() else {
                return;
            };
            (source.media_id, ctx.explicit.clone())
        };

        let persisted = async {
            let user_id = self.user_id?;
            match self.gateways.preferences.load_preferences(user_id).await {
                Ok(prefs) => prefs,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to load saved preferences");
                    None
                }
            }
        };
        let (info, persisted) = tokio::join!(self.gateways.discovery.discover(media_id), persisted);

        let info = match info {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(media_id = %media_id, error = %e, "Track discovery failed; using default tracks");
                None
            }
        };
        let language_aware = info.is_some();
        let tracks = info.as_ref().map(|i| i.tracks.clone()).unwrap_or_default();

        let audio = self
            .resolver
            .resolve_audio(&tracks, explicit.as_ref(), persisted.as_ref());
        let subtitle = self.resolver.resolve_subtitle(
            &tracks,
            &audio,
            explicit.as_ref(),
            persisted.as_ref().filter(|_| language_aware),
        );

        let (needs_switch, restart) = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return;
            }
            ctx.tracks = tracks;
            ctx.language_aware = language_aware;
            let restart = match info.as_ref().and_then(|i| i.duration_secs) {
                Some(d) if ctx.duration.is_none() => self.apply_duration(&mut ctx, d),
                _ => false,
            };

            let needs_switch = audio.index != ctx.audio_index;
            if !needs_switch {
                ctx.audio_language = audio.language.clone();
            }
            ctx.subtitle = subtitle.selection;
            self.publish(
                generation,
                EventPayload::TracksResolved {
                    audio_index: audio.index,
                    subtitle: subtitle.selection,
                    language_aware,
                },
            );
            (needs_switch, restart)
        };

        info!(
            media_id = %media_id,
            audio_index = audio.index,
            audio_reason = ?audio.reason,
            subtitle = %subtitle.selection,
            subtitle_reason = ?subtitle.reason,
            "Resolved tracks"
        );

        if restart {
            self.backend.seek(0.0);
        }
        if needs_switch {
            if let Err(e) = self
                .switch_audio(generation, audio.index, audio.language.clone())
                .await
            {
                warn!(error = %e, "Could not switch to resolved audio track");
            }
        }
        if let SubtitleSelection::Track(index) = subtitle.selection {
            if let Err(e) = self.load_subtitle(generation, index).await {
                warn!(index, error = %e, "Could not load resolved subtitle track");
            }
        }
    }

    async fn switch_audio(
        self: &Arc<Self>,
        generation: u64,
        index: usize,
        language: Option<String>,
    ) -> Result<()> {
        let reattach = self.audio_switch.requires_reattach();
        let position = self.backend.current_time();
        let request = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return Err(Error::Cancelled);
            }
            if ctx.is_remuxing {
                return Err(Error::invalid_input("an audio switch is already running"));
            }
            let source = ctx
                .source
                .clone()
                .ok_or_else(|| Error::invalid_input("no active session"))?;
            ctx.is_remuxing = reattach;
            AudioSwitchRequest {
                source,
                audio_index: index,
                position: if ctx.admitted { position } else { ctx.start_at },
                was_playing: ctx.is_playing,
            }
        };

        info!(
            audio_index = index,
            strategy = self.audio_switch.name(),
            "Switching audio track"
        );
        let result = self.audio_switch.switch(self.backend.as_ref(), &request).await;

        let reload_subtitle = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return Err(Error::Cancelled);
            }
            ctx.is_remuxing = false;
            match &result {
                Ok(()) => {
                    ctx.audio_index = index;
                    ctx.audio_language = language;
                    if reattach {
                        ctx.tracker.note_seek(request.position);
                    }
                    self.publish(
                        generation,
                        EventPayload::AudioSwitched {
                            audio_index: index,
                            strategy: self.audio_switch.name().to_string(),
                        },
                    );
                    ctx.subtitle.index().filter(|_| reattach)
                }
                Err(_) => None,
            }
        };

        match result {
            Ok(()) => {
                if let Some(subtitle) = reload_subtitle {
                    if let Err(e) = self.load_subtitle(generation, subtitle).await {
                        warn!(error = %e, "Could not restore subtitle after audio switch");
                    }
                }
                Ok(())
            }
            Err(e @ Error::MetadataTimeout { .. }) => {
                self.enter_error(
                    generation,
                    ErrorEvent::fatal(ErrorCategory::Unsupported, e.to_string()),
                    "The selected audio track could not be loaded.".to_string(),
                );
                Err(e)
            }
            Err(e) => {
                warn!(audio_index = index, error = %e, "Audio switch failed");
                Err(e)
            }
        }
    }

    async fn load_subtitle(&self, generation: u64, index: usize) -> Result<()> {
        let (media_id, track, session) = {
            let ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return Err(Error::Cancelled);
            }
            let media_id = ctx
                .source
                .as_ref()
                .map(|s| s.media_id)
                .ok_or_else(|| Error::invalid_input("no active session"))?;
            let track = match ctx.tracks.subtitle_track(index) {
                Some(track) => track.clone(),
                // Nothing was discovered; trust the index.
                None if ctx.tracks.subtitles.is_empty() => SubtitleTrack::embedded(index, "und", false),
                None => return Err(Error::not_found(format!("subtitle track {index}"))),
            };
            (media_id, track, ctx.token.clone())
        };

        let fetch = subtitles::fetch(self.gateways.subtitles.as_ref(), media_id, &track);
        match self.subtitles.run(&session, fetch).await {
            Ok(payload) => {
                let still_wanted = {
                    let ctx = self.ctx.lock();
                    ctx.is_current(generation) && ctx.subtitle == SubtitleSelection::Track(index)
                };
                if !still_wanted {
                    return Ok(());
                }
                self.backend.show_subtitle(payload);
                self.publish(
                    generation,
                    EventPayload::SubtitleLoaded {
                        subtitle: SubtitleSelection::Track(index),
                        offset_secs: track.offset_secs,
                    },
                );
                debug!(index, offset = track.offset_secs, "Subtitle track loaded");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                warn!(media_id = %media_id, index, error = %e, "Failed to load subtitle track");
                Err(e)
            }
        }
    }

    // -- Playback -----------------------------------------------------------

    async fn play(&self) -> Result<()> {
        let generation = {
            let mut ctx = self.ctx.lock();
            let generation = self.active_generation(&ctx)?;
            if !ctx.admitted {
                // Honoured once the buffer gate admits.
                ctx.resume_playing = true;
                return Ok(());
            }
            generation
        };

        match self.backend.play().await {
            Ok(()) => {
                let mut ctx = self.ctx.lock();
                if ctx.is_current(generation) {
                    ctx.is_playing = true;
                    ctx.resume_playing = true;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Play was rejected");
                Err(e)
            }
        }
    }

    /// Mark the session admitted and start playback if intended.
    async fn admit(self: &Arc<Self>, generation: u64) {
        let autoplay = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) || ctx.admitted {
                return;
            }
            ctx.admitted = true;
            self.transition(&mut ctx, PlaybackState::Playing);
            self.publish(
                generation,
                EventPayload::Admitted {
                    buffered_ahead_secs: ctx.buffer.buffered_ahead_secs,
                    segments_ready: ctx.buffer.segments_ready,
                },
            );
            info!(
                generation,
                buffered_ahead = ctx.buffer.buffered_ahead_secs,
                segments_ready = ctx.buffer.segments_ready,
                "Buffer admitted playback"
            );
            ctx.resume_playing
        };

        if !autoplay {
            return;
        }

        // Muted playback is allowed where unmuted autoplay is not.
        let was_muted = self.backend.is_muted();
        self.backend.set_muted(true);
        let result = self.backend.play().await;
        {
            let mut ctx = self.ctx.lock();
            if ctx.is_current(generation) {
                ctx.is_playing = result.is_ok();
            }
        }
        if let Err(e) = result {
            warn!(error = %e, "Autoplay was rejected; waiting for the user");
        }
        tasks::spawn_unmute(self, generation, was_muted);
    }

    fn on_time_update(&self, position: f64) {
        let buffered_end = self.backend.buffered_end();
        let element_duration = self.backend.duration();

        let (generation, restore) = {
            let mut ctx = self.ctx.lock();
            if ctx.is_remuxing
                || matches!(
                    ctx.state,
                    PlaybackState::Idle | PlaybackState::Error | PlaybackState::Attaching
                )
            {
                return;
            }
            let generation = ctx.generation;
            let seeking = ctx.seeking;

            match ctx.tracker.observe(position, seeking) {
                PositionUpdate::BackwardJump { restore_to } => (generation, Some(restore_to)),
                PositionUpdate::Accepted => {
                    ctx.position = position;
                    ctx.recovery.note_progress(position);
                    if ctx.duration.is_none() {
                        if let Some(d) = element_duration.filter(|d| d.is_finite() && *d > 0.0) {
                            ctx.duration = Some(d);
                            self.refresh_seek_restriction(&mut ctx);
                        }
                    }
                    if ctx.state == PlaybackState::Recovering && ctx.admitted {
                        self.transition(&mut ctx, PlaybackState::Playing);
                    }
                    if let Some(end) = buffered_end {
                        if let Some(max_seekable_time) = ctx.seek_guard.observe_buffered_end(end) {
                            self.publish(
                                generation,
                                EventPayload::SeekWindowChanged { max_seekable_time },
                            );
                        }
                    }
                    self.publish(
                        generation,
                        EventPayload::TimeUpdate {
                            position,
                            duration: ctx.duration,
                        },
                    );
                    (generation, None)
                }
            }
        };

        if let Some(restore_to) = restore {
            self.backend.seek(restore_to);
            self.publish(
                generation,
                EventPayload::Recovery {
                    action: "restore_position".to_string(),
                    position: restore_to,
                },
            );
        }
    }

    fn on_ended(&self) {
        let mut ctx = self.ctx.lock();
        if matches!(ctx.state, PlaybackState::Idle | PlaybackState::Error) {
            return;
        }
        self.transition(&mut ctx, PlaybackState::Ended);
        ctx.is_playing = false;
        // finished by the completion task
        ctx.ended.notify_one();
    }

    // -- Completion ---------------------------------------------------------

    fn apply_countdown(&self, ctx: &SessionContext, generation: u64, action: CompletionAction) {
        let (visible, remaining) = match action {
            CompletionAction::Show(n) | CompletionAction::Update(n) => (true, n),
            CompletionAction::Hide => (false, ctx.completion.state().remaining),
            CompletionAction::None | CompletionAction::Handoff => return,
        };
        self.publish(generation, EventPayload::Countdown { visible, remaining });
    }

    /// Mark the item finished and, when `hand_off`, publish the handoff to
    /// the next item.
    async fn complete(&self, generation: u64, hand_off: bool) -> Option<NextItemHandoff> {
        let (media_id, first, handoff) = {
            let mut ctx = self.ctx.lock();
            if ctx.generation != generation {
                return None;
            }
            let media_id = ctx.source.as_ref()?.media_id;
            let first = !std::mem::replace(&mut ctx.finished, true);
            let handoff = match (&ctx.next_item, &ctx.last_handoff) {
                (Some(next), None) if hand_off => Some(NextItemHandoff {
                    next_source: next.clone(),
                    preferences: ctx.preferences(),
                }),
                _ => None,
            };
            if handoff.is_some() {
                ctx.last_handoff = handoff.clone();
            }
            (media_id, first, handoff)
        };

        if first {
            if let Err(e) = self.gateways.positions.mark_finished(media_id).await {
                warn!(media_id = %media_id, error = %e, "Failed to mark item finished");
            }
        } else {
            debug!(media_id = %media_id, "Item already marked finished");
        }

        let handoff = handoff?;
        {
            let ctx = self.ctx.lock();
            if ctx.generation != generation {
                return None;
            }
            let remaining = ctx.completion.state().remaining;
            self.publish(
                generation,
                EventPayload::Countdown {
                    visible: false,
                    remaining,
                },
            );
        }

        info!(
            from = %media_id,
            to = %handoff.next_source.media_id,
            "Handing off to next item"
        );
        self.publish(
            generation,
            EventPayload::Handoff {
                handoff: handoff.clone(),
            },
        );
        Some(handoff)
    }

    // -- Recovery -----------------------------------------------------------

    fn on_fault(self: &Arc<Self>, error: ErrorEvent) {
        let mut fault = FaultContext {
            last_known_good: 0.0,
            current_time: self.backend.current_time(),
            buffered_end: self.backend.buffered_end(),
        };

        let (generation, action, was_playing) = {
            let mut ctx = self.ctx.lock();
            if matches!(ctx.state, PlaybackState::Idle | PlaybackState::Error) {
                return;
            }
            fault.last_known_good = ctx.tracker.last_known_good();
            let action = ctx.recovery.decide(&error, &fault, Instant::now());
            let was_playing = ctx.is_playing || (!ctx.admitted && ctx.resume_playing);
            (ctx.generation, action, was_playing)
        };

        if error.fatal {
            warn!(
                category = %error.category,
                detail = %error.detail,
                action = action.name(),
                "Fatal playback fault"
            );
        }
        self.recover(generation, error, action, was_playing, fault.last_known_good);
    }

    fn recover(
        self: &Arc<Self>,
        generation: u64,
        error: ErrorEvent,
        action: RecoveryAction,
        was_playing: bool,
        last_known_good: f64,
    ) {
        let position = match &action {
            RecoveryAction::Ignore => return,
            RecoveryAction::Surface { message } => {
                self.enter_error(generation, error, message.clone());
                return;
            }
            RecoveryAction::Nudge { to } => {
                self.backend.seek(*to);
                *to
            }
            RecoveryAction::RecoverDecoder => {
                // the element's clock is not trustworthy after a reset
                self.backend.recover_decoder();
                last_known_good
            }
            RecoveryAction::RestartLoad { position } => {
                self.backend.stop_load();
                self.backend.start_load(*position);
                *position
            }
            RecoveryAction::RetryNetwork {
                attempt,
                delay,
                position,
            } => {
                info!(attempt, delay_secs = delay.as_secs(), position, "Retrying after network error");
                self.enter_recovering(generation);
                tasks::spawn_network_retry(self, generation, *delay, *position);
                *position
            }
            RecoveryAction::Rebuild { delay, position } => {
                info!(delay_secs = delay.as_secs(), position, "Rebuilding session");
                self.enter_recovering(generation);
                tasks::spawn_rebuild(self, generation, *delay, *position, was_playing);
                *position
            }
        };

        self.publish(
            generation,
            EventPayload::Recovery {
                action: action.name().to_string(),
                position,
            },
        );
    }

    fn enter_recovering(&self, generation: u64) {
        let mut ctx = self.ctx.lock();
        if ctx.is_current(generation) {
            self.transition(&mut ctx, PlaybackState::Recovering);
        }
    }

    /// Tear the element down and attach again at `position` without starting
    /// a new session.
    async fn rebuild(self: &Arc<Self>, generation: u64, position: f64, was_playing: bool) {
        let request = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return;
            }
            let Some(source) = ctx.source.clone() else {
                return;
            };
            if let Some(token) = ctx.admission_token.take() {
                token.cancel();
            }
            ctx.seek_guard.reset();
            // what the server has produced survives the rebuild
            ctx.buffer = BufferState {
                buffered_ahead_secs: 0.0,
                ..ctx.buffer
            };
            ctx.admitted = false;
            ctx.is_playing = false;
            ctx.resume_playing = was_playing;
            ctx.tracker.reset(position);
            ctx.position = position;
            ctx.start_at = position;
            AttachRequest {
                source,
                start_at: position,
                audio_index: ctx.audio_index,
            }
        };

        self.backend.detach();
        if let Err(e) = self.backend.attach(request).await {
            self.enter_error(
                generation,
                ErrorEvent::fatal(ErrorCategory::Unsupported, e.to_string()),
                format!("Playback could not be restarted: {e}"),
            );
            return;
        }

        let subtitle = {
            let mut ctx = self.ctx.lock();
            if !ctx.is_current(generation) {
                return;
            }
            self.transition(&mut ctx, PlaybackState::Buffering);
            ctx.subtitle.index()
        };
        tasks::spawn_admission(self, generation);

        if let Some(index) = subtitle {
            if let Err(e) = self.load_subtitle(generation, index).await {
                warn!(error = %e, "Could not restore subtitle after rebuild");
            }
        }
    }

    /// Stop the session and show `message`. Only `retry` or `close` leave.
    fn enter_error(&self, generation: u64, error: ErrorEvent, message: String) {
        {
            let mut ctx = self.ctx.lock();
            if ctx.generation != generation || ctx.state == PlaybackState::Error {
                return;
            }
            self.transition(&mut ctx, PlaybackState::Error);
            ctx.last_error = Some(message.clone());
            ctx.is_playing = false;
            ctx.token.cancel();
        }
        self.subtitles.cancel();

        error!(
            generation,
            category = %error.category,
            detail = %error.detail,
            "Playback error surfaced: {}",
            message
        );
        self.publish(generation, EventPayload::ErrorSurfaced { error, message });
    }
}
