//! Background tasks of a session.
//!
//! Every task holds a `Weak` reference to the controller and a token derived
//! from the session's, so dropping the controller or attaching a new source
//! stops them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::EventPayload;
use crate::playback::buffer_gate::{buffered_ahead, BufferGate};
use crate::playback::completion::CompletionAction;

use super::Inner;

/// The session token, if `generation` is still the live session.
fn session_token(inner: &Inner, generation: u64) -> Option<CancellationToken> {
    let ctx = inner.ctx.lock();
    ctx.is_current(generation).then(|| ctx.token.clone())
}

fn every(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

pub(super) fn spawn_discovery(inner: &Arc<Inner>, generation: u64) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let inner = inner.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => debug!(generation, "Discovery cancelled"),
            _ = inner.discover(generation) => {}
        }
    });
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Poll the buffer until the gate admits playback.
pub(super) fn spawn_admission(inner: &Arc<Inner>, generation: u64) {
    let token = {
        let mut ctx = inner.ctx.lock();
        if !ctx.is_current(generation) {
            return;
        }
        let token = ctx.token.child_token();
        if let Some(previous) = ctx.admission_token.replace(token.clone()) {
            previous.cancel();
        }
        token
    };
    let weak = Arc::downgrade(inner);
    let period = inner.config.buffer.poll_interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else { break };
            if poll_admission(&inner, generation).await {
                break;
            }
        }
    });
}

/// One admission poll. Returns true when polling should stop.
async fn poll_admission(inner: &Arc<Inner>, generation: u64) -> bool {
    let ahead = buffered_ahead(inner.backend.current_time(), inner.backend.buffered_end());
    let buffered_end = inner.backend.buffered_end();

    let (gate, state, media_id, audio_index) = {
        let ctx = inner.ctx.lock();
        if !ctx.is_current(generation) || ctx.admitted {
            return true;
        }
        let Some(source) = ctx.source.as_ref() else {
            return true;
        };
        (
            BufferGate::new(&inner.config.buffer, source),
            ctx.buffer,
            source.media_id,
            ctx.audio_index,
        )
    };

    let status = if gate.needs_transcode_status(&state) {
        match inner
            .gateways
            .transcode
            .transcode_status(media_id, audio_index)
            .await
        {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(media_id = %media_id, error = %e, "Transcode status unavailable");
                None
            }
        }
    } else {
        None
    };

    {
        let mut ctx = inner.ctx.lock();
        if !ctx.is_current(generation) {
            return true;
        }
        ctx.buffer.advance(ahead, status.as_ref());
        inner.refresh_seek_restriction(&mut ctx);
        if let Some(end) = buffered_end {
            if let Some(max_seekable_time) = ctx.seek_guard.observe_buffered_end(end) {
                inner.publish(generation, EventPayload::SeekWindowChanged { max_seekable_time });
            }
        }
        if !gate.admits(&ctx.buffer) {
            return false;
        }
    }

    inner.admit(generation).await;
    true
}

/// Keep asking a live transcode for its status after admission, so the seek
/// window can be dropped once the whole timeline has been produced.
pub(super) fn spawn_transcode_watch(inner: &Arc<Inner>, generation: u64) {
    let live = {
        let ctx = inner.ctx.lock();
        ctx.source.as_ref().is_some_and(|s| s.is_live_transcode())
    };
    if !live {
        return;
    }
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak = Arc::downgrade(inner);
    let mut ticker = every(inner.config.buffer.transcode_watch_interval());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else { break };
            if poll_transcode(&inner, generation).await {
                debug!(generation, "Transcode watch finished");
                break;
            }
        }
    });
}

/// One post-admission status poll. Returns true when there is nothing left
/// to learn.
async fn poll_transcode(inner: &Inner, generation: u64) -> bool {
    let (media_id, audio_index) = {
        let ctx = inner.ctx.lock();
        if !ctx.is_current(generation) || ctx.seek_guard.is_unrestricted() {
            return true;
        }
        // the admission poll reads the status until then
        if !ctx.admitted {
            return false;
        }
        let Some(source) = ctx.source.as_ref() else {
            return true;
        };
        (source.media_id, ctx.audio_index)
    };

    let status = match inner
        .gateways
        .transcode
        .transcode_status(media_id, audio_index)
        .await
    {
        Ok(status) => status,
        Err(e) => {
            debug!(media_id = %media_id, error = %e, "Transcode status unavailable");
            return false;
        }
    };

    let mut ctx = inner.ctx.lock();
    if !ctx.is_current(generation) {
        return true;
    }
    let ahead = ctx.buffer.buffered_ahead_secs;
    ctx.buffer.advance(ahead, Some(&status));
    inner.refresh_seek_restriction(&mut ctx);
    // a complete transcode with no duration yet is lifted when it arrives
    ctx.seek_guard.is_unrestricted() || ctx.buffer.is_transcode_complete
}

/// Restore the mute state once autoplay has settled.
pub(super) fn spawn_unmute(inner: &Arc<Inner>, generation: u64, was_muted: bool) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak = Arc::downgrade(inner);
    let settle = inner.config.buffer.unmute_settle();

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(settle) => {
                if let Some(inner) = weak.upgrade() {
                    inner.backend.set_muted(was_muted);
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Liveness and position saving
// ---------------------------------------------------------------------------

/// Clear the play intent when the element stopped without telling us.
pub(super) fn spawn_liveness(inner: &Arc<Inner>, generation: u64) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak = Arc::downgrade(inner);
    let mut ticker = every(inner.config.session.liveness_interval());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else { break };
            reconcile_play_state(&inner, generation);
        }
    });
}

fn reconcile_play_state(inner: &Inner, generation: u64) {
    let paused = inner.backend.is_paused();
    let ended = inner.backend.is_ended();

    let mut ctx = inner.ctx.lock();
    if !ctx.is_current(generation) || !ctx.is_playing || ctx.is_remuxing {
        return;
    }
    if paused || ended {
        debug!(paused, ended, "Element stopped without an event; clearing play intent");
        ctx.is_playing = false;
    }
}

pub(super) fn spawn_position_saver(inner: &Arc<Inner>, generation: u64) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak = Arc::downgrade(inner);
    let mut ticker = every(inner.config.session.position_save_interval());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else { break };

            let save = {
                let ctx = inner.ctx.lock();
                if !ctx.is_current(generation) {
                    break;
                }
                match (&ctx.source, ctx.admitted && ctx.is_playing) {
                    (Some(source), true) => Some((source.media_id, ctx.tracker.last_known_good())),
                    _ => None,
                }
            };

            if let Some((media_id, position)) = save {
                if let Err(e) = inner.gateways.positions.save_position(media_id, position).await {
                    warn!(media_id = %media_id, error = %e, "Failed to save position");
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Run the 1 Hz countdown from playhead reports on the bus.
///
/// The element's end is finished here too, so `Ended` and an expiring
/// countdown never race each other. Only `force_handoff` completes elsewhere.
pub(super) fn spawn_completion(inner: &Arc<Inner>, generation: u64) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak = Arc::downgrade(inner);
    let ended = inner.ctx.lock().ended.clone();
    let mut rx = inner.events.subscribe();
    let mut ticker = every(Duration::from_secs(1));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => {
                    let event = match msg {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Completion listener lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if event.generation != generation {
                        continue;
                    }
                    let EventPayload::TimeUpdate { position, duration } = event.payload else {
                        continue;
                    };
                    let Some(inner) = weak.upgrade() else { break };

                    let action = {
                        let mut ctx = inner.ctx.lock();
                        if !ctx.is_current(generation) {
                            break;
                        }
                        let action = ctx.completion.on_time_update(position, duration);
                        inner.apply_countdown(&ctx, generation, action);
                        action
                    };
                    if matches!(action, CompletionAction::Show(_)) {
                        // count whole seconds from the moment it appeared
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    let action = {
                        let mut ctx = inner.ctx.lock();
                        if !ctx.is_current(generation) {
                            break;
                        }
                        let action = ctx.completion.tick();
                        inner.apply_countdown(&ctx, generation, action);
                        action
                    };
                    if action == CompletionAction::Handoff {
                        inner.complete(generation, true).await;
                    }
                }
                _ = ended.notified() => {
                    let Some(inner) = weak.upgrade() else { break };
                    let action = {
                        let mut ctx = inner.ctx.lock();
                        if !ctx.is_current(generation) {
                            break;
                        }
                        ctx.completion.on_ended()
                    };
                    inner
                        .complete(generation, action == CompletionAction::Handoff)
                        .await;
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Recovery timers
// ---------------------------------------------------------------------------

/// Wait out the backoff, then restart loading at the captured position.
pub(super) fn spawn_network_retry(inner: &Arc<Inner>, generation: u64, delay: Duration, position: f64) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak = Arc::downgrade(inner);

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let Some(inner) = weak.upgrade() else { return };
                if session_token(&inner, generation).is_some() {
                    inner.backend.start_load(position);
                }
            }
        }
    });
}

pub(super) fn spawn_rebuild(
    inner: &Arc<Inner>,
    generation: u64,
    delay: Duration,
    position: f64,
    was_playing: bool,
) {
    let Some(token) = session_token(inner, generation) else {
        return;
    };
    let weak: Weak<Inner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                if let Some(inner) = weak.upgrade() {
                    inner.rebuild(generation, position, was_playing).await;
                }
            }
        }
    });
}
