//! Debounced preference persistence.
//!
//! Track changes tend to come in bursts (the user cycles through subtitle
//! tracks looking for the right one). [`PreferenceSaver`] accepts every change
//! immediately and writes only the latest one once the burst has settled.

use std::sync::Arc;
use std::time::Duration;

use sceneforged_common::{SessionPreferences, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::PreferenceStore;

/// Handle to a background preference writer.
///
/// The background task runs until every handle is dropped; a change that is
/// still waiting out its debounce at that point is written before the task
/// exits.
pub struct PreferenceSaver {
    sender: mpsc::UnboundedSender<SessionPreferences>,
}

impl PreferenceSaver {
    /// Create a saver for `user_id` and spawn its background task.
    pub fn new(store: Arc<dyn PreferenceStore>, user_id: UserId, debounce: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(process_updates(receiver, store, user_id, debounce));

        Self { sender }
    }

    /// Queue a preference change.
    pub fn submit(&self, prefs: SessionPreferences) {
        if self.sender.send(prefs).is_err() {
            warn!("Preference writer has stopped; dropping update");
        }
    }
}

/// Background loop: wait for a change, absorb follow-ups until `debounce`
/// passes quietly, then write the newest value.
async fn process_updates(
    mut receiver: mpsc::UnboundedReceiver<SessionPreferences>,
    store: Arc<dyn PreferenceStore>,
    user_id: UserId,
    debounce: Duration,
) {
    debug!(user_id = %user_id, "Preference writer started");

    while let Some(mut latest) = receiver.recv().await {
        let mut closed = false;
        loop {
            match tokio::time::timeout(debounce, receiver.recv()).await {
                Ok(Some(newer)) => latest = newer,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        match store.save_preferences(user_id, &latest).await {
            Ok(()) => info!(
                user_id = %user_id,
                audio = ?latest.audio_track_index,
                subtitle = ?latest.subtitle_track_index,
                "Saved playback preferences"
            ),
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to save playback preferences"),
        }

        if closed {
            break;
        }
    }

    debug!(user_id = %user_id, "Preference writer stopped (channel closed)");
}
