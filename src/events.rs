//! Session event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late-joining subscribers (a UI that
//! mounts after attach, a diagnostics panel) can catch up.
//!
//! The controller is the only publisher. Components that need to follow the
//! playhead, such as the completion scheduler, subscribe instead of holding a
//! reference back into the controller.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sceneforged_common::{ErrorEvent, NextItemHandoff, SubtitleSelection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::playback::PlaybackState;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Lifecycle -----------------------------------------------------------
    StateChanged {
        from: PlaybackState,
        to: PlaybackState,
    },
    Admitted {
        buffered_ahead_secs: f64,
        segments_ready: u32,
    },
    TimeUpdate {
        position: f64,
        duration: Option<f64>,
    },
    Ended,

    // -- Seeking -------------------------------------------------------------
    SeekWindowChanged {
        max_seekable_time: f64,
    },
    /// The transcode is fully produced; the window no longer applies.
    SeekUnrestricted,
    SeekClamped {
        requested: f64,
        resolved: f64,
        advisory: String,
    },

    // -- Tracks --------------------------------------------------------------
    TracksResolved {
        audio_index: usize,
        subtitle: SubtitleSelection,
        language_aware: bool,
    },
    AudioSwitched {
        audio_index: usize,
        strategy: String,
    },
    SubtitleLoaded {
        subtitle: SubtitleSelection,
        offset_secs: f64,
    },

    // -- Recovery ------------------------------------------------------------
    Recovery {
        action: String,
        position: f64,
    },
    ErrorSurfaced {
        error: ErrorEvent,
        message: String,
    },

    // -- Completion ----------------------------------------------------------
    Countdown {
        visible: bool,
        remaining: u32,
    },
    Handoff {
        handoff: NextItemHandoff,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event tagged with the session generation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Session generation; bumps on every attach.
    pub generation: u64,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(generation: u64, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            generation,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn publish(&self, generation: u64, payload: EventPayload) {
        let event = Event::new(generation, payload);

        // Time updates arrive several times a second; keep them out of the
        // history so it stays useful.
        if !matches!(event.payload, EventPayload::TimeUpdate { .. }) {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(3, EventPayload::Ended);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation, 3);
        assert!(matches!(event.payload, EventPayload::Ended));
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        for _ in 0..150 {
            bus.publish(1, EventPayload::Ended);
        }
        assert_eq!(bus.recent_events(200).len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn time_updates_skip_history() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(
            1,
            EventPayload::TimeUpdate {
                position: 4.0,
                duration: Some(100.0),
            },
        );

        assert!(bus.recent_events(10).is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn recent_events_newest_first() {
        let bus = EventBus::new(16);
        bus.publish(1, EventPayload::Ended);
        bus.publish(
            1,
            EventPayload::SeekWindowChanged {
                max_seekable_time: 40.0,
            },
        );

        let recent = bus.recent_events(2);
        assert!(matches!(
            recent[0].payload,
            EventPayload::SeekWindowChanged { .. }
        ));
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(
            1,
            EventPayload::Recovery {
                action: "rebuild".into(),
                position: 12.0,
            },
        );
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::new(
            2,
            EventPayload::Countdown {
                visible: true,
                remaining: 30,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "countdown");
        assert_eq!(json["payload"]["remaining"], 30);
    }
}
