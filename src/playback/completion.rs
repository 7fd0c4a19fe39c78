//! End-of-content countdown and next-item handoff.
//!
//! The scheduler is a plain state machine. The controller feeds it playhead
//! reports and 1 Hz ticks and acts on the returned [`CompletionAction`].

use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;

/// What the presentation layer shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownState {
    pub visible: bool,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    None,
    /// Countdown became visible with this many seconds.
    Show(u32),
    /// Visible countdown ticked.
    Update(u32),
    Hide,
    /// Hand off to the next item now.
    Handoff,
}

#[derive(Debug, Clone)]
pub struct CompletionScheduler {
    config: CompletionConfig,
    armed: bool,
    visible: bool,
    remaining: u32,
    cancelled: bool,
    handed_off: bool,
}

impl CompletionScheduler {
    pub fn new(config: &CompletionConfig) -> Self {
        Self {
            config: config.clone(),
            armed: false,
            visible: false,
            remaining: config.countdown_start,
            cancelled: false,
            handed_off: false,
        }
    }

    /// Enable or disable the countdown depending on whether a next item exists.
    pub fn arm(&mut self, has_next: bool) -> CompletionAction {
        self.armed = has_next;
        if !has_next && self.visible {
            self.hide();
            return CompletionAction::Hide;
        }
        CompletionAction::None
    }

    /// Start over for a new source. Arming is kept.
    pub fn reset(&mut self) {
        self.visible = false;
        self.remaining = self.config.countdown_start;
        self.cancelled = false;
        self.handed_off = false;
    }

    pub fn state(&self) -> CountdownState {
        CountdownState {
            visible: self.visible,
            remaining: if self.visible {
                self.remaining
            } else {
                self.config.countdown_start
            },
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn active(&self) -> bool {
        self.armed && !self.cancelled && !self.handed_off
    }

    fn hide(&mut self) {
        self.visible = false;
        self.remaining = self.config.countdown_start;
    }

    pub fn on_time_update(&mut self, position: f64, duration: Option<f64>) -> CompletionAction {
        if !self.active() {
            return CompletionAction::None;
        }
        let Some(duration) = duration.filter(|d| d.is_finite()) else {
            return CompletionAction::None;
        };
        if duration < self.config.min_duration_secs {
            return CompletionAction::None;
        }

        let remaining = (duration - position).max(0.0);
        if remaining <= self.config.threshold_secs {
            if self.visible {
                return CompletionAction::None;
            }
            self.visible = true;
            self.remaining = (remaining.ceil() as u32).max(1);
            CompletionAction::Show(self.remaining)
        } else if self.visible {
            // seeked back out of the countdown zone
            self.hide();
            CompletionAction::Hide
        } else {
            CompletionAction::None
        }
    }

    /// One second passed.
    pub fn tick(&mut self) -> CompletionAction {
        if !self.visible || !self.active() {
            return CompletionAction::None;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.visible = false;
            self.handed_off = true;
            CompletionAction::Handoff
        } else {
            CompletionAction::Update(self.remaining)
        }
    }

    /// Suppress the handoff for the rest of this source.
    pub fn cancel(&mut self) -> CompletionAction {
        self.cancelled = true;
        if self.visible {
            self.hide();
            CompletionAction::Hide
        } else {
            CompletionAction::None
        }
    }

    /// Hand off right away.
    pub fn force(&mut self) -> CompletionAction {
        if self.handed_off || !self.armed {
            return CompletionAction::None;
        }
        self.visible = false;
        self.handed_off = true;
        CompletionAction::Handoff
    }

    /// The source played to the end.
    pub fn on_ended(&mut self) -> CompletionAction {
        if !self.active() {
            return CompletionAction::None;
        }
        self.visible = false;
        self.handed_off = true;
        CompletionAction::Handoff
    }
}
