//! Sceneforged Player - adaptive playback session controller
//!
//! Drives one playback session for a sceneforged streaming client: admission
//! buffering, seek-window enforcement during live transcodes, track
//! resolution, fault recovery and the next-item countdown.
//!
//! The platform media element is abstracted behind [`media::MediaBackend`];
//! server endpoints behind the traits in [`gateway`].

pub mod config;
pub mod context;
pub mod events;
pub mod gateway;
pub mod media;
pub mod playback;
pub mod resources;

pub use context::SessionSnapshot;
pub use events::{Event, EventBus, EventPayload};
pub use playback::{Command, MediaEvent, PlaybackState, SessionController};
