//! Sceneforged-Common: Shared types, IDs, and errors for the playback client.
//!
//! This crate provides common functionality used across the player:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for media items and users
//! - **Playback Types**: Sources, track sets, preferences, and transcode status
//! - **Language Utilities**: ISO-639 language family matching for track selection
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use sceneforged_common::{MediaId, PlaybackSource, Error, Result};
//! use sceneforged_common::lang::same_family;
//!
//! // Create typed IDs
//! let media_id = MediaId::new();
//!
//! // Describe what to play
//! let source = PlaybackSource::progressive(media_id, "https://example.com/movie.mp4");
//! assert!(source.is_unrestricted());
//!
//! // Match language codes across ISO-639 variants
//! assert!(same_family("fr", "fre"));
//!
//! // Use common error types
//! fn example() -> Result<()> {
//!     Err(Error::not_found("media"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod lang;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
