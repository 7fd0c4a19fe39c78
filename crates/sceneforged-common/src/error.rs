//! Common error types used throughout the playback client.
//!
//! This module provides a unified error type that covers the failure cases of
//! a playback session: missing media, bad input, gateway failures, subtitle
//! payload errors, and media metadata that never arrives.

/// Common error type for the playback client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested media or track was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An external endpoint failed or returned something unusable.
    #[error("Gateway error [{endpoint}]: {message}")]
    Gateway {
        /// The endpoint that failed (e.g. "discovery", "position").
        endpoint: String,
        /// Human-readable error description.
        message: String,
    },

    /// The subtitle endpoint answered with an error-shaped payload.
    #[error("Subtitle error: {0}")]
    Subtitle(String),

    /// Media metadata (a finite duration) did not arrive in time.
    #[error("Metadata did not arrive within {waited_ms}ms")]
    MetadataTimeout {
        /// How long we waited before giving up.
        waited_ms: u64,
    },

    /// The media backend rejected an operation.
    #[error("Playback error: {0}")]
    Playback(String),

    /// The operation was superseded by a newer session or request.
    #[error("Cancelled")]
    Cancelled,

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Gateway error.
    pub fn gateway<E: Into<String>, M: Into<String>>(endpoint: E, message: M) -> Self {
        Self::Gateway {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a new Playback error.
    pub fn playback<S: Into<String>>(msg: S) -> Self {
        Self::Playback(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error only means the work was superseded.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("media 42");
        assert_eq!(err.to_string(), "Not found: media 42");

        let err = Error::invalid_input("audio index 7 out of range");
        assert_eq!(err.to_string(), "Invalid input: audio index 7 out of range");

        let err = Error::gateway("discovery", "HTTP 503");
        assert_eq!(err.to_string(), "Gateway error [discovery]: HTTP 503");

        let err = Error::Subtitle("track not extractable".into());
        assert_eq!(err.to_string(), "Subtitle error: track not extractable");

        let err = Error::MetadataTimeout { waited_ms: 5000 };
        assert_eq!(err.to_string(), "Metadata did not arrive within 5000ms");

        let err = Error::internal("unexpected state");
        assert_eq!(err.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::playback("autoplay rejected").is_cancelled());
    }

    #[test]
    fn test_result_type() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(test_fn().unwrap(), 42);

        fn error_fn() -> Result<i32> {
            Err(Error::Cancelled)
        }
        assert!(error_fn().is_err());
    }
}
