//! Error types for tsforged-media.

use thiserror::Error;
use tsforged_common::TrackType;

/// Result type for tsforged-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tsforged-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Track metadata lacks the decoder configuration needed for its sample entry.
    #[error("Missing {track} decoder configuration: {reason}")]
    MissingConfig { track: TrackType, reason: String },

    /// Track metadata cannot be expressed as an fMP4 track.
    #[error("Invalid {track} track: {reason}")]
    InvalidTrack { track: TrackType, reason: String },
}

impl Error {
    /// Create a missing configuration error.
    pub fn missing_config(track: TrackType, reason: impl Into<String>) -> Self {
        Self::MissingConfig {
            track,
            reason: reason.into(),
        }
    }

    /// Create an invalid track error.
    pub fn invalid_track(track: TrackType, reason: impl Into<String>) -> Self {
        Self::InvalidTrack {
            track,
            reason: reason.into(),
        }
    }
}
