//! # Error Types
//!
//! Error taxonomy for the playback core.
//!
//! Per-track failures ([`PlayerError::Resolution`], [`PlayerError::AudioSource`],
//! [`PlayerError::Encode`]) are recoverable: the playback loop logs them and moves
//! on to the next queued track. [`PlayerError::Transport`] is session-fatal and
//! sends the player back to idle once resources are released. The queue-removal
//! errors are surfaced to the caller with no state change.

use thiserror::Error;

/// Errors raised by the playback core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The metadata resolver or the fetch stage could not produce the track.
    #[error("could not resolve track: {0}")]
    Resolution(String),

    /// The audio pipeline failed to start or produced no data.
    #[error("audio source failed: {0}")]
    AudioSource(String),

    /// A PCM frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// The voice transport timed out or went away.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A 1-indexed queue position outside `1..=size`.
    #[error("invalid position {position}, expected a position between 1 and {size}")]
    InvalidPosition { position: usize, size: usize },

    /// No queued track matched the query.
    #[error("no song found matching '{0}'")]
    NotFound(String),
}

/// Errors raised by a voice [`Transport`](crate::audio::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("voice connection was lost")]
    Disconnected,

    #[error("could not join voice channel: {0}")]
    Join(String),
}

impl TransportError {
    /// Whether this error means the connection itself is gone, as opposed to a
    /// transient stall.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Disconnected)
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
