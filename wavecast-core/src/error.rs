use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by a playback driver.
///
/// Autoplay rejection is deliberately a distinct variant from decode and
/// network failure: the former is answered with a "tap to join" affordance,
/// the latter with a status message and, on the audio channel, an automatic
/// skip to the next track.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("playback requires a user gesture before it may start")]
    AutoplayBlocked,

    #[error("cannot decode source: {source_url}")]
    Decode { source_url: String },

    #[error("network failure while buffering: {source_url}")]
    Network { source_url: String },

    #[error("no source loaded")]
    NoSource,
}

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("config file not found at {path}. A template has been created - please edit it with your station settings and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Shared state store errors
    #[error("state store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("state store rejected write: {reason}")]
    StoreRejected { reason: String },

    // Playback errors
    #[error("playback failed: {0}")]
    Playback(#[from] PlaybackError),

    #[error("unknown track: {track_id}")]
    UnknownTrack { track_id: String },

    // Narration errors
    #[error("news wire {wire} unavailable: {reason}")]
    ScriptUnavailable { wire: String, reason: String },

    #[error("narration sequence aborted: {reason}")]
    NarrationAborted { reason: String },

    #[error("speech output unavailable: {reason}")]
    SpeechUnavailable { reason: String },

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
