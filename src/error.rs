//! Error types for the synthesis core.

use thiserror::Error;

/// Result type for fallible synth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can prevent the synth from starting.
///
/// Runtime conditions such as voice exhaustion or out-of-range MIDI values
/// are handled in place and never show up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed PCM wave entry {index}: {reason}")]
    MalformedPcm { index: usize, reason: String },

    #[error("ROM error: {0}")]
    Rom(String),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}
