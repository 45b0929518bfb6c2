//! Error types for howsample

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HowsampleError {
    #[error("Sample not found: {0}")]
    SampleNotFound(u64),
    #[error("Track not found: {0}")]
    TrackNotFound(u64),
    #[error("Invalid trim window {start}..{end} for a {duration}s sample")]
    InvalidTrim { start: f64, end: f64, duration: f64 },
    #[error("Speed must be a positive finite multiplier, got {0}")]
    InvalidSpeed(f64),
    #[error("Pitch must be finite, got {0}")]
    InvalidPitch(f64),
    #[error("Start time must be a non-negative finite number of seconds, got {0}")]
    InvalidStartTime(f64),
    #[error("Decoded audio has no channels")]
    NoChannels,
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("Match result parse error: {0}")]
    MatchParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HowsampleError>;
