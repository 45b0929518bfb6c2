//! Speed/pitch to playback parameter mapping
//!
//! Time compression is done by resampling the source at `playback_rate`,
//! which also transposes it by `log2(speed)` octaves. The pitch-shift stage
//! then multiplies frequencies by `pitch_factor` to cancel that shift and
//! apply the requested transposition, so the net result is a duration of
//! `1 / speed` and a pitch offset of exactly `pitch` semitones.
//!
//! Both the live scheduler and the offline renderer go through [`map`];
//! nothing else computes these values.

use serde::{Deserialize, Serialize};

/// Control values for one source → pitch-shift chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StretchParams {
    /// Resampling rate of the source (1.0 = original speed)
    pub playback_rate: f64,
    /// Frequency multiplier applied by the pitch-shift stage
    pub pitch_factor: f64,
}

impl Default for StretchParams {
    fn default() -> Self {
        Self { playback_rate: 1.0, pitch_factor: 1.0 }
    }
}

impl StretchParams {
    /// Output duration of `buffer_secs` of source material
    pub fn output_duration(&self, buffer_secs: f64) -> f64 {
        buffer_secs / self.playback_rate
    }
}

/// Semitones to frequency ratio
pub fn semitones_to_ratio(semitones: f64) -> f64 {
    2.0_f64.powf(semitones / 12.0)
}

/// Map a speed multiplier (> 0) and a pitch offset in semitones to playback parameters.
pub fn map(speed: f64, pitch: f64) -> StretchParams {
    StretchParams {
        playback_rate: speed,
        pitch_factor: semitones_to_ratio(pitch) / speed,
    }
}
