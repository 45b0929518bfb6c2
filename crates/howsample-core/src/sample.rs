//! Decoded audio and the logical samples built on top of it

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HowsampleError, Result};
use crate::stretch::{self, StretchParams};

/// Unique identifier for samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(pub u64);

/// Where a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Uploaded by the user to build a track from
    #[default]
    User,
    /// Music that was sampled by the target
    Sampled,
    /// Music which used sampling
    Target,
    /// Produced from a matched-segment result
    Derived,
}

/// Decoded PCM audio, one `Vec` per channel
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl DecodedAudio {
    /// Build from per-channel sample arrays. Channels are truncated to the shortest one.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(HowsampleError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(HowsampleError::InvalidSampleRate(sample_rate));
        }
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(frames);
        }
        Ok(Self { channels, sample_rate })
    }

    /// Build from interleaved samples
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Result<Self> {
        if channel_count == 0 {
            return Err(HowsampleError::NoChannels);
        }
        let channels = (0..channel_count)
            .map(|c| samples.iter().skip(c).step_by(channel_count).copied().collect())
            .collect();
        Self::new(channels, sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }
}

/// New speed/pitch/trim values for a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleEdit {
    pub speed: f64,
    pub pitch: f64,
    pub start_point: f64,
    /// `None` means "until the end of the audio"
    pub end_point: Option<f64>,
}

impl Default for SampleEdit {
    fn default() -> Self {
        Self { speed: 1.0, pitch: 0.0, start_point: 0.0, end_point: None }
    }
}

/// A logical sample: decoded audio plus its own speed, pitch and trim window
#[derive(Debug, Clone)]
pub struct SampleData {
    pub id: SampleId,
    pub name: String,
    pub kind: SampleKind,
    audio: Arc<DecodedAudio>,
    pitch: f64,
    speed: f64,
    start_point: f64,
    end_point: f64,
    edited: bool,
}

impl SampleData {
    /// Wrap decoded audio with default parameters (whole file, speed 1, pitch 0)
    pub fn new(id: SampleId, name: impl Into<String>, audio: Arc<DecodedAudio>, kind: SampleKind) -> Result<Self> {
        let duration = audio.duration();
        if duration <= 0.0 {
            return Err(HowsampleError::InvalidTrim { start: 0.0, end: duration, duration });
        }
        Ok(Self {
            id,
            name: name.into(),
            kind,
            audio,
            pitch: 0.0,
            speed: 1.0,
            start_point: 0.0,
            end_point: duration,
            edited: false,
        })
    }

    pub fn audio(&self) -> &Arc<DecodedAudio> {
        &self.audio
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn start_point(&self) -> f64 {
        self.start_point
    }

    pub fn end_point(&self) -> f64 {
        self.end_point
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    /// Length of the trim window in source seconds
    pub fn window_duration(&self) -> f64 {
        self.end_point - self.start_point
    }

    /// Playback parameters for this sample
    pub fn params(&self) -> StretchParams {
        stretch::map(self.speed, self.pitch)
    }

    /// How long the trimmed window sounds once speed is applied
    pub fn output_duration(&self) -> f64 {
        self.params().output_duration(self.window_duration())
    }

    /// Overwrite speed, pitch and trim, marking the sample as edited
    pub fn apply_edit(&mut self, edit: SampleEdit) -> Result<()> {
        let end = edit.end_point.unwrap_or(self.audio.duration());
        validate(edit.speed, edit.pitch, edit.start_point, end, self.audio.duration())?;
        self.speed = edit.speed;
        self.pitch = edit.pitch;
        self.start_point = edit.start_point;
        self.end_point = end;
        self.edited = true;
        Ok(())
    }

    /// Copy of this sample under a new id with the edit applied
    pub fn derive(&self, id: SampleId, edit: SampleEdit) -> Result<Self> {
        let mut derived = self.clone();
        derived.id = id;
        derived.apply_edit(edit)?;
        Ok(derived)
    }
}

fn validate(speed: f64, pitch: f64, start: f64, end: f64, duration: f64) -> Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(HowsampleError::InvalidSpeed(speed));
    }
    if !pitch.is_finite() {
        return Err(HowsampleError::InvalidPitch(pitch));
    }
    let ordered = start.is_finite() && end.is_finite() && 0.0 <= start && start < end && end <= duration;
    if !ordered {
        return Err(HowsampleError::InvalidTrim { start, end, duration });
    }
    Ok(())
}
