//! Decode WAV bytes into per-channel float audio

use std::io::Cursor;
use std::path::Path;

use howsample_core::{DecodedAudio, HowsampleError};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use thiserror::Error;
use tracing::debug;

const SINC_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to read WAV: {0}")]
    Read(#[from] hound::Error),
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV contains no samples")]
    Empty,
    #[error("Resample error: {0}")]
    Resample(String),
    #[error(transparent)]
    Audio(#[from] HowsampleError),
}

/// Decode a WAV byte sequence, optionally resampling to `target_rate`
pub fn decode_wav(bytes: &[u8], target_rate: Option<u32>) -> Result<DecodedAudio, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    if interleaved.is_empty() || channels == 0 {
        return Err(DecodeError::Empty);
    }

    let audio = DecodedAudio::from_interleaved(&interleaved, channels, spec.sample_rate)?;
    debug!(
        channels,
        sample_rate = spec.sample_rate,
        frames = audio.frames(),
        bits = spec.bits_per_sample,
        "Decoded WAV"
    );

    match target_rate {
        Some(rate) if rate != audio.sample_rate() => resample(&audio, rate),
        _ => Ok(audio),
    }
}

/// Read and decode a WAV file from disk
pub fn load_sample_file(path: &Path, target_rate: Option<u32>) -> Result<DecodedAudio, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_wav(&bytes, target_rate)
}

/// Sinc-resample every channel to `to_rate`
pub fn resample(audio: &DecodedAudio, to_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let from_rate = audio.sample_rate();
    if from_rate == to_rate {
        return Ok(audio.clone());
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let frames = audio.frames();
    // Pad so the filter delay can be trimmed without losing the tail
    let padded = frames + SINC_LEN;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, padded, audio.channel_count())
        .map_err(|e| DecodeError::Resample(format!("init: {e}")))?;

    let input: Vec<Vec<f32>> = audio
        .channels()
        .iter()
        .map(|ch| {
            let mut ch = ch.clone();
            ch.resize(padded, 0.0);
            ch
        })
        .collect();
    let output = resampler
        .process(&input, None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected = (frames as f64 * ratio).round() as usize;
    let channels: Vec<Vec<f32>> = output
        .into_iter()
        .map(|ch| ch.into_iter().skip(delay).take(expected).collect())
        .collect();

    debug!(from_rate, to_rate, frames, out_frames = expected, "Resampled audio");
    Ok(DecodedAudio::new(channels, to_rate)?)
}
