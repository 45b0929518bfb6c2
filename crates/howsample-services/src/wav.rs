//! 16-bit PCM RIFF/WAV encoder

use thiserror::Error;

/// Size of the canonical RIFF/WAVE header
pub const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("Buffer has no channels")]
    NoChannels,
    #[error("Channel {channel} has {len} frames, expected {expected}")]
    ChannelLengthMismatch { channel: usize, len: usize, expected: usize },
    #[error("Audio too large for a WAV file: {data_bytes} data bytes")]
    TooLarge { data_bytes: u64 },
}

/// Quantize a float sample to i16: clamp to [-1, 1], scale negatives by 32768
/// and the rest by 32767, truncating toward zero
#[inline]
pub fn quantize(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 { (s * 32768.0) as i16 } else { (s * 32767.0) as i16 }
}

/// Encode per-channel float audio as a 16-bit PCM WAV byte sequence
pub fn encode_wav(channels: &[Vec<f32>], sample_rate: u32) -> Result<Vec<u8>, WavError> {
    let channel_count = channels.len();
    if channel_count == 0 {
        return Err(WavError::NoChannels);
    }
    let frames = channels[0].len();
    if let Some((channel, ch)) = channels.iter().enumerate().find(|(_, ch)| ch.len() != frames) {
        return Err(WavError::ChannelLengthMismatch { channel, len: ch.len(), expected: frames });
    }

    let data_bytes = frames as u64 * channel_count as u64 * 2;
    if data_bytes + (WAV_HEADER_LEN as u64 - 8) > u32::MAX as u64 || channel_count > u16::MAX as usize / 2 {
        return Err(WavError::TooLarge { data_bytes });
    }
    let data_len = data_bytes as u32;
    let channels_u16 = channel_count as u16;
    let block_align = channels_u16 * 2;
    let byte_rate = sample_rate
        .checked_mul(block_align as u32)
        .ok_or(WavError::TooLarge { data_bytes })?;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_bytes as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(data_len + 36).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels_u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    // Frame-major interleave
    for i in 0..frames {
        for ch in channels {
            out.extend_from_slice(&quantize(ch[i]).to_le_bytes());
        }
    }

    Ok(out)
}
