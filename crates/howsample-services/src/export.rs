//! Timeline → WAV export

use std::path::{Path, PathBuf};

use howsample_core::Timeline;
use thiserror::Error;
use tracing::info;

use crate::mixdown::{MixdownRenderer, RenderConfig, RenderError};
use crate::wav::{encode_wav, WavError};

/// Filename an export is offered under
pub const EXPORT_FILENAME: &str = "output.wav";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
    #[error("WAV encoding failed: {0}")]
    Wav(#[from] WavError),
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

/// Render `timeline` and encode it as WAV bytes
pub fn export_mix(timeline: &Timeline, config: &RenderConfig) -> Result<Vec<u8>, ExportError> {
    let buffer = MixdownRenderer::new(*config).render(timeline)?;
    let bytes = encode_wav(&buffer.channels, buffer.sample_rate)?;
    info!(frames = buffer.frames(), bytes = bytes.len(), "Exported mix");
    Ok(bytes)
}

/// Export into `dir` under [`EXPORT_FILENAME`] and return the written path
pub fn write_export(timeline: &Timeline, config: &RenderConfig, dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(EXPORT_FILENAME);
    write_export_to(timeline, config, &path)?;
    Ok(path)
}

/// Export to an explicit file path
pub fn write_export_to(timeline: &Timeline, config: &RenderConfig, path: &Path) -> Result<(), ExportError> {
    let bytes = export_mix(timeline, config)?;
    std::fs::write(path, &bytes)?;
    info!(path = %path.display(), "Wrote export");
    Ok(())
}
