use std::path::PathBuf;

use howsample_services::{RenderConfig, StageConfig, EXPORT_FILENAME};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub(crate) struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct EngineConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub fft_size: usize,
    pub oversampling: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let stage = StageConfig::default();
        Self { sample_rate: 44100, channels: 2, fft_size: stage.fft_size, oversampling: stage.oversampling }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ExportConfig {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_render_seconds: Option<f64>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { filename: EXPORT_FILENAME.to_string(), max_render_seconds: None }
    }
}

impl AppConfig {
    pub fn stage(&self) -> StageConfig {
        StageConfig { fft_size: self.engine.fft_size, oversampling: self.engine.oversampling }.sanitized()
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            sample_rate: self.engine.sample_rate.max(1),
            channels: self.engine.channels.max(1),
            stage: self.stage(),
            max_duration: self.export.max_render_seconds,
        }
    }
}

pub(crate) fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("howsample")
        .join("config.toml")
}

pub(crate) fn load_config() -> AppConfig {
    let path = config_path();
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| toml::from_str(&s).ok())
        .unwrap_or_default()
}

pub(crate) fn save_config(config: &AppConfig) -> anyhow::Result<PathBuf> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, toml::to_string_pretty(config)?)?;
    Ok(path)
}
