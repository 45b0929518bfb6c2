//! Realtime output through the default cpal device

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use howsample_core::VoicePlan;
use thiserror::Error;
use tracing::{info, warn};

use crate::device::AudioDevice;
use crate::graph::{graph_channel, GraphEvent, GraphLink, VoiceHandle, VoiceTarget};
use crate::pitch_shift::StageConfig;

#[derive(Debug, Error)]
pub enum AudioOutputError {
    #[error("No audio output devices found")]
    NoDevices,
    #[error("Failed to get default output config: {0}")]
    ConfigError(String),
    #[error("Failed to build output stream: {0}")]
    StreamError(String),
}

/// Default output device driving a render graph from its stream callback
pub struct CpalDevice {
    link: GraphLink,
    device_name: String,
    _stream: cpal::Stream,
}

impl CpalDevice {
    /// Open the default output device at its preferred config
    pub fn open(stage: StageConfig) -> Result<Self, AudioOutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioOutputError::NoDevices)?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioOutputError::ConfigError(e.to_string()))?;

        let sample_rate = supported_config.sample_rate().0;
        let channels = supported_config.channels() as usize;
        let device_name = device.name().unwrap_or_default();

        let (link, mut graph) = graph_channel(VoiceTarget { sample_rate, channels, stage, gain: None });

        let config: StreamConfig = supported_config.into();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| graph.render(data),
                move |err| warn!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioOutputError::StreamError(e.to_string()))?;

        stream.play().map_err(|e| AudioOutputError::StreamError(e.to_string()))?;

        info!(device = %device_name, sample_rate, channels, "Started realtime output stream");

        Ok(Self { link, device_name, _stream: stream })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioDevice for CpalDevice {
    fn sample_rate(&self) -> u32 {
        self.link.target().sample_rate
    }

    fn channels(&self) -> usize {
        self.link.target().channels
    }

    fn current_time(&self) -> f64 {
        self.link.current_time()
    }

    fn connect(&mut self, plan: &VoicePlan) -> VoiceHandle {
        self.link.connect(plan)
    }

    fn connect_all(&mut self, plans: &[VoicePlan]) -> Vec<VoiceHandle> {
        self.link.connect_all(plans)
    }

    fn try_event(&mut self) -> Option<GraphEvent> {
        self.link.try_event()
    }
}
