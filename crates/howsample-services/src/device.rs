//! Output devices the scheduler plays through

use howsample_core::VoicePlan;
use tracing::debug;

use crate::graph::{graph_channel, GraphEvent, GraphLink, RenderGraph, VoiceHandle, VoiceTarget};
use crate::pitch_shift::StageConfig;

/// Frames per block when a headless device is advanced
pub const HEADLESS_BLOCK_FRAMES: usize = 128;

/// A running clock plus a signal graph voices can be connected to
pub trait AudioDevice {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// Device clock in seconds
    fn current_time(&self) -> f64;

    /// Build a voice for `plan` and start it at `plan.start_at` on the device clock
    fn connect(&mut self, plan: &VoicePlan) -> VoiceHandle;

    /// Start every plan together: the graph sees all of them or none
    fn connect_all(&mut self, plans: &[VoicePlan]) -> Vec<VoiceHandle>;

    /// Next pending graph event, if any
    fn try_event(&mut self) -> Option<GraphEvent>;
}

/// Deterministic device whose clock only moves when advanced
#[derive(Debug)]
pub struct HeadlessDevice {
    link: GraphLink,
    graph: RenderGraph,
}

impl HeadlessDevice {
    pub fn new(sample_rate: u32, channels: usize, stage: StageConfig) -> Self {
        let (link, graph) = graph_channel(VoiceTarget { sample_rate, channels, stage, gain: None });
        Self { link, graph }
    }

    /// Render `frames` frames and return them interleaved
    pub fn advance_frames(&mut self, frames: usize) -> Vec<f32> {
        let channels = self.graph.channels();
        let mut out = vec![0.0; frames * channels];
        for block in out.chunks_mut(HEADLESS_BLOCK_FRAMES * channels) {
            self.graph.render(block);
        }
        debug!(frames, now = self.link.current_time(), "Advanced headless device");
        out
    }

    /// Render whole frames up to `secs` from now
    pub fn advance(&mut self, secs: f64) -> Vec<f32> {
        let frames = (secs.max(0.0) * self.sample_rate() as f64).round() as usize;
        self.advance_frames(frames)
    }

    /// Advance until the clock reads `time` seconds
    pub fn advance_to(&mut self, time: f64) -> Vec<f32> {
        let target = (time.max(0.0) * self.sample_rate() as f64).round() as u64;
        let frames = target.saturating_sub(self.link.frames());
        self.advance_frames(frames as usize)
    }

    pub fn active_voices(&self) -> usize {
        self.graph.active_voices()
    }
}

impl AudioDevice for HeadlessDevice {
    fn sample_rate(&self) -> u32 {
        self.link.target().sample_rate
    }

    fn channels(&self) -> usize {
        self.graph.channels()
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
