//! Offline mixdown of a timeline
//!
//! Builds the same voices as live playback, measured from render start and
//! with a unity gain stage before the sink, then renders them faster than
//! realtime on a worker thread.

use std::thread;

use crossbeam_channel::{bounded, Receiver};
use howsample_core::{GraphPlan, TimeOrigin, Timeline, VoicePlan};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::graph::{graph_channel, voice_span, GraphLink, RenderGraph, VoiceHandle, VoiceTarget};
use crate::pitch_shift::StageConfig;

/// Frames rendered per block
const RENDER_BLOCK_FRAMES: usize = 1024;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Timeline has nothing to render")]
    EmptyTimeline,
    #[error("Render needs {required} frames but capacity is {capacity}")]
    CapacityExceeded { required: u64, capacity: u64 },
    #[error("Render thread stopped before completing")]
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub stage: StageConfig,
    /// Hard cap on the render length in seconds
    pub max_duration: Option<f64>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { sample_rate: 44100, channels: 2, stage: StageConfig::default(), max_duration: None }
    }
}

/// Rendered audio, one vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl RenderedBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Fixed-length, non-realtime render target
#[derive(Debug)]
pub struct OfflineContext {
    link: GraphLink,
    graph: RenderGraph,
    length_frames: u64,
}

impl OfflineContext {
    pub fn new(channels: usize, sample_rate: u32, length_frames: u64, stage: StageConfig) -> Self {
        let target = VoiceTarget { sample_rate, channels, stage, gain: Some(1.0) };
        let (link, graph) = graph_channel(target);
        Self { link, graph, length_frames }
    }

    pub fn connect(&mut self, plan: &VoicePlan) -> VoiceHandle {
        self.link.connect(plan)
    }

    /// Render the whole length on a worker thread
    pub fn start_rendering(self) -> RenderHandle {
        let (done_tx, done_rx) = bounded(1);
        let Self { mut graph, length_frames, .. } = self;

        thread::spawn(move || {
            let result = render_all(&mut graph, length_frames);
            if let Err(e) = &result {
                error!("Offline render failed: {}", e);
            }
            let _ = done_tx.send(result);
        });

        RenderHandle { done_rx }
    }
}

fn render_all(graph: &mut RenderGraph, length_frames: u64) -> Result<RenderedBuffer, RenderError> {
    let channels = graph.channels();
    let sample_rate = graph.sample_rate();
    let length = length_frames as usize;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(length); channels];
    let mut block = vec![0.0; RENDER_BLOCK_FRAMES * channels];

    let mut remaining = length;
    while remaining > 0 {
        let frames = remaining.min(RENDER_BLOCK_FRAMES);
        let block = &mut block[..frames * channels];
        graph.render(block);
        for frame in block.chunks_exact(channels) {
            for (ch, &s) in output.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        remaining -= frames;
    }

    if graph.active_voices() > 0 {
        return Err(RenderError::CapacityExceeded { required: graph.pending_frames(), capacity: length_frames });
    }

    Ok(RenderedBuffer { channels: output, sample_rate })
}

/// Handle for a render running on its own thread
pub struct RenderHandle {
    done_rx: Receiver<Result<RenderedBuffer, RenderError>>,
}

impl RenderHandle {
    /// Block until the render completes
    pub fn wait(self) -> Result<RenderedBuffer, RenderError> {
        self.done_rx.recv().map_err(|_| RenderError::Interrupted)?
    }
}

/// Renders whole timelines to buffers
#[derive(Debug, Clone, Default)]
pub struct MixdownRenderer {
    config: RenderConfig,
}

impl MixdownRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Frames needed to hold every voice of `plan`
    pub fn required_frames(&self, plan: &GraphPlan) -> u64 {
        plan.voices
            .iter()
            .map(|v| {
                let (start, frames) = voice_span(v, self.config.sample_rate);
                start + frames
            })
            .max()
            .unwrap_or(0)
    }

    pub fn render(&self, timeline: &Timeline) -> Result<RenderedBuffer, RenderError> {
        let plan = GraphPlan::build(timeline, TimeOrigin::RenderStart);
        if plan.is_empty() {
            return Err(RenderError::EmptyTimeline);
        }

        let required = self.required_frames(&plan);
        if let Some(max) = self.config.max_duration {
            let capacity = (max.max(0.0) * self.config.sample_rate as f64).floor() as u64;
            if required > capacity {
                return Err(RenderError::CapacityExceeded { required, capacity });
            }
        }

        info!(
            voices = plan.voices.len(),
            skipped = plan.skipped.len(),
            frames = required,
            sample_rate = self.config.sample_rate,
            "Rendering mixdown"
        );

        let mut context = OfflineContext::new(self.config.channels, self.config.sample_rate, required, self.config.stage);
        for voice in &plan.voices {
            context.connect(voice);
        }
        let buffer = context.start_rendering().wait()?;

        debug!(frames = buffer.frames(), "Mixdown complete");
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use howsample_core::{DecodedAudio, Placement, SampleEdit, SampleId, SampleKind};

    const SR: u32 = 1000;

    fn config(channels: usize) -> RenderConfig {
        RenderConfig {
            sample_rate: SR,
            channels,
            stage: StageConfig { fft_size: 256, oversampling: 4 },
            max_duration: None,
        }
    }

    fn timeline(starts: &[f64]) -> (Timeline, SampleId) {
        let mut tl = Timeline::new();
        let track = tl.tracks()[0].id;
        let audio = Arc::new(DecodedAudio::new(vec![vec![0.5; 1000]], SR).unwrap());
        let s = tl.add_sample("one", audio, SampleKind::User).unwrap();
        for &start in starts {
            tl.place(track, s, start).unwrap();
        }
        (tl, s)
    }

    #[test]
    fn test_render_places_samples_exactly() {
        let (tl, _) = timeline(&[0.0, 2.0]);
        let buffer = MixdownRenderer::new(config(2)).render(&tl).unwrap();
        assert_eq!(buffer.frames(), 3000);
        assert_eq!(buffer.channels.len(), 2);
        for ch in &buffer.channels {
            assert!(ch[..1000].iter().all(|&s| s == 0.5));
            assert!(ch[1000..2000].iter().all(|&s| s == 0.0));
            assert!(ch[2000..].iter().all(|&s| s == 0.5));
        }
        assert_eq!(buffer.duration(), 3.0);
    }

    #[test]
    fn test_overlapping_placements_sum() {
        let (mut tl, s) = timeline(&[0.0]);
        let second = tl.add_track();
        tl.place(second, s, 0.5).unwrap();
        let buffer = MixdownRenderer::new(config(1)).render(&tl).unwrap();
        assert_eq!(buffer.frames(), 1500);
        assert_eq!(buffer.channels[0][250], 0.5);
        assert_eq!(buffer.channels[0][750], 1.0);
        assert_eq!(buffer.channels[0][1250], 0.5);
    }

    #[test]
    fn test_capacity_follows_speed() {
        let (mut tl, s) = timeline(&[1.0]);
        tl.edit_sample(s, SampleEdit { speed: 0.5, pitch: 0.0, start_point: 0.0, end_point: None }).unwrap();
        let buffer = MixdownRenderer::new(config(1)).render(&tl).unwrap();
        assert_eq!(buffer.frames(), 3000);
    }

    #[test]
    fn test_fractional_speeds_fit_their_capacity() {
        let audio = Arc::new(DecodedAudio::new(vec![vec![0.25; 12345]], SR).unwrap());
        for speed in [0.3, 0.7, 1.27] {
            let mut tl = Timeline::new();
            let track = tl.tracks()[0].id;
            let s = tl.add_sample("long", Arc::clone(&audio), SampleKind::User).unwrap();
            tl.edit_sample(s, SampleEdit { speed, pitch: 0.0, start_point: 0.0, end_point: None }).unwrap();
            tl.place(track, s, 0.0).unwrap();

            let renderer = MixdownRenderer::new(config(1));
            let required = renderer.required_frames(&GraphPlan::build(&tl, TimeOrigin::RenderStart));
            let buffer = renderer.render(&tl).unwrap_or_else(|e| panic!("speed {speed}: {e}"));
            assert_eq!(buffer.frames() as u64, required, "speed {speed}");
        }
    }

    #[test]
    fn test_trim_window() {
        let mut tl = Timeline::new();
        let track = tl.tracks()[0].id;
        let ramp: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let audio = Arc::new(DecodedAudio::new(vec![ramp], SR).unwrap());
        let s = tl.add_sample("ramp", audio, SampleKind::User).unwrap();
        tl.edit_sample(s, SampleEdit { speed: 1.0, pitch: 0.0, start_point: 0.25, end_point: Some(0.5) }).unwrap();
        tl.place(track, s, 0.0).unwrap();

        let buffer = MixdownRenderer::new(config(1)).render(&tl).unwrap();
        assert_eq!(buffer.frames(), 250);
        assert_eq!(buffer.channels[0][0], 250.0);
        assert_eq!(buffer.channels[0][249], 499.0);
    }

    #[test]
    fn test_empty_timeline_is_an_error() {
        let renderer = MixdownRenderer::new(config(2));
        assert!(matches!(renderer.render(&Timeline::new()), Err(RenderError::EmptyTimeline)));

        let mut tl = Timeline::new();
        let track = tl.tracks()[0].id;
        tl.track_mut(track).unwrap().add_placement(Placement::new(SampleId(5), 0.0));
        assert!(matches!(renderer.render(&tl), Err(RenderError::EmptyTimeline)));
    }

    #[test]
    fn test_max_duration_exceeded() {
        let (tl, _) = timeline(&[0.0, 2.0]);
        let renderer = MixdownRenderer::new(RenderConfig { max_duration: Some(2.5), ..config(1) });
        match renderer.render(&tl) {
            Err(RenderError::CapacityExceeded { required, capacity }) => {
                assert_eq!(required, 3000);
                assert_eq!(capacity, 2500);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_short_context_reports_overflow() {
        let (tl, _) = timeline(&[0.0]);
        let plan = GraphPlan::build(&tl, TimeOrigin::RenderStart);
        let mut context = OfflineContext::new(1, SR, 500, config(1).stage);
        context.connect(&plan.voices[0]);
        let handle = context.start_rendering();
        assert!(matches!(handle.wait(), Err(RenderError::CapacityExceeded { capacity: 500, .. })));
    }
}
