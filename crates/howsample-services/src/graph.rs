//! Signal graph shared by the live device and the offline renderer
//!
//! One [`Voice`] per planned placement: bounded source → pitch-shift stage →
//! optional gain. The control side talks to the [`RenderGraph`] through a
//! [`GraphLink`]: voices go over a command channel, completion events come
//! back over an event channel, and the graph publishes its frame counter as
//! the clock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use howsample_core::{DecodedAudio, StretchParams, VoicePlan};
use tracing::{debug, trace};

use crate::pitch_shift::{PitchShiftStage, StageConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// Control-thread → graph
pub enum GraphCommand {
    Start(Box<Voice>),
    /// Voices that must become audible in the same block
    StartBatch(Vec<Voice>),
    Disconnect(VoiceId),
}

/// Graph → control-thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphEvent {
    /// A voice stopped producing output, naturally or because it was stopped.
    /// `at` is the graph clock in seconds at the end.
    Ended { voice: VoiceId, at: f64 },
}

/// What a voice renders into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceTarget {
    pub sample_rate: u32,
    pub channels: usize,
    pub stage: StageConfig,
    /// Gain stage before the sink, if any
    pub gain: Option<f32>,
}

/// First output frame and number of output frames a plan occupies at `sample_rate`
pub fn voice_span(plan: &VoicePlan, sample_rate: u32) -> (u64, u64) {
    let start_frame = (plan.start_at.max(0.0) * sample_rate as f64).round() as u64;
    let window = SourceWindow::new(&plan.audio, plan.offset, plan.duration);
    let step = source_step(plan.params.playback_rate, plan.audio.sample_rate(), sample_rate);
    (start_frame, window.frames_at(window.start, step))
}

fn source_step(rate: f64, buffer_rate: u32, engine_rate: u32) -> f64 {
    rate * buffer_rate as f64 / engine_rate as f64
}

/// Trim window in buffer frames
#[derive(Debug, Clone, Copy)]
struct SourceWindow {
    start: f64,
    end: f64,
    last_index: usize,
}

impl SourceWindow {
    fn new(audio: &DecodedAudio, offset: f64, duration: f64) -> Self {
        let rate = audio.sample_rate() as f64;
        let frames = audio.frames();
        let end = ((offset + duration) * rate).min(frames as f64);
        let start = (offset * rate).clamp(0.0, end);
        let last_index = (end.ceil() as usize).saturating_sub(1).min(frames.saturating_sub(1));
        Self { start, end, last_index }
    }

    fn frames_at(&self, position: f64, step: f64) -> u64 {
        if position >= self.end || step <= 0.0 {
            return 0;
        }
        ((self.end - position) / step).ceil() as u64
    }
}

/// Plays the trim window of a decoded buffer at a playback rate.
///
/// Frame positions are derived from an integer frame counter, so the number
/// of frames produced always equals [`SourceWindow::frames_at`] and
/// [`voice_span`].
#[derive(Debug)]
pub struct SourceNode {
    audio: Arc<DecodedAudio>,
    window: SourceWindow,
    /// Buffer position the current rate took effect at
    origin: f64,
    step: f64,
    /// Frames produced since `origin`
    produced: u64,
    /// Frames the window yields from `origin` at `step`
    total: u64,
    engine_rate: u32,
    out_channels: usize,
    scratch: Vec<f32>,
}

impl SourceNode {
    pub fn new(audio: Arc<DecodedAudio>, offset: f64, duration: f64, rate: f64, engine_rate: u32, out_channels: usize) -> Self {
        let window = SourceWindow::new(&audio, offset, duration);
        let step = source_step(rate, audio.sample_rate(), engine_rate);
        let total = window.frames_at(window.start, step);
        let scratch = vec![0.0; audio.channel_count()];
        Self { audio, origin: window.start, window, step, produced: 0, total, engine_rate, out_channels, scratch }
    }

    fn position(&self) -> f64 {
        self.origin + self.produced as f64 * self.step
    }

    /// Change the rate from the next frame on
    pub fn set_playback_rate(&mut self, rate: f64) {
        let origin = self.position();
        self.step = source_step(rate, self.audio.sample_rate(), self.engine_rate);
        self.total = if self.is_exhausted() { 0 } else { self.window.frames_at(origin, self.step) };
        self.origin = origin;
        self.produced = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.produced >= self.total
    }

    /// Output frames left to produce at the current rate
    pub fn remaining_frames(&self) -> u64 {
        self.total - self.produced
    }

    /// Drop up to `frames` output frames without producing them.
    /// Returns how many were dropped.
    pub fn skip(&mut self, frames: u64) -> u64 {
        let skipped = frames.min(self.remaining_frames());
        self.produced += skipped;
        skipped
    }

    /// Write the next frame into `out` (one sample per output channel).
    /// Returns false once the window is exhausted; `out` is then silent.
    pub fn next_frame(&mut self, out: &mut [f32]) -> bool {
        if self.is_exhausted() {
            out.fill(0.0);
            return false;
        }

        let position = self.position();
        let base = position.floor();
        let frac = (position - base) as f32;
        let index = (base as usize).min(self.window.last_index);
        let next = (index + 1).min(self.window.last_index);
        for (c, slot) in self.scratch.iter_mut().enumerate() {
            let ch = self.audio.channel(c);
            let a = ch[index];
            let b = ch[next];
            *slot = a + (b - a) * frac;
        }
        mix_channels(&self.scratch, out, self.out_channels);

        self.produced += 1;
        true
    }
}

/// Map a source frame onto the output channel layout
fn mix_channels(src: &[f32], out: &mut [f32], out_channels: usize) {
    let src_channels = src.len();
    if src_channels == out_channels {
        out.copy_from_slice(src);
    } else if src_channels == 1 {
        out.fill(src[0]);
    } else if out_channels == 1 {
        out[0] = src.iter().sum::<f32>() / src_channels as f32;
    } else {
        for (o, slot) in out.iter_mut().enumerate() {
            *slot = src[o % src_channels];
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainNode {
    pub gain: f32,
}

impl GainNode {
    pub fn process_frame(&self, frame: &mut [f32]) {
        for s in frame {
            *s *= self.gain;
        }
    }
}

/// State shared between a voice and its handle
#[derive(Debug)]
struct VoiceControl {
    stopped: AtomicBool,
    released: AtomicBool,
    ended: AtomicBool,
    playback_rate: AtomicU32,
    pitch_factor: AtomicU32,
}

impl VoiceControl {
    fn new(params: StretchParams) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            released: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            playback_rate: AtomicU32::new((params.playback_rate as f32).to_bits()),
            pitch_factor: AtomicU32::new((params.pitch_factor as f32).to_bits()),
        }
    }

    fn playback_rate(&self) -> f32 {
        f32::from_bits(self.playback_rate.load(Ordering::Relaxed))
    }

    fn pitch_factor(&self) -> f32 {
        f32::from_bits(self.pitch_factor.load(Ordering::Relaxed))
    }
}

enum VoiceStatus {
    Active,
    Ended(u64),
}

/// A source → pitch-shift → gain chain scheduled at an absolute frame
pub struct Voice {
    id: VoiceId,
    start_frame: u64,
    source: SourceNode,
    stage: PitchShiftStage,
    gain: Option<GainNode>,
    control: Arc<VoiceControl>,
    playback_rate: f32,
    primed: bool,
    real_frames: u64,
    emitted: u64,
    frame: Vec<f32>,
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("id", &self.id)
            .field("start_frame", &self.start_frame)
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl Voice {
    fn build(id: VoiceId, plan: &VoicePlan, target: &VoiceTarget) -> (Self, Arc<VoiceControl>) {
        let (start_frame, _) = voice_span(plan, target.sample_rate);
        let source = SourceNode::new(
            Arc::clone(&plan.audio),
            plan.offset,
            plan.duration,
            plan.params.playback_rate,
            target.sample_rate,
            target.channels,
        );
        let mut stage = PitchShiftStage::new(target.stage, target.channels);
        stage.set_pitch_factor(plan.params.pitch_factor as f32);
        let control = Arc::new(VoiceControl::new(plan.params));

        let voice = Self {
            id,
            start_frame,
            source,
            stage,
            gain: target.gain.map(|gain| GainNode { gain }),
            control: Arc::clone(&control),
            playback_rate: plan.params.playback_rate as f32,
            primed: false,
            real_frames: 0,
            emitted: 0,
            frame: vec![0.0; target.channels],
        };
        (voice, control)
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    fn sync_params(&mut self) {
        let rate = self.control.playback_rate();
        if rate != self.playback_rate && rate.is_finite() && rate > 0.0 {
            self.playback_rate = rate;
            self.source.set_playback_rate(rate as f64);
        }
        self.stage.set_pitch_factor(self.control.pitch_factor());
    }

    /// Pull one source frame into the stage
    fn push_source_frame(&mut self) {
        if self.source.next_frame(&mut self.frame) {
            self.real_frames += 1;
        }
        self.stage.process_frame(&mut self.frame);
    }

    /// Fill the stage's delay line so the first output lines up with the start frame
    fn prime(&mut self) {
        for _ in 0..self.stage.latency() {
            self.push_source_frame();
        }
        self.primed = true;
    }

    /// Frame this voice is projected to end at, given the graph is at `now`
    fn projected_end(&self, now: u64) -> u64 {
        let pending = self.source.remaining_frames() + self.real_frames.saturating_sub(self.emitted);
        self.start_frame.max(now) + pending
    }

    fn is_finished(&self) -> bool {
        self.source.is_exhausted() && self.emitted >= self.real_frames
    }

    /// Mix this voice into the interleaved block starting at `block_start`
    fn render(&mut self, block_start: u64, out: &mut [f32], channels: usize) -> VoiceStatus {
        if self.control.stopped.load(Ordering::Acquire) {
            return VoiceStatus::Ended(block_start);
        }

        let frames = (out.len() / channels) as u64;
        let block_end = block_start + frames;
        if self.start_frame >= block_end {
            return VoiceStatus::Active;
        }

        self.sync_params();
        if !self.primed {
            // Connected after its start frame was rendered: drop what was missed
            let late = block_start.saturating_sub(self.start_frame);
            if late > 0 {
                let skipped = self.source.skip(late);
                debug!(voice = self.id.0, late, "Voice started late");
                if self.source.is_exhausted() {
                    return VoiceStatus::Ended(self.start_frame + skipped);
                }
            }
            self.prime();
        }

        let first = self.start_frame.saturating_sub(block_start) as usize;
        for f in first..frames as usize {
            self.push_source_frame();
            if let Some(gain) = &self.gain {
                gain.process_frame(&mut self.frame);
            }
            for (slot, s) in out[f * channels..(f + 1) * channels].iter_mut().zip(&self.frame) {
                *slot += *s;
            }
            self.emitted += 1;
            if self.is_finished() {
                return VoiceStatus::Ended(block_start + f as u64 + 1);
            }
        }

        VoiceStatus::Active
    }
}

/// Control-side handle to a started voice. Dropping it leaves the voice running.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    id: VoiceId,
    control: Arc<VoiceControl>,
    commands: Sender<GraphCommand>,
}

impl VoiceHandle {
    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn is_stopped(&self) -> bool {
        self.control.stopped.load(Ordering::Acquire)
    }

    pub fn has_ended(&self) -> bool {
        self.control.ended.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.control.released.load(Ordering::Acquire)
    }

    /// Silence the voice at the next block
    pub fn stop(&self) {
        self.control.stopped.store(true, Ordering::Release);
    }

    /// Stop and disconnect. Safe to call any number of times.
    pub fn release(&self) {
        self.stop();
        if self.control.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // Graph already gone: nothing left to disconnect
        let _ = self.commands.send(GraphCommand::Disconnect(self.id));
        trace!(voice = self.id.0, "Released voice");
    }

    /// Update rate and pitch factor while sounding
    pub fn set_params(&self, params: StretchParams) {
        self.control.playback_rate.store((params.playback_rate as f32).to_bits(), Ordering::Relaxed);
        self.control.pitch_factor.store((params.pitch_factor as f32).to_bits(), Ordering::Relaxed);
    }
}

/// Control side of a graph
#[derive(Debug)]
pub struct GraphLink {
    commands: Sender<GraphCommand>,
    events: Receiver<GraphEvent>,
    clock: Arc<AtomicU64>,
    target: VoiceTarget,
    next_voice: u64,
}

impl GraphLink {
    pub fn target(&self) -> &VoiceTarget {
        &self.target
    }

    /// Frames rendered so far
    pub fn frames(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Graph clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frames() as f64 / self.target.sample_rate as f64
    }

    fn build_voice(&mut self, plan: &VoicePlan) -> (Voice, VoiceHandle) {
        self.next_voice += 1;
        let id = VoiceId(self.next_voice);
        let (voice, control) = Voice::build(id, plan, &self.target);
        debug!(voice = id.0, sample = plan.sample_id.0, start_frame = voice.start_frame, "Connecting voice");
        (voice, VoiceHandle { id, control, commands: self.commands.clone() })
    }

    /// Build the voice for `plan` and hand it to the graph
    pub fn connect(&mut self, plan: &VoicePlan) -> VoiceHandle {
        let (voice, handle) = self.build_voice(plan);
        let _ = self.commands.send(GraphCommand::Start(Box::new(voice)));
        handle
    }

    /// Hand all of `plans` to the graph in one command, so no block is
    /// rendered with only part of them connected
    pub fn connect_all(&mut self, plans: &[VoicePlan]) -> Vec<VoiceHandle> {
        let (voices, handles): (Vec<_>, Vec<_>) = plans.iter().map(|plan| self.build_voice(plan)).unzip();
        if !voices.is_empty() {
            let _ = self.commands.send(GraphCommand::StartBatch(voices));
        }
        handles
    }

    pub fn try_event(&self) -> Option<GraphEvent> {
        self.events.try_recv().ok()
    }
}

/// Audio side of a graph: owns the voices and mixes them
pub struct RenderGraph {
    sample_rate: u32,
    channels: usize,
    voices: Vec<Voice>,
    commands: Receiver<GraphCommand>,
    events: Sender<GraphEvent>,
    clock: Arc<AtomicU64>,
    frame: u64,
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("voices", &self.voices.len())
            .field("frame", &self.frame)
            .finish()
    }
}

/// Create a connected control/audio pair
pub fn graph_channel(target: VoiceTarget) -> (GraphLink, RenderGraph) {
    let target = VoiceTarget { channels: target.channels.max(1), ..target };
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    let clock = Arc::new(AtomicU64::new(0));
    let link = GraphLink {
        commands: command_tx,
        events: event_rx,
        clock: Arc::clone(&clock),
        target,
        next_voice: 0,
    };
    let graph = RenderGraph {
        sample_rate: target.sample_rate,
        channels: target.channels,
        voices: Vec::new(),
        commands: command_rx,
        events: event_tx,
        clock,
        frame: 0,
    };
    (link, graph)
}

impl RenderGraph {
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Frame by which every current voice should have ended
    pub fn pending_frames(&self) -> u64 {
        self.voices.iter().map(|v| v.projected_end(self.frame)).max().unwrap_or(self.frame)
    }

    fn seconds(&self, frame: u64) -> f64 {
        frame as f64 / self.sample_rate as f64
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                GraphCommand::Start(voice) => self.voices.push(*voice),
                GraphCommand::StartBatch(voices) => self.voices.extend(voices),
                GraphCommand::Disconnect(id) => {
                    if let Some(i) = self.voices.iter().position(|v| v.id == id) {
                        let voice = self.voices.swap_remove(i);
                        voice.control.ended.store(true, Ordering::Release);
                        let _ = self.events.send(GraphEvent::Ended { voice: id, at: self.seconds(self.frame) });
                    }
                }
            }
        }
    }

    /// Render one interleaved block, overwriting `out`
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        self.apply_commands();

        let channels = self.channels;
        let block_start = self.frame;
        let sample_rate = self.sample_rate as f64;
        let events = &self.events;
        self.voices.retain_mut(|voice| match voice.render(block_start, out, channels) {
            VoiceStatus::Active => true,
            VoiceStatus::Ended(frame) => {
                voice.control.ended.store(true, Ordering::Release);
                let _ = events.send(GraphEvent::Ended { voice: voice.id, at: frame as f64 / sample_rate });
                false
            }
        });

        self.frame += (out.len() / channels) as u64;
        self.clock.store(self.frame, Ordering::Release);
    }
}
