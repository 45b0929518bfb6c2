//! Phase-vocoder pitch shifter
//!
//! Streaming STFT pitch shifter that changes frequencies by a factor without
//! changing duration. Each analysis frame measures the true frequency of every
//! bin from its phase advance, moves the energy to bin `k * factor`, and
//! resynthesises with accumulated phases. Output is delayed by
//! `fft_size - hop` samples.
//!
//! All buffers are allocated in `new`; `process_sample` does not allocate.

use std::f32::consts::{PI, TAU};
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Name the pitch-correction stage is registered under
pub const PITCH_SHIFT_STAGE: &str = "phase-vocoder-processor";

const MIN_FACTOR: f32 = 1.0 / 16.0;
const MAX_FACTOR: f32 = 16.0;
const BYPASS_EPSILON: f32 = 1e-6;

/// FFT size and overlap of the pitch-shift stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    /// Frame size, a power of two
    pub fft_size: usize,
    /// Frames overlapping each sample
    pub oversampling: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self { fft_size: 2048, oversampling: 4 }
    }
}

impl StageConfig {
    pub fn hop(&self) -> usize {
        self.fft_size / self.oversampling
    }

    /// Delay between input and output in samples
    pub fn latency(&self) -> usize {
        self.fft_size - self.hop()
    }

    /// Clamp to something the vocoder can run with
    pub fn sanitized(self) -> Self {
        let fft_size = self.fft_size.clamp(64, 16384).next_power_of_two();
        let oversampling = self.oversampling.clamp(2, fft_size / 4).next_power_of_two();
        Self { fft_size, oversampling }
    }
}

/// Single-channel streaming pitch shifter
pub struct PitchShifter {
    fft_size: usize,
    hop: usize,
    latency: usize,
    oversampling: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    in_fifo: Vec<f32>,
    out_fifo: Vec<f32>,
    output_accum: Vec<f32>,
    workspace: Vec<Complex32>,
    scratch: Vec<Complex32>,
    last_phase: Vec<f32>,
    sum_phase: Vec<f32>,
    ana_magn: Vec<f32>,
    ana_freq: Vec<f32>,
    syn_magn: Vec<f32>,
    syn_freq: Vec<f32>,
    rover: usize,
    pitch_factor: f32,
}

impl std::fmt::Debug for PitchShifter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchShifter")
            .field("fft_size", &self.fft_size)
            .field("hop", &self.hop)
            .field("pitch_factor", &self.pitch_factor)
            .finish()
    }
}

impl PitchShifter {
    pub fn new(config: StageConfig, planner: &mut FftPlanner<f32>) -> Self {
        let config = config.sanitized();
        let size = config.fft_size;
        let bins = size / 2 + 1;
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward.get_inplace_scratch_len().max(inverse.get_inplace_scratch_len());

        let window = (0..size)
            .map(|i| 0.5 - 0.5 * (TAU * i as f32 / size as f32).cos())
            .collect();

        Self {
            fft_size: size,
            hop: config.hop(),
            latency: config.latency(),
            oversampling: config.oversampling,
            forward,
            inverse,
            window,
            in_fifo: vec![0.0; size],
            out_fifo: vec![0.0; size],
            output_accum: vec![0.0; 2 * size],
            workspace: vec![Complex32::new(0.0, 0.0); size],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            last_phase: vec![0.0; bins],
            sum_phase: vec![0.0; bins],
            ana_magn: vec![0.0; bins],
            ana_freq: vec![0.0; bins],
            syn_magn: vec![0.0; bins],
            syn_freq: vec![0.0; bins],
            rover: config.latency(),
            pitch_factor: 1.0,
        }
    }

    pub fn latency(&self) -> usize {
        self.latency
    }

    pub fn pitch_factor(&self) -> f32 {
        self.pitch_factor
    }

    /// Set the frequency multiplier. Non-finite values are ignored.
    pub fn set_pitch_factor(&mut self, factor: f32) {
        if factor.is_finite() {
            self.pitch_factor = factor.clamp(MIN_FACTOR, MAX_FACTOR);
        }
    }

    fn is_bypassed(&self) -> bool {
        (self.pitch_factor - 1.0).abs() < BYPASS_EPSILON
    }

    /// Push one input sample and pop the output sample `latency` behind it
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        self.in_fifo[self.rover] = input;
        let read = self.rover - self.latency;
        let output = if self.is_bypassed() {
            self.in_fifo[read]
        } else {
            self.out_fifo[read]
        };
        self.rover += 1;

        if self.rover >= self.fft_size {
            self.rover = self.latency;
            if self.is_bypassed() {
                self.output_accum.fill(0.0);
                self.out_fifo.fill(0.0);
            } else {
                self.process_frame();
            }
            self.in_fifo.copy_within(self.hop..self.fft_size, 0);
        }

        output
    }

    fn process_frame(&mut self) {
        let size = self.fft_size;
        let half = size / 2;
        let osamp = self.oversampling as f32;
        let expected = TAU * self.hop as f32 / size as f32;
        let factor = self.pitch_factor;

        for (k, slot) in self.workspace.iter_mut().enumerate() {
            *slot = Complex32::new(self.in_fifo[k] * self.window[k], 0.0);
        }
        self.forward.process_with_scratch(&mut self.workspace, &mut self.scratch);

        // Analysis: magnitude and true frequency (in bins) of every bin
        for k in 0..=half {
            let c = self.workspace[k];
            let phase = c.im.atan2(c.re);
            let mut delta = phase - self.last_phase[k];
            self.last_phase[k] = phase;
            delta -= k as f32 * expected;
            delta = wrap_phase(delta);
            self.ana_magn[k] = 2.0 * c.norm();
            self.ana_freq[k] = k as f32 + osamp * delta / TAU;
        }

        // Move energy to the shifted bins
        self.syn_magn.fill(0.0);
        self.syn_freq.fill(0.0);
        for k in 0..=half {
            let index = (k as f32 * factor) as usize;
            if index <= half {
                self.syn_magn[index] += self.ana_magn[k];
                self.syn_freq[index] = self.ana_freq[k] * factor;
            }
        }

        // Synthesis
        for k in 0..=half {
            let deviation = self.syn_freq[k] - k as f32;
            let advance = TAU * deviation / osamp + k as f32 * expected;
            self.sum_phase[k] = wrap_phase(self.sum_phase[k] + advance);
            self.workspace[k] = Complex32::from_polar(self.syn_magn[k], self.sum_phase[k]);
        }
        for slot in &mut self.workspace[half + 1..] {
            *slot = Complex32::new(0.0, 0.0);
        }
        self.inverse.process_with_scratch(&mut self.workspace, &mut self.scratch);

        let norm = 2.0 / (half as f32 * osamp);
        for k in 0..size {
            self.output_accum[k] += self.window[k] * self.workspace[k].re * norm;
        }
        self.out_fifo[..self.hop].copy_from_slice(&self.output_accum[..self.hop]);
        self.output_accum.copy_within(self.hop..self.hop + size, 0);
        self.output_accum[size..].fill(0.0);
    }
}

/// Wrap to [-PI, PI]
#[inline]
fn wrap_phase(phase: f32) -> f32 {
    if (-PI..=PI).contains(&phase) {
        return phase;
    }
    phase - TAU * (phase / TAU).round()
}

/// One pitch shifter per output channel, sharing a single control value
#[derive(Debug)]
pub struct PitchShiftStage {
    shifters: Vec<PitchShifter>,
}

impl PitchShiftStage {
    pub fn new(config: StageConfig, channels: usize) -> Self {
        let mut planner = FftPlanner::new();
        let shifters = (0..channels).map(|_| PitchShifter::new(config, &mut planner)).collect();
        Self { shifters }
    }

    pub fn name(&self) -> &'static str {
        PITCH_SHIFT_STAGE
    }

    pub fn latency(&self) -> usize {
        self.shifters.first().map_or(0, PitchShifter::latency)
    }

    pub fn set_pitch_factor(&mut self, factor: f32) {
        for s in &mut self.shifters {
            s.set_pitch_factor(factor);
        }
    }

    /// Process one frame in place, one sample per channel
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for (sample, shifter) in frame.iter_mut().zip(&mut self.shifters) {
            *sample = shifter.process_sample(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| (TAU * freq * i as f32 / sample_rate).sin() * 0.5).collect()
    }

    fn zero_crossings(signal: &[f32]) -> usize {
        signal.windows(2).filter(|w| (w[0] < 0.0) != (w[1] < 0.0)).count()
    }

    fn shifter(fft_size: usize) -> PitchShifter {
        PitchShifter::new(StageConfig { fft_size, oversampling: 4 }, &mut FftPlanner::new())
    }

    #[test]
    fn test_config() {
        let c = StageConfig::default();
        assert_eq!(c.hop(), 512);
        assert_eq!(c.latency(), 1536);
        let odd = StageConfig { fft_size: 1000, oversampling: 3 }.sanitized();
        assert_eq!(odd, StageConfig { fft_size: 1024, oversampling: 4 });
    }

    #[test]
    fn test_unity_factor_is_pure_delay() {
        let mut ps = shifter(256);
        let latency = ps.latency();
        let input: Vec<f32> = (0..2000).map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5).collect();
        let output: Vec<f32> = input.iter().map(|&s| ps.process_sample(s)).collect();
        assert!(output[..latency].iter().all(|&s| s == 0.0));
        assert_eq!(&output[latency..], &input[..input.len() - latency]);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut ps = shifter(512);
        ps.set_pitch_factor(1.5);
        for _ in 0..4096 {
            assert_eq!(ps.process_sample(0.0), 0.0);
        }
    }

    #[test]
    fn test_octave_up_doubles_frequency() {
        let sr = 44100.0;
        let len = 44100;
        let mut ps = shifter(2048);
        ps.set_pitch_factor(2.0);
        let input = sine(441.0, sr, len);
        let output: Vec<f32> = input.iter().map(|&s| ps.process_sample(s)).collect();

        let steady_in = &input[8192..len - 4096];
        let steady_out = &output[8192..len - 4096];
        let ratio = zero_crossings(steady_out) as f32 / zero_crossings(steady_in) as f32;
        assert!((ratio - 2.0).abs() < 0.1, "frequency ratio {ratio}");
        assert!(steady_out.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_factor_clamped_and_nan_ignored() {
        let mut ps = shifter(256);
        ps.set_pitch_factor(100.0);
        assert_eq!(ps.pitch_factor(), MAX_FACTOR);
        ps.set_pitch_factor(f32::NAN);
        assert_eq!(ps.pitch_factor(), MAX_FACTOR);
    }

    #[test]
    fn test_wrap_phase() {
        assert_eq!(wrap_phase(0.5), 0.5);
        assert!((wrap_phase(3.0 * PI) - PI).abs() < 1e-4 || (wrap_phase(3.0 * PI) + PI).abs() < 1e-4);
        assert!(wrap_phase(-7.0).abs() <= PI);
    }

    #[test]
    fn test_stage_name_and_channels() {
        let mut stage = PitchShiftStage::new(StageConfig { fft_size: 256, oversampling: 4 }, 2);
        assert_eq!(stage.name(), "phase-vocoder-processor");
        assert_eq!(stage.latency(), 192);
        let mut frame = [0.25, -0.25];
        stage.process_frame(&mut frame);
        assert_eq!(frame, [0.0, 0.0]);
    }
}
