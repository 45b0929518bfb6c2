//! Live playback of a whole timeline
//!
//! The scheduler owns the transport. `play` builds one voice per resolved
//! placement against the device clock and returns immediately; `poll` drains
//! graph events and returns to idle once the tail voice has played out its
//! full duration. A separate preview voice can audition one sample with
//! speed and pitch changed while it sounds.

use std::sync::Arc;

use howsample_core::{
    stretch, GraphPlan, HowsampleError, SampleData, SampleId, TailSource, TimeOrigin, Timeline, TrackId, Transport,
    TransportState, VoicePlan,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::device::AudioDevice;
use crate::graph::{GraphEvent, VoiceHandle, VoiceId};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Transport is already playing")]
    AlreadyPlaying,
    #[error(transparent)]
    Core(#[from] HowsampleError),
}

/// Outcome of a play request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayReport {
    /// Device clock reading playback was scheduled against
    pub epoch: f64,
    /// Voices started
    pub scheduled: usize,
    /// Placements whose sample could not be resolved
    pub skipped: usize,
}

#[derive(Debug)]
struct Preview {
    sample_id: SampleId,
    window: f64,
    handle: VoiceHandle,
}

pub struct Scheduler<D: AudioDevice> {
    device: D,
    transport: Transport<VoiceHandle>,
    preview: Option<Preview>,
}

impl<D: AudioDevice> Scheduler<D> {
    pub fn new(device: D) -> Self {
        Self { device, transport: Transport::Idle, preview: None }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Handles of the voices started by the current session
    pub fn active_handles(&self) -> &[VoiceHandle] {
        self.transport.handles()
    }

    /// Timeline position in seconds while playing
    pub fn position(&self) -> Option<f64> {
        self.transport.position(self.device.current_time())
    }

    /// Allowed shortfall when checking that the tail voice played in full
    fn end_tolerance(&self) -> f64 {
        1.0 / self.device.sample_rate() as f64
    }

    /// Schedule every resolvable placement of `timeline` against the device clock
    pub fn play(&mut self, timeline: &Timeline) -> Result<PlayReport, SchedulerError> {
        if self.transport.is_playing() {
            return Err(SchedulerError::AlreadyPlaying);
        }

        let epoch = self.device.current_time();
        let plan = GraphPlan::build(timeline, TimeOrigin::DeviceClock(epoch));
        let report = PlayReport { epoch, scheduled: plan.voices.len(), skipped: plan.skipped.len() };

        if plan.is_empty() {
            info!(skipped = report.skipped, "Nothing to play");
            return Ok(report);
        }

        let handles = self.device.connect_all(&plan.voices);
        let tail = plan.tail().map(|index| {
            let voice = &plan.voices[index];
            TailSource { index, start_at: voice.start_at, duration: voice.output_duration() }
        });

        info!(
            epoch,
            voices = report.scheduled,
            skipped = report.skipped,
            end_at = plan.end_at().unwrap_or(epoch),
            "Playback started"
        );
        self.transport = Transport::Playing { epoch, handles, tail };
        Ok(report)
    }

    /// Stop every voice of the session and go idle. No-op when idle.
    pub fn stop(&mut self) {
        let was_playing = self.transport.is_playing();
        for handle in self.transport.reset() {
            handle.release();
        }
        if was_playing {
            info!("Playback stopped");
        }
    }

    /// Stop when playing, play when idle
    pub fn toggle(&mut self, timeline: &Timeline) -> Result<TransportState, SchedulerError> {
        if self.transport.is_playing() {
            self.stop();
        } else {
            self.play(timeline)?;
        }
        Ok(self.state())
    }

    /// Handle pending graph events and return the resulting state
    pub fn poll(&mut self) -> TransportState {
        while let Some(event) = self.device.try_event() {
            match event {
                GraphEvent::Ended { voice, at } => self.on_voice_ended(voice, at),
            }
        }
        self.state()
    }

    fn on_voice_ended(&mut self, voice: VoiceId, at: f64) {
        if self.preview.as_ref().is_some_and(|p| p.handle.id() == voice) {
            self.on_preview_ended(at);
            return;
        }

        let tolerance = self.end_tolerance();
        let Some((handle, tail)) = self.transport.tail() else {
            return;
        };
        if handle.id() != voice {
            debug!(voice = voice.0, at, "Voice ended");
            return;
        }
        if !tail.finished_by_time(at, tolerance) {
            debug!(voice = voice.0, at, "Tail voice ended early, ignoring");
            return;
        }

        for handle in self.transport.reset() {
            handle.release();
        }
        info!(at, "Playback finished");
    }

    fn on_preview_ended(&mut self, at: f64) {
        let Some(preview) = &self.preview else {
            return;
        };
        if preview.handle.is_stopped() {
            return;
        }
        debug!(sample = preview.sample_id.0, at, "Preview finished");
        if let Some(preview) = self.preview.take() {
            preview.handle.release();
        }
    }

    /// Start auditioning `sample` now, replacing any running preview
    pub fn start_preview(&mut self, sample: &SampleData) -> VoiceId {
        self.stop_preview();

        let plan = VoicePlan {
            track_id: TrackId(0),
            sample_id: sample.id,
            audio: Arc::clone(sample.audio()),
            offset: sample.start_point(),
            duration: sample.window_duration(),
            params: sample.params(),
            start_at: self.device.current_time(),
        };
        let handle = self.device.connect(&plan);
        let id = handle.id();
        debug!(sample = sample.id.0, voice = id.0, "Preview started");
        self.preview = Some(Preview { sample_id: sample.id, window: plan.duration, handle });
        id
    }

    /// Change speed and pitch of the sounding preview
    pub fn update_preview(&mut self, speed: f64, pitch: f64) -> Result<(), SchedulerError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(HowsampleError::InvalidSpeed(speed).into());
        }
        if !pitch.is_finite() {
            return Err(HowsampleError::InvalidPitch(pitch).into());
        }
        if let Some(preview) = &self.preview {
            preview.handle.set_params(stretch::map(speed, pitch));
            debug!(sample = preview.sample_id.0, speed, pitch, window = preview.window, "Preview updated");
        }
        Ok(())
    }

    pub fn is_previewing(&self) -> bool {
        self.preview.is_some()
    }

    pub fn stop_preview(&mut self) {
        if let Some(preview) = self.preview.take() {
            preview.handle.release();
        }
    }
}

impl<D: AudioDevice> Drop for Scheduler<D> {
    fn drop(&mut self) {
        self.stop_preview();
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use howsample_core::{DecodedAudio, Placement, SampleEdit, SampleKind};

    use crate::device::HeadlessDevice;
    use crate::pitch_shift::StageConfig;

    const SR: u32 = 1000;

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(SR, 1, StageConfig { fft_size: 256, oversampling: 4 })
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
    fn test_play_twice_is_rejected() {
        let (tl, _) = timeline(&[0.0]);
        let mut scheduler = Scheduler::new(device());
        scheduler.play(&tl).unwrap();
        assert!(matches!(scheduler.play(&tl), Err(SchedulerError::AlreadyPlaying)));
        assert_eq!(scheduler.active_handles().len(), 1);
    }

    #[test]
    fn test_empty_timeline_stays_idle() {
        let mut scheduler = Scheduler::new(device());
        let report = scheduler.play(&Timeline::new()).unwrap();
        assert_eq!(report.scheduled, 0);
        assert_eq!(scheduler.state(), TransportState::Idle);
        assert_eq!(scheduler.position(), None);
    }

    #[test]
    fn test_stop_releases_and_is_idempotent() {
        let (tl, _) = timeline(&[0.0, 0.5]);
        let mut scheduler = Scheduler::new(device());
        scheduler.play(&tl).unwrap();
        let handles = scheduler.active_handles().to_vec();
        scheduler.device_mut().advance(0.2);

        scheduler.stop();
        assert_eq!(scheduler.state(), TransportState::Idle);
        assert!(handles.iter().all(|h| h.is_stopped() && h.is_released()));
        scheduler.stop();

        scheduler.device_mut().advance(0.1);
        assert_eq!(scheduler.device().active_voices(), 0);
        assert!(scheduler.device_mut().advance(0.1).iter().all(|&s| s == 0.0));
        assert_eq!(scheduler.poll(), TransportState::Idle);
    }

    #[test]
    fn test_stopped_tail_does_not_fire_completion_for_next_session() {
        let (tl, _) = timeline(&[0.0]);
        let mut scheduler = Scheduler::new(device());
        scheduler.play(&tl).unwrap();
        scheduler.device_mut().advance(0.1);
        scheduler.stop();
        scheduler.play(&tl).unwrap();
        scheduler.device_mut().advance(0.1);
        assert_eq!(scheduler.poll(), TransportState::Playing);
    }

    #[test]
    fn test_position_tracks_clock() {
        let (tl, _) = timeline(&[0.0]);
        let mut scheduler = Scheduler::new(device());
        scheduler.device_mut().advance(0.25);
        scheduler.play(&tl).unwrap();
        scheduler.device_mut().advance(0.5);
        let position = scheduler.position().unwrap();
        assert!((position - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_speed_extends_tail() {
        let (mut tl, s) = timeline(&[0.0]);
        tl.edit_sample(s, SampleEdit { speed: 0.5, pitch: 0.0, start_point: 0.0, end_point: None }).unwrap();
        let mut scheduler = Scheduler::new(device());
        scheduler.play(&tl).unwrap();
        scheduler.device_mut().advance(1.5);
        assert_eq!(scheduler.poll(), TransportState::Playing);
        scheduler.device_mut().advance(0.5);
        assert_eq!(scheduler.poll(), TransportState::Idle);
    }

    #[test]
    fn test_toggle() {
        let (tl, _) = timeline(&[0.0]);
        let mut scheduler = Scheduler::new(device());
        assert_eq!(scheduler.toggle(&tl).unwrap(), TransportState::Playing);
        assert_eq!(scheduler.toggle(&tl).unwrap(), TransportState::Idle);
    }

    #[test]
    fn test_dangling_placement_skipped() {
        let (mut tl, _) = timeline(&[0.0]);
        let track = tl.tracks()[0].id;
        tl.track_mut(track).unwrap().add_placement(Placement::new(SampleId(99), 0.5));
        let mut scheduler = Scheduler::new(device());
        let report = scheduler.play(&tl).unwrap();
        assert_eq!((report.scheduled, report.skipped), (1, 1));
    }

    #[test]
    fn test_preview_updates_and_finishes() {
        let (tl, s) = timeline(&[]);
        let mut scheduler = Scheduler::new(device());
        let sample = tl.sample(s).unwrap();
        scheduler.start_preview(sample);
        assert!(scheduler.is_previewing());

        scheduler.device_mut().advance(0.1);
        scheduler.update_preview(2.0, 0.0).unwrap();
        assert!(scheduler.update_preview(0.0, 0.0).is_err());
        assert!(scheduler.update_preview(1.0, f64::NAN).is_err());

        scheduler.device_mut().advance(1.0);
        scheduler.poll();
        assert!(!scheduler.is_previewing());
        assert_eq!(scheduler.state(), TransportState::Idle);
    }

    #[test]
    fn test_stopped_preview_is_not_treated_as_finished() {
        let (tl, s) = timeline(&[]);
        let mut scheduler = Scheduler::new(device());
        scheduler.start_preview(tl.sample(s).unwrap());
        scheduler.device_mut().advance(0.1);

        if let Some(preview) = &scheduler.preview {
            preview.handle.stop();
        }
        scheduler.device_mut().advance(0.1);
        scheduler.poll();
        assert!(scheduler.is_previewing());

        scheduler.stop_preview();
        assert!(!scheduler.is_previewing());
    }

    #[test]
    fn test_preview_is_independent_of_transport() {
        let (tl, s) = timeline(&[0.0]);
        let mut scheduler = Scheduler::new(device());
        scheduler.play(&tl).unwrap();
        scheduler.start_preview(tl.sample(s).unwrap());
        scheduler.stop_preview();
        scheduler.device_mut().advance(0.1);
        assert_eq!(scheduler.poll(), TransportState::Playing);
        assert!(!scheduler.is_previewing());
    }
}
