//! Graph description shared by live playback and offline mixdown
//!
//! A [`GraphPlan`] lists one voice (source → pitch-shift → sink) per resolved
//! placement, with its absolute start instant on the target clock. Live
//! playback builds it against the device clock, mixdown against the render
//! origin; the two differ only by a constant offset.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::sample::{DecodedAudio, SampleId};
use crate::stretch::StretchParams;
use crate::timeline::Timeline;
use crate::track::TrackId;

/// Where scheduled start instants are measured from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeOrigin {
    /// Device clock reading at the moment playback began
    DeviceClock(f64),
    /// `t = 0` of an offline render
    RenderStart,
}

impl TimeOrigin {
    pub fn instant(self) -> f64 {
        match self {
            Self::DeviceClock(epoch) => epoch,
            Self::RenderStart => 0.0,
        }
    }
}

/// Everything needed to build one voice
#[derive(Debug, Clone)]
pub struct VoicePlan {
    pub track_id: TrackId,
    pub sample_id: SampleId,
    pub audio: Arc<DecodedAudio>,
    /// Trim window start in source seconds
    pub offset: f64,
    /// Trim window length in source seconds
    pub duration: f64,
    pub params: StretchParams,
    /// Absolute start instant on the target clock
    pub start_at: f64,
}

impl VoicePlan {
    /// Seconds the voice sounds for
    pub fn output_duration(&self) -> f64 {
        self.params.output_duration(self.duration)
    }

    /// Projected end instant on the target clock
    pub fn end_at(&self) -> f64 {
        self.start_at + self.output_duration()
    }
}

/// A placement whose sample could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedPlacement {
    pub track_id: TrackId,
    pub sample_id: SampleId,
}

#[derive(Debug, Clone)]
pub struct GraphPlan {
    pub origin: TimeOrigin,
    pub voices: Vec<VoicePlan>,
    pub skipped: Vec<SkippedPlacement>,
}

impl GraphPlan {
    /// Describe the graph for every placement of every track.
    ///
    /// Placements referencing an unknown sample are skipped and logged.
    pub fn build(timeline: &Timeline, origin: TimeOrigin) -> Self {
        let base = origin.instant();
        let mut voices = Vec::new();
        let mut skipped = Vec::new();

        for track in timeline.tracks() {
            for placement in &track.placements {
                let Some(sample) = timeline.sample(placement.sample_id) else {
                    warn!(track = track.id.0, sample = placement.sample_id.0, "Skipping placement of unknown sample");
                    skipped.push(SkippedPlacement { track_id: track.id, sample_id: placement.sample_id });
                    continue;
                };

                let voice = VoicePlan {
                    track_id: track.id,
                    sample_id: sample.id,
                    audio: Arc::clone(sample.audio()),
                    offset: sample.start_point(),
                    duration: sample.window_duration(),
                    params: sample.params(),
                    start_at: base + placement.start_time,
                };
                trace!(sample = sample.id.0, start_at = voice.start_at, end_at = voice.end_at(), "Planned voice");
                voices.push(voice);
            }
        }

        Self { origin, voices, skipped }
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Index of the voice that ends last (first one wins ties)
    pub fn tail(&self) -> Option<usize> {
        let mut tail: Option<(usize, f64)> = None;
        for (i, v) in self.voices.iter().enumerate() {
            let end = v.end_at();
            if tail.is_none_or(|(_, best)| end > best) {
                tail = Some((i, end));
            }
        }
        tail.map(|(i, _)| i)
    }

    /// Projected end of the whole graph on the target clock
    pub fn end_at(&self) -> Option<f64> {
        self.tail().map(|i| self.voices[i].end_at())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{SampleEdit, SampleKind};
    use crate::track::Placement;
    use approx::assert_relative_eq;

    fn timeline() -> (Timeline, SampleId) {
        let mut tl = Timeline::new();
        let track = tl.tracks()[0].id;
        let audio = Arc::new(DecodedAudio::new(vec![vec![0.5; 1000]], 1000).unwrap());
        let s = tl.add_sample("one", audio, SampleKind::User).unwrap();
        tl.place(track, s, 0.0).unwrap();
        tl.place(track, s, 2.0).unwrap();
        let second = tl.add_track();
        tl.place(second, s, 0.75).unwrap();
        (tl, s)
    }

    #[test]
    fn test_render_origin_uses_start_times() {
        let (tl, _) = timeline();
        let plan = GraphPlan::build(&tl, TimeOrigin::RenderStart);
        let starts: Vec<f64> = plan.voices.iter().map(|v| v.start_at).collect();
        assert_eq!(starts, vec![0.0, 2.0, 0.75]);
        assert_eq!(plan.tail(), Some(1));
        assert_eq!(plan.end_at(), Some(3.0));
    }

    #[test]
    fn test_translation_invariance() {
        let (tl, _) = timeline();
        let zero = GraphPlan::build(&tl, TimeOrigin::RenderStart);
        for delta in [0.0, 0.5, 1234.567] {
            let shifted = GraphPlan::build(&tl, TimeOrigin::DeviceClock(delta));
            assert_eq!(shifted.voices.len(), zero.voices.len());
            for (a, b) in zero.voices.iter().zip(&shifted.voices) {
                assert_relative_eq!(b.start_at - a.start_at, delta, epsilon = 1e-9);
                assert_eq!(a.params, b.params);
                assert_eq!(a.duration, b.duration);
            }
            assert_eq!(shifted.tail(), zero.tail());
        }
    }

    #[test]
    fn test_dangling_placement_skipped() {
        let mut tl = Timeline::new();
        let track = tl.tracks()[0].id;
        let audio = Arc::new(DecodedAudio::new(vec![vec![0.5; 100]], 100).unwrap());
        let s = tl.add_sample("one", audio, SampleKind::User).unwrap();
        tl.place(track, s, 0.0).unwrap();
        tl.track_mut(track).unwrap().add_placement(Placement::new(SampleId(77), 1.0));

        let plan = GraphPlan::build(&tl, TimeOrigin::DeviceClock(3.0));
        assert_eq!(plan.voices.len(), 1);
        assert_eq!(plan.skipped, vec![SkippedPlacement { track_id: track, sample_id: SampleId(77) }]);
    }

    #[test]
    fn test_trim_and_params_flow_into_plan() {
        let (mut tl, s) = timeline();
        tl.edit_sample(s, SampleEdit { speed: 2.0, pitch: 12.0, start_point: 0.25, end_point: Some(0.75) }).unwrap();
        let plan = GraphPlan::build(&tl, TimeOrigin::RenderStart);
        let v = &plan.voices[0];
        assert_eq!(v.offset, 0.25);
        assert_eq!(v.duration, 0.5);
        assert_eq!(v.params.playback_rate, 2.0);
        assert_relative_eq!(v.params.pitch_factor, 1.0);
        assert_relative_eq!(v.output_duration(), 0.25);
    }

    #[test]
    fn test_empty_plan() {
        let plan = GraphPlan::build(&Timeline::new(), TimeOrigin::RenderStart);
        assert!(plan.is_empty());
        assert_eq!(plan.tail(), None);
        assert_eq!(plan.end_at(), None);
    }
}
