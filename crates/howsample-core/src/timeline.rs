//! Timeline containing samples and the tracks that place them

use std::sync::Arc;

use tracing::debug;

use crate::error::{HowsampleError, Result};
use crate::matches::MatchedSegment;
use crate::sample::{DecodedAudio, SampleData, SampleEdit, SampleId, SampleKind};
use crate::track::{Placement, Track, TrackId};

/// The session: every known sample plus the tracks placing them
#[derive(Debug, Clone)]
pub struct Timeline {
    samples: Vec<SampleData>,
    tracks: Vec<Track>,
    next_sample_id: u64,
    next_track_id: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Empty timeline with a single track, as a fresh session starts
    pub fn new() -> Self {
        let mut timeline = Self::empty();
        timeline.add_track();
        timeline
    }

    pub fn empty() -> Self {
        Self {
            samples: Vec::new(),
            tracks: Vec::new(),
            next_sample_id: 1,
            next_track_id: 1,
        }
    }

    fn alloc_sample_id(&mut self) -> SampleId {
        let id = SampleId(self.next_sample_id);
        self.next_sample_id += 1;
        id
    }

    /// Allocate an id no sample will ever hold. Placements referencing it
    /// stay unresolved and are skipped when a plan is built.
    pub fn reserve_sample_id(&mut self) -> SampleId {
        self.alloc_sample_id()
    }

    /// Register decoded audio as a new sample with default parameters
    pub fn add_sample(&mut self, name: impl Into<String>, audio: Arc<DecodedAudio>, kind: SampleKind) -> Result<SampleId> {
        let id = SampleId(self.next_sample_id);
        let sample = SampleData::new(id, name, audio, kind)?;
        self.next_sample_id += 1;
        self.samples.push(sample);
        Ok(id)
    }

    pub fn sample(&self, id: SampleId) -> Option<&SampleData> {
        self.samples.iter().find(|s| s.id == id)
    }

    pub fn samples(&self) -> &[SampleData] {
        &self.samples
    }

    pub fn samples_of_kind(&self, kind: SampleKind) -> impl Iterator<Item = &SampleData> {
        self.samples.iter().filter(move |s| s.kind == kind)
    }

    /// Edit a sample in place
    pub fn edit_sample(&mut self, id: SampleId, edit: SampleEdit) -> Result<()> {
        let sample = self
            .samples
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(HowsampleError::SampleNotFound(id.0))?;
        sample.apply_edit(edit)
    }

    /// Add an edited copy of a sample, leaving the original untouched
    pub fn derive_sample(&mut self, id: SampleId, edit: SampleEdit) -> Result<SampleId> {
        let source = self.sample(id).ok_or(HowsampleError::SampleNotFound(id.0))?;
        let derived = source.derive(SampleId(self.next_sample_id), edit)?;
        let new_id = self.alloc_sample_id();
        self.samples.push(derived);
        Ok(new_id)
    }

    pub fn add_track(&mut self) -> TrackId {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        self.tracks.push(Track::new(id));
        id
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// Place a known sample on a track
    pub fn place(&mut self, track: TrackId, sample: SampleId, start_time: f64) -> Result<()> {
        if !start_time.is_finite() || start_time < 0.0 {
            return Err(HowsampleError::InvalidStartTime(start_time));
        }
        if self.sample(sample).is_none() {
            return Err(HowsampleError::SampleNotFound(sample.0));
        }
        let track = self.track_mut(track).ok_or(HowsampleError::TrackNotFound(track.0))?;
        track.add_placement(Placement::new(sample, start_time));
        Ok(())
    }

    /// Turn matched segments of `source` into derived samples placed on `track`.
    ///
    /// Either every segment lands or none does.
    pub fn load_matches(&mut self, track: TrackId, source: SampleId, segments: &[MatchedSegment]) -> Result<Vec<SampleId>> {
        if self.track(track).is_none() {
            return Err(HowsampleError::TrackNotFound(track.0));
        }
        let original = self.sample(source).ok_or(HowsampleError::SampleNotFound(source.0))?;

        let mut derived = Vec::with_capacity(segments.len());
        for (i, seg) in segments.iter().enumerate() {
            if !seg.target_offset.is_finite() || seg.target_offset < 0.0 {
                return Err(HowsampleError::InvalidStartTime(seg.target_offset));
            }
            let edit = SampleEdit {
                speed: seg.speed,
                pitch: seg.pitch,
                start_point: seg.source_range.start,
                end_point: Some(seg.source_range.end),
            };
            let mut sample = original.derive(SampleId(self.next_sample_id + i as u64), edit)?;
            sample.kind = SampleKind::Derived;
            sample.name = format!("{} @ {:.3}s", original.name, seg.target_offset);
            derived.push((sample, seg.target_offset));
        }

        let mut ids = Vec::with_capacity(derived.len());
        for (sample, offset) in derived {
            let id = self.alloc_sample_id();
            debug_assert_eq!(id, sample.id);
            self.samples.push(sample);
            if let Some(t) = self.track_mut(track) {
                t.add_placement(Placement::new(id, offset));
            }
            ids.push(id);
        }
        debug!(count = ids.len(), source = source.0, track = track.0, "Loaded matched segments");
        Ok(ids)
    }

    /// End of the last resolvable placement in seconds
    pub fn end_time(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.placements.iter())
            .filter_map(|p| self.sample(p.sample_id).map(|s| p.start_time + s.output_duration()))
            .fold(0.0, f64::max)
    }
}
