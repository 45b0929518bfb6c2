//! Track representation

use serde::{Deserialize, Serialize};

use crate::sample::SampleId;

/// Unique identifier for tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub u64);

/// One instance of a sample positioned on a track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub sample_id: SampleId,
    /// Position on the timeline in seconds
    pub start_time: f64,
}

impl Placement {
    pub fn new(sample_id: SampleId, start_time: f64) -> Self {
        Self { sample_id, start_time }
    }
}

/// A line of placements sharing one timeline axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub placements: Vec<Placement>,
}

impl Track {
    pub fn new(id: TrackId) -> Self {
        Self { id, placements: Vec::new() }
    }

    pub fn add_placement(&mut self, placement: Placement) {
        self.placements.push(placement);
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}
