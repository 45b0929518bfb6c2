//! howsample-core: Domain types for the howsample sample timeline

mod error;
pub mod matches;
pub mod plan;
mod sample;
pub mod stretch;
mod timeline;
mod track;
mod transport;

pub use error::{HowsampleError, Result};
pub use matches::{parse_matches, MatchedSegment, TimeRange};
pub use plan::{GraphPlan, SkippedPlacement, TimeOrigin, VoicePlan};
pub use sample::{DecodedAudio, SampleData, SampleEdit, SampleId, SampleKind};
pub use stretch::StretchParams;
pub use timeline::Timeline;
pub use track::{Placement, Track, TrackId};
pub use transport::{format_time, TailSource, Transport, TransportState};
