//! Matched-segment results from the external sample finder
//!
//! The finder answers with JSON of the form
//! `{"data": [{"speed", "pitch", "target": {"start", "end"}, "original": {"start", "end"}}]}`
//! where `original` is the range inside the sampled source and `target.start`
//! is where that range appears in the target track.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Time range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

/// One segment of the source found in the target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedSegment {
    pub speed: f64,
    pub pitch: f64,
    pub source_range: TimeRange,
    pub target_offset: f64,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    speed: f64,
    pitch: f64,
    target: TimeRange,
    original: TimeRange,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    data: Vec<WireSegment>,
}

impl From<WireSegment> for MatchedSegment {
    fn from(w: WireSegment) -> Self {
        Self {
            speed: w.speed,
            pitch: w.pitch,
            source_range: w.original,
            target_offset: w.target.start,
        }
    }
}

/// Parse a finder response
pub fn parse_matches(json: &str) -> Result<Vec<MatchedSegment>> {
    let response: WireResponse = serde_json::from_str(json)?;
    Ok(response.data.into_iter().map(MatchedSegment::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "data": [
            {
                "speed": 1.27241005081943,
                "pitch": 4,
                "target": { "start": 0.0, "end": 34.58 },
                "original": { "start": 193.6099133268447, "end": 237.60985289002036 }
            },
            {
                "speed": 1.27241005081943,
                "pitch": 4,
                "target": { "start": 178.5, "end": 217.3 },
                "original": { "start": 202.7712656985844, "end": 252.14077567037825 }
            }
        ]
    }"#;

    #[test]
    fn test_parse_response() {
        let segments = parse_matches(RESPONSE).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].target_offset, 178.5);
        assert_eq!(segments[1].pitch, 4.0);
        assert_eq!(segments[0].source_range.start, 193.6099133268447);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_matches("{\"data\": [{}]}").is_err());
        assert!(parse_matches("not json").is_err());
    }
}
