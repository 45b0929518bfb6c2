//! JSON session files
//!
//! ```json
//! {
//!   "samples": [{ "name": "loop", "path": "loop.wav", "speed": 1.5, "pitch": -2 }],
//!   "tracks": [{ "placements": [{ "sample": "loop", "start_time": 0.0 }] }],
//!   "matches": [{ "file": "matches.json", "source": "loop" }]
//! }
//! ```
//!
//! Relative paths resolve against the session file's directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use howsample_core::{parse_matches, HowsampleError, Placement, SampleEdit, SampleId, SampleKind, Timeline};
use howsample_services::load_sample_file;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub(crate) struct SessionFile {
    #[serde(default)]
    pub samples: Vec<SampleEntry>,
    #[serde(default)]
    pub tracks: Vec<TrackEntry>,
    #[serde(default)]
    pub matches: Vec<MatchEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SampleEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub kind: SampleKind,
    pub speed: Option<f64>,
    pub pitch: Option<f64>,
    pub start_point: Option<f64>,
    pub end_point: Option<f64>,
}

impl SampleEntry {
    fn edit(&self) -> Option<SampleEdit> {
        if self.speed.is_none() && self.pitch.is_none() && self.start_point.is_none() && self.end_point.is_none() {
            return None;
        }
        let defaults = SampleEdit::default();
        Some(SampleEdit {
            speed: self.speed.unwrap_or(defaults.speed),
            pitch: self.pitch.unwrap_or(defaults.pitch),
            start_point: self.start_point.unwrap_or(defaults.start_point),
            end_point: self.end_point,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackEntry {
    #[serde(default)]
    pub placements: Vec<PlacementEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlacementEntry {
    pub sample: String,
    pub start_time: f64,
}

/// A finder result to lay out as derived samples
#[derive(Debug, Deserialize)]
pub(crate) struct MatchEntry {
    pub file: PathBuf,
    /// Sample the matched ranges are cut from
    pub source: String,
    /// Index into `tracks`; a new track when absent
    pub track: Option<usize>,
}

/// Session loaded into a timeline
#[derive(Debug)]
pub(crate) struct Session {
    pub timeline: Timeline,
    pub names: HashMap<String, SampleId>,
    /// Samples whose audio could not be decoded
    pub failed: Vec<String>,
}

impl SessionFile {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading session {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing session {}", path.display()))
    }

    /// Decode every sample and build the timeline.
    ///
    /// A sample that fails to decode is left out; its placements stay on
    /// their tracks unresolved and are skipped at playback and export.
    pub fn load(self, base_dir: &Path, engine_rate: u32) -> Result<Session> {
        let mut timeline = Timeline::empty();
        let mut names = HashMap::new();
        let mut failed = HashMap::new();

        for entry in &self.samples {
            if names.contains_key(&entry.name) || failed.contains_key(&entry.name) {
                bail!("duplicate sample name '{}'", entry.name);
            }
            let path = base_dir.join(&entry.path);
            let audio = match load_sample_file(&path, Some(engine_rate)) {
                Ok(audio) => audio,
                Err(e) => {
                    warn!(sample = %entry.name, path = %path.display(), "Skipping sample: {}", e);
                    failed.insert(entry.name.clone(), timeline.reserve_sample_id());
                    continue;
                }
            };
            let id = timeline.add_sample(entry.name.clone(), Arc::new(audio), entry.kind)?;
            if let Some(edit) = entry.edit() {
                timeline
                    .edit_sample(id, edit)
                    .with_context(|| format!("applying parameters of sample '{}'", entry.name))?;
            }
            names.insert(entry.name.clone(), id);
        }

        let mut track_ids = Vec::with_capacity(self.tracks.len());
        for track in &self.tracks {
            let track_id = timeline.add_track();
            for placement in &track.placements {
                if let Some(&sample) = names.get(&placement.sample) {
                    timeline.place(track_id, sample, placement.start_time)?;
                } else if let Some(&reserved) = failed.get(&placement.sample) {
                    let start = placement.start_time;
                    if !start.is_finite() || start < 0.0 {
                        return Err(HowsampleError::InvalidStartTime(start).into());
                    }
                    if let Some(track) = timeline.track_mut(track_id) {
                        track.add_placement(Placement::new(reserved, start));
                    }
                } else {
                    bail!("placement references unknown sample '{}'", placement.sample);
                }
            }
            track_ids.push(track_id);
        }

        for entry in &self.matches {
            if failed.contains_key(&entry.source) {
                warn!(file = %entry.file.display(), sample = %entry.source, "Skipping matches of an undecodable sample");
                continue;
            }
            let Some(&source) = names.get(&entry.source) else {
                bail!("match file {} references unknown sample '{}'", entry.file.display(), entry.source);
            };
            let track = match entry.track {
                Some(index) => *track_ids
                    .get(index)
                    .with_context(|| format!("match file {} targets missing track {}", entry.file.display(), index))?,
                None => timeline.add_track(),
            };
            let path = base_dir.join(&entry.file);
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let segments = parse_matches(&json).with_context(|| format!("parsing {}", path.display()))?;
            let created = timeline.load_matches(track, source, &segments)?;
            info!(file = %path.display(), segments = created.len(), "Loaded matched segments");
        }

        if timeline.tracks().is_empty() {
            timeline.add_track();
        }

        let mut failed: Vec<String> = failed.into_keys().collect();
        failed.sort();
        Ok(Session { timeline, names, failed })
    }
}

/// Read and load a session file
pub(crate) fn load_session(path: &Path, engine_rate: u32) -> Result<Session> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    SessionFile::read(path)?.load(base_dir, engine_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use howsample_services::{encode_wav, export_mix, quantize, RenderConfig, StageConfig, WAV_HEADER_LEN};

    fn write_wav(dir: &Path, name: &str, frames: usize, rate: u32) {
        let bytes = encode_wav(&[vec![0.25; frames]], rate).unwrap();
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn test_load_session_with_params_and_matches() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "source.wav", 8000, 8000);
        std::fs::write(
            dir.path().join("matches.json"),
            r#"{"data": [
                {"speed": 1.0, "pitch": 0, "target": {"start": 0.5, "end": 1.0}, "original": {"start": 0.0, "end": 0.5}},
                {"speed": 2.0, "pitch": 3, "target": {"start": 3.0, "end": 3.25}, "original": {"start": 0.5, "end": 1.0}}
            ]}"#,
        )
        .unwrap();
        let session = r#"{
            "samples": [{"name": "src", "path": "source.wav", "kind": "sampled", "speed": 2.0, "end_point": 0.5}],
            "tracks": [{"placements": [{"sample": "src", "start_time": 0.0}, {"sample": "src", "start_time": 1.0}]}],
            "matches": [{"file": "matches.json", "source": "src", "track": 0}]
        }"#;
        std::fs::write(dir.path().join("session.json"), session).unwrap();

        let loaded = load_session(&dir.path().join("session.json"), 8000).unwrap();
        let tl = &loaded.timeline;
        let src = tl.sample(loaded.names["src"]).unwrap();
        assert_eq!(src.kind, SampleKind::Sampled);
        assert_eq!(src.speed(), 2.0);
        assert_eq!(src.end_point(), 0.5);
        assert!(src.is_edited());

        assert_eq!(tl.tracks().len(), 1);
        assert_eq!(tl.tracks()[0].placements.len(), 4);
        assert_eq!(tl.samples_of_kind(SampleKind::Derived).count(), 2);
    }

    #[test]
    fn test_unknown_sample_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = r#"{"tracks": [{"placements": [{"sample": "nope", "start_time": 0.0}]}]}"#;
        std::fs::write(dir.path().join("s.json"), session).unwrap();
        let err = load_session(&dir.path().join("s.json"), 44100).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_undecodable_sample_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "good.wav", 1000, 1000);
        std::fs::write(dir.path().join("bad.wav"), b"RIFF\x10\x00\x00\x00not audio").unwrap();
        std::fs::write(dir.path().join("m.json"), r#"{"data": []}"#).unwrap();
        let session = r#"{
            "samples": [{"name": "good", "path": "good.wav"}, {"name": "bad", "path": "bad.wav"}],
            "tracks": [{"placements": [{"sample": "bad", "start_time": 0.0}, {"sample": "good", "start_time": 0.5}]}],
            "matches": [{"file": "m.json", "source": "bad", "track": 0}]
        }"#;
        std::fs::write(dir.path().join("s.json"), session).unwrap();

        let loaded = load_session(&dir.path().join("s.json"), 1000).unwrap();
        assert_eq!(loaded.failed, vec!["bad".to_string()]);
        assert_eq!(loaded.timeline.samples().len(), 1);
        assert!(!loaded.names.contains_key("bad"));
        assert_eq!(loaded.timeline.tracks()[0].placements.len(), 2);
        assert_eq!(loaded.timeline.end_time(), 1.5);

        let config = RenderConfig {
            sample_rate: 1000,
            channels: 1,
            stage: StageConfig { fft_size: 256, oversampling: 4 },
            max_duration: None,
        };
        let wav = export_mix(&loaded.timeline, &config).unwrap();
        assert_eq!(wav.len(), WAV_HEADER_LEN + 1500 * 2);
        let first_good = WAV_HEADER_LEN + 500 * 2;
        assert!(wav[WAV_HEADER_LEN..first_good].iter().all(|&b| b == 0));
        assert_eq!(i16::from_le_bytes([wav[first_good], wav[first_good + 1]]), quantize(0.25));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "a.wav", 100, 1000);
        let session = r#"{"samples": [{"name": "a", "path": "a.wav"}, {"name": "a", "path": "a.wav"}]}"#;
        std::fs::write(dir.path().join("s.json"), session).unwrap();
        let err = load_session(&dir.path().join("s.json"), 1000).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_resamples_to_engine_rate() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(dir.path(), "a.wav", 4000, 8000);
        std::fs::write(dir.path().join("s.json"), r#"{"samples": [{"name": "a", "path": "a.wav"}]}"#).unwrap();
        let loaded = load_session(&dir.path().join("s.json"), 16000).unwrap();
        let a = loaded.timeline.sample(loaded.names["a"]).unwrap();
        assert_eq!(a.audio().sample_rate(), 16000);
        assert!(!a.is_edited());
        assert_eq!(loaded.timeline.tracks().len(), 1);
    }
}
