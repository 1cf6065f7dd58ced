use serde::{Deserialize, Serialize};

use cpl_core::{RunId, Segment, SegmentId};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestSegment {
    pub segment_id: SegmentId,
    pub kind: String,
    #[serde(default)]
    pub slot: Option<String>,
    pub approx_duration_sec: f64,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub video_path: Option<String>,
}

/// Input document for the external assembly tool. Written once per run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub manifest_version: u32,
    pub run_id: RunId,
    pub created_at: String,
    pub segments: Vec<ManifestSegment>,
}

impl Manifest {
    /// Every segment is listed, in script order. Segments without audio keep
    /// `audio_path: None` so the media gate can name them.
    pub fn from_segments(run_id: &RunId, created_at: &str, segments: &[Segment]) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION,
            run_id: run_id.clone(),
            created_at: created_at.to_string(),
            segments: segments
                .iter()
                .map(|s| ManifestSegment {
                    segment_id: s.segment_id.clone(),
                    kind: s.kind.clone(),
                    slot: s.slot.clone(),
                    approx_duration_sec: s.target().or(s.hints.estimated_sec).unwrap_or(0.0),
                    audio_path: s.audio_path.clone(),
                    video_path: None,
                })
                .collect(),
        }
    }

    pub fn total_duration_sec(&self) -> f64 {
        self.segments.iter().map(|s| s.approx_duration_sec).sum()
    }
}
