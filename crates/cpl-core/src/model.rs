use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::SegmentId;

/// Pipeline stages in their fixed execution order. There is no branching:
/// every run walks the same sequence.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Prep,
    Synthesize,
    Sync,
    Assemble,
    Probe,
    Done,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Prep,
        Stage::Synthesize,
        Stage::Sync,
        Stage::Assemble,
        Stage::Probe,
        Stage::Done,
    ];

    /// Successor in the fixed order; `None` for the terminal stage.
    pub fn next(self) -> Option<Stage> {
        let idx = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Prep => "PREP",
            Stage::Synthesize => "SYNTHESIZE",
            Stage::Sync => "SYNC",
            Stage::Assemble => "ASSEMBLE",
            Stage::Probe => "PROBE",
            Stage::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rungs of the duration repair ladder, cheapest first.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToneAction {
    Ok,
    RateTweak,
    FillerScrub,
    Escalate,
}

impl ToneAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ToneAction::Ok => "ok",
            ToneAction::RateTweak => "rate_tweak",
            ToneAction::FillerScrub => "filler_scrub",
            ToneAction::Escalate => "escalate",
        }
    }
}

/// Hints derived by the Tone Gate.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ToneHints {
    #[serde(default)]
    pub action: Option<ToneAction>,
    #[serde(default)]
    pub estimated_sec: Option<f64>,
    /// Playback-rate hint handed to synthesis.
    #[serde(default)]
    pub tts_rate: Option<f64>,
    #[serde(default)]
    pub needs_repair: bool,
    #[serde(default)]
    pub needs_human: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub kind: String,
    #[serde(default)]
    pub slot: Option<String>,
    pub text: String,
    #[serde(default)]
    pub target_duration_sec: Option<f64>,
    #[serde(default)]
    pub hints: ToneHints,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Segment {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            segment_id: SegmentId::from_str(id),
            kind: kind.into(),
            slot: None,
            text: text.into(),
            target_duration_sec: None,
            hints: ToneHints::default(),
            audio_path: None,
            fingerprint: None,
            cache_hit: false,
            error: None,
        }
    }

    pub fn with_target(mut self, secs: f64) -> Self {
        self.target_duration_sec = Some(secs);
        self
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    /// Target duration, treating unset and non-positive values alike.
    pub fn target(&self) -> Option<f64> {
        self.target_duration_sec.filter(|t| *t > 0.0)
    }

    /// Flagged segments are skipped by synthesis.
    pub fn is_flagged(&self) -> bool {
        self.hints.needs_repair || self.hints.needs_human
    }

    /// Record a failure on this segment; routes it to a human.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.hints.needs_human = true;
        self.error = Some(error.into());
    }
}

/// Planned script handed to a new run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Script {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}
