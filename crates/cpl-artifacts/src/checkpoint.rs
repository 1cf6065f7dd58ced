use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cpl_core::{RepairRequest, RunId, Segment, Stage};

use crate::atomic::{self, AtomicWriteError};
use crate::store::FsArtifactStore;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint at {0}")]
    Missing(PathBuf),
    #[error("read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse checkpoint {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint data does not match stage {stage}: {source}")]
    PayloadShape {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint belongs to run {found}, expected {expected}")]
    RunMismatch { expected: RunId, found: RunId },
    #[error(transparent)]
    Write(#[from] AtomicWriteError),
}

/// Input of PREP: the script as accepted at run start.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunInput {
    pub created_at: String,
    pub language: String,
    pub segments: Vec<Segment>,
}

/// Output of PREP.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prepared {
    pub created_at: String,
    pub language: String,
    pub segments: Vec<Segment>,
    pub repair: RepairRequest,
}

/// Output of SYNTHESIZE.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Synthesized {
    pub created_at: String,
    pub segments: Vec<Segment>,
}

/// Output of SYNC.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Synced {
    pub manifest_path: String,
    pub segments: Vec<Segment>,
}

/// Output of ASSEMBLE.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Assembled {
    pub manifest_path: String,
    pub output_path: String,
}

/// Output of PROBE; the terminal record of a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProbeReport {
    pub output_path: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub has_video: Option<bool>,
    #[serde(default)]
    pub has_audio: Option<bool>,
    /// Set when no inspector was available and only size was checked.
    pub degraded: bool,
}

/// Checkpoint data keyed by the stage it precedes. The variant fixes the
/// stage, so a stage/payload mismatch cannot be written.
#[derive(Clone, Debug, PartialEq)]
pub enum StagePayload {
    Prep(RunInput),
    Synthesize(Prepared),
    Sync(Synthesized),
    Assemble(Synced),
    Probe(Assembled),
    Done(ProbeReport),
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Prep(_) => Stage::Prep,
            StagePayload::Synthesize(_) => Stage::Synthesize,
            StagePayload::Sync(_) => Stage::Sync,
            StagePayload::Assemble(_) => Stage::Assemble,
            StagePayload::Probe(_) => Stage::Probe,
            StagePayload::Done(_) => Stage::Done,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            StagePayload::Prep(p) => serde_json::to_value(p),
            StagePayload::Synthesize(p) => serde_json::to_value(p),
            StagePayload::Sync(p) => serde_json::to_value(p),
            StagePayload::Assemble(p) => serde_json::to_value(p),
            StagePayload::Probe(p) => serde_json::to_value(p),
            StagePayload::Done(p) => serde_json::to_value(p),
        }
    }

    pub fn decode(stage: Stage, data: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let data = data.clone();
        Ok(match stage {
            Stage::Prep => StagePayload::Prep(serde_json::from_value(data)?),
            Stage::Synthesize => StagePayload::Synthesize(serde_json::from_value(data)?),
            Stage::Sync => StagePayload::Sync(serde_json::from_value(data)?),
            Stage::Assemble => StagePayload::Assemble(serde_json::from_value(data)?),
            Stage::Probe => StagePayload::Probe(serde_json::from_value(data)?),
            Stage::Done => StagePayload::Done(serde_json::from_value(data)?),
        })
    }

    /// Segments carried by the payload, if the stage has any.
    pub fn segments(&self) -> &[Segment] {
        match self {
            StagePayload::Prep(p) => &p.segments,
            StagePayload::Synthesize(p) => &p.segments,
            StagePayload::Sync(p) => &p.segments,
            StagePayload::Assemble(p) => &p.segments,
            StagePayload::Probe(_) | StagePayload::Done(_) => &[],
        }
    }
}

/// On-disk checkpoint document: `stage` is the next stage to run and `data`
/// is the output of the stage before it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub stage: Stage,
    pub updated_at: String,
    pub data: serde_json::Value,
}

impl Checkpoint {
    pub fn new(run_id: RunId, payload: &StagePayload) -> Result<Self, CheckpointError> {
        let stage = payload.stage();
        let data = payload.to_value().map_err(|source| CheckpointError::PayloadShape { stage, source })?;
        Ok(Self {
            run_id,
            stage,
            updated_at: chrono::Utc::now().to_rfc3339(),
            data,
        })
    }

    pub fn payload(&self) -> Result<StagePayload, CheckpointError> {
        StagePayload::decode(self.stage, &self.data)
            .map_err(|source| CheckpointError::PayloadShape { stage: self.stage, source })
    }
}

/// A run as seen through its latest checkpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub id: RunId,
    pub stage: Stage,
    pub payload: StagePayload,
}

impl Run {
    pub fn from_checkpoint(cp: &Checkpoint) -> Result<Self, CheckpointError> {
        Ok(Self {
            id: cp.run_id.clone(),
            stage: cp.stage,
            payload: cp.payload()?,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        self.payload.segments()
    }
}

/// Per-run checkpoint document. One writer per run is assumed; nothing here
/// takes a lock.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(run_dir: &Path) -> Self {
        Self { path: FsArtifactStore::checkpoint_path(run_dir) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Checkpoint, CheckpointError> {
        self.load_optional()?.ok_or_else(|| CheckpointError::Missing(self.path.clone()))
    }

    pub fn load_optional(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Read { path: self.path.clone(), source }),
        };
        let cp = serde_json::from_slice(&bytes)
            .map_err(|source| CheckpointError::Parse { path: self.path.clone(), source })?;
        Ok(Some(cp))
    }

    pub fn save(&self, cp: &Checkpoint) -> Result<(), CheckpointError> {
        atomic::write_json(&self.path, cp)?;
        tracing::debug!(run_id = %cp.run_id, stage = %cp.stage, "checkpoint saved");
        Ok(())
    }

    /// Replace the checkpoint with `payload`, whose variant decides the stage.
    pub fn advance(&self, run_id: &RunId, payload: &StagePayload) -> Result<Checkpoint, CheckpointError> {
        if let Some(current) = self.load_optional()? {
            if &current.run_id != run_id {
                return Err(CheckpointError::RunMismatch { expected: run_id.clone(), found: current.run_id });
            }
        }
        let cp = Checkpoint::new(run_id.clone(), payload)?;
        self.save(&cp)?;
        Ok(cp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn input() -> StagePayload {
        StagePayload::Prep(RunInput {
            created_at: "2026-01-01T00:00:00Z".into(),
            language: "en".into(),
            segments: vec![Segment::new("s1", "hook", "hello world").with_target(2.0)],
        })
    }

    #[test]
    fn advance_then_load_round_trips_payload() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(store.load_optional().unwrap().is_none());

        let run_id = RunId::from_str("r1");
        store.advance(&run_id, &input()).unwrap();
        let cp = store.load().unwrap();
        assert_eq!(cp.stage, Stage::Prep);
        assert_eq!(cp.payload().unwrap(), input());
        assert_eq!(Run::from_checkpoint(&cp).unwrap().segments().len(), 1);
    }

    #[test]
    fn mismatched_payload_shape_is_rejected() {
        let cp = Checkpoint {
            run_id: RunId::from_str("r1"),
            stage: Stage::Probe,
            updated_at: "now".into(),
            data: serde_json::json!({"segments": []}),
        };
        assert!(matches!(cp.payload(), Err(CheckpointError::PayloadShape { stage: Stage::Probe, .. })));
    }

    #[test]
    fn refuses_to_overwrite_another_runs_checkpoint() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.advance(&RunId::from_str("r1"), &input()).unwrap();
        let err = store.advance(&RunId::from_str("r2"), &input()).unwrap_err();
        assert!(matches!(err, CheckpointError::RunMismatch { .. }));
    }

    #[test]
    fn missing_checkpoint_is_named() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(matches!(store.load(), Err(CheckpointError::Missing(_))));
    }
}
