use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use cpl_artifacts::{
    ArtifactStore, Assembled, CheckpointError, CheckpointStore, DigestCache, FsArtifactStore, Manifest, Prepared, Run,
    RunInput, StagePayload, Synced, Synthesized,
};
use cpl_core::{apply_ladder, is_listed, RunId, Script, Segment, Stage, VoiceProfile, DEFAULT_LANGUAGE};

use crate::collab::{
    Assembler, AudioPadder, CommandAssembler, CommandPadder, CommandSynthesizer, FfprobeInspector, Inspector,
    JsonlIncidents, JsonlTelemetry, LogIncidents, NoopTelemetry, PanicSink, SynthesisRequest, Synthesizer,
    TelemetryEvent, TelemetryRecord, TelemetrySink,
};
use crate::config::PipelineConfig;
use crate::media::{media_gate, render_probe, MediaGateError, ProbeError};
use crate::util::now_rfc3339;

pub const INCIDENT_STAGE_FAILED: &str = "stage_failed";

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("run {0} already has a checkpoint")]
    AlreadyStarted(RunId),
    #[error("invalid run id {0:?}: must be a single path component")]
    InvalidRunId(String),
    #[error("{stage}: {error:#}")]
    Artifacts { stage: Stage, error: anyhow::Error },
    #[error("media gate: {0}")]
    MediaGate(#[from] MediaGateError),
    #[error("assembly failed: {0:#}")]
    Assembly(anyhow::Error),
    #[error("render probe: {0}")]
    Probe(#[from] ProbeError),
}

/// Everything the orchestrator delegates to.
pub struct Collaborators {
    pub synthesizer: Box<dyn Synthesizer>,
    pub assembler: Box<dyn Assembler>,
    pub inspector: Option<Box<dyn Inspector>>,
    pub padder: Option<Box<dyn AudioPadder>>,
    pub telemetry: Box<dyn TelemetrySink>,
    pub incidents: Box<dyn PanicSink>,
}

impl Collaborators {
    /// Command-backed collaborators as configured. A missing inspector
    /// binary is not an error.
    pub fn from_config(cfg: &PipelineConfig, root: &Path) -> Self {
        let telemetry: Box<dyn TelemetrySink> = match cfg.telemetry_path(root) {
            Some(path) => Box::new(JsonlTelemetry::new(path)),
            None => Box::new(NoopTelemetry),
        };
        let incidents: Box<dyn PanicSink> = match cfg.incidents_path(root) {
            Some(path) => Box::new(JsonlIncidents::new(path)),
            None => Box::new(LogIncidents),
        };
        Self {
            synthesizer: Box::new(CommandSynthesizer::new(cfg.synthesis.clone())),
            assembler: Box::new(CommandAssembler::new(cfg.assembly.clone())),
            inspector: FfprobeInspector::detect(&cfg.probe).map(|i| Box::new(i) as Box<dyn Inspector>),
            padder: CommandPadder::from_config(&cfg.synthesis).map(|p| Box::new(p) as Box<dyn AudioPadder>),
            telemetry,
            incidents,
        }
    }
}

/// Drives runs through `PREP -> SYNTHESIZE -> SYNC -> ASSEMBLE -> PROBE ->
/// DONE`. The checkpoint only moves after a stage succeeds, so a failed or
/// interrupted stage is simply run again on resume.
pub struct Orchestrator {
    cfg: PipelineConfig,
    voice: VoiceProfile,
    store: FsArtifactStore,
    cache: DigestCache,
    collab: Collaborators,
}

impl Orchestrator {
    pub fn new(cfg: PipelineConfig, root: &Path, collab: Collaborators) -> Self {
        let store = FsArtifactStore::new(cfg.runs_root(root));
        let cache = DigestCache::new(cfg.cache_root(root), cfg.synthesis.audio_ext.clone());
        let voice = cfg.voice.profile();
        Self { cfg, voice, store, cache, collab }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.store.run_dir(run_id)
    }

    fn checkpoints(&self, run_id: &RunId) -> CheckpointStore {
        CheckpointStore::new(&self.run_dir(run_id))
    }

    fn check_run_id(run_id: &RunId) -> Result<(), StageError> {
        let mut parts = Path::new(run_id.as_str()).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(name)), None) if name == run_id.as_str() => Ok(()),
            _ => Err(StageError::InvalidRunId(run_id.to_string())),
        }
    }

    /// Write the PREP checkpoint for a new run without executing anything.
    pub fn begin(&self, script: Script, run_id: Option<RunId>) -> Result<RunId, StageError> {
        let run_id = run_id
            .or_else(|| script.run_id.clone().map(RunId::from_str))
            .unwrap_or_default();
        Self::check_run_id(&run_id)?;
        let run_dir = self
            .store
            .create_run_dir(&run_id)
            .map_err(|error| StageError::Artifacts { stage: Stage::Prep, error })?;
        let checkpoints = CheckpointStore::new(&run_dir);
        if checkpoints.exists() {
            return Err(StageError::AlreadyStarted(run_id));
        }

        let language = script.language.unwrap_or_else(|| self.cfg.tone.language.clone());
        let input = RunInput { created_at: now_rfc3339(), language, segments: script.segments };
        checkpoints.advance(&run_id, &StagePayload::Prep(input))?;
        info!(%run_id, dir = %run_dir.display(), "run created");
        Ok(run_id)
    }

    /// Create a run and drive it to completion.
    pub fn start(&self, script: Script, run_id: Option<RunId>) -> Result<Run, StageError> {
        let run_id = self.begin(script, run_id)?;
        self.resume(&run_id)
    }

    pub fn status(&self, run_id: &RunId) -> Result<Run, StageError> {
        Self::check_run_id(run_id)?;
        let cp = self.checkpoints(run_id).load()?;
        Ok(Run::from_checkpoint(&cp)?)
    }

    /// Continue from the stored checkpoint until DONE. A failing stage is
    /// reported to the incident sink once and returned; the checkpoint stays
    /// where it was.
    pub fn resume(&self, run_id: &RunId) -> Result<Run, StageError> {
        loop {
            let run = match self.step(run_id) {
                Ok(run) => run,
                Err((stage, err)) => {
                    let message = match stage {
                        Some(stage) => format!("{stage}: {err}"),
                        None => err.to_string(),
                    };
                    if let Err(e) = self.collab.incidents.report(INCIDENT_STAGE_FAILED, run_id, &message) {
                        warn!(%run_id, error = %e, "incident sink failed");
                    }
                    return Err(err);
                }
            };
            if run.stage.is_terminal() {
                info!(%run_id, "run complete");
                return Ok(run);
            }
        }
    }

    /// Execute the stage named by the checkpoint and advance it. Returns the
    /// run as of the new checkpoint, or the failing stage with its error. The
    /// stage is `None` when the checkpoint itself could not be read.
    pub fn step(&self, run_id: &RunId) -> Result<Run, (Option<Stage>, StageError)> {
        Self::check_run_id(run_id).map_err(|e| (None, e))?;
        let checkpoints = self.checkpoints(run_id);
        let cp = checkpoints.load().map_err(|e| (None, e.into()))?;
        let run = Run::from_checkpoint(&cp).map_err(|e| (Some(cp.stage), e.into()))?;
        if run.stage.is_terminal() {
            return Ok(run);
        }

        let stage = run.stage;
        self.emit(TelemetryRecord::new(TelemetryEvent::StageEnter, run_id, stage));
        info!(%run_id, %stage, "stage enter");
        let started = Instant::now();

        let outcome = self
            .execute(run_id, run.payload)
            .and_then(|next| Ok(checkpoints.advance(run_id, &next)?))
            .and_then(|cp| Ok(Run::from_checkpoint(&cp)?));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(next) => {
                let mut rec = TelemetryRecord::new(TelemetryEvent::StageDone, run_id, stage);
                rec.elapsed_ms = Some(elapsed_ms);
                self.emit(rec);
                info!(%run_id, %stage, next = %next.stage, elapsed_ms, "stage done");
                Ok(next)
            }
            Err(err) => {
                let mut rec = TelemetryRecord::new(TelemetryEvent::StageFail, run_id, stage);
                rec.elapsed_ms = Some(elapsed_ms);
                rec.detail = Some(err.to_string());
                self.emit(rec);
                error!(%run_id, %stage, error = %err, "stage failed");
                Err((Some(stage), err))
            }
        }
    }

    fn emit(&self, record: TelemetryRecord) {
        if let Err(e) = self.collab.telemetry.emit(&record) {
            warn!(run_id = %record.run_id, error = %e, "telemetry dropped");
        }
    }

    fn execute(&self, run_id: &RunId, payload: StagePayload) -> Result<StagePayload, StageError> {
        Ok(match payload {
            StagePayload::Prep(input) => StagePayload::Synthesize(self.prep(input)),
            StagePayload::Synthesize(prepared) => StagePayload::Sync(self.synthesize(run_id, prepared)),
            StagePayload::Sync(synthesized) => StagePayload::Assemble(self.sync(run_id, synthesized)?),
            StagePayload::Assemble(synced) => StagePayload::Probe(self.assemble(run_id, synced)?),
            StagePayload::Probe(assembled) => StagePayload::Done(render_probe(
                Path::new(&assembled.output_path),
                &self.cfg.probe,
                self.collab.inspector.as_deref(),
            )?),
            done @ StagePayload::Done(_) => done,
        })
    }

    fn prep(&self, input: RunInput) -> Prepared {
        if !is_listed(&input.language) {
            warn!(language = %input.language, fallback = DEFAULT_LANGUAGE, "no filler lexicon for language");
        }
        let report = apply_ladder(&input.segments, &self.cfg.tone.budget(), &input.language);
        let flagged = report.segments.iter().filter(|s| s.is_flagged()).count();
        info!(segments = report.segments.len(), flagged, repairs = report.repair.items.len(), "tone gate applied");
        Prepared { created_at: input.created_at, language: input.language, segments: report.segments, repair: report.repair }
    }

    fn synthesize(&self, run_id: &RunId, prepared: Prepared) -> Synthesized {
        let run_dir = self.run_dir(run_id);
        let segments = prepared
            .segments
            .into_iter()
            .map(|mut seg| {
                if seg.is_flagged() {
                    debug!(segment_id = %seg.segment_id, "flagged segment not synthesized");
                    return seg;
                }
                match self.synthesize_segment(run_id, &seg, &prepared.language) {
                    Ok((fingerprint, path, hit)) => {
                        seg.fingerprint = Some(fingerprint);
                        seg.cache_hit = hit;
                        seg.error = None;
                        seg.audio_path = Some(self.pad_to_target(&run_dir, &seg, path).display().to_string());
                    }
                    Err(e) => {
                        warn!(%run_id, segment_id = %seg.segment_id, error = %format!("{e:#}"), "synthesis failed");
                        seg.mark_failed(format!("{e:#}"));
                    }
                }
                seg
            })
            .collect();
        Synthesized { created_at: prepared.created_at, segments }
    }

    fn synthesize_segment(&self, run_id: &RunId, seg: &Segment, language: &str) -> anyhow::Result<(String, PathBuf, bool)> {
        let fingerprint = self.voice.fingerprint(&seg.text);
        if let Some(path) = self.cache.lookup(&fingerprint) {
            debug!(segment_id = %seg.segment_id, %fingerprint, "cache hit");
            return Ok((fingerprint, path, true));
        }
        let scratch = self.cache.reserve(&fingerprint)?;
        let request = SynthesisRequest { segment: seg, voice: &self.voice, language, fingerprint: &fingerprint };
        self.collab.synthesizer.synthesize(run_id, &request, scratch.path())?;
        let path = self.cache.admit(&fingerprint, scratch)?;
        Ok((fingerprint, path, false))
    }

    /// Run-local padded copy of `cached`, or `cached` itself when padding is
    /// off, not applicable, or fails.
    fn pad_to_target(&self, run_dir: &Path, seg: &Segment, cached: PathBuf) -> PathBuf {
        let (Some(padder), Some(target)) = (self.collab.padder.as_deref(), seg.target()) else {
            return cached;
        };
        if !self.cfg.synthesis.pad_to_target {
            return cached;
        }
        let padded = run_dir
            .join("audio")
            .join(format!("{}.{}", seg.segment_id, self.cfg.synthesis.audio_ext));
        if std::fs::metadata(&padded).map(|m| m.len() > 0).unwrap_or(false) {
            return padded;
        }
        let result = padded
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::copy(&cached, &padded).map(|_| ()))
            .map_err(anyhow::Error::from)
            .and_then(|_| padder.pad(&padded, target));
        match result {
            Ok(()) => padded,
            Err(e) => {
                warn!(segment_id = %seg.segment_id, error = %format!("{e:#}"), "padding skipped");
                let _ = std::fs::remove_file(&padded);
                cached
            }
        }
    }

    fn sync(&self, run_id: &RunId, synthesized: Synthesized) -> Result<Synced, StageError> {
        let run_dir = self.run_dir(run_id);
        let manifest = Manifest::from_segments(run_id, &synthesized.created_at, &synthesized.segments);
        let path = self
            .store
            .write_manifest(&run_dir, &manifest)
            .map_err(|error| StageError::Artifacts { stage: Stage::Sync, error })?;
        info!(%run_id, segments = manifest.segments.len(), total_sec = manifest.total_duration_sec(), "manifest written");
        Ok(Synced { manifest_path: path.display().to_string(), segments: synthesized.segments })
    }

    fn assemble(&self, run_id: &RunId, synced: Synced) -> Result<Assembled, StageError> {
        let manifest_path = PathBuf::from(&synced.manifest_path);
        let manifest = self
            .store
            .read_manifest(&manifest_path)
            .map_err(|error| StageError::Artifacts { stage: Stage::Assemble, error })?;

        for seg in synced.segments.iter().filter(|s| s.audio_path.is_none()) {
            warn!(
                %run_id,
                segment_id = %seg.segment_id,
                needs_repair = seg.hints.needs_repair,
                needs_human = seg.hints.needs_human,
                error = seg.error.as_deref().unwrap_or(""),
                "segment has no audio"
            );
        }
        media_gate(&manifest, self.cfg.media.min_artifact_bytes)?;

        let output = self.run_dir(run_id).join(&self.cfg.assembly.output_name);
        self.collab.assembler.assemble(&manifest_path, &output).map_err(StageError::Assembly)?;
        Ok(Assembled { manifest_path: synced.manifest_path, output_path: output.display().to_string() })
    }
}
