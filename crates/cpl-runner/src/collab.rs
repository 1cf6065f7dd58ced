//! Capability traits for everything the orchestrator delegates, plus the
//! command-backed and sink implementations used by the CLI.
//!
//! Each trait has one method so tests can swap in fakes without touching the
//! stage logic.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cpl_core::{RunId, Segment, Stage, VoiceProfile};

use crate::config::{AssemblyConfig, ProbeConfig, SynthesisConfig};
use crate::util::{now_rfc3339, render_args, run_with_timeout};

/// One segment's synthesis request.
#[derive(Clone, Debug)]
pub struct SynthesisRequest<'a> {
    pub segment: &'a Segment,
    pub voice: &'a VoiceProfile,
    pub language: &'a str,
    pub fingerprint: &'a str,
}

impl SynthesisRequest<'_> {
    /// Playback rate handed to the engine; 1.0 unless the tone ladder asked
    /// for a tweak.
    pub fn rate(&self) -> f64 {
        self.segment.hints.tts_rate.unwrap_or(1.0)
    }
}

pub trait Synthesizer: Send + Sync {
    /// Render the request's text into `dest`.
    fn synthesize(&self, run_id: &RunId, request: &SynthesisRequest<'_>, dest: &Path) -> Result<()>;
}

pub trait Assembler: Send + Sync {
    fn assemble(&self, manifest: &Path, output: &Path) -> Result<()>;
}

/// Stream facts reported by an inspector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_sec: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
}

pub trait Inspector: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<MediaInfo>;
}

pub trait AudioPadder: Send + Sync {
    /// Pad `path` in place with silence up to `target_sec`. Never shortens.
    fn pad(&self, path: &Path, target_sec: f64) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEvent {
    StageEnter,
    StageDone,
    StageFail,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub event: TelemetryEvent,
    pub run_id: RunId,
    pub stage: Stage,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TelemetryRecord {
    pub fn new(event: TelemetryEvent, run_id: &RunId, stage: Stage) -> Self {
        Self { event, run_id: run_id.clone(), stage, timestamp: now_rfc3339(), elapsed_ms: None, detail: None }
    }
}

/// Best-effort sink; callers discard errors.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, record: &TelemetryRecord) -> Result<()>;
}

pub trait PanicSink: Send + Sync {
    fn report(&self, reason: &str, run_id: &RunId, message: &str) -> Result<()>;
}

pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _record: &TelemetryRecord) -> Result<()> {
        Ok(())
    }
}

/// Records incidents through `tracing` only.
pub struct LogIncidents;

impl PanicSink for LogIncidents {
    fn report(&self, reason: &str, run_id: &RunId, message: &str) -> Result<()> {
        tracing::error!(%run_id, reason, message, "pipeline incident");
        Ok(())
    }
}

fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    f.write_all(line.as_bytes()).with_context(|| format!("append {}", path.display()))?;
    Ok(())
}

/// Appends one JSON object per line.
pub struct JsonlTelemetry {
    path: PathBuf,
}

impl JsonlTelemetry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TelemetrySink for JsonlTelemetry {
    fn emit(&self, record: &TelemetryRecord) -> Result<()> {
        append_line(&self.path, record)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub reason: String,
    pub run_id: RunId,
    pub message: String,
    pub timestamp: String,
}

pub struct JsonlIncidents {
    path: PathBuf,
}

impl JsonlIncidents {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PanicSink for JsonlIncidents {
    fn report(&self, reason: &str, run_id: &RunId, message: &str) -> Result<()> {
        tracing::error!(%run_id, reason, message, "pipeline incident");
        let incident = Incident {
            reason: reason.to_string(),
            run_id: run_id.clone(),
            message: message.to_string(),
            timestamp: now_rfc3339(),
        };
        append_line(&self.path, &incident)
    }
}

pub struct CommandSynthesizer {
    cfg: SynthesisConfig,
}

impl CommandSynthesizer {
    pub fn new(cfg: SynthesisConfig) -> Self {
        Self { cfg }
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&self, run_id: &RunId, request: &SynthesisRequest<'_>, dest: &Path) -> Result<()> {
        let args = render_args(
            &self.cfg.args,
            &[
                ("text", request.segment.text.clone()),
                ("output", dest.display().to_string()),
                ("voice_id", request.voice.voice_id.clone()),
                ("model", request.voice.model.clone()),
                ("stability", request.voice.stability.to_string()),
                ("style", request.voice.style.to_string()),
                ("rate", format!("{:.3}", request.rate())),
                ("language", request.language.to_string()),
                ("run_id", run_id.to_string()),
                ("segment_id", request.segment.segment_id.to_string()),
            ],
        );
        run_with_timeout(&self.cfg.program, &args, None, Duration::from_secs(self.cfg.timeout_secs))
            .with_context(|| format!("synthesize segment {}", request.segment.segment_id))?;
        Ok(())
    }
}

pub struct CommandAssembler {
    cfg: AssemblyConfig,
}

impl CommandAssembler {
    pub fn new(cfg: AssemblyConfig) -> Self {
        Self { cfg }
    }
}

impl Assembler for CommandAssembler {
    fn assemble(&self, manifest: &Path, output: &Path) -> Result<()> {
        let args = render_args(
            &self.cfg.args,
            &[("manifest", manifest.display().to_string()), ("output", output.display().to_string())],
        );
        run_with_timeout(&self.cfg.program, &args, manifest.parent(), Duration::from_secs(self.cfg.timeout_secs))?;
        Ok(())
    }
}

/// Pads through an external command writing to a sibling file, which then
/// replaces the input.
pub struct CommandPadder {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPadder {
    pub fn from_config(cfg: &SynthesisConfig) -> Option<Self> {
        let program = cfg.pad_program.clone()?;
        Some(Self { program, args: cfg.pad_args.clone(), timeout: Duration::from_secs(cfg.timeout_secs) })
    }
}

impl AudioPadder for CommandPadder {
    fn pad(&self, path: &Path, target_sec: f64) -> Result<()> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let padded = path.with_file_name(format!(".padded.{name}"));
        let args = render_args(
            &self.args,
            &[
                ("input", path.display().to_string()),
                ("output", padded.display().to_string()),
                ("target_sec", format!("{target_sec:.3}")),
            ],
        );
        let result = run_with_timeout(&self.program, &args, None, self.timeout)
            .map_err(anyhow::Error::from)
            .and_then(|_| {
                std::fs::rename(&padded, path).with_context(|| format!("replace {} with padded audio", path.display()))
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&padded);
        }
        result
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
}

pub struct FfprobeInspector {
    program: String,
    timeout: Duration,
}

impl FfprobeInspector {
    /// `None` when the binary cannot be run; the probe then degrades to a
    /// size-only check.
    pub fn detect(cfg: &ProbeConfig) -> Option<Self> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        match run_with_timeout(&cfg.ffprobe, &["-version".to_string()], None, timeout) {
            Ok(_) => Some(Self { program: cfg.ffprobe.clone(), timeout }),
            Err(e) => {
                tracing::warn!(program = %cfg.ffprobe, error = %e, "media inspector unavailable");
                None
            }
        }
    }
}

impl Inspector for FfprobeInspector {
    fn inspect(&self, path: &Path) -> Result<MediaInfo> {
        let args: Vec<String> = ["-v", "error", "-print_format", "json", "-show_format", "-show_streams"]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(path.display().to_string()))
            .collect();
        let out = run_with_timeout(&self.program, &args, None, self.timeout)?;
        parse_ffprobe(&out.stdout)
    }
}

pub fn parse_ffprobe(json: &str) -> Result<MediaInfo> {
    let parsed: FfprobeOutput = serde_json::from_str(json).context("parse ffprobe output")?;
    let duration_sec = parsed.format.and_then(|f| f.duration).and_then(|d| d.trim().parse::<f64>().ok());
    let has = |kind: &str| parsed.streams.iter().any(|s| s.codec_type.as_deref() == Some(kind));
    Ok(MediaInfo { duration_sec, has_video: has("video"), has_audio: has("audio") })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ffprobe_json_is_summarized() {
        let info = parse_ffprobe(
            r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}],"format":{"duration":"61.500000"}}"#,
        )
        .unwrap();
        assert_eq!(info, MediaInfo { duration_sec: Some(61.5), has_video: true, has_audio: true });

        let audio_only = parse_ffprobe(r#"{"streams":[{"codec_type":"audio"}],"format":{}}"#).unwrap();
        assert!(!audio_only.has_video);
        assert_eq!(audio_only.duration_sec, None);
    }

    #[test]
    fn jsonl_sinks_append_lines() {
        let dir = tempdir().unwrap();
        let telemetry = JsonlTelemetry::new(dir.path().join("t/telemetry.jsonl"));
        let run = RunId::from_str("r1");
        telemetry.emit(&TelemetryRecord::new(TelemetryEvent::StageEnter, &run, Stage::Prep)).unwrap();
        telemetry.emit(&TelemetryRecord::new(TelemetryEvent::StageDone, &run, Stage::Prep)).unwrap();
        let text = std::fs::read_to_string(dir.path().join("t/telemetry.jsonl")).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: TelemetryRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, TelemetryEvent::StageEnter);
        assert_eq!(first.stage, Stage::Prep);

        let incidents = JsonlIncidents::new(dir.path().join("incidents.jsonl"));
        incidents.report("stage_failed", &run, "boom").unwrap();
        let line = std::fs::read_to_string(dir.path().join("incidents.jsonl")).unwrap();
        let incident: Incident = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(incident.reason, "stage_failed");
        assert_eq!(incident.message, "boom");
    }

    #[test]
    fn padder_requires_a_program() {
        assert!(CommandPadder::from_config(&SynthesisConfig::default()).is_none());
        let cfg = SynthesisConfig { pad_program: Some("ffmpeg".into()), ..SynthesisConfig::default() };
        assert!(CommandPadder::from_config(&cfg).is_some());
    }

    #[test]
    fn missing_ffprobe_degrades_to_none() {
        let cfg = ProbeConfig { ffprobe: "cpl-no-such-ffprobe".into(), ..ProbeConfig::default() };
        assert!(FfprobeInspector::detect(&cfg).is_none());
    }
}
