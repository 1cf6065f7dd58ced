use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use cpl_core::{ToneBudget, VoiceProfile, DEFAULT_HARD_CEILING, DEFAULT_LANGUAGE, DEFAULT_RATE_TWEAK_MAX, DEFAULT_SCRUB_MAX, DEFAULT_WPM};

pub const DEFAULT_SYNTH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ASSEMBLY_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OUTPUT_NAME: &str = "final.mp4";
pub const DEFAULT_AUDIO_EXT: &str = "mp3";
pub const DEFAULT_MIN_ARTIFACT_BYTES: u64 = 1024;
pub const DEFAULT_MIN_OUTPUT_BYTES: u64 = 100 * 1024;
pub const DEFAULT_MIN_DURATION_SEC: f64 = 1.0;
pub const DEFAULT_STABILITY: f64 = 0.5;

/// Pipeline settings. Loaded once and handed to the orchestrator by value;
/// nothing reads configuration from globals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub tone: ToneConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub telemetry: SinkConfig,
    #[serde(default)]
    pub incidents: SinkConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub runs_root: String,
    pub cache_root: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub wpm: f64,
    pub rate_tweak_max: f64,
    pub scrub_max: f64,
    pub hard_ceiling: f64,
    pub language: String,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            wpm: DEFAULT_WPM,
            rate_tweak_max: DEFAULT_RATE_TWEAK_MAX,
            scrub_max: DEFAULT_SCRUB_MAX,
            hard_ceiling: DEFAULT_HARD_CEILING,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl ToneConfig {
    pub fn budget(&self) -> ToneBudget {
        ToneBudget {
            wpm: self.wpm,
            rate_tweak_max: self.rate_tweak_max,
            scrub_max: self.scrub_max,
            hard_ceiling: self.hard_ceiling,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub voice_id: String,
    pub model: String,
    pub stability: f64,
    pub style: f64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: "narrator".to_string(),
            model: "default".to_string(),
            stability: DEFAULT_STABILITY,
            style: 0.0,
        }
    }
}

impl VoiceConfig {
    pub fn profile(&self) -> VoiceProfile {
        VoiceProfile {
            voice_id: self.voice_id.clone(),
            model: self.model.clone(),
            stability: self.stability,
            style: self.style,
        }
    }
}

/// Synthesis command. Argument templates may use `{text}`, `{output}`,
/// `{voice_id}`, `{model}`, `{stability}`, `{style}`, `{rate}`,
/// `{language}`, `{run_id}` and `{segment_id}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub audio_ext: String,
    pub pad_to_target: bool,
    /// Padding command; `{input}`, `{output}` and `{target_sec}` are
    /// substituted. Must only ever lengthen audio.
    pub pad_program: Option<String>,
    pub pad_args: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            program: "tts".to_string(),
            args: ["--voice", "{voice_id}", "--model", "{model}", "--rate", "{rate}", "--out", "{output}", "--text", "{text}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: DEFAULT_SYNTH_TIMEOUT_SECS,
            audio_ext: DEFAULT_AUDIO_EXT.to_string(),
            pad_to_target: false,
            pad_program: None,
            pad_args: ["-y", "-i", "{input}", "-af", "apad=whole_dur={target_sec}", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Assembly command; `{manifest}` and `{output}` are substituted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub output_name: String,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            program: "cpl-assemble".to_string(),
            args: vec!["--manifest".to_string(), "{manifest}".to_string(), "--out".to_string(), "{output}".to_string()],
            timeout_secs: DEFAULT_ASSEMBLY_TIMEOUT_SECS,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub min_artifact_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self { min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub min_output_bytes: u64,
    pub min_duration_sec: f64,
    pub require_video: bool,
    pub require_audio: bool,
    pub ffprobe: String,
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            min_output_bytes: DEFAULT_MIN_OUTPUT_BYTES,
            min_duration_sec: DEFAULT_MIN_DURATION_SEC,
            require_video: true,
            require_audio: true,
            ffprobe: "ffprobe".to_string(),
            timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

/// Optional JSONL destination.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub path: Option<String>,
}

impl PipelineConfig {
    pub fn default_for(project_id: &str) -> Self {
        Self {
            project: ProjectConfig {
                id: project_id.to_string(),
                runs_root: ".cpl/runs".to_string(),
                cache_root: "~/.cpl/cache/audio".to_string(),
            },
            tone: ToneConfig::default(),
            voice: VoiceConfig::default(),
            synthesis: SynthesisConfig::default(),
            assembly: AssemblyConfig::default(),
            media: MediaConfig::default(),
            probe: ProbeConfig::default(),
            telemetry: SinkConfig { path: Some(".cpl/telemetry.jsonl".to_string()) },
            incidents: SinkConfig { path: Some(".cpl/incidents.jsonl".to_string()) },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        cpl_artifacts::write_bytes(path, s.as_bytes())?;
        Ok(())
    }

    /// Load the project config, or the defaults when none was written yet.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = Self::config_path(root);
        if path.exists() {
            return Self::load_from(&path);
        }
        let project_id = root.file_name().and_then(|s| s.to_str()).unwrap_or("project");
        Ok(Self::default_for(project_id))
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".cpl").join("cpl.toml")
    }

    pub fn runs_root(&self, root: &Path) -> PathBuf {
        resolve(root, &self.project.runs_root)
    }

    pub fn cache_root(&self, root: &Path) -> PathBuf {
        resolve(root, &self.project.cache_root)
    }

    pub fn telemetry_path(&self, root: &Path) -> Option<PathBuf> {
        self.telemetry.path.as_deref().map(|p| resolve(root, p))
    }

    pub fn incidents_path(&self, root: &Path) -> Option<PathBuf> {
        self.incidents.path.as_deref().map(|p| resolve(root, p))
    }
}

/// Tilde-expand, then anchor relative paths at the project root.
fn resolve(root: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_preserves_config() {
        let dir = tempdir().unwrap();
        let path = PipelineConfig::config_path(dir.path());
        let mut cfg = PipelineConfig::default_for("demo");
        cfg.tone.language = "es".into();
        cfg.synthesis.pad_program = Some("ffmpeg".into());
        cfg.save_to(&path).unwrap();
        assert_eq!(PipelineConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            [project]
            id = "demo"
            runs_root = "/srv/runs"
            cache_root = "cache"

            [tone]
            wpm = 160.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tone.wpm, 160.0);
        assert_eq!(cfg.tone.hard_ceiling, DEFAULT_HARD_CEILING);
        assert_eq!(cfg.assembly.output_name, DEFAULT_OUTPUT_NAME);
        assert_eq!(cfg.probe.min_output_bytes, DEFAULT_MIN_OUTPUT_BYTES);
        assert_eq!(cfg.voice.stability, DEFAULT_STABILITY);
        assert!(cfg.telemetry.path.is_none());

        let root = Path::new("/work/proj");
        assert_eq!(cfg.runs_root(root), PathBuf::from("/srv/runs"));
        assert_eq!(cfg.cache_root(root), PathBuf::from("/work/proj/cache"));
    }

    #[test]
    fn load_or_default_without_file_uses_dir_name() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tides");
        std::fs::create_dir_all(&root).unwrap();
        let cfg = PipelineConfig::load_or_default(&root).unwrap();
        assert_eq!(cfg.project.id, "tides");
    }
}
