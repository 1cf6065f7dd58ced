//! Artifact checks on either side of assembly: the media gate before the
//! assembly tool runs and the render probe after it.

use std::path::{Path, PathBuf};

use thiserror::Error;

use cpl_artifacts::{Manifest, ProbeReport};

use crate::collab::Inspector;
use crate::config::ProbeConfig;

#[derive(Debug, Error)]
pub enum MediaGateError {
    #[error("manifest has no segments")]
    Empty,
    #[error("segment {0} has no audio")]
    NoAudio(String),
    #[error("segment {segment_id}: artifact {path} missing")]
    Missing { segment_id: String, path: PathBuf },
    #[error("segment {segment_id}: artifact {path} is {size} bytes, below {min} byte floor")]
    TooSmall { segment_id: String, path: PathBuf, size: u64, min: u64 },
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("render output {0} missing")]
    Missing(PathBuf),
    #[error("render output {path} is {size} bytes, below {min} byte floor")]
    TooSmall { path: PathBuf, size: u64, min: u64 },
    #[error("render output {path} lasts {duration:.2}s, below {min:.2}s")]
    TooShort { path: PathBuf, duration: f64, min: f64 },
    #[error("render output {path} has no duration")]
    NoDuration { path: PathBuf },
    #[error("render output {path} has no {kind} stream")]
    MissingStream { path: PathBuf, kind: &'static str },
    #[error("inspect {path}: {message}")]
    Inspect { path: PathBuf, message: String },
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

/// Every audio and video artifact the manifest references must exist and
/// meet `min_bytes`. Reports the first offender in manifest order.
pub fn media_gate(manifest: &Manifest, min_bytes: u64) -> Result<(), MediaGateError> {
    if manifest.segments.is_empty() {
        return Err(MediaGateError::Empty);
    }
    for seg in &manifest.segments {
        let segment_id = seg.segment_id.to_string();
        let Some(audio) = seg.audio_path.as_deref() else {
            return Err(MediaGateError::NoAudio(segment_id));
        };
        for artifact in std::iter::once(audio).chain(seg.video_path.as_deref()) {
            let path = PathBuf::from(artifact);
            match file_size(&path) {
                None => return Err(MediaGateError::Missing { segment_id, path }),
                Some(size) if size < min_bytes => {
                    return Err(MediaGateError::TooSmall { segment_id, path, size, min: min_bytes });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Validate the assembly output. Without an inspector only existence and size
/// are checked and the report is marked degraded.
pub fn render_probe(path: &Path, cfg: &ProbeConfig, inspector: Option<&dyn Inspector>) -> Result<ProbeReport, ProbeError> {
    let size = file_size(path).ok_or_else(|| ProbeError::Missing(path.to_path_buf()))?;
    if size < cfg.min_output_bytes {
        return Err(ProbeError::TooSmall { path: path.to_path_buf(), size, min: cfg.min_output_bytes });
    }

    let mut report = ProbeReport {
        output_path: path.display().to_string(),
        size_bytes: size,
        duration_sec: None,
        has_video: None,
        has_audio: None,
        degraded: true,
    };

    let Some(inspector) = inspector else {
        tracing::warn!(path = %path.display(), "no media inspector; size-only probe");
        return Ok(report);
    };

    let info = inspector
        .inspect(path)
        .map_err(|e| ProbeError::Inspect { path: path.to_path_buf(), message: format!("{e:#}") })?;
    match info.duration_sec {
        None => return Err(ProbeError::NoDuration { path: path.to_path_buf() }),
        Some(d) if d < cfg.min_duration_sec => {
            return Err(ProbeError::TooShort { path: path.to_path_buf(), duration: d, min: cfg.min_duration_sec });
        }
        Some(_) => {}
    }
    if cfg.require_video && !info.has_video {
        return Err(ProbeError::MissingStream { path: path.to_path_buf(), kind: "video" });
    }
    if cfg.require_audio && !info.has_audio {
        return Err(ProbeError::MissingStream { path: path.to_path_buf(), kind: "audio" });
    }

    report.duration_sec = info.duration_sec;
    report.has_video = Some(info.has_video);
    report.has_audio = Some(info.has_audio);
    report.degraded = false;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MediaInfo;
    use cpl_core::{RunId, Segment};
    use tempfile::tempdir;

    struct Fixed(MediaInfo);

    impl Inspector for Fixed {
        fn inspect(&self, _path: &Path) -> anyhow::Result<MediaInfo> {
            Ok(self.0.clone())
        }
    }

    fn cfg(min_output_bytes: u64) -> ProbeConfig {
        ProbeConfig { min_output_bytes, ..ProbeConfig::default() }
    }

    #[test]
    fn empty_manifest_is_rejected() {
        let m = Manifest::from_segments(&RunId::from_str("r"), "t", &[]);
        let err = media_gate(&m, 1).unwrap_err();
        assert_eq!(err.to_string(), "manifest has no segments");
    }

    #[test]
    fn small_and_missing_artifacts_are_named() {
        let dir = tempdir().unwrap();
        let small = dir.path().join("a.mp3");
        std::fs::write(&small, b"abc").unwrap();

        let mut a = Segment::new("a", "hook", "x");
        a.audio_path = Some(small.display().to_string());
        let m = Manifest::from_segments(&RunId::from_str("r"), "t", &[a.clone()]);
        assert!(matches!(media_gate(&m, 10), Err(MediaGateError::TooSmall { size: 3, .. })));
        assert!(media_gate(&m, 3).is_ok());

        a.audio_path = Some(dir.path().join("gone.mp3").display().to_string());
        let m = Manifest::from_segments(&RunId::from_str("r"), "t", &[a]);
        assert!(matches!(media_gate(&m, 1), Err(MediaGateError::Missing { .. })));
    }

    #[test]
    fn segment_without_audio_is_named() {
        let m = Manifest::from_segments(&RunId::from_str("r"), "t", &[Segment::new("b", "body", "y")]);
        let err = media_gate(&m, 1).unwrap_err();
        assert_eq!(err.to_string(), "segment b has no audio");
    }

    #[test]
    fn probe_degrades_without_inspector() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("final.mp4");
        std::fs::write(&out, vec![1u8; 64]).unwrap();

        let report = render_probe(&out, &cfg(32), None).unwrap();
        assert!(report.degraded);
        assert_eq!(report.size_bytes, 64);
        assert_eq!(report.duration_sec, None);

        assert!(matches!(render_probe(&out, &cfg(128), None), Err(ProbeError::TooSmall { .. })));
        assert!(matches!(render_probe(&dir.path().join("none.mp4"), &cfg(1), None), Err(ProbeError::Missing(_))));
    }

    #[test]
    fn probe_checks_duration_and_streams() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("final.mp4");
        std::fs::write(&out, vec![1u8; 64]).unwrap();

        let good = Fixed(MediaInfo { duration_sec: Some(30.0), has_video: true, has_audio: true });
        let report = render_probe(&out, &cfg(1), Some(&good)).unwrap();
        assert!(!report.degraded);
        assert_eq!(report.has_video, Some(true));

        let short = Fixed(MediaInfo { duration_sec: Some(0.2), has_video: true, has_audio: true });
        assert!(matches!(render_probe(&out, &cfg(1), Some(&short)), Err(ProbeError::TooShort { .. })));

        let silent = Fixed(MediaInfo { duration_sec: Some(30.0), has_video: true, has_audio: false });
        let err = render_probe(&out, &cfg(1), Some(&silent)).unwrap_err();
        assert_eq!(err.to_string(), format!("render output {} has no audio stream", out.display()));

        let relaxed = ProbeConfig { require_audio: false, ..cfg(1) };
        assert!(render_probe(&out, &relaxed, Some(&silent)).is_ok());
    }
}
