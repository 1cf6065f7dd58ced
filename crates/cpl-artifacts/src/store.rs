use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cpl_core::RunId;

use crate::atomic;
use crate::checkpoint::CHECKPOINT_FILE;
use crate::manifest::Manifest;

pub const ASSEMBLY_MANIFEST_FILE: &str = "assembly_manifest.json";
/// Publish-facing document read by the gate engine.
pub const RUN_DOCUMENT_FILE: &str = "manifest.json";

pub trait ArtifactStore: Send + Sync {
    fn run_dir(&self, run_id: &RunId) -> PathBuf;
    fn create_run_dir(&self, run_id: &RunId) -> Result<PathBuf>;
    fn write_manifest(&self, run_dir: &Path, manifest: &Manifest) -> Result<PathBuf>;
    fn read_manifest(&self, path: &Path) -> Result<Manifest>;
}

#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    pub root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn checkpoint_path(run_dir: &Path) -> PathBuf {
        run_dir.join(CHECKPOINT_FILE)
    }

    pub fn manifest_path(run_dir: &Path) -> PathBuf {
        run_dir.join(ASSEMBLY_MANIFEST_FILE)
    }

    pub fn document_path(run_dir: &Path) -> PathBuf {
        run_dir.join(RUN_DOCUMENT_FILE)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    fn create_run_dir(&self, run_id: &RunId) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(dir)
    }

    fn write_manifest(&self, run_dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
        let path = Self::manifest_path(run_dir);
        atomic::write_json(&path, manifest).with_context(|| format!("write manifest {}", path.display()))?;
        Ok(path)
    }

    fn read_manifest(&self, path: &Path) -> Result<Manifest> {
        let bytes = std::fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse manifest {}", path.display()))
    }
}
