use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Content-addressed audio cache: `<root>/<fingerprint>.<ext>`.
///
/// New artifacts are produced into a sibling temp file and renamed into
/// place, so concurrent runs racing on one fingerprint can at worst repeat a
/// synthesis call; they never observe a torn file.
#[derive(Clone, Debug)]
pub struct DigestCache {
    root: PathBuf,
    ext: String,
}

impl DigestCache {
    pub fn new(root: PathBuf, ext: impl Into<String>) -> Self {
        Self { root, ext: ext.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.root.join(format!("{fingerprint}.{}", self.ext))
    }

    /// Cached artifact for `fingerprint`; empty files do not count.
    pub fn lookup(&self, fingerprint: &str) -> Option<PathBuf> {
        let path = self.path_for(fingerprint);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            _ => None,
        }
    }

    pub fn has_artifact(&self, fingerprint: &str) -> bool {
        self.lookup(fingerprint).is_some()
    }

    /// Scratch file in the cache directory for a producer to write into.
    pub fn reserve(&self, fingerprint: &str) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.root).with_context(|| format!("create cache dir {}", self.root.display()))?;
        tempfile::Builder::new()
            .prefix(&format!(".{fingerprint}."))
            .suffix(&format!(".{}", self.ext))
            .tempfile_in(&self.root)
            .with_context(|| format!("reserve cache slot for {fingerprint}"))
    }

    /// Move a produced scratch file to its final cache path.
    pub fn admit(&self, fingerprint: &str, scratch: NamedTempFile) -> Result<PathBuf> {
        let size = std::fs::metadata(scratch.path()).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            anyhow::bail!("synthesis produced an empty artifact for {fingerprint}");
        }
        scratch.as_file().sync_all().ok();
        let dest = self.path_for(fingerprint);
        scratch
            .persist(&dest)
            .map_err(|e| e.error)
            .with_context(|| format!("admit {} into cache", dest.display()))?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn admit_makes_artifact_visible() {
        let dir = tempdir().unwrap();
        let cache = DigestCache::new(dir.path().to_path_buf(), "mp3");
        assert!(!cache.has_artifact("abc"));

        let mut scratch = cache.reserve("abc").unwrap();
        scratch.write_all(b"audio").unwrap();
        let path = cache.admit("abc", scratch).unwrap();
        assert_eq!(path, dir.path().join("abc.mp3"));
        assert_eq!(cache.lookup("abc"), Some(path));
    }

    #[test]
    fn empty_output_is_not_admitted() {
        let dir = tempdir().unwrap();
        let cache = DigestCache::new(dir.path().to_path_buf(), "mp3");
        let scratch = cache.reserve("abc").unwrap();
        assert!(cache.admit("abc", scratch).is_err());
        assert!(!cache.has_artifact("abc"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
