//! Crash-safe document writes.
//!
//! Bytes go to a randomly named sibling temp file, are fsynced, and the temp
//! file is renamed over the destination. Readers see either the old document
//! or the new one. If anything fails before the rename the temp file is
//! removed on drop and the destination is never touched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicWriteError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AtomicWriteError + '_ {
    move |source| AtomicWriteError::Io { path: path.to_path_buf(), source }
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), AtomicWriteError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_err(path))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err(path))?;
    tmp.write_all(bytes).map_err(io_err(path))?;
    tmp.as_file().sync_all().map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| AtomicWriteError::Io { path: path.to_path_buf(), source: e.error })?;

    // make the rename itself durable; not every platform can fsync a directory
    #[cfg(unix)]
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Pretty-printed JSON document, written atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, doc: &T) -> Result<(), AtomicWriteError> {
    let bytes = serde_json::to_vec_pretty(doc)
        .map_err(|source| AtomicWriteError::Serialize { path: path.to_path_buf(), source })?;
    write_bytes(path, &bytes)
}
