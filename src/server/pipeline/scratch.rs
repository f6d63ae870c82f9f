//! Per-request scratch files

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

/// A uniquely named local file owned by one pipeline run.
///
/// The file is removed when the value is dropped, so every exit path
/// (including panics and early returns) cleans up. `release` does the same
/// removal explicitly and logs failures instead of ignoring them.
#[derive(Debug)]
pub struct ScratchFile {
    path: TempPath,
}

impl ScratchFile {
    /// Create an empty file in `dir`, keeping the object key's extension so
    /// downstream services can sniff the audio encoding
    pub fn create(dir: &Path, object_key: &str) -> io::Result<Self> {
        let suffix = extension_of(object_key)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let file = tempfile::Builder::new()
            .prefix("complaint-")
            .suffix(&suffix)
            .tempfile_in(dir)?;

        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now. Removal errors are logged, never returned.
    pub fn release(self) {
        let path: PathBuf = self.path.to_path_buf();
        match self.path.close() {
            Ok(()) => tracing::debug!("Removed scratch file {:?}", path),
            Err(e) => tracing::warn!("Failed to remove scratch file {:?}: {}", path, e),
        }
    }
}

fn extension_of(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= 5
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}
