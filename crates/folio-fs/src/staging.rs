//! Staged files: written under a scratch name, renamed into place on commit,
//! removed on drop otherwise.

use std::fs;
use std::path::{Path, PathBuf};

use crate::atomic_write::sync_dir;
use crate::{Error, Result};

/// Extension carried by every staging file, used by [`sweep_staging`].
pub const STAGING_EXTENSION: &str = "part";

pub struct StagedFile {
    path:      PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Reserves a unique staging path inside `staging_dir`. The file itself is
    /// created by whoever streams into [`StagedFile::path`].
    pub fn new(staging_dir: &Path, stem: &str) -> Result<Self> {
        fs::create_dir_all(staging_dir).map_err(|e| Error::CreateDir {
            path:   staging_dir.to_path_buf(),
            source: e,
        })?;
        let name = format!("{stem}.{}.{STAGING_EXTENSION}", uuid::Uuid::new_v4());
        Ok(Self {
            path:      staging_dir.join(name),
            committed: false,
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Moves the staged bytes to `target` with a single rename. Concurrent
    /// readers of `target` never see a partial file.
    pub fn commit(mut self, target: &Path) -> Result<PathBuf> {
        let parent = target
            .parent()
            .ok_or_else(|| Error::NoParent(target.to_path_buf()))?;
        fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
            path:   parent.to_path_buf(),
            source: e,
        })?;

        fs::rename(&self.path, target).map_err(|e| Error::Rename {
            from:   self.path.clone(),
            to:     target.to_path_buf(),
            source: e,
        })?;
        self.committed = true;
        sync_dir(parent);

        tracing::trace!(target = %target.display(), "staged file committed");
        Ok(target.to_path_buf())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Removes staging leftovers from an interrupted run. Returns how many files
/// were deleted. A missing directory counts as empty.
pub fn sweep_staging(staging_dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(Error::Read {
                path:   staging_dir.to_path_buf(),
                source: e,
            });
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_part = path
            .extension()
            .is_some_and(|ext| ext == STAGING_EXTENSION);
        if is_part && path.is_file() && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!(removed, dir = %staging_dir.display(), "swept stale staging files");
    }
    Ok(removed)
}
