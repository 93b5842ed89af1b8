use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug)]
pub struct AtomicWriteOptions {
    pub sync:        bool,
    pub create_dirs: bool,
}

impl Default for AtomicWriteOptions {
    fn default() -> Self { Self::new() }
}

impl AtomicWriteOptions {
    pub fn new() -> Self {
        Self {
            sync:        true,
            create_dirs: false,
        }
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }
}

/// Writes `content` next to `path` under a unique temporary name and renames it
/// over `path`. Readers observe either the old file or the complete new one.
pub fn atomic_write(
    path: impl AsRef<Path>,
    content: &[u8],
    options: AtomicWriteOptions,
) -> Result<()> {
    let path = path.as_ref();
    let parent = path
        .parent()
        .ok_or_else(|| Error::NoParent(path.to_path_buf()))?;

    if options.create_dirs {
        fs::create_dir_all(parent).map_err(|e| Error::CreateDir {
            path:   parent.to_path_buf(),
            source: e,
        })?;
    }

    let tmp_path = temp_sibling(path, parent);

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content)?;
        if options.sync {
            file.sync_all()?;
        }
        Ok(())
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::Write {
            path:   tmp_path,
            source: e,
        });
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        Error::Rename {
            from:   tmp_path.clone(),
            to:     path.to_path_buf(),
            source: e,
        }
    })?;

    if options.sync {
        sync_dir(parent);
    }

    Ok(())
}

pub fn atomic_read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).map_err(|e| Error::Read {
        path:   path.to_path_buf(),
        source: e,
    })
}

fn temp_sibling(path: &Path, parent: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
}

// Directory fsync makes the rename itself durable. Not all platforms allow
// opening a directory, so failure here is ignored.
pub(crate) fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}
