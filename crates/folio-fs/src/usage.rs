use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Sums the sizes of regular files below `root`, skipping any directory in
/// `exclude`. Symlinks are not followed. A missing root is zero bytes.
pub fn disk_usage(root: &Path, exclude: &[&Path]) -> Result<u64> {
    if !root.exists() {
        return Ok(0);
    }

    let mut total = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| Error::Read {
            path:   dir.clone(),
            source: e,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !exclude.iter().any(|skip| *skip == path.as_path()) {
                    pending.push(path);
                }
            } else if file_type.is_file()
                && let Ok(meta) = entry.metadata()
            {
                total = total.saturating_add(meta.len());
            }
        }
    }

    Ok(total)
}
