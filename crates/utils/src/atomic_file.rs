//! Replacing the result cache file without exposing a partial write
//!
//! A run that is interrupted while saving must leave either the old cache or
//! the new one on disk. Loaders treat anything else as corrupt and fall back
//! to the oracle, which throws away the whole cache.

use crosscheck_core::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sibling path the new contents are staged in before the rename
///
/// Named after the target (`.cache.json.<uuid>.tmp`) so a leftover from a
/// killed run is recognisable next to the file it belongs to.
pub fn staging_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::configuration(format!("cache path {} has no file name", path.display())))?;
    let staged = format!(".{}.{}.tmp", name.to_string_lossy(), Uuid::new_v4().simple());
    Ok(path.with_file_name(staged))
}

/// Replace `path` with `content` in one rename
///
/// Missing parent directories are created. The staging file sits in the same
/// directory so the rename never crosses a file system.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let staged = staging_path(path)?;
    if let Some(parent) = staged.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| Error::file_system(parent, "create cache directory", e))?;
    }

    if let Err(e) = stage(&staged, content) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    fs::rename(&staged, path).map_err(|e| {
        let _ = fs::remove_file(&staged);
        Error::file_system(path, "replace cache file", e)
    })
}

fn stage(staged: &Path, content: &[u8]) -> Result<()> {
    let mut file =
        File::create(staged).map_err(|e| Error::file_system(staged, "create staging file", e))?;
    file.write_all(content)
        .map_err(|e| Error::file_system(staged, "write staging file", e))?;
    file.sync_all()
        .map_err(|e| Error::file_system(staged, "sync staging file", e))
}
