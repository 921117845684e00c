use crate::security::resolve_within;
use std::{fs, io, path::Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Copies the regular files and directories under `src` into `dst`, overwriting files
/// that already exist. Symlinks and special files are skipped, and nothing is written to
/// a destination that would resolve outside `dst`. Returns the number of files copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<u64> {
    let src = dunce::canonicalize(src)?;
    fs::create_dir_all(dst)?;
    let dst = dunce::canonicalize(dst)?;
    if dst.starts_with(&src) {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "destination lies inside source"));
    }

    let mut copied = 0;
    for entry in WalkDir::new(&src).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&src).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let Some(target) = resolve_within(&dst, relative) else {
            warn!(path = %relative.display(), "skipping entry that resolves outside destination");
            continue;
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular file");
        }
    }
    Ok(copied)
}

/// Removes `path` recursively. Returns false if it was already gone.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
