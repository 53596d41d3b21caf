//! Filesystem helpers for cache entries.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Copy a file, keeping its permissions and modification time.
pub fn copy_file_preserving(src: &Path, dst: &Path) -> io::Result<u64> {
    let modified = fs::metadata(src)?.modified()?;
    // fs::copy carries the permission bits over, which may make dst read-only
    let copied = fs::copy(src, dst)?;
    let file = File::options()
        .write(true)
        .open(dst)
        .or_else(|_| File::open(dst))?;
    file.set_modified(modified)?;
    Ok(copied)
}

/// Remove a file, symlink or directory tree. Absence is not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursively copy `src` into `dst`, following symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copy_file_preserving(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Total size in bytes of a file or of every file below a directory.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    if path.is_file() {
        return Ok(fs::metadata(path)?.len());
    }

    let mut size = 0;
    for entry in WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_file() {
            size += entry.metadata()?.len();
        }
    }
    Ok(size)
}

/// Format bytes as human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
