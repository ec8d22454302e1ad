use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

/// Recursively copy `src` into `dst`, skipping any entry for which `skip`
/// returns true. Skipped directories are not descended into. Symlinks are
/// recreated as links, never followed.
pub fn copy_tree<F>(src: &Path, dst: &Path, skip: F) -> Result<u64>
where
    F: Fn(&DirEntry) -> bool,
{
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !skip(entry));

    for entry in walker {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if entry.file_type().is_symlink() {
            if copy_link(entry.path(), &target)? {
                copied += 1;
            }
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!(src = %src.display(), dst = %dst.display(), files = copied, "copied tree");
    Ok(copied)
}

#[cfg(unix)]
fn copy_link(link: &Path, target: &Path) -> Result<bool> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)?;
    Ok(true)
}

#[cfg(not(unix))]
fn copy_link(link: &Path, _target: &Path) -> Result<bool> {
    tracing::warn!(path = %link.display(), "skipping symlink");
    Ok(false)
}

/// Move a single file, creating the destination's parent directories.
/// Falls back to copy + delete when a rename cannot cross filesystems.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    if fs::rename(src, dst).is_err() {
        fs::copy(src, dst)?;
        fs::remove_file(src)?;
    }

    debug!(src = %src.display(), dst = %dst.display(), "moved file");
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub fn entry_name(entry: &DirEntry) -> &str {
    entry.file_name().to_str().unwrap_or_default()
}
