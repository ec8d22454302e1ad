use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{BundleError, Result};

/// Exclusive advisory lock on a bundle, held by the hosting process for the
/// length of one migration. Released on drop.
///
/// The lock file is a hidden sibling (`.<name>.lock`) so it survives every
/// swap of the bundle directory. The migration engine itself never takes
/// this lock; it only assumes that nobody else mutates the bundle while it
/// runs.
#[derive(Debug)]
pub struct BundleLock {
    file: File,
    path: PathBuf,
}

impl BundleLock {
    pub fn acquire(bundle: &Path) -> Result<Self> {
        let path = lock_path(bundle)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| BundleError::Locked(path.display().to_string()))?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock and remove the lock file. A pruned bundle leaves the sibling
    /// lock behind, so it is removed here too; a missing file is fine.
    pub fn release(self) -> Result<()> {
        self.file.unlock()?;
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// `<parent>/.<name>.lock` for the bundle at `bundle`, resolved through
/// symlinks so every spelling of the path shares one lock.
pub fn lock_path(bundle: &Path) -> Result<PathBuf> {
    if !bundle.is_dir() {
        return Err(BundleError::NotFound(bundle.to_path_buf()));
    }
    let bundle = fs::canonicalize(bundle)?;
    match (bundle.parent(), bundle.file_name()) {
        (Some(parent), Some(name)) => {
            Ok(parent.join(format!(".{}.lock", name.to_string_lossy())))
        }
        _ => Err(BundleError::NotFound(bundle.clone())),
    }
}
