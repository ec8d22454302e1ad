use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BundleError, Result};
use crate::store::files::{self, entry_name};
use crate::store::layout::is_transient;

const STAGE_BUNDLE_DIR: &str = "bundle";

/// A private working copy of a bundle.
///
/// The staging root is a hidden sibling of the live bundle so the commit can
/// be a same-filesystem rename. Dropping an uncommitted stage deletes it; the
/// live bundle is only ever touched by [`Stage::commit`].
pub struct Stage {
    root: TempDir,
    bundle: PathBuf,
}

/// Why a commit could not put the stage in place.
#[derive(Debug)]
pub struct SwapError {
    pub detail: String,
    /// The live bundle is back (or never left) its pre-swap location.
    pub restored: bool,
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail)
    }
}

impl Stage {
    /// Create a fresh staging root next to `live` and copy the bundle into it,
    /// leaving transient lock files behind.
    pub fn create(live: &Path) -> Result<Self> {
        let (parent, name) = split_bundle_path(live)?;
        let root = tempfile::Builder::new()
            .prefix(&format!(".{name}.stage."))
            .tempdir_in(parent)?;
        let bundle = root.path().join(STAGE_BUNDLE_DIR);

        files::copy_tree(live, &bundle, |entry| is_transient(entry_name(entry)))?;
        debug!(stage = %bundle.display(), "staged bundle copy");

        Ok(Self { root, bundle })
    }

    /// Working copy to mutate.
    pub fn path(&self) -> &Path {
        &self.bundle
    }

    /// Drop the stage and everything in it.
    pub fn discard(self) {
        let path = self.root.path().to_path_buf();
        if let Err(err) = self.root.close() {
            warn!(stage = %path.display(), error = %err, "failed to remove discarded stage");
        }
    }

    /// Replace `live` with the staged bundle: move live aside, move the stage
    /// into place, then delete the aside copy. A failed second rename puts the
    /// aside copy back.
    pub fn commit(self, live: &Path) -> std::result::Result<(), SwapError> {
        let (parent, name) = split_bundle_path(live).map_err(|err| SwapError {
            detail: err.to_string(),
            restored: true,
        })?;
        let aside = parent.join(format!(".{name}.swap.{}", Uuid::new_v4()));

        if let Err(err) = fs::rename(live, &aside) {
            return Err(SwapError {
                detail: format!("could not move '{}' aside: {err}", live.display()),
                restored: true,
            });
        }

        if let Err(err) = fs::rename(&self.bundle, live) {
            return match fs::rename(&aside, live) {
                Ok(()) => Err(SwapError {
                    detail: format!("could not move stage into '{}': {err}", live.display()),
                    restored: true,
                }),
                Err(rollback_err) => Err(SwapError {
                    detail: format!(
                        "stage swap failed and rollback failed; pre-swap bundle left at {}: swap error: {err}; rollback error: {rollback_err}",
                        aside.display()
                    ),
                    restored: false,
                }),
            };
        }

        if let Err(err) = fs::remove_dir_all(&aside) {
            warn!(path = %aside.display(), error = %err, "swap succeeded but the pre-swap copy was not removed");
        }
        self.discard();
        Ok(())
    }
}

fn split_bundle_path(live: &Path) -> Result<(&Path, String)> {
    match (live.parent(), live.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            Ok((parent, name.to_string_lossy().into_owned()))
        }
        _ => Err(BundleError::NotFound(live.to_path_buf())),
    }
}
