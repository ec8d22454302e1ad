use std::path::PathBuf;

use crate::error::{BundleError, Result};

/// Newest project file version this build can produce.
pub const MAX_SUPPORTED_VERSION: u32 = 3;

pub const CONFIG_FILE: &str = "project.json";
pub const REVIEWS_DIR: &str = "reviews";

/// Config key of the single review object at v3.
pub const REVIEW_KEY: &str = "review";
/// Key of the settings document inside the review object.
pub const MODEL_KEY: &str = "model";
pub const TAGS_KEY: &str = "tags";

const LEGACY_BACKUP_PREFIX: &str = "legacy_v";
const TRANSIENT_SUFFIX: &str = ".lock";

/// Files a bundle may hold besides its config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalFile {
    /// Opaque SQLite database with the labeling state.
    StateDatabase,
    /// Model/settings document of a review session.
    Settings,
    /// Tag definitions of a review session.
    Tags,
}

/// Relative paths of a bundle at one schema version. Pure lookup, no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleLayout {
    version: u32,
}

impl BundleLayout {
    pub fn for_version(version: u32) -> Result<Self> {
        if version == 0 || version > MAX_SUPPORTED_VERSION {
            return Err(BundleError::UnsupportedVersion(version));
        }
        Ok(Self { version })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Directory holding the per-session files, or `None` once sessions are
    /// flattened into the bundle root.
    pub fn review_dir(&self, review_id: &str) -> Option<PathBuf> {
        (self.version <= 2).then(|| PathBuf::from(REVIEWS_DIR).join(review_id))
    }

    /// Where `file` lives for the given session, or `None` when this version
    /// embeds it in `project.json` instead of a separate file.
    pub fn resolve(&self, file: LogicalFile, review_id: &str) -> Option<PathBuf> {
        match (self.version, file) {
            (1, LogicalFile::StateDatabase) => self.review_file(review_id, "results.sql"),
            (_, LogicalFile::StateDatabase) if self.version <= 2 => {
                self.review_file(review_id, "results.db")
            }
            (_, LogicalFile::StateDatabase) => Some(PathBuf::from("results.db")),
            (_, LogicalFile::Settings) => self.review_file(review_id, "settings_metadata.json"),
            (2, LogicalFile::Tags) => self.review_file(review_id, "tags.json"),
            (_, LogicalFile::Tags) => None,
        }
    }

    /// Config key holding the review object, for versions that keep the
    /// review inline rather than as a session list.
    pub fn review_key(&self) -> Option<&'static str> {
        (self.version >= 3).then_some(REVIEW_KEY)
    }

    /// Key that carries `file` inline for this version. Settings sit inside
    /// the review object; tags are a top-level config key.
    pub fn embedded_key(&self, file: LogicalFile) -> Option<&'static str> {
        match (self.version, file) {
            (3, LogicalFile::Settings) => Some(MODEL_KEY),
            (3, LogicalFile::Tags) => Some(TAGS_KEY),
            _ => None,
        }
    }

    /// Directories present at this version that no later version uses.
    pub fn obsolete_dirs(&self) -> &'static [&'static str] {
        match self.version {
            1 => &["feature_matrices"],
            2 => &[REVIEWS_DIR],
            _ => &[],
        }
    }

    fn review_file(&self, review_id: &str, name: &str) -> Option<PathBuf> {
        self.review_dir(review_id).map(|dir| dir.join(name))
    }
}

/// Directory name of the backup taken before upgrading from `version`.
pub fn legacy_backup_dir(version: u32) -> String {
    format!("{LEGACY_BACKUP_PREFIX}{version}")
}

pub fn is_legacy_backup(name: &str) -> bool {
    name.strip_prefix(LEGACY_BACKUP_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Lock files are never carried into a stage or a backup.
pub fn is_transient(name: &str) -> bool {
    name.ends_with(TRANSIENT_SUFFIX)
}
