use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid version range v{src} -> v{dst}: {reason}")]
    InvalidRange { src: u32, dst: u32, reason: String },

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid project config '{}': {reason}", .path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("unsupported project file version {0}")]
    UnsupportedVersion(u32),

    #[error("migration step v{from} -> v{to} failed: {source}")]
    StepFailed {
        from: u32,
        to: u32,
        #[source]
        source: Box<BundleError>,
    },

    #[error("failed to upgrade project {project_id} from v{from} to v{to}: {source}")]
    MigrationFailed {
        project_id: String,
        from: u32,
        to: u32,
        #[source]
        source: Box<BundleError>,
    },

    #[error(
        "atomic swap failed for project {project_id} (v{from} -> v{to}): {detail}"
    )]
    AtomicSwapFailure {
        project_id: String,
        from: u32,
        to: u32,
        detail: String,
        restored: bool,
    },

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl BundleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "invalid_range",
            Self::NotFound(_) => "not_found",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::StepFailed { .. } => "migration_step_failure",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::AtomicSwapFailure { .. } => "atomic_swap_failure",
            Self::Locked(_) => "locked",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Db(_) => "db_error",
            Self::Walk(_) => "walk_error",
        }
    }

    /// True when the live bundle is known to sit at its last committed version.
    /// Only a swap that could not put the pre-swap copy back leaves it ambiguous.
    pub fn bundle_unmodified(&self) -> bool {
        match self {
            Self::AtomicSwapFailure { restored, .. } => *restored,
            _ => true,
        }
    }

    pub(crate) fn invalid_config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
