use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{BundleError, Result};
use crate::store::config::ConfigDocument;
use crate::store::files;

/// Config key of the legacy (v1/v2) review-session list.
pub const REVIEWS_KEY: &str = "reviews";

/// One version transition, `from_version()` -> `from_version() + 1`.
///
/// `apply` runs against a private staged copy of the bundle together with the
/// config loaded from that copy. Before returning it must have restructured
/// the config, relocated version-specific files, removed obsolete directories
/// and saved `project.json` stamped with the destination version. Partial
/// changes on error are fine: the stage is thrown away, and a retry always
/// starts from a fresh copy.
pub trait StepMigrator: Send + Sync {
    fn from_version(&self) -> u32;

    fn to_version(&self) -> u32 {
        self.from_version() + 1
    }

    fn apply(&self, stage: &Path, config: ConfigDocument) -> Result<ConfigDocument>;
}

/// Maps a source version to the step that upgrades it.
pub struct StepRegistry {
    steps: BTreeMap<u32, Box<dyn StepMigrator>>,
}

impl StepRegistry {
    pub fn empty() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// Registry with every built-in transition.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(super::v1v2::V1ToV2));
        registry.register(Box::new(super::v2v3::V2ToV3));
        registry
    }

    /// Add or replace the step for `step.from_version()`.
    pub fn register(&mut self, step: Box<dyn StepMigrator>) -> Option<Box<dyn StepMigrator>> {
        self.steps.insert(step.from_version(), step)
    }

    pub fn get(&self, from_version: u32) -> Option<&dyn StepMigrator> {
        self.steps.get(&from_version).map(Box::as_ref)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// The `reviews` list of a v1/v2 config as owned objects. Absent or null
/// counts as no sessions.
pub(crate) fn review_sessions(config: &ConfigDocument) -> Result<Vec<Map<String, Value>>> {
    match config.get(REVIEWS_KEY) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Object(session) => Ok(session.clone()),
                other => Err(BundleError::invalid_config(
                    config.path(),
                    format!("review session must be an object, got {other}"),
                )),
            })
            .collect(),
        Some(other) => Err(BundleError::invalid_config(
            config.path(),
            format!("{REVIEWS_KEY} must be a list, got {other}"),
        )),
    }
}

/// Id of a review session, checked to be a single path component.
pub(crate) fn session_id<'a>(
    config: &ConfigDocument,
    session: &'a Map<String, Value>,
) -> Result<&'a str> {
    let id = session
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| BundleError::invalid_config(config.path(), "review session without an id"))?;

    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(BundleError::invalid_config(
            config.path(),
            format!("review session id '{id}' is not a valid directory name"),
        ));
    }
    Ok(id)
}

/// Move `from` to `to` (both relative to `stage`) when the source exists.
pub(crate) fn relocate(stage: &Path, from: Option<PathBuf>, to: Option<PathBuf>) -> Result<bool> {
    let (Some(from), Some(to)) = (from, to) else {
        return Ok(false);
    };
    if from == to {
        return Ok(false);
    }

    let src = stage.join(&from);
    if !src.is_file() {
        debug!(path = %from.display(), "nothing to relocate");
        return Ok(false);
    }
    files::move_file(&src, &stage.join(to))?;
    Ok(true)
}

/// Parse a JSON file relative to `stage`, `None` when it does not exist.
pub(crate) fn read_json(stage: &Path, relative: Option<PathBuf>) -> Result<Option<Value>> {
    let Some(relative) = relative else {
        return Ok(None);
    };
    let path = stage.join(relative);
    if !path.is_file() {
        return Ok(None);
    }
    let data = fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&data)?))
}
