use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::migration::step::{REVIEWS_KEY, StepMigrator, relocate, review_sessions, session_id};
use crate::store::config::ConfigDocument;
use crate::store::files;
use crate::store::layout::{BundleLayout, LogicalFile};

const FEATURE_MATRICES_KEY: &str = "feature_matrices";
const LEGACY_FINISHED_KEY: &str = "review_finished";

/// Version 1 -> 2.
///
/// - every review session gets an explicit `status`
/// - `reviews/<id>/results.sql` becomes `reviews/<id>/results.db`
/// - cached feature matrices are dropped, directory and config entry
pub struct V1ToV2;

impl StepMigrator for V1ToV2 {
    fn from_version(&self) -> u32 {
        1
    }

    fn apply(&self, stage: &Path, mut config: ConfigDocument) -> Result<ConfigDocument> {
        let old = BundleLayout::for_version(1)?;
        let new = BundleLayout::for_version(2)?;

        let mut sessions = review_sessions(&config)?;
        for session in &mut sessions {
            normalize_status(session);

            let id = session_id(&config, session)?;
            let moved = relocate(
                stage,
                old.resolve(LogicalFile::StateDatabase, id),
                new.resolve(LogicalFile::StateDatabase, id),
            )?;
            debug!(review = id, moved, "state database");
        }

        config.set(
            REVIEWS_KEY,
            Value::Array(sessions.into_iter().map(Value::Object).collect()),
        );
        config.remove(FEATURE_MATRICES_KEY);

        for dir in old.obsolete_dirs() {
            files::remove_dir_if_exists(&stage.join(dir))?;
        }

        config.set_version(new.version());
        config.save(stage)?;
        Ok(config)
    }
}

fn normalize_status(session: &mut Map<String, Value>) {
    let finished = session.shift_remove(LEGACY_FINISHED_KEY).and_then(|v| v.as_bool());
    if session.get("status").is_some_and(Value::is_string) {
        return;
    }

    let status = match finished {
        Some(true) => "finished",
        _ => "review",
    };
    session.insert("status".to_string(), Value::from(status));
}
