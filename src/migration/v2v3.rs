use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::migration::step::{
    REVIEWS_KEY, StepMigrator, read_json, relocate, review_sessions, session_id,
};
use crate::store::config::ConfigDocument;
use crate::store::files;
use crate::store::layout::{BundleLayout, LogicalFile, MODEL_KEY, REVIEW_KEY, TAGS_KEY};

const DEFAULT_STATUS: &str = "review";

/// Version 2 -> 3.
///
/// The session list collapses into a single `review` object that carries the
/// session fields, a `status` and the old settings document as `model`.
/// `tags.json` is embedded as top-level `tags`, the state database moves to the
/// bundle root and `reviews/` goes away.
pub struct V2ToV3;

impl StepMigrator for V2ToV3 {
    fn from_version(&self) -> u32 {
        2
    }

    fn apply(&self, stage: &Path, mut config: ConfigDocument) -> Result<ConfigDocument> {
        let old = BundleLayout::for_version(2)?;
        let new = BundleLayout::for_version(3)?;

        let mut sessions = review_sessions(&config)?.into_iter();
        let review = match sessions.next() {
            None => Value::Null,
            Some(mut session) => {
                let dropped = sessions.len();
                if dropped > 0 {
                    warn!(
                        project = config.project_id(),
                        dropped, "collapsing review sessions; only the first is kept"
                    );
                }

                let id = session_id(&config, &session)?.to_string();

                if let Some(settings) = read_json(stage, old.resolve(LogicalFile::Settings, &id))? {
                    session.insert(MODEL_KEY.to_string(), settings);
                }
                if !session.get("status").is_some_and(Value::is_string) {
                    session.insert("status".to_string(), Value::from(DEFAULT_STATUS));
                }
                if let Some(tags) = read_json(stage, old.resolve(LogicalFile::Tags, &id))? {
                    config.set(TAGS_KEY, tags);
                }

                let moved = relocate(
                    stage,
                    old.resolve(LogicalFile::StateDatabase, &id),
                    new.resolve(LogicalFile::StateDatabase, &id),
                )?;
                debug!(review = %id, moved, "state database");

                Value::Object(session)
            }
        };

        config.remove(REVIEWS_KEY);
        config.set(REVIEW_KEY, review);

        for dir in old.obsolete_dirs() {
            files::remove_dir_if_exists(&stage.join(dir))?;
        }

        config.set_version(new.version());
        config.save(stage)?;
        Ok(config)
    }
}
