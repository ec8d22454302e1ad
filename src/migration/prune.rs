use serde_json::Value;

use crate::migration::step::REVIEWS_KEY;
use crate::store::config::ConfigDocument;

/// Highest source version whose empty bundles are deleted instead of upgraded.
pub const PRUNABLE_UP_TO: u32 = 2;

/// A v1/v2 bundle is empty when no review session was ever started: the
/// `reviews` list is absent, null or has no elements.
pub fn is_empty(config: &ConfigDocument) -> bool {
    match config.get(REVIEWS_KEY) {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Whether a bundle detected at `src_version` should be deleted outright.
/// Version 3+ bundles represent "no review" differently and are never pruned.
pub fn should_prune(src_version: u32, config: &ConfigDocument) -> bool {
    src_version <= PRUNABLE_UP_TO && is_empty(config)
}
