use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::{BundleError, Result};
use crate::migration::{MigrationPipeline, MigrationSummary, detect_version};
use crate::output::{self, Format};
use crate::store::config::ConfigDocument;
use crate::store::lock::BundleLock;

#[derive(Debug, Serialize)]
struct MigrateReport<'a> {
    #[serde(flatten)]
    summary: &'a MigrationSummary,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    tool: String,
}

/// Upgrade a bundle. `from` defaults to the detected version and `to` to the
/// newest supported one; an already-current bundle is reported, not migrated.
pub fn run(bundle: &Path, from: Option<u32>, to: Option<u32>, format: Format) -> Result<()> {
    let pipeline = MigrationPipeline::default();
    if !bundle.is_dir() {
        return Err(BundleError::NotFound(bundle.to_path_buf()));
    }

    let to = to.unwrap_or(pipeline.max_version());
    let from = match from {
        Some(version) => version,
        None => {
            let detected = detect_version(bundle)?;
            if detected >= to {
                return print_up_to_date(bundle, detected, format);
            }
            detected
        }
    };

    pipeline.check_range(from, to)?;

    let lock = BundleLock::acquire(bundle)?;
    let lock_path = lock.path().to_path_buf();
    let started_at = Utc::now();
    let result = pipeline.migrate(bundle, from, to);
    if let Err(err) = lock.release() {
        warn!(lock = %lock_path.display(), error = %err, "could not release bundle lock");
    }
    let summary = result?;

    match format {
        Format::Json => output::print_json(&MigrateReport {
            summary: &summary,
            started_at,
            finished_at: Utc::now(),
            tool: format!("revbundle {}", env!("CARGO_PKG_VERSION")),
        })?,
        _ => output::print_summary(&summary, format)?,
    }
    Ok(())
}

fn print_up_to_date(bundle: &Path, version: u32, format: Format) -> Result<()> {
    let config = ConfigDocument::load(bundle)?;
    match format {
        Format::Json => output::print_json(&json!({
            "project_id": config.project_id(),
            "outcome": "up_to_date",
            "from": version,
            "to": version,
            "steps": [],
        }))?,
        Format::Pretty => println!(
            "{} project {} already at v{version}",
            "ok".green().bold(),
            config.project_id()
        ),
        Format::Minimal => println!("{} up_to_date {version} {version}", config.project_id()),
    }
    Ok(())
}
