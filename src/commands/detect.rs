use std::path::Path;

use colored::Colorize;
use serde_json::json;

use crate::error::{BundleError, Result};
use crate::output::{self, Format};
use crate::store::config::{ConfigDocument, VERSION_FIELD};
use crate::store::layout::MAX_SUPPORTED_VERSION;

pub fn run(bundle: &Path, format: Format) -> Result<()> {
    if !bundle.is_dir() {
        return Err(BundleError::NotFound(bundle.to_path_buf()));
    }
    let config = ConfigDocument::load(bundle)?;
    let version = config.detect_version()?;
    let source = if config.get(VERSION_FIELD).is_some() {
        "project_file_version"
    } else {
        "app_version"
    };
    let up_to_date = version >= MAX_SUPPORTED_VERSION;

    match format {
        Format::Json => output::print_json(&json!({
            "project_id": config.project_id(),
            "version": version,
            "source": source,
            "latest": MAX_SUPPORTED_VERSION,
            "up_to_date": up_to_date,
        }))?,
        Format::Pretty => {
            let status = if up_to_date {
                "up to date".green().to_string()
            } else {
                format!("upgrade available to v{MAX_SUPPORTED_VERSION}")
                    .yellow()
                    .to_string()
            };
            println!(
                "project {} is at v{version} (from {source}); {status}",
                config.project_id()
            );
        }
        Format::Minimal => println!("{version}"),
    }
    Ok(())
}
