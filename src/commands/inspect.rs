use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;
use serde_json::{Value, json};

use crate::error::{BundleError, Result};
use crate::migration::prune;
use crate::migration::step::{review_sessions, session_id};
use crate::output::{self, Format};
use crate::store::config::ConfigDocument;
use crate::store::layout::{BundleLayout, LogicalFile, MAX_SUPPORTED_VERSION, is_legacy_backup};
use crate::store::state_db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Ok,
    Warn,
    Error,
}

#[derive(Debug)]
struct Check {
    category: &'static str,
    level: Level,
    message: String,
}

impl Check {
    fn new(category: &'static str, level: Level, message: impl Into<String>) -> Self {
        Self {
            category,
            level,
            message: message.into(),
        }
    }

    fn prefix(&self) -> String {
        match self.level {
            Level::Ok => " ok ".green().to_string(),
            Level::Warn => "warn".yellow().to_string(),
            Level::Error => " ERR".red().bold().to_string(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "category": self.category,
            "level": match self.level {
                Level::Ok => "ok",
                Level::Warn => "warn",
                Level::Error => "error",
            },
            "message": self.message,
        })
    }
}

/// Report version, resolved layout and health of a bundle without changing it.
pub fn run(bundle: &Path, format: Format) -> Result<()> {
    if !bundle.is_dir() {
        return Err(BundleError::NotFound(bundle.to_path_buf()));
    }
    let config = ConfigDocument::load(bundle)?;
    let mut checks = Vec::new();

    let version = match config.detect_version() {
        Ok(version) => version,
        Err(err) => {
            checks.push(Check::new("version", Level::Error, err.to_string()));
            return emit(&config, None, false, &checks, format);
        }
    };

    if version < MAX_SUPPORTED_VERSION {
        checks.push(Check::new(
            "version",
            Level::Warn,
            format!("v{version}; migration to v{MAX_SUPPORTED_VERSION} pending"),
        ));
    } else if version == MAX_SUPPORTED_VERSION {
        checks.push(Check::new("version", Level::Ok, format!("v{version}")));
    } else {
        checks.push(Check::new(
            "version",
            Level::Error,
            format!("v{version} is newer than this tool supports (v{MAX_SUPPORTED_VERSION})"),
        ));
    }

    let prunable = prune::should_prune(version, &config);
    if prunable {
        checks.push(Check::new(
            "review",
            Level::Warn,
            "no review session started; the project is deleted on migration",
        ));
    }

    if let Ok(layout) = BundleLayout::for_version(version) {
        for (label, path) in state_databases(bundle, &config, layout, &mut checks) {
            check_state_database(bundle, &label, &path, &mut checks);
        }
    }

    for backup in legacy_backups(bundle)? {
        checks.push(Check::new("backups", Level::Ok, format!("legacy backup {backup}")));
    }

    emit(&config, Some(version), prunable, &checks, format)
}

/// Resolve the expected state database path(s) for this layout.
fn state_databases(
    bundle: &Path,
    config: &ConfigDocument,
    layout: BundleLayout,
    checks: &mut Vec<Check>,
) -> Vec<(String, PathBuf)> {
    if let Some(review_key) = layout.review_key() {
        let Some(review) = config.get(review_key).filter(|review| !review.is_null()) else {
            checks.push(Check::new("review", Level::Ok, "no review recorded"));
            return Vec::new();
        };
        if let Some(model_key) = layout.embedded_key(LogicalFile::Settings) {
            let (level, message) = if review.get(model_key).is_some() {
                (Level::Ok, format!("settings embedded as {review_key}.{model_key}"))
            } else {
                (Level::Warn, format!("{review_key}.{model_key} missing"))
            };
            checks.push(Check::new("review", level, message));
        }
        return layout
            .resolve(LogicalFile::StateDatabase, "")
            .map(|path| vec![("review".to_string(), path)])
            .unwrap_or_default();
    }

    let sessions = match review_sessions(config) {
        Ok(sessions) => sessions,
        Err(err) => {
            checks.push(Check::new("review", Level::Error, err.to_string()));
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for session in &sessions {
        let id = match session_id(config, session) {
            Ok(id) => id,
            Err(err) => {
                checks.push(Check::new("review", Level::Error, err.to_string()));
                continue;
            }
        };
        if let Some(settings) = layout.resolve(LogicalFile::Settings, id) {
            let level = if bundle.join(&settings).is_file() {
                Level::Ok
            } else {
                Level::Warn
            };
            checks.push(Check::new("review", level, settings.display().to_string()));
        }
        if let Some(db) = layout.resolve(LogicalFile::StateDatabase, id) {
            found.push((format!("review {id}"), db));
        }
    }
    found
}

fn check_state_database(bundle: &Path, label: &str, relative: &Path, checks: &mut Vec<Check>) {
    let path = bundle.join(relative);
    if !path.is_file() {
        checks.push(Check::new(
            "state",
            Level::Warn,
            format!("{label}: {} missing", relative.display()),
        ));
        return;
    }

    let check = match state_db::quick_check(&path) {
        Ok(problems) if problems.is_empty() => Check::new(
            "state",
            Level::Ok,
            format!("{label}: {} passes quick_check", relative.display()),
        ),
        Ok(problems) => Check::new(
            "state",
            Level::Error,
            format!("{label}: {}: {}", relative.display(), problems.join("; ")),
        ),
        Err(err) => Check::new(
            "state",
            Level::Error,
            format!("{label}: {}: {err}", relative.display()),
        ),
    };
    checks.push(check);
}

fn legacy_backups(bundle: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(bundle)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && is_legacy_backup(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn emit(
    config: &ConfigDocument,
    version: Option<u32>,
    prunable: bool,
    checks: &[Check],
    format: Format,
) -> Result<()> {
    let errors = checks.iter().filter(|c| c.level == Level::Error).count();
    let warnings = checks.iter().filter(|c| c.level == Level::Warn).count();

    match format {
        Format::Json => output::print_json(&json!({
            "project_id": config.project_id(),
            "version": version,
            "latest": MAX_SUPPORTED_VERSION,
            "prunable": prunable,
            "checks": checks.iter().map(Check::to_json).collect::<Vec<_>>(),
            "summary": {"warnings": warnings, "errors": errors},
        }))?,
        Format::Pretty => {
            println!("{}", format!("project {}", config.project_id()).bold());
            let mut current = "";
            for check in checks {
                if check.category != current {
                    println!("{}", check.category.bold());
                    current = check.category;
                }
                println!("  {}  {}", check.prefix(), check.message);
            }
            println!(
                "{} warnings, {} errors",
                warnings.to_string().yellow(),
                if errors > 0 {
                    errors.to_string().red().bold().to_string()
                } else {
                    errors.to_string()
                },
            );
        }
        Format::Minimal => println!(
            "{} {} {warnings} {errors}",
            config.project_id(),
            version.map_or_else(|| "?".to_string(), |v| v.to_string()),
        ),
    }
    Ok(())
}
