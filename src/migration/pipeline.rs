use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, info_span};

use crate::error::{BundleError, Result};
use crate::migration::prune;
use crate::migration::step::{StepMigrator, StepRegistry};
use crate::store::config::ConfigDocument;
use crate::store::files::{self, entry_name};
use crate::store::layout::{MAX_SUPPORTED_VERSION, is_legacy_backup, is_transient, legacy_backup_dir};
use crate::store::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every requested step was applied and committed.
    Migrated,
    /// The bundle held no review session and was deleted.
    Pruned,
}

/// One committed version transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub from: u32,
    pub to: u32,
    /// Backup directory, relative to the bundle root.
    pub backup: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub project_id: String,
    pub outcome: Outcome,
    pub from: u32,
    pub to: u32,
    pub steps: Vec<StepRecord>,
}

/// Upgrades bundles one version at a time through a staged copy.
///
/// Every step works on a private copy of the bundle; the only mutation of
/// the live directory is the swap at the end of a successful step. A failed
/// step therefore leaves the bundle at the last committed version.
pub struct MigrationPipeline {
    registry: StepRegistry,
    max_version: u32,
}

impl Default for MigrationPipeline {
    fn default() -> Self {
        Self::new(StepRegistry::standard())
    }
}

impl MigrationPipeline {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            registry,
            max_version: MAX_SUPPORTED_VERSION,
        }
    }

    /// Accept destinations up to `max_version`; the registry must cover every
    /// step below it.
    pub fn with_max_version(mut self, max_version: u32) -> Self {
        self.max_version = max_version;
        self
    }

    pub fn max_version(&self) -> u32 {
        self.max_version
    }

    /// Migrate the bundle at `bundle` from `src_version` to `dst_version`.
    ///
    /// Assumes exclusive access to the bundle for the duration of the call.
    pub fn migrate(
        &self,
        bundle: &Path,
        src_version: u32,
        dst_version: u32,
    ) -> Result<MigrationSummary> {
        self.check_range(src_version, dst_version)?;

        if !bundle.is_dir() {
            return Err(BundleError::NotFound(bundle.to_path_buf()));
        }
        let bundle = fs::canonicalize(bundle)?;
        let config = ConfigDocument::load(&bundle)?;
        let project_id = config.project_id().to_string();

        let span = info_span!("migrate", project = %project_id, bundle = %bundle.display());
        let _entered = span.enter();

        if prune::should_prune(src_version, &config) {
            fs::remove_dir_all(&bundle).map_err(|err| BundleError::MigrationFailed {
                project_id: project_id.clone(),
                from: src_version,
                to: src_version + 1,
                source: Box::new(err.into()),
            })?;
            info!(from = src_version, "deleted empty project instead of migrating");
            return Ok(MigrationSummary {
                project_id,
                outcome: Outcome::Pruned,
                from: src_version,
                to: src_version,
                steps: Vec::new(),
            });
        }

        let mut current = src_version;
        let mut steps = Vec::new();
        while current < dst_version {
            let record = self.advance(&bundle, &project_id, current)?;
            steps.push(record);
            current += 1;
        }

        info!(from = src_version, to = current, "project migrated");
        Ok(MigrationSummary {
            project_id,
            outcome: Outcome::Migrated,
            from: src_version,
            to: current,
            steps,
        })
    }

    /// Detect the bundle's version and bring it to the newest supported one.
    /// Returns `None` when nothing needed doing.
    pub fn migrate_to_latest(&self, bundle: &Path) -> Result<Option<MigrationSummary>> {
        let version = detect_version(bundle)?;
        if version >= self.max_version {
            return Ok(None);
        }
        self.migrate(bundle, version, self.max_version).map(Some)
    }

    /// Validate a requested range without touching the filesystem.
    pub fn check_range(&self, src: u32, dst: u32) -> Result<()> {
        let reason = if src < 1 {
            "source version must be at least 1".to_string()
        } else if dst > self.max_version {
            format!("destination version must be at most {}", self.max_version)
        } else if src >= dst {
            "source version must be less than destination version".to_string()
        } else {
            return Ok(());
        };
        Err(BundleError::InvalidRange { src, dst, reason })
    }

    /// Stage, back up, transform and commit a single version step.
    fn advance(&self, bundle: &Path, project_id: &str, from: u32) -> Result<StepRecord> {
        let to = from + 1;
        let wrap = |source: BundleError| {
            error!(
                project = project_id,
                bundle = %bundle.display(),
                from,
                to,
                error = %source,
                "migration step failed; bundle left at v{from}"
            );
            BundleError::MigrationFailed {
                project_id: project_id.to_string(),
                from,
                to,
                source: Box::new(source),
            }
        };

        let Some(step) = self.registry.get(from) else {
            return Err(wrap(BundleError::UnsupportedVersion(from)));
        };

        info!(from, to, "upgrading project");
        let stage = Stage::create(bundle).map_err(wrap)?;
        let backup = PathBuf::from(legacy_backup_dir(from));
        snapshot_legacy(bundle, &stage.path().join(&backup)).map_err(wrap)?;

        if let Err(source) = run_step(step, stage.path()) {
            stage.discard();
            return Err(wrap(BundleError::StepFailed {
                from,
                to,
                source: Box::new(source),
            }));
        }

        stage.commit(bundle).map_err(|swap| {
            error!(
                project = project_id,
                bundle = %bundle.display(),
                from,
                to,
                restored = swap.restored,
                detail = %swap.detail,
                "atomic swap failed"
            );
            BundleError::AtomicSwapFailure {
                project_id: project_id.to_string(),
                from,
                to,
                detail: swap.detail,
                restored: swap.restored,
            }
        })?;

        info!(from, to, backup = %backup.display(), "committed migration step");
        Ok(StepRecord { from, to, backup })
    }
}

/// Load the staged config, run the step and check the stamped version.
fn run_step(step: &dyn StepMigrator, stage: &Path) -> Result<()> {
    let config = ConfigDocument::load(stage)?;
    let updated = step.apply(stage, config)?;

    let stamped = ConfigDocument::load(stage)?.detect_version()?;
    if stamped != step.to_version() || updated.detect_version()? != stamped {
        return Err(BundleError::invalid_config(
            updated.path(),
            format!(
                "step stamped version {stamped}, expected {}",
                step.to_version()
            ),
        ));
    }
    Ok(())
}

/// Copy the live bundle as it stands before a step into `target`. Earlier
/// backups already sit at the stage root and are not nested again.
fn snapshot_legacy(live: &Path, target: &Path) -> Result<()> {
    files::remove_dir_if_exists(target)?;
    files::copy_tree(live, target, |entry| {
        let name = entry_name(entry);
        is_transient(name) || (entry.depth() == 1 && is_legacy_backup(name))
    })?;
    Ok(())
}

/// Version of the bundle at `bundle`, read from its config.
pub fn detect_version(bundle: &Path) -> Result<u32> {
    if !bundle.is_dir() {
        return Err(BundleError::NotFound(bundle.to_path_buf()));
    }
    ConfigDocument::load(bundle)?.detect_version()
}
