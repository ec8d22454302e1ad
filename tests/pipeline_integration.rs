use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde_json::{Value, json};
use tempfile::tempdir;
use walkdir::WalkDir;

use revbundle::error::{BundleError, Result};
use revbundle::migration::{
    MigrationPipeline, Outcome, StepMigrator, StepRegistry, V1ToV2, V2ToV3, detect_version,
};
use revbundle::store::config::ConfigDocument;
use revbundle::store::lock::BundleLock;

const REVIEW_ID: &str = "8d1f0c2e";

fn write_json(path: &Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn write_state_db(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE results (record_id INTEGER PRIMARY KEY, label INTEGER, classifier TEXT);
         INSERT INTO results VALUES (1, 1, 'nb'), (2, 0, 'nb'), (3, 1, 'svm');",
    )
    .unwrap();
}

fn settings() -> Value {
    json!({"current_value": {"classifier": "nb", "query_strategy": "max", "balance_strategy": "double"}})
}

fn tags() -> Value {
    json!([{"id": "design", "name": "Study design", "values": [{"id": "rct", "name": "RCT"}]}])
}

fn v1_bundle(root: &Path, name: &str) -> PathBuf {
    let bundle = root.join(name);
    write_json(
        &bundle.join("project.json"),
        &json!({
            "id": name,
            "version": "1.5",
            "name": "Screening",
            "mode": "oracle",
            "reviews": [{"id": REVIEW_ID, "start_time": "2023-03-01T10:00:00", "review_finished": false}],
            "feature_matrices": [{"id": "tfidf", "filename": "tfidf_feature_matrix.npz"}]
        }),
    );
    write_state_db(&bundle.join("reviews").join(REVIEW_ID).join("results.sql"));
    write_json(
        &bundle
            .join("reviews")
            .join(REVIEW_ID)
            .join("settings_metadata.json"),
        &settings(),
    );
    fs::create_dir_all(bundle.join("feature_matrices")).unwrap();
    fs::write(bundle.join("feature_matrices/tfidf_feature_matrix.npz"), b"npz").unwrap();
    fs::create_dir_all(bundle.join("data")).unwrap();
    fs::write(bundle.join("data/records.csv"), "title,abstract\nA,B\n").unwrap();
    bundle
}

fn v2_bundle(root: &Path, name: &str, with_tags: bool) -> PathBuf {
    let bundle = root.join(name);
    let review_dir = bundle.join("reviews").join(REVIEW_ID);
    write_json(
        &bundle.join("project.json"),
        &json!({
            "id": name,
            "version": "2.0",
            "project_file_version": 2,
            "name": "Screening",
            "reviews": [{"id": REVIEW_ID, "status": "review"}]
        }),
    );
    write_state_db(&review_dir.join("results.db"));
    write_json(&review_dir.join("settings_metadata.json"), &settings());
    if with_tags {
        write_json(&review_dir.join("tags.json"), &tags());
    }
    fs::create_dir_all(bundle.join("data")).unwrap();
    fs::write(bundle.join("data/records.csv"), "title,abstract\nA,B\n").unwrap();
    bundle
}

fn empty_bundle(root: &Path, name: &str, version: u32) -> PathBuf {
    let bundle = root.join(name);
    let config = if version == 1 {
        json!({"id": name, "version": "1.9", "reviews": []})
    } else {
        json!({"id": name, "version": "2.1", "project_file_version": version})
    };
    write_json(&bundle.join("project.json"), &config);
    bundle
}

/// Relative path -> bytes for every file under `root`.
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

fn dir_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn config_of(bundle: &Path) -> ConfigDocument {
    ConfigDocument::load(bundle).unwrap()
}

/// Runs the real 2 -> 3 step partway, then fails.
struct BrokenV2ToV3;

impl StepMigrator for BrokenV2ToV3 {
    fn from_version(&self) -> u32 {
        2
    }

    fn apply(&self, stage: &Path, mut config: ConfigDocument) -> Result<ConfigDocument> {
        fs::remove_dir_all(stage.join("reviews"))?;
        config.set("review", json!({"half": "done"}));
        config.save(stage)?;
        Err(BundleError::Io(std::io::Error::other("disk on fire")))
    }
}

/// Claims success without stamping the new version.
struct ForgetfulV1ToV2;

impl StepMigrator for ForgetfulV1ToV2 {
    fn from_version(&self) -> u32 {
        1
    }

    fn apply(&self, _stage: &Path, config: ConfigDocument) -> Result<ConfigDocument> {
        Ok(config)
    }
}

/// Runs the real 2 -> 3 step, then pulls the live bundle away so the
/// commit cannot move it aside.
struct VanishingLiveV2ToV3 {
    live: PathBuf,
    parked: PathBuf,
}

impl StepMigrator for VanishingLiveV2ToV3 {
    fn from_version(&self) -> u32 {
        2
    }

    fn apply(&self, stage: &Path, config: ConfigDocument) -> Result<ConfigDocument> {
        let updated = V2ToV3.apply(stage, config)?;
        fs::rename(&self.live, &self.parked)?;
        Ok(updated)
    }
}

struct NoopV3ToV4;

impl StepMigrator for NoopV3ToV4 {
    fn from_version(&self) -> u32 {
        3
    }

    fn apply(&self, stage: &Path, mut config: ConfigDocument) -> Result<ConfigDocument> {
        config.set_version(4);
        config.save(stage)?;
        Ok(config)
    }
}

fn pipeline_with(step: Box<dyn StepMigrator>) -> MigrationPipeline {
    let mut registry = StepRegistry::standard();
    registry.register(step);
    MigrationPipeline::new(registry)
}

#[test]
fn every_supported_range_reaches_destination() {
    for (src, dst) in [(1, 2), (1, 3), (2, 3)] {
        let dir = tempdir().unwrap();
        let bundle = if src == 1 {
            v1_bundle(dir.path(), "proj")
        } else {
            v2_bundle(dir.path(), "proj", true)
        };
        assert_eq!(detect_version(&bundle).unwrap(), src);

        let summary = MigrationPipeline::default()
            .migrate(&bundle, src, dst)
            .unwrap();

        assert_eq!(summary.outcome, Outcome::Migrated);
        assert_eq!(summary.to, dst);
        assert_eq!(summary.steps.len(), (dst - src) as usize);
        assert_eq!(detect_version(&bundle).unwrap(), dst, "range v{src} -> v{dst}");
        assert_eq!(dir_names(dir.path()), vec!["proj".to_string()]);
    }
}

#[test]
fn empty_v1_and_v2_bundles_are_deleted_without_steps() {
    for version in [1, 2] {
        let dir = tempdir().unwrap();
        let bundle = empty_bundle(dir.path(), "empty", version);

        let summary = MigrationPipeline::default()
            .migrate(&bundle, version, 3)
            .unwrap();

        assert_eq!(summary.outcome, Outcome::Pruned);
        assert!(summary.steps.is_empty());
        assert!(!bundle.exists());
        assert!(dir_names(dir.path()).is_empty());
    }
}

#[test]
fn v3_bundle_without_review_still_runs_remaining_steps() {
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("v3");
    write_json(
        &bundle.join("project.json"),
        &json!({"id": "v3", "project_file_version": 3, "review": null}),
    );

    let pipeline = pipeline_with(Box::new(NoopV3ToV4)).with_max_version(4);
    let summary = pipeline.migrate(&bundle, 3, 4).unwrap();

    assert_eq!(summary.outcome, Outcome::Migrated);
    assert_eq!(detect_version(&bundle).unwrap(), 4);
    assert!(bundle.join("legacy_v3/project.json").exists());
}

#[test]
fn failing_step_leaves_live_bundle_byte_identical() {
    let dir = tempdir().unwrap();
    let bundle = v2_bundle(dir.path(), "proj", true);
    let before = snapshot(&bundle);

    let err = pipeline_with(Box::new(BrokenV2ToV3))
        .migrate(&bundle, 2, 3)
        .unwrap_err();

    match &err {
        BundleError::MigrationFailed {
            project_id,
            from,
            to,
            source,
        } => {
            assert_eq!(project_id, "proj");
            assert_eq!((*from, *to), (2, 3));
            assert!(matches!(**source, BundleError::StepFailed { from: 2, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.bundle_unmodified());
    assert_eq!(snapshot(&bundle), before);
    assert_eq!(dir_names(dir.path()), vec!["proj".to_string()]);
}

#[test]
fn failure_mid_chain_keeps_last_committed_version() {
    let dir = tempdir().unwrap();
    let bundle = v1_bundle(dir.path(), "proj");

    let err = pipeline_with(Box::new(BrokenV2ToV3))
        .migrate(&bundle, 1, 3)
        .unwrap_err();
    assert!(matches!(err, BundleError::MigrationFailed { from: 2, .. }));

    assert_eq!(detect_version(&bundle).unwrap(), 2);
    assert!(bundle.join("legacy_v1/project.json").exists());
    assert!(!bundle.join("legacy_v2").exists());
    assert!(
        bundle
            .join("reviews")
            .join(REVIEW_ID)
            .join("results.db")
            .exists()
    );

    // The whole range can be retried from where it stopped.
    let summary = MigrationPipeline::default()
        .migrate(&bundle, 2, 3)
        .unwrap();
    assert_eq!(summary.to, 3);
}

#[test]
fn swap_failure_is_reported_with_full_context() {
    let dir = tempdir().unwrap();
    let bundle = v2_bundle(dir.path(), "proj", true);
    let parked = dir.path().join("parked");
    let step = VanishingLiveV2ToV3 {
        live: fs::canonicalize(&bundle).unwrap(),
        parked: parked.clone(),
    };
    let before = snapshot(&bundle);

    let err = pipeline_with(Box::new(step))
        .migrate(&bundle, 2, 3)
        .unwrap_err();

    match &err {
        BundleError::AtomicSwapFailure {
            project_id,
            from,
            to,
            detail,
            restored,
        } => {
            assert_eq!(project_id, "proj");
            assert_eq!((*from, *to), (2, 3));
            assert!(detail.contains("aside"), "{detail}");
            assert!(*restored);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), "atomic_swap_failure");
    assert!(err.bundle_unmodified());

    // Only the parked original is left; the stage was cleaned up.
    assert_eq!(dir_names(dir.path()), vec!["parked".to_string()]);
    assert_eq!(snapshot(&parked), before);
}

#[test]
fn lock_is_held_across_every_committed_step() {
    let dir = tempdir().unwrap();
    let bundle = v1_bundle(dir.path(), "proj");

    let lock = BundleLock::acquire(&bundle).unwrap();
    MigrationPipeline::default()
        .migrate(&bundle, 1, 3)
        .unwrap();

    assert!(matches!(
        BundleLock::acquire(&bundle),
        Err(BundleError::Locked(_))
    ));
    assert!(lock.path().exists());
    assert!(!bundle.join("legacy_v1").join(lock.path().file_name().unwrap()).exists());

    lock.release().unwrap();
    assert_eq!(dir_names(dir.path()), vec!["proj".to_string()]);
    let _again = BundleLock::acquire(&bundle).unwrap();
}

#[test]
fn step_that_does_not_stamp_version_fails() {
    let dir = tempdir().unwrap();
    let bundle = v1_bundle(dir.path(), "proj");
    let before = snapshot(&bundle);

    let err = pipeline_with(Box::new(ForgetfulV1ToV2))
        .migrate(&bundle, 1, 2)
        .unwrap_err();

    assert_eq!(err.code(), "migration_failed");
    assert_eq!(snapshot(&bundle), before);
}

#[test]
fn direct_and_stepwise_migrations_are_equivalent() {
    let dir = tempdir().unwrap();
    let direct = v1_bundle(&dir.path().join("a"), "proj");
    let stepwise = v1_bundle(&dir.path().join("b"), "proj");
    let pipeline = MigrationPipeline::default();

    pipeline.migrate(&direct, 1, 3).unwrap();
    pipeline.migrate(&stepwise, 1, 2).unwrap();
    pipeline.migrate(&stepwise, 2, 3).unwrap();

    assert_eq!(config_of(&direct).fields(), config_of(&stepwise).fields());
    assert_eq!(snapshot(&direct), snapshot(&stepwise));
}

#[test]
fn v2_to_v3_embeds_settings_and_tags_and_moves_database() {
    let dir = tempdir().unwrap();
    let bundle = v2_bundle(dir.path(), "proj", true);

    MigrationPipeline::default()
        .migrate(&bundle, 2, 3)
        .unwrap();

    let config = config_of(&bundle);
    let review = config.get("review").unwrap();
    assert_eq!(review.get("model"), Some(&settings()));
    assert_eq!(review.get("status"), Some(&json!("review")));
    assert_eq!(review.get("id"), Some(&json!(REVIEW_ID)));
    assert_eq!(config.get("tags"), Some(&tags()));
    assert!(config.get("reviews").is_none());
    assert!(!bundle.join("reviews").exists());

    let conn = Connection::open(bundle.join("results.db")).unwrap();
    let labeled: i64 = conn
        .query_row("SELECT COUNT(*) FROM results WHERE label = 1", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(labeled, 2);

    let backup = bundle.join("legacy_v2/reviews").join(REVIEW_ID);
    assert!(backup.join("results.db").exists());
    assert!(backup.join("tags.json").exists());
    assert_eq!(
        detect_version(&bundle.join("legacy_v2")).unwrap(),
        2,
        "backup keeps the pre-step config"
    );
}

#[test]
fn v1_to_v3_relocates_legacy_database_and_drops_obsolete_data() {
    let dir = tempdir().unwrap();
    let bundle = v1_bundle(dir.path(), "proj");

    MigrationPipeline::default()
        .migrate(&bundle, 1, 3)
        .unwrap();

    let config = config_of(&bundle);
    assert_eq!(config.detect_version().unwrap(), 3);
    assert!(config.get("feature_matrices").is_none());
    assert_eq!(config.get("name"), Some(&json!("Screening")));
    assert!(config.get("tags").is_none());
    assert_eq!(
        config.get("review").and_then(|r| r.get("status")),
        Some(&json!("review"))
    );

    assert!(bundle.join("results.db").exists());
    assert!(bundle.join("data/records.csv").exists());
    assert!(!bundle.join("feature_matrices").exists());
    assert!(!bundle.join("reviews").exists());
}

#[test]
fn backups_do_not_nest_and_skip_lock_files() {
    let dir = tempdir().unwrap();
    let bundle = v1_bundle(dir.path(), "proj");
    fs::write(bundle.join("project.lock"), "").unwrap();

    MigrationPipeline::default()
        .migrate(&bundle, 1, 3)
        .unwrap();

    assert_eq!(
        dir_names(&bundle),
        vec!["data", "legacy_v1", "legacy_v2", "project.json", "results.db"]
    );
    assert!(!bundle.join("legacy_v2/legacy_v1").exists());
    assert!(!bundle.join("legacy_v1/project.lock").exists());
    assert!(
        bundle
            .join("legacy_v1/reviews")
            .join(REVIEW_ID)
            .join("results.sql")
            .exists()
    );
}

#[test]
fn invalid_ranges_touch_nothing() {
    let dir = tempdir().unwrap();
    let bundle = v2_bundle(dir.path(), "proj", false);
    let before = snapshot(&bundle);
    let pipeline = MigrationPipeline::default();

    for (src, dst) in [(3, 2), (0, 2), (2, 4), (2, 2)] {
        let err = pipeline.migrate(&bundle, src, dst).unwrap_err();
        assert!(
            matches!(err, BundleError::InvalidRange { .. }),
            "v{src} -> v{dst}: {err:?}"
        );
    }
    assert_eq!(snapshot(&bundle), before);
}

#[test]
fn missing_bundle_or_config_is_not_found() {
    let dir = tempdir().unwrap();
    let pipeline = MigrationPipeline::default();

    let err = pipeline
        .migrate(&dir.path().join("missing"), 1, 3)
        .unwrap_err();
    assert!(matches!(err, BundleError::NotFound(_)));

    fs::create_dir_all(dir.path().join("bare")).unwrap();
    let err = pipeline.migrate(&dir.path().join("bare"), 1, 3).unwrap_err();
    assert!(matches!(err, BundleError::NotFound(_)));
}

#[test]
fn migrate_to_latest_skips_current_bundles() {
    let dir = tempdir().unwrap();
    let pipeline = MigrationPipeline::default();

    let old = v1_bundle(dir.path(), "old");
    let summary = pipeline.migrate_to_latest(&old).unwrap().unwrap();
    assert_eq!((summary.from, summary.to), (1, 3));

    assert!(pipeline.migrate_to_latest(&old).unwrap().is_none());
}

#[test]
fn detection_is_stable() {
    let dir = tempdir().unwrap();
    let bundle = v1_bundle(dir.path(), "proj");
    let before = snapshot(&bundle);

    let first = detect_version(&bundle).unwrap();
    let second = detect_version(&bundle).unwrap();
    assert_eq!(first, second);
    assert_eq!(snapshot(&bundle), before);
}

#[test]
fn builtin_steps_are_registered_by_version() {
    assert_eq!(V1ToV2.to_version(), 2);
    assert_eq!(V2ToV3.to_version(), 3);
}
