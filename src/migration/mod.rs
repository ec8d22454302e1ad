//! Step-wise upgrade of project bundles across schema versions.

pub mod pipeline;
pub mod prune;
pub mod step;
mod v1v2;
mod v2v3;

pub use pipeline::{MigrationPipeline, MigrationSummary, Outcome, StepRecord, detect_version};
pub use step::{StepMigrator, StepRegistry};
pub use v1v2::V1ToV2;
pub use v2v3::V2ToV3;
