//! On-disk transfer format: directory layout, JSON envelopes, manifests.

mod envelope;
mod layout;
mod manifest;

pub use envelope::{mirror_timestamps, read_json, write_json, Envelope, SystemInfo};
pub use layout::{
    experiment_dir, model_dir, run_dir, ARTIFACTS_DIR, EXPERIMENTS_DIR, EXPERIMENT_FILE,
    MANIFEST_FILE, MODELS_DIR, MODEL_FILE, RUN_FILE,
};
pub use manifest::{BulkManifest, ExperimentManifest, UnitResult, UnitStatus};
