//! Directory layout of an export tree.
//!
//! Single run:        `<out>/run.json` + `<out>/artifacts/...`
//! Single model:      `<out>/model.json` + `<out>/<run_id>/run.json` + ...
//! Single experiment: `<out>/experiment.json` + `<out>/<run_id>/...` +
//!                    `<out>/manifest.json`
//! Bulk roots nest the above under `experiments/<id>/` and
//! `models/<name>/`.

use std::path::{Path, PathBuf};

pub const RUN_FILE: &str = "run.json";
pub const EXPERIMENT_FILE: &str = "experiment.json";
pub const MODEL_FILE: &str = "model.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const EXPERIMENTS_DIR: &str = "experiments";
pub const MODELS_DIR: &str = "models";

/// Subdirectory of an experiment or bulk export holding one run.
pub fn run_dir(parent: &Path, run_id: &str) -> PathBuf {
    parent.join(run_id)
}

/// Subdirectory of a bulk export holding one experiment. Experiment names
/// may contain slashes (workspace paths), which are flattened.
pub fn experiment_dir(root: &Path, experiment: &str) -> PathBuf {
    root.join(EXPERIMENTS_DIR).join(safe_dir_name(experiment))
}

/// Subdirectory of a bulk export holding one registered model. Slashes in
/// Unity Catalog names would escape the tree, so dots and slashes are
/// flattened to underscores.
pub fn model_dir(root: &Path, model_name: &str) -> PathBuf {
    root.join(MODELS_DIR).join(safe_dir_name(model_name))
}

fn safe_dir_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dir_flattens_separators() {
        let dir = model_dir(Path::new("/out"), "cat.schema/model");
        assert_eq!(dir, Path::new("/out/models/cat.schema_model"));
    }
}
