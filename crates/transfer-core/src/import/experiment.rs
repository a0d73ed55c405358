//! Experiment importer: ensures the destination experiment, imports every
//! run listed in the manifest, then remaps parent-run tags.

use super::run::{RunImportOptions, RunImporter};
use super::{build_import_tags, check_version_skew, destination_version};
use crate::client::{ensure_experiment, MlflowClient};
use crate::error::Result;
use crate::format::{run_dir, Envelope, ExperimentManifest, EXPERIMENT_FILE};
use crate::models::Experiment;
use crate::rewrite::remap_parent_runs;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ExperimentImportOptions {
    pub import_source_tags: bool,
    pub skip_mlmodel_rewrite: bool,
}

/// Outcome of one experiment import.
#[derive(Debug, Clone)]
pub struct ExperimentImport {
    pub dst_experiment_id: String,
    /// src_run_id -> dst_run_id for every successfully imported run.
    pub run_map: BTreeMap<String, String>,
    pub failed_run_ids: Vec<String>,
}

pub struct ExperimentImporter {
    client: Arc<dyn MlflowClient>,
    opts: ExperimentImportOptions,
}

impl ExperimentImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, ExperimentImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: ExperimentImportOptions) -> Self {
        Self { client, opts }
    }

    /// Import an exported experiment directory under the destination name
    /// `dst_experiment_name` (defaults to the source name). Individual run
    /// failures are recorded, not rethrown.
    pub async fn import_experiment(
        &self,
        input_dir: &Path,
        dst_experiment_name: Option<&str>,
    ) -> Result<ExperimentImport> {
        let envelope = Envelope::read(&input_dir.join(EXPERIMENT_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        check_version_skew(&envelope, dst_version.as_ref());
        let src_experiment: Experiment =
            serde_json::from_value(envelope.mlflow["experiment"].clone())?;
        let manifest = ExperimentManifest::read(input_dir).await?;

        let name = dst_experiment_name.unwrap_or(&src_experiment.name);
        let tags = build_import_tags(
            &src_experiment.tags,
            self.opts.import_source_tags,
            &[
                ("experiment_id", &src_experiment.experiment_id),
                ("name", &src_experiment.name),
            ],
        );
        let dst_experiment_id = ensure_experiment(self.client.as_ref(), name, &tags).await?;

        let run_importer = RunImporter::with_options(
            self.client.clone(),
            RunImportOptions {
                import_source_tags: self.opts.import_source_tags,
                skip_mlmodel_rewrite: self.opts.skip_mlmodel_rewrite,
            },
        );
        let mut import = ExperimentImport {
            dst_experiment_id: dst_experiment_id.clone(),
            run_map: BTreeMap::new(),
            failed_run_ids: Vec::new(),
        };
        for src_run_id in &manifest.run_ids {
            match run_importer
                .import_run(&run_dir(input_dir, src_run_id), &dst_experiment_id)
                .await
            {
                Ok(run_import) => {
                    import
                        .run_map
                        .insert(src_run_id.clone(), run_import.dst_run_id);
                }
                Err(err) => {
                    warn!(src_run_id, "run import failed: {}", err.summary());
                    import.failed_run_ids.push(src_run_id.clone());
                }
            }
        }

        remap_parent_runs(self.client.as_ref(), &import.run_map).await?;
        info!(
            dst_experiment_id,
            runs = import.run_map.len(),
            failed = import.failed_run_ids.len(),
            "imported experiment"
        );
        Ok(import)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::config::TagsConfig;
    use crate::export::{ExperimentExportOptions, ExperimentExporter};
    use crate::models::KeyValue;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_nested_run_tree_parent_remap() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        // Root plus two levels of two children each: 7 runs.
        let root = src
            .create_run(&experiment_id, "u", 0, &[])
            .await
            .unwrap()
            .info
            .run_id;
        let mut level = vec![root.clone()];
        let mut all = vec![root.clone()];
        for _ in 0..2 {
            let mut next = Vec::new();
            for parent in &level {
                for _ in 0..2 {
                    let child = src
                        .create_run(
                            &experiment_id,
                            "u",
                            0,
                            &[KeyValue::new(TagsConfig::PARENT_RUN_ID, parent)],
                        )
                        .await
                        .unwrap()
                        .info
                        .run_id;
                    next.push(child.clone());
                    all.push(child);
                }
            }
            level = next;
        }
        assert_eq!(all.len(), 7);

        let out = TempDir::new().unwrap();
        ExperimentExporter::with_options(
            src.clone(),
            ExperimentExportOptions {
                run_ids: Some(vec![root.clone()]),
                check_nested_runs: true,
                skip_download_artifacts: false,
            },
        )
        .export_experiment(&experiment_id, out.path())
        .await
        .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let import = ExperimentImporter::new(dst.clone())
            .import_experiment(out.path(), None)
            .await
            .unwrap();
        assert_eq!(import.run_map.len(), 7);

        // Every non-root destination run's parent tag points at the
        // destination run made from its source parent.
        for src_run_id in &all {
            let src_run = src.get_run(src_run_id).await.unwrap();
            let dst_run = dst.get_run(&import.run_map[src_run_id]).await.unwrap();
            match src_run.parent_run_id() {
                None => assert_eq!(dst_run.parent_run_id(), None),
                Some(src_parent) => {
                    assert_eq!(
                        dst_run.parent_run_id(),
                        Some(import.run_map[src_parent].as_str())
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_reuses_existing_destination_experiment() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        src.create_run(&experiment_id, "u", 0, &[]).await.unwrap();
        let out = TempDir::new().unwrap();
        ExperimentExporter::new(src)
            .export_experiment(&experiment_id, out.path())
            .await
            .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let existing = dst.create_experiment("already-there", &[]).await.unwrap();
        let import = ExperimentImporter::new(dst)
            .import_experiment(out.path(), Some("already-there"))
            .await
            .unwrap();
        assert_eq!(import.dst_experiment_id, existing);
    }
}
