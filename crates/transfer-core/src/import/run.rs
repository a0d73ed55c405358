//! Run importer: creates a fresh destination run, replays logged data,
//! uploads the artifact tree, then rewrites MLmodel descriptors.

use super::{build_import_tags, check_version_skew, destination_version, log_batched};
use crate::client::MlflowClient;
use crate::error::Result;
use crate::format::{Envelope, ARTIFACTS_DIR, RUN_FILE};
use crate::models::{Run, RunStatus};
use crate::rewrite::rewrite_mlmodel_artifacts;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct RunImportOptions {
    /// Preserve source identifiers under the `mlflow_exim.src.` namespace.
    pub import_source_tags: bool,
    /// Leave MLmodel descriptors pointing at their source run.
    pub skip_mlmodel_rewrite: bool,
}

/// Outcome of one run import.
#[derive(Debug, Clone)]
pub struct RunImport {
    pub src_run: Run,
    pub dst_run_id: String,
    pub dst_artifact_uri: String,
    pub warnings: Vec<String>,
}

pub struct RunImporter {
    client: Arc<dyn MlflowClient>,
    opts: RunImportOptions,
}

impl RunImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, RunImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: RunImportOptions) -> Self {
        Self { client, opts }
    }

    /// Import one exported run directory into `dst_experiment_id`. A
    /// failure after the destination run was created marks it FAILED
    /// before the error is rethrown.
    pub async fn import_run(&self, input_dir: &Path, dst_experiment_id: &str) -> Result<RunImport> {
        let envelope = Envelope::read(&input_dir.join(RUN_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        check_version_skew(&envelope, dst_version.as_ref());
        let src_run: Run = serde_json::from_value(envelope.mlflow["run"].clone())?;

        let tags = build_import_tags(
            &src_run.data.tags,
            self.opts.import_source_tags,
            &[
                ("run_id", &src_run.info.run_id),
                ("experiment_id", &src_run.info.experiment_id),
                ("user_id", &src_run.info.user_id),
            ],
        );
        let dst_run = self
            .client
            .create_run(
                dst_experiment_id,
                &src_run.info.user_id,
                src_run.info.start_time,
                &tags,
            )
            .await?;
        let dst_run_id = dst_run.info.run_id.clone();

        match self.fill_run(&src_run, &dst_run_id, input_dir, &envelope).await {
            Ok(warnings) => {
                self.client
                    .set_terminated(&dst_run_id, src_run.info.status, src_run.info.end_time)
                    .await?;
                info!(
                    src_run_id = %src_run.info.run_id,
                    dst_run_id,
                    "imported run"
                );
                Ok(RunImport {
                    src_run,
                    dst_run_id,
                    dst_artifact_uri: dst_run.info.artifact_uri,
                    warnings,
                })
            }
            Err(err) => {
                if let Err(mark_err) = self
                    .client
                    .set_terminated(&dst_run_id, RunStatus::Failed, None)
                    .await
                {
                    warn!(dst_run_id, "could not mark run FAILED: {mark_err}");
                }
                Err(err)
            }
        }
    }

    async fn fill_run(
        &self,
        src_run: &Run,
        dst_run_id: &str,
        input_dir: &Path,
        envelope: &Envelope,
    ) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        log_batched(
            self.client.as_ref(),
            dst_run_id,
            &src_run.data.metrics,
            &src_run.data.params,
        )
        .await?;
        if !src_run.inputs.is_empty() {
            self.client.log_inputs(dst_run_id, &src_run.inputs).await?;
        }

        let artifacts_dir = input_dir.join(ARTIFACTS_DIR);
        let exported_artifacts = envelope.info["num_artifacts"].as_u64().unwrap_or(0);
        if artifacts_dir.is_dir() {
            self.client
                .log_artifacts(dst_run_id, &artifacts_dir, None)
                .await?;
            if !self.opts.skip_mlmodel_rewrite {
                rewrite_mlmodel_artifacts(self.client.as_ref(), dst_run_id, None).await?;
            }
        } else if exported_artifacts > 0 {
            let message = format!(
                "{exported_artifacts} artifacts were not downloaded at export time"
            );
            warn!(dst_run_id, "{message}");
            warnings.push(message);
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::error::TransferError;
    use crate::export::RunExporter;
    use crate::models::{KeyValue, Metric, Param};
    use tempfile::TempDir;

    async fn exported_run(src: &Arc<MemoryBackend>, out: &Path) -> Run {
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let run = src
            .create_run(
                &experiment_id,
                "alice",
                1000,
                &[KeyValue::new("my_tag", "my_val")],
            )
            .await
            .unwrap();
        src.log_batch(
            &run.info.run_id,
            &[Metric::new("rmse", 0.789, 1000, 0)],
            &[Param::new("max_depth", "4")],
            &[],
        )
        .await
        .unwrap();
        src.set_terminated(&run.info.run_id, RunStatus::Finished, Some(2000))
            .await
            .unwrap();
        src.put_artifact(&run.info.run_id, "info.txt", b"root").await;
        src.put_artifact(&run.info.run_id, "dir2/info.txt", b"nested").await;
        RunExporter::new(src.clone())
            .export_run(&run.info.run_id, out)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_fields_and_artifacts() {
        let src = Arc::new(MemoryBackend::new("src"));
        let out = TempDir::new().unwrap();
        let src_run = exported_run(&src, out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let import = RunImporter::new(dst.clone())
            .import_run(out.path(), &dst_experiment)
            .await
            .unwrap();

        let dst_run = dst.get_run(&import.dst_run_id).await.unwrap();
        assert_ne!(dst_run.info.run_id, src_run.info.run_id);
        assert_eq!(dst_run.info.status, RunStatus::Finished);
        assert_eq!(dst_run.info.end_time, Some(2000));
        assert_eq!(dst_run.data.params, src_run.data.params);
        assert_eq!(dst_run.data.metrics, src_run.data.metrics);
        assert_eq!(dst_run.tag("my_tag"), Some("my_val"));
        assert_eq!(
            dst.artifact_bytes(&import.dst_run_id, "info.txt").await,
            Some(b"root".to_vec())
        );
        assert_eq!(
            dst.artifact_bytes(&import.dst_run_id, "dir2/info.txt").await,
            Some(b"nested".to_vec())
        );
    }

    #[tokio::test]
    async fn test_source_tags_namespace() {
        let src = Arc::new(MemoryBackend::new("src"));
        let out = TempDir::new().unwrap();
        let src_run = exported_run(&src, out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let importer = RunImporter::with_options(
            dst.clone(),
            RunImportOptions {
                import_source_tags: true,
                skip_mlmodel_rewrite: false,
            },
        );
        let import = importer.import_run(out.path(), &dst_experiment).await.unwrap();
        let dst_run = dst.get_run(&import.dst_run_id).await.unwrap();
        assert_eq!(
            dst_run.tag("mlflow_exim.src.run_id"),
            Some(src_run.info.run_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_mlmodel_rewrite_points_at_destination() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let run = src.create_run(&experiment_id, "u", 0, &[]).await.unwrap();
        let mlmodel = format!(
            "artifact_path: model\nrun_id: {}\nflavors:\n  sklearn:\n    sklearn_version: 1.4.2\n",
            run.info.run_id
        );
        src.put_artifact(&run.info.run_id, "model/MLmodel", mlmodel.as_bytes()).await;

        let out = TempDir::new().unwrap();
        RunExporter::new(src.clone())
            .export_run(&run.info.run_id, out.path())
            .await
            .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let import = RunImporter::new(dst.clone())
            .import_run(out.path(), &dst_experiment)
            .await
            .unwrap();

        let patched = dst
            .artifact_bytes(&import.dst_run_id, "model/MLmodel")
            .await
            .unwrap();
        let text = String::from_utf8(patched).unwrap();
        assert!(text.contains(&format!("run_id: {}", import.dst_run_id)));
        assert!(!text.contains(&run.info.run_id));
        // Untouched fields survive the YAML round trip.
        assert!(text.contains("sklearn_version: 1.4.2"));
    }

    #[tokio::test]
    async fn test_missing_export_dir_fails() {
        let dst = Arc::new(MemoryBackend::new("dst"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let missing = TempDir::new().unwrap();
        let err = RunImporter::new(dst)
            .import_run(missing.path(), &dst_experiment)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
    }
}
