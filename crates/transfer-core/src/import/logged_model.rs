//! Logged-model importer: creates the destination model, uploads its
//! artifact tree with MLmodel identifiers rebound, then finalizes it.

use super::{build_import_tags, check_version_skew, destination_version};
use crate::export::LOGGED_MODEL_FILE;
use crate::client::MlflowClient;
use crate::compat::Feature;
use crate::error::{Result, TransferError};
use crate::format::{Envelope, ARTIFACTS_DIR};
use crate::models::{LoggedModel, LoggedModelStatus};
use crate::rewrite::{patch_mlmodel_tree, LoggedModelIds};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct LoggedModelImportOptions {
    pub import_source_tags: bool,
    /// Destination run the model should reference, when its source run was
    /// imported alongside it.
    pub dst_run_id: Option<String>,
}

pub struct LoggedModelImporter {
    client: Arc<dyn MlflowClient>,
    opts: LoggedModelImportOptions,
}

impl LoggedModelImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, LoggedModelImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: LoggedModelImportOptions) -> Self {
        Self { client, opts }
    }

    pub async fn import_logged_model(
        &self,
        input_dir: &Path,
        dst_experiment_id: &str,
    ) -> Result<LoggedModel> {
        let envelope = Envelope::read(&input_dir.join(LOGGED_MODEL_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        if let Some(version) = &dst_version {
            version.require(Feature::LoggedModels)?;
        }
        check_version_skew(&envelope, dst_version.as_ref());
        let src_model: LoggedModel =
            serde_json::from_value(envelope.mlflow["logged_model"].clone())?;

        let tags = build_import_tags(
            &src_model.tags,
            self.opts.import_source_tags,
            &[
                ("model_id", &src_model.model_id),
                ("experiment_id", &src_model.experiment_id),
            ],
        );
        let dst_model = self
            .client
            .create_logged_model(
                dst_experiment_id,
                &src_model.name,
                self.opts.dst_run_id.as_deref(),
                &src_model.params,
                &src_model.metrics,
                &tags,
            )
            .await?;

        match self
            .upload_artifacts(input_dir, &src_model, &dst_model)
            .await
        {
            Ok(()) => {
                self.client
                    .finalize_logged_model(&dst_model.model_id, LoggedModelStatus::Ready)
                    .await?;
                info!(
                    src_model_id = %src_model.model_id,
                    dst_model_id = %dst_model.model_id,
                    "imported logged model"
                );
                Ok(dst_model)
            }
            Err(err) => {
                if let Err(mark_err) = self
                    .client
                    .finalize_logged_model(&dst_model.model_id, LoggedModelStatus::Failed)
                    .await
                {
                    warn!(
                        dst_model_id = %dst_model.model_id,
                        "could not mark logged model FAILED: {mark_err}"
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_artifacts(
        &self,
        input_dir: &Path,
        src_model: &LoggedModel,
        dst_model: &LoggedModel,
    ) -> Result<()> {
        let artifacts_dir = input_dir.join(ARTIFACTS_DIR);
        if !artifacts_dir.is_dir() {
            return Ok(());
        }
        // Patch a scratch copy; the export tree stays pristine.
        let staging = tempfile::tempdir().map_err(|e| TransferError::io_with_path(e, "."))?;
        copy_tree(&artifacts_dir, staging.path()).await?;
        let ids = LoggedModelIds {
            model_id: dst_model.model_id.clone(),
            model_uuid: dst_model.model_id.clone(),
            artifact_path: src_model.name.clone(),
        };
        patch_mlmodel_tree(
            staging.path(),
            self.opts.dst_run_id.as_deref(),
            Some(&ids),
        )
        .await?;
        self.client
            .log_logged_model_artifacts(&dst_model.model_id, staging.path())
            .await
    }
}

async fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| TransferError::Other(e.to_string()))?;
        let target = to.join(rel);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io_with_path(e, parent))?;
        }
        tokio::fs::copy(entry.path(), &target)
            .await
            .map_err(|e| TransferError::io_with_path(e, entry.path()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::export::LoggedModelExporter;
    use crate::models::Param;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_logged_model_round_trip_with_mlmodel_patch() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let model = src
            .create_logged_model(
                &experiment_id,
                "clf",
                None,
                &[Param::new("alpha", "0.1")],
                &[],
                &[],
            )
            .await
            .unwrap();
        let mlmodel = format!(
            "artifact_path: clf\nmodel_id: {}\nmodel_uuid: {}\nflavors: {{}}\n",
            model.model_id, model.model_id
        );
        src.put_logged_model_artifact(&model.model_id, "MLmodel", mlmodel.as_bytes()).await;

        let out = TempDir::new().unwrap();
        LoggedModelExporter::new(src)
            .export_logged_model(&model.model_id, out.path())
            .await
            .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let imported = LoggedModelImporter::new(dst.clone())
            .import_logged_model(out.path(), &dst_experiment)
            .await
            .unwrap();

        assert_ne!(imported.model_id, model.model_id);
        assert_eq!(imported.status, LoggedModelStatus::Ready);
        let bytes = dst
            .logged_model_artifact_bytes(&imported.model_id, "MLmodel")
            .await
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(&format!("model_id: {}", imported.model_id)));
        assert!(!text.contains(&model.model_id));
    }

    #[tokio::test]
    async fn test_old_destination_rejected_before_mutation() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let model = src
            .create_logged_model(&experiment_id, "clf", None, &[], &[], &[])
            .await
            .unwrap();
        let out = TempDir::new().unwrap();
        LoggedModelExporter::new(src)
            .export_logged_model(&model.model_id, out.path())
            .await
            .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst").with_version("2.21.0"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let err = LoggedModelImporter::new(dst)
            .import_logged_model(out.path(), &dst_experiment)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unsupported { .. }));
    }
}
