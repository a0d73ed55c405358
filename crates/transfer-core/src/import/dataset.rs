//! Evaluation-dataset importer. Skip-if-exists by default: dataset
//! identity is its name, and merging records into an unrelated dataset of
//! the same name would corrupt it.

use super::{build_import_tags, check_version_skew, destination_version};
use crate::client::MlflowClient;
use crate::compat::Feature;
use crate::error::Result;
use crate::export::DATASET_FILE;
use crate::format::Envelope;
use crate::models::EvaluationDataset;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct DatasetImportOptions {
    /// Delete a pre-existing destination dataset instead of skipping.
    pub delete_evaluation_dataset: bool,
    pub import_source_tags: bool,
    /// Destination experiment IDs to associate instead of the source ones.
    pub dst_experiment_ids: Vec<String>,
}

pub struct DatasetImporter {
    client: Arc<dyn MlflowClient>,
    opts: DatasetImportOptions,
}

impl DatasetImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, DatasetImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: DatasetImportOptions) -> Self {
        Self { client, opts }
    }

    /// Import one exported dataset; `Ok(None)` means it was skipped
    /// because the destination already has one of that name.
    pub async fn import_dataset(&self, input_dir: &Path) -> Result<Option<EvaluationDataset>> {
        let envelope = Envelope::read(&input_dir.join(DATASET_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        if let Some(version) = &dst_version {
            version.require(Feature::EvaluationDatasets)?;
        }
        check_version_skew(&envelope, dst_version.as_ref());
        let src_dataset: EvaluationDataset =
            serde_json::from_value(envelope.mlflow["dataset"].clone())?;

        if let Some(existing) = self.client.get_dataset_by_name(&src_dataset.name).await? {
            if !self.opts.delete_evaluation_dataset {
                warn!(name = %src_dataset.name, "destination dataset exists, skipping");
                return Ok(None);
            }
            warn!(name = %src_dataset.name, "deleting pre-existing destination dataset");
            self.client.delete_dataset(&existing.dataset_id).await?;
        }

        let tags = build_import_tags(
            &src_dataset.tags,
            self.opts.import_source_tags,
            &[("dataset_id", &src_dataset.dataset_id)],
        );
        let dst_dataset = self
            .client
            .create_dataset(&src_dataset.name, &self.opts.dst_experiment_ids, &tags)
            .await?;
        if !src_dataset.records.is_empty() {
            self.client
                .merge_records(&dst_dataset.dataset_id, &src_dataset.records)
                .await?;
        }
        info!(
            name = %src_dataset.name,
            records = src_dataset.records.len(),
            "imported dataset"
        );
        Ok(Some(dst_dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::export::DatasetExporter;
    use serde_json::json;
    use tempfile::TempDir;

    async fn export_dataset(out: &Path) {
        let src = Arc::new(MemoryBackend::new("src"));
        let dataset = src.create_dataset("evals", &[], &[]).await.unwrap();
        src.merge_records(&dataset.dataset_id, &[json!({"input": "q", "target": "a"})])
            .await
            .unwrap();
        DatasetExporter::new(src)
            .export_dataset("evals", out)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import_dataset_with_records() {
        let out = TempDir::new().unwrap();
        export_dataset(out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        let imported = DatasetImporter::new(dst.clone())
            .import_dataset(out.path())
            .await
            .unwrap()
            .unwrap();
        let stored = dst.get_dataset(&imported.dataset_id).await.unwrap();
        assert_eq!(stored.records.len(), 1);
        assert_eq!(stored.records[0]["input"], "q");
    }

    #[tokio::test]
    async fn test_skip_if_exists() {
        let out = TempDir::new().unwrap();
        export_dataset(out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        dst.create_dataset("evals", &[], &[]).await.unwrap();
        let outcome = DatasetImporter::new(dst)
            .import_dataset(out.path())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
