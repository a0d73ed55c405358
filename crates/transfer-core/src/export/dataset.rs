//! Evaluation-dataset exporter: `dataset.json` with records inline.

use super::source_system_info;
use crate::client::MlflowClient;
use crate::error::{Result, TransferError};
use crate::format::Envelope;
use crate::models::EvaluationDataset;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const DATASET_FILE: &str = "dataset.json";

pub struct DatasetExporter {
    client: Arc<dyn MlflowClient>,
}

impl DatasetExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self { client }
    }

    /// Export one dataset addressed by ID or by name.
    pub async fn export_dataset(
        &self,
        id_or_name: &str,
        out_dir: &Path,
    ) -> Result<EvaluationDataset> {
        let dataset = match self.client.get_dataset(id_or_name).await {
            Ok(dataset) => dataset,
            Err(err) if err.is_not_found() => self
                .client
                .get_dataset_by_name(id_or_name)
                .await?
                .ok_or_else(|| TransferError::not_found("dataset", id_or_name))?,
            Err(err) => return Err(err),
        };
        let envelope = Envelope::new(
            source_system_info(self.client.as_ref()).await,
            json!({ "num_records": dataset.records.len() }),
            json!({ "dataset": dataset }),
        );
        envelope.write(&out_dir.join(DATASET_FILE)).await?;
        info!(
            dataset_id = %dataset.dataset_id,
            records = dataset.records.len(),
            "exported dataset"
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_dataset_by_name() {
        let src = Arc::new(MemoryBackend::new("src"));
        let dataset = src.create_dataset("evals", &[], &[]).await.unwrap();
        src.merge_records(
            &dataset.dataset_id,
            &[json!({"input": "q1", "target": "a1"})],
        )
        .await
        .unwrap();

        let out = TempDir::new().unwrap();
        let exported = DatasetExporter::new(src)
            .export_dataset("evals", out.path())
            .await
            .unwrap();
        assert_eq!(exported.records.len(), 1);
        let envelope = Envelope::read(&out.path().join(DATASET_FILE)).await.unwrap();
        assert_eq!(envelope.mlflow["dataset"]["name"], "evals");
    }
}
