//! Run exporter: `<out>/run.json` plus `<out>/artifacts/...`.

use super::source_system_info;
use crate::client::{list_artifacts_recursive, MlflowClient};
use crate::error::Result;
use crate::format::{Envelope, ARTIFACTS_DIR, RUN_FILE};
use crate::models::Run;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct RunExportOptions {
    /// Skip the artifact tree entirely; the envelope still records the
    /// artifact listing so importers can warn about the gap.
    pub skip_download_artifacts: bool,
}

pub struct RunExporter {
    client: Arc<dyn MlflowClient>,
    opts: RunExportOptions,
}

impl RunExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, RunExportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: RunExportOptions) -> Self {
        Self { client, opts }
    }

    /// Export one run, returning the source entity for callers that need
    /// its metadata (experiment ID, parent tag).
    pub async fn export_run(&self, run_id: &str, out_dir: &Path) -> Result<Run> {
        let run = self.client.get_run(run_id).await?;
        let artifacts = list_artifacts_recursive(self.client.as_ref(), run_id).await?;

        if !self.opts.skip_download_artifacts && !artifacts.is_empty() {
            let artifacts_dir = out_dir.join(ARTIFACTS_DIR);
            self.client
                .download_artifacts(run_id, "", &artifacts_dir)
                .await?;
        }

        let info = json!({
            "num_artifacts": artifacts.len(),
            "artifacts_downloaded": !self.opts.skip_download_artifacts,
        });
        let envelope = Envelope::new(
            source_system_info(self.client.as_ref()).await,
            info,
            json!({ "run": run }),
        );
        envelope.write(&out_dir.join(RUN_FILE)).await?;
        info!(run_id, out = %out_dir.display(), "exported run");
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::models::{KeyValue, Metric, Param};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_writes_envelope_and_artifacts() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let run = src
            .create_run(&experiment_id, "alice", 1000, &[KeyValue::new("k", "v")])
            .await
            .unwrap();
        src.log_batch(
            &run.info.run_id,
            &[Metric::new("rmse", 0.7, 1000, 0)],
            &[Param::new("depth", "4")],
            &[],
        )
        .await
        .unwrap();
        src.put_artifact(&run.info.run_id, "dir/info.txt", b"hello").await;

        let out = TempDir::new().unwrap();
        let exporter = RunExporter::new(src);
        exporter
            .export_run(&run.info.run_id, out.path())
            .await
            .unwrap();

        let envelope = Envelope::read(&out.path().join(RUN_FILE)).await.unwrap();
        assert_eq!(envelope.mlflow["run"]["info"]["run_id"], run.info.run_id);
        assert_eq!(envelope.info["num_artifacts"], 1);
        let bytes = tokio::fs::read(out.path().join("artifacts/dir/info.txt"))
            .await
            .unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_skip_artifact_download() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let run = src
            .create_run(&experiment_id, "alice", 1000, &[])
            .await
            .unwrap();
        src.put_artifact(&run.info.run_id, "big.bin", b"xxxx").await;

        let out = TempDir::new().unwrap();
        let exporter = RunExporter::with_options(
            src,
            RunExportOptions {
                skip_download_artifacts: true,
            },
        );
        exporter
            .export_run(&run.info.run_id, out.path())
            .await
            .unwrap();
        assert!(!out.path().join(ARTIFACTS_DIR).exists());
        let envelope = Envelope::read(&out.path().join(RUN_FILE)).await.unwrap();
        assert_eq!(envelope.info["artifacts_downloaded"], false);
    }
}
