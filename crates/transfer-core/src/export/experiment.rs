//! Experiment exporter: `experiment.json`, one subdirectory per run, and
//! a manifest listing the run IDs.

use super::run::{RunExportOptions, RunExporter};
use super::source_system_info;
use crate::client::{cursor, MlflowClient};
use crate::error::{Result, TransferError};
use crate::format::{run_dir, Envelope, ExperimentManifest, EXPERIMENT_FILE};
use crate::models::{Experiment, Run};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct ExperimentExportOptions {
    /// Export only these runs instead of every run of the experiment.
    pub run_ids: Option<Vec<String>>,
    /// Expand the selected run set with all transitive child runs.
    pub check_nested_runs: bool,
    pub skip_download_artifacts: bool,
}

pub struct ExperimentExporter {
    client: Arc<dyn MlflowClient>,
    opts: ExperimentExportOptions,
}

impl ExperimentExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, ExperimentExportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: ExperimentExportOptions) -> Self {
        Self { client, opts }
    }

    /// Export one experiment, addressed by ID or by name. Individual run
    /// failures are recorded in the manifest and do not abort the export.
    pub async fn export_experiment(
        &self,
        experiment_id_or_name: &str,
        out_dir: &Path,
    ) -> Result<ExperimentManifest> {
        let experiment = self.resolve(experiment_id_or_name).await?;
        let experiment_id = experiment.experiment_id.clone();

        let all_runs = cursor::runs(self.client.as_ref(), vec![experiment_id.clone()], None)
            .collect_all()
            .await?;
        let selected = self.select_runs(&all_runs)?;

        let run_exporter = RunExporter::with_options(
            self.client.clone(),
            RunExportOptions {
                skip_download_artifacts: self.opts.skip_download_artifacts,
            },
        );
        let mut manifest = ExperimentManifest {
            experiment_id: experiment_id.clone(),
            run_ids: Vec::new(),
            failed_run_ids: Vec::new(),
        };
        for run_id in &selected {
            match run_exporter
                .export_run(run_id, &run_dir(out_dir, run_id))
                .await
            {
                Ok(_) => manifest.run_ids.push(run_id.clone()),
                Err(err) => {
                    warn!(run_id, "run export failed: {}", err.summary());
                    manifest.failed_run_ids.push(run_id.clone());
                }
            }
        }

        let system = source_system_info(self.client.as_ref()).await;
        let envelope = Envelope::new(
            system.clone(),
            json!({
                "num_runs": manifest.run_ids.len(),
                "num_failed_runs": manifest.failed_run_ids.len(),
            }),
            json!({ "experiment": experiment }),
        );
        envelope.write(&out_dir.join(EXPERIMENT_FILE)).await?;
        manifest.write(out_dir, system).await?;
        info!(
            experiment_id,
            runs = manifest.run_ids.len(),
            "exported experiment"
        );
        Ok(manifest)
    }

    async fn resolve(&self, id_or_name: &str) -> Result<Experiment> {
        match self.client.get_experiment(id_or_name).await {
            Ok(experiment) => Ok(experiment),
            Err(err) if err.is_not_found() => self
                .client
                .get_experiment_by_name(id_or_name)
                .await?
                .ok_or_else(|| TransferError::not_found("experiment", id_or_name)),
            Err(err) => Err(err),
        }
    }

    /// The run IDs to export, in source order. With `check_nested_runs`
    /// the explicit set is expanded with all transitive children.
    fn select_runs(&self, all_runs: &[Run]) -> Result<Vec<String>> {
        let Some(requested) = &self.opts.run_ids else {
            return Ok(all_runs.iter().map(|r| r.info.run_id.clone()).collect());
        };
        let known: BTreeSet<&str> = all_runs.iter().map(|r| r.info.run_id.as_str()).collect();
        for run_id in requested {
            if !known.contains(run_id.as_str()) {
                return Err(TransferError::not_found("run", run_id));
            }
        }
        if !self.opts.check_nested_runs {
            return Ok(requested.clone());
        }

        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for run in all_runs {
            if let Some(parent) = run.parent_run_id() {
                children.entry(parent).or_default().push(run.info.run_id.as_str());
            }
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = requested.iter().map(String::as_str).collect();
        while let Some(run_id) = queue.pop_front() {
            if !seen.insert(run_id) {
                continue;
            }
            order.push(run_id.to_string());
            if let Some(kids) = children.get(run_id) {
                queue.extend(kids.iter().copied());
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::models::KeyValue;
    use crate::config::TagsConfig;
    use tempfile::TempDir;

    async fn run_with_parent(
        backend: &MemoryBackend,
        experiment_id: &str,
        parent: Option<&str>,
    ) -> String {
        let tags: Vec<KeyValue> = parent
            .map(|p| vec![KeyValue::new(TagsConfig::PARENT_RUN_ID, p)])
            .unwrap_or_default();
        backend
            .create_run(experiment_id, "u", 0, &tags)
            .await
            .unwrap()
            .info
            .run_id
    }

    #[tokio::test]
    async fn test_export_all_runs_with_manifest() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let a = run_with_parent(&src, &experiment_id, None).await;
        let b = run_with_parent(&src, &experiment_id, None).await;

        let out = TempDir::new().unwrap();
        let manifest = ExperimentExporter::new(src)
            .export_experiment(&experiment_id, out.path())
            .await
            .unwrap();
        assert_eq!(manifest.run_ids.len(), 2);
        assert!(out.path().join(&a).join("run.json").exists());
        assert!(out.path().join(&b).join("run.json").exists());
        assert!(out.path().join(EXPERIMENT_FILE).exists());
    }

    #[tokio::test]
    async fn test_export_by_name() {
        let src = Arc::new(MemoryBackend::new("src"));
        src.create_experiment("named", &[]).await.unwrap();
        let out = TempDir::new().unwrap();
        let manifest = ExperimentExporter::new(src)
            .export_experiment("named", out.path())
            .await
            .unwrap();
        assert!(manifest.run_ids.is_empty());
    }

    #[tokio::test]
    async fn test_nested_run_expansion() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let root = run_with_parent(&src, &experiment_id, None).await;
        let child = run_with_parent(&src, &experiment_id, Some(&root)).await;
        let grandchild = run_with_parent(&src, &experiment_id, Some(&child)).await;
        let _unrelated = run_with_parent(&src, &experiment_id, None).await;

        let out = TempDir::new().unwrap();
        let exporter = ExperimentExporter::with_options(
            src,
            ExperimentExportOptions {
                run_ids: Some(vec![root.clone()]),
                check_nested_runs: true,
                skip_download_artifacts: false,
            },
        );
        let manifest = exporter
            .export_experiment(&experiment_id, out.path())
            .await
            .unwrap();
        assert_eq!(manifest.run_ids.len(), 3);
        assert!(manifest.run_ids.contains(&grandchild));
    }
}
