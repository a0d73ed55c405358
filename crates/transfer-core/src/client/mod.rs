//! MLflow client capability layer.
//!
//! The engine never talks to a backend directly; it assumes the
//! capability set below from a collaborator. Two bindings ship with the
//! crate: a REST binding (`RestClient`) and an in-memory backend
//! (`MemoryBackend`) used by tests and dry runs.
//!
//! Methods for optional feature groups (logged models, traces, prompts,
//! evaluation datasets) default to an `Unsupported` error so a minimal
//! binding only has to cover the tracking and registry core.

pub mod cursor;
mod memory;
mod rest;

pub use cursor::{CursorState, SearchCursor};
pub use memory::MemoryBackend;
pub use rest::RestClient;

use crate::compat::Feature;
use crate::error::{Result, TransferError};
use crate::models::{
    ArtifactInfo, Assessment, DatasetInput, DatasetRecord, EvaluationDataset, Experiment,
    KeyValue, LoggedModel, LoggedModelStatus, Metric, ModelVersion, Param, Prompt, PromptVersion,
    RegisteredModel, Run, RunStatus, Span, SpanStatus, Stage, TraceData, TraceInfo, TraceState,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One page of a paginated search response.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Registry flavor of a backend. Unity Catalog uses three-part model
/// names and carries no stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Workspace,
    UnityCatalog,
}

fn unsupported(feature: Feature) -> TransferError {
    TransferError::Unsupported {
        feature: feature.name().to_string(),
        required: feature.required_version().to_string(),
        actual: "unknown".to_string(),
    }
}

/// The capability set the engine requires from an MLflow-compatible
/// backend. All calls are blocking I/O from the unit's point of view;
/// implementations must be shareable across concurrent units.
#[async_trait]
pub trait MlflowClient: Send + Sync {
    // ---- backend identity ----

    fn tracking_uri(&self) -> &str;

    fn registry_kind(&self) -> RegistryKind;

    async fn server_version(&self) -> Result<String>;

    // ---- experiments ----

    async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment>;

    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>>;

    /// Returns the new experiment ID.
    async fn create_experiment(&self, name: &str, tags: &[KeyValue]) -> Result<String>;

    async fn set_experiment_tag(&self, experiment_id: &str, key: &str, value: &str) -> Result<()>;

    async fn search_experiments(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Experiment>>;

    async fn search_runs(
        &self,
        experiment_ids: &[String],
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Run>>;

    // ---- runs ----

    async fn get_run(&self, run_id: &str) -> Result<Run>;

    /// Creates a run with a fresh ID and a backend-computed artifact URI.
    async fn create_run(
        &self,
        experiment_id: &str,
        user_id: &str,
        start_time: i64,
        tags: &[KeyValue],
    ) -> Result<Run>;

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[KeyValue],
    ) -> Result<()>;

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()>;

    async fn set_terminated(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<()>;

    async fn log_inputs(&self, run_id: &str, inputs: &[DatasetInput]) -> Result<()>;

    // ---- run artifacts ----

    /// Lists one level of the artifact tree under `path` (None = root).
    async fn list_artifacts(&self, run_id: &str, path: Option<&str>) -> Result<Vec<ArtifactInfo>>;

    /// Downloads the artifact (or subtree) at `path` into `dst_dir`,
    /// returning the local path. An empty `path` downloads the whole tree.
    async fn download_artifacts(&self, run_id: &str, path: &str, dst_dir: &Path)
        -> Result<PathBuf>;

    async fn log_artifact(
        &self,
        run_id: &str,
        local_file: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()>;

    /// Uploads every file under `local_dir`, preserving relative paths
    /// below `artifact_path`.
    async fn log_artifacts(
        &self,
        run_id: &str,
        local_dir: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()>;

    // ---- model registry ----

    async fn get_registered_model(&self, name: &str) -> Result<RegisteredModel>;

    async fn create_registered_model(
        &self,
        name: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<RegisteredModel>;

    async fn delete_registered_model(&self, name: &str) -> Result<()>;

    async fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()>;

    async fn search_registered_models(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<RegisteredModel>>;

    async fn search_model_versions(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<ModelVersion>>;

    async fn get_model_version(&self, name: &str, version: &str) -> Result<ModelVersion>;

    /// Latest version per requested stage (all stages when empty).
    async fn get_latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>>;

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<ModelVersion>;

    async fn delete_model_version(&self, name: &str, version: &str) -> Result<()>;

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    async fn transition_model_version_stage(
        &self,
        name: &str,
        version: &str,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion>;

    async fn set_registered_model_alias(
        &self,
        name: &str,
        alias: &str,
        version: &str,
    ) -> Result<()>;

    async fn get_model_version_download_uri(&self, name: &str, version: &str) -> Result<String>;

    /// Replays a stored permissions payload verbatim. Bindings without a
    /// permissions API keep the default.
    async fn update_registered_model_permissions(
        &self,
        _name: &str,
        _permissions: &serde_json::Value,
    ) -> Result<()> {
        Err(TransferError::backend("permissions API not available"))
    }

    // ---- logged models (MLflow 3+) ----

    async fn get_logged_model(&self, _model_id: &str) -> Result<LoggedModel> {
        Err(unsupported(Feature::LoggedModels))
    }

    async fn search_logged_models(
        &self,
        _experiment_ids: &[String],
        _max_results: usize,
        _page_token: Option<&str>,
    ) -> Result<Page<LoggedModel>> {
        Err(unsupported(Feature::LoggedModels))
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_logged_model(
        &self,
        _experiment_id: &str,
        _name: &str,
        _source_run_id: Option<&str>,
        _params: &[Param],
        _metrics: &[Metric],
        _tags: &[KeyValue],
    ) -> Result<LoggedModel> {
        Err(unsupported(Feature::LoggedModels))
    }

    async fn finalize_logged_model(
        &self,
        _model_id: &str,
        _status: LoggedModelStatus,
    ) -> Result<()> {
        Err(unsupported(Feature::LoggedModels))
    }

    async fn list_logged_model_artifacts(
        &self,
        _model_id: &str,
        _path: Option<&str>,
    ) -> Result<Vec<ArtifactInfo>> {
        Err(unsupported(Feature::LoggedModels))
    }

    async fn download_logged_model_artifacts(
        &self,
        _model_id: &str,
        _path: &str,
        _dst_dir: &Path,
    ) -> Result<PathBuf> {
        Err(unsupported(Feature::LoggedModels))
    }

    async fn log_logged_model_artifacts(&self, _model_id: &str, _local_dir: &Path) -> Result<()> {
        Err(unsupported(Feature::LoggedModels))
    }

    // ---- traces (MLflow 2.14+) ----

    async fn get_trace(&self, _trace_id: &str) -> Result<TraceData> {
        Err(unsupported(Feature::Traces))
    }

    async fn search_traces(
        &self,
        _experiment_ids: &[String],
        _max_results: usize,
        _page_token: Option<&str>,
    ) -> Result<Page<TraceInfo>> {
        Err(unsupported(Feature::Traces))
    }

    /// Returns the new trace ID.
    async fn start_trace(
        &self,
        _experiment_id: &str,
        _timestamp_ms: i64,
        _metadata: &BTreeMap<String, String>,
        _tags: &[KeyValue],
    ) -> Result<String> {
        Err(unsupported(Feature::Traces))
    }

    /// Creates a span under an already-created destination parent and
    /// returns the new span ID.
    async fn start_span(
        &self,
        _trace_id: &str,
        _parent_span_id: Option<&str>,
        _span: &Span,
    ) -> Result<String> {
        Err(unsupported(Feature::Traces))
    }

    async fn end_span(
        &self,
        _trace_id: &str,
        _span_id: &str,
        _status: SpanStatus,
        _end_time_ns: i64,
    ) -> Result<()> {
        Err(unsupported(Feature::Traces))
    }

    async fn end_trace(
        &self,
        _trace_id: &str,
        _state: TraceState,
        _execution_time_ms: i64,
    ) -> Result<()> {
        Err(unsupported(Feature::Traces))
    }

    async fn log_assessment(&self, _trace_id: &str, _assessment: &Assessment) -> Result<()> {
        Err(unsupported(Feature::Assessments))
    }

    // ---- prompts (MLflow 2.21+) ----

    async fn search_prompts(
        &self,
        _filter: Option<&str>,
        _max_results: usize,
        _page_token: Option<&str>,
    ) -> Result<Page<Prompt>> {
        Err(unsupported(Feature::Prompts))
    }

    async fn search_prompt_versions(
        &self,
        _name: &str,
        _max_results: usize,
        _page_token: Option<&str>,
    ) -> Result<Page<PromptVersion>> {
        Err(unsupported(Feature::Prompts))
    }

    async fn get_prompt_version(&self, _name: &str, _version: u64) -> Result<PromptVersion> {
        Err(unsupported(Feature::Prompts))
    }

    /// Registers the next version of a prompt (creating the prompt when
    /// missing) and returns it.
    async fn register_prompt(
        &self,
        _name: &str,
        _template: &str,
        _description: Option<&str>,
        _tags: &[KeyValue],
    ) -> Result<PromptVersion> {
        Err(unsupported(Feature::Prompts))
    }

    async fn delete_prompt(&self, _name: &str) -> Result<()> {
        Err(unsupported(Feature::Prompts))
    }

    // ---- evaluation datasets (MLflow 3.4+, SQL backends) ----

    async fn create_dataset(
        &self,
        _name: &str,
        _experiment_ids: &[String],
        _tags: &[KeyValue],
    ) -> Result<EvaluationDataset> {
        Err(unsupported(Feature::EvaluationDatasets))
    }

    async fn get_dataset(&self, _dataset_id: &str) -> Result<EvaluationDataset> {
        Err(unsupported(Feature::EvaluationDatasets))
    }

    async fn get_dataset_by_name(&self, _name: &str) -> Result<Option<EvaluationDataset>> {
        Err(unsupported(Feature::EvaluationDatasets))
    }

    async fn search_datasets(
        &self,
        _filter: Option<&str>,
        _max_results: usize,
        _page_token: Option<&str>,
    ) -> Result<Page<EvaluationDataset>> {
        Err(unsupported(Feature::EvaluationDatasets))
    }

    async fn merge_records(&self, _dataset_id: &str, _records: &[DatasetRecord]) -> Result<()> {
        Err(unsupported(Feature::EvaluationDatasets))
    }

    async fn delete_dataset(&self, _dataset_id: &str) -> Result<()> {
        Err(unsupported(Feature::EvaluationDatasets))
    }
}

/// Walk the full artifact tree of a run, breadth-first, returning file
/// entries only (directories are traversed, not returned).
pub async fn list_artifacts_recursive(
    client: &dyn MlflowClient,
    run_id: &str,
) -> Result<Vec<ArtifactInfo>> {
    let mut files = Vec::new();
    let mut queue: Vec<Option<String>> = vec![None];
    while let Some(prefix) = queue.pop() {
        let entries = client.list_artifacts(run_id, prefix.as_deref()).await?;
        for entry in entries {
            if entry.is_dir {
                queue.push(Some(entry.path.clone()));
            } else {
                files.push(entry);
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Get an experiment by name, creating it when missing. Returns the
/// experiment ID.
pub async fn ensure_experiment(
    client: &dyn MlflowClient,
    name: &str,
    tags: &[KeyValue],
) -> Result<String> {
    if let Some(experiment) = client.get_experiment_by_name(name).await? {
        return Ok(experiment.experiment_id);
    }
    tracing::info!("creating destination experiment {name:?}");
    client.create_experiment(name, tags).await
}
