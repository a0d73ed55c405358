//! In-memory backend implementing the full capability set.
//!
//! Backs the integration tests and `--dry-run` front-end flows. Behaves
//! like a real backend where the engine depends on it: every created
//! object gets a fresh ID, run artifact URIs are recomputed on creation,
//! and searches paginate with real tokens so the cursor layer is
//! exercised.

use super::{MlflowClient, Page, RegistryKind};
use crate::error::{Result, TransferError};
use crate::models::{
    ArtifactInfo, Assessment, DatasetInput, DatasetRecord, EvaluationDataset, Experiment,
    KeyValue, LoggedModel, LoggedModelStatus, Metric, ModelVersion, Param, Prompt, PromptVersion,
    RegisteredModel, Run, RunData, RunInfo, RunStatus, Span, SpanStatus, Stage, TraceData,
    TraceInfo, TraceState,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

type ArtifactTree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct Store {
    experiments: HashMap<String, Experiment>,
    runs: HashMap<String, Run>,
    run_artifacts: HashMap<String, ArtifactTree>,
    models: HashMap<String, RegisteredModel>,
    versions: HashMap<String, Vec<ModelVersion>>,
    logged_models: HashMap<String, LoggedModel>,
    logged_model_artifacts: HashMap<String, ArtifactTree>,
    traces: HashMap<String, TraceData>,
    prompts: HashMap<String, (Prompt, Vec<PromptVersion>)>,
    datasets: HashMap<String, EvaluationDataset>,
    next_experiment_id: u64,
}

/// An MLflow-compatible backend held entirely in memory.
pub struct MemoryBackend {
    tracking_uri: String,
    version: String,
    registry_kind: RegistryKind,
    store: RwLock<Store>,
}

impl MemoryBackend {
    /// Create a backend reporting the newest supported server version.
    pub fn new(name: &str) -> Self {
        Self {
            tracking_uri: format!("mem://{name}"),
            version: "3.4.0".to_string(),
            registry_kind: RegistryKind::Workspace,
            store: RwLock::new(Store {
                next_experiment_id: 1,
                ..Store::default()
            }),
        }
    }

    /// Override the reported server version (for compat-probe tests).
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_registry_kind(mut self, kind: RegistryKind) -> Self {
        self.registry_kind = kind;
        self
    }

    fn run_artifact_uri(&self, experiment_id: &str, run_id: &str) -> String {
        format!("{}/{}/{}/artifacts", self.tracking_uri, experiment_id, run_id)
    }

    /// Seed an artifact file on a run (test setup).
    pub async fn put_artifact(&self, run_id: &str, path: &str, bytes: &[u8]) {
        let mut store = self.store.write().await;
        store
            .run_artifacts
            .entry(run_id.to_string())
            .or_default()
            .insert(path.to_string(), bytes.to_vec());
    }

    /// Read back an artifact's bytes (test assertions).
    pub async fn artifact_bytes(&self, run_id: &str, path: &str) -> Option<Vec<u8>> {
        let store = self.store.read().await;
        store
            .run_artifacts
            .get(run_id)
            .and_then(|tree| tree.get(path))
            .cloned()
    }

    /// Seed an artifact file on a logged model (test setup).
    pub async fn put_logged_model_artifact(&self, model_id: &str, path: &str, bytes: &[u8]) {
        let mut store = self.store.write().await;
        store
            .logged_model_artifacts
            .entry(model_id.to_string())
            .or_default()
            .insert(path.to_string(), bytes.to_vec());
    }

    pub async fn logged_model_artifact_bytes(&self, model_id: &str, path: &str) -> Option<Vec<u8>> {
        let store = self.store.read().await;
        store
            .logged_model_artifacts
            .get(model_id)
            .and_then(|tree| tree.get(path))
            .cloned()
    }

    /// Number of runs on the backend (test assertions).
    pub async fn run_count(&self) -> usize {
        self.store.read().await.runs.len()
    }

    /// Number of registered models on the backend (test assertions).
    pub async fn model_count(&self) -> usize {
        self.store.read().await.models.len()
    }
}

/// Minimal filter support: `name='x'` and `name LIKE 'prefix%'`, the two
/// shapes the engine itself generates.
fn match_name_filter(filter: Option<&str>, name: &str) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let filter = filter.trim();
    if let Some(rest) = filter.strip_prefix("name='") {
        if let Some(wanted) = rest.strip_suffix('\'') {
            return name == wanted;
        }
    }
    if let Some(rest) = filter.strip_prefix("name LIKE '") {
        if let Some(pattern) = rest.strip_suffix('\'') {
            if let Some(prefix) = pattern.strip_suffix('%') {
                return name.starts_with(prefix);
            }
            return name == pattern;
        }
    }
    // Unknown filters match nothing rather than everything.
    false
}

/// Paginate a sorted vec: token is the numeric offset of the next page.
fn paginate<T>(mut items: Vec<T>, max_results: usize, page_token: Option<&str>) -> Page<T> {
    let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
    let items = if offset >= items.len() {
        Vec::new()
    } else {
        items.split_off(offset)
    };
    let (page, has_more) = if items.len() > max_results {
        let mut page = items;
        page.truncate(max_results);
        (page, true)
    } else {
        (items, false)
    };
    let next = has_more.then(|| (offset + max_results).to_string());
    Page {
        items: page,
        next_page_token: next,
    }
}

fn list_tree_level(tree: &ArtifactTree, prefix: Option<&str>) -> Vec<ArtifactInfo> {
    let prefix = prefix.unwrap_or("");
    let mut dirs: BTreeMap<String, ()> = BTreeMap::new();
    let mut files = Vec::new();
    for (path, bytes) in tree {
        let rel = if prefix.is_empty() {
            path.as_str()
        } else if let Some(rest) = path.strip_prefix(&format!("{prefix}/")) {
            rest
        } else {
            continue;
        };
        match rel.split_once('/') {
            Some((dir, _)) => {
                let full = if prefix.is_empty() {
                    dir.to_string()
                } else {
                    format!("{prefix}/{dir}")
                };
                dirs.insert(full, ());
            }
            None => files.push(ArtifactInfo {
                path: path.clone(),
                is_dir: false,
                file_size: Some(bytes.len() as u64),
            }),
        }
    }
    let mut out: Vec<ArtifactInfo> = dirs
        .into_keys()
        .map(|path| ArtifactInfo {
            path,
            is_dir: true,
            file_size: None,
        })
        .collect();
    out.extend(files);
    out
}

fn download_tree(tree: &ArtifactTree, path: &str, dst_dir: &Path) -> Result<PathBuf> {
    let mut wrote_any = false;
    for (artifact_path, bytes) in tree {
        let matches = path.is_empty()
            || artifact_path == path
            || artifact_path.starts_with(&format!("{path}/"));
        if !matches {
            continue;
        }
        let local = dst_dir.join(artifact_path);
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TransferError::io_with_path(e, parent))?;
        }
        std::fs::write(&local, bytes).map_err(|e| TransferError::io_with_path(e, &local))?;
        wrote_any = true;
    }
    if !path.is_empty() && !wrote_any {
        return Err(TransferError::not_found("artifact", path));
    }
    Ok(if path.is_empty() {
        dst_dir.to_path_buf()
    } else {
        dst_dir.join(path)
    })
}

fn upload_dir(tree: &mut ArtifactTree, local_dir: &Path, artifact_path: Option<&str>) -> Result<()> {
    for entry in walkdir::WalkDir::new(local_dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(local_dir)
            .map_err(|e| TransferError::Other(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        let key = match artifact_path {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{rel}"),
            _ => rel,
        };
        let bytes = std::fs::read(entry.path())
            .map_err(|e| TransferError::io_with_path(e, entry.path()))?;
        tree.insert(key, bytes);
    }
    Ok(())
}

#[async_trait]
impl MlflowClient for MemoryBackend {
    fn tracking_uri(&self) -> &str {
        &self.tracking_uri
    }

    fn registry_kind(&self) -> RegistryKind {
        self.registry_kind
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    // ---- experiments ----

    async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let store = self.store.read().await;
        store
            .experiments
            .get(experiment_id)
            .cloned()
            .ok_or_else(|| TransferError::not_found("experiment", experiment_id))
    }

    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let store = self.store.read().await;
        Ok(store
            .experiments
            .values()
            .find(|e| e.name == name)
            .cloned())
    }

    async fn create_experiment(&self, name: &str, tags: &[KeyValue]) -> Result<String> {
        let mut store = self.store.write().await;
        if store.experiments.values().any(|e| e.name == name) {
            return Err(TransferError::backend(format!(
                "experiment already exists: {name}"
            )));
        }
        let experiment_id = store.next_experiment_id.to_string();
        store.next_experiment_id += 1;
        let now = chrono::Utc::now().timestamp_millis();
        store.experiments.insert(
            experiment_id.clone(),
            Experiment {
                experiment_id: experiment_id.clone(),
                name: name.to_string(),
                artifact_location: format!("{}/{}", self.tracking_uri, experiment_id),
                lifecycle_stage: "active".to_string(),
                tags: tags.to_vec(),
                creation_time: Some(now),
                last_update_time: Some(now),
            },
        );
        Ok(experiment_id)
    }

    async fn set_experiment_tag(&self, experiment_id: &str, key: &str, value: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let experiment = store
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| TransferError::not_found("experiment", experiment_id))?;
        experiment.tags.retain(|t| t.key != key);
        experiment.tags.push(KeyValue::new(key, value));
        Ok(())
    }

    async fn search_experiments(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Experiment>> {
        let store = self.store.read().await;
        let mut items: Vec<Experiment> = store
            .experiments
            .values()
            .filter(|e| match_name_filter(filter, &e.name))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));
        Ok(paginate(items, max_results, page_token))
    }

    async fn search_runs(
        &self,
        experiment_ids: &[String],
        _filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Run>> {
        let store = self.store.read().await;
        let mut items: Vec<Run> = store
            .runs
            .values()
            .filter(|r| experiment_ids.contains(&r.info.experiment_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.info.run_id.cmp(&b.info.run_id));
        Ok(paginate(items, max_results, page_token))
    }

    // ---- runs ----

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        let store = self.store.read().await;
        store
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| TransferError::not_found("run", run_id))
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        user_id: &str,
        start_time: i64,
        tags: &[KeyValue],
    ) -> Result<Run> {
        let mut store = self.store.write().await;
        if !store.experiments.contains_key(experiment_id) {
            return Err(TransferError::not_found("experiment", experiment_id));
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let run = Run {
            info: RunInfo {
                run_id: run_id.clone(),
                experiment_id: experiment_id.to_string(),
                user_id: user_id.to_string(),
                status: RunStatus::Running,
                start_time,
                end_time: None,
                artifact_uri: self.run_artifact_uri(experiment_id, &run_id),
                lifecycle_stage: "active".to_string(),
            },
            data: RunData {
                params: vec![],
                metrics: vec![],
                tags: tags.to_vec(),
            },
            inputs: vec![],
        };
        store.runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[KeyValue],
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let run = store
            .runs
            .get_mut(run_id)
            .ok_or_else(|| TransferError::not_found("run", run_id))?;
        run.data.metrics.extend_from_slice(metrics);
        run.data.params.extend_from_slice(params);
        for tag in tags {
            run.data.tags.retain(|t| t.key != tag.key);
            run.data.tags.push(tag.clone());
        }
        Ok(())
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.log_batch(run_id, &[], &[], &[KeyValue::new(key, value)])
            .await
    }

    async fn set_terminated(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let run = store
            .runs
            .get_mut(run_id)
            .ok_or_else(|| TransferError::not_found("run", run_id))?;
        run.info.status = status;
        run.info.end_time = end_time;
        Ok(())
    }

    async fn log_inputs(&self, run_id: &str, inputs: &[DatasetInput]) -> Result<()> {
        let mut store = self.store.write().await;
        let run = store
            .runs
            .get_mut(run_id)
            .ok_or_else(|| TransferError::not_found("run", run_id))?;
        run.inputs.extend_from_slice(inputs);
        Ok(())
    }

    // ---- run artifacts ----

    async fn list_artifacts(&self, run_id: &str, path: Option<&str>) -> Result<Vec<ArtifactInfo>> {
        let store = self.store.read().await;
        if !store.runs.contains_key(run_id) {
            return Err(TransferError::not_found("run", run_id));
        }
        Ok(store
            .run_artifacts
            .get(run_id)
            .map(|tree| list_tree_level(tree, path))
            .unwrap_or_default())
    }

    async fn download_artifacts(
        &self,
        run_id: &str,
        path: &str,
        dst_dir: &Path,
    ) -> Result<PathBuf> {
        let store = self.store.read().await;
        if !store.runs.contains_key(run_id) {
            return Err(TransferError::not_found("run", run_id));
        }
        let empty = ArtifactTree::new();
        let tree = store.run_artifacts.get(run_id).unwrap_or(&empty);
        download_tree(tree, path, dst_dir)
    }

    async fn log_artifact(
        &self,
        run_id: &str,
        local_file: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        let bytes =
            std::fs::read(local_file).map_err(|e| TransferError::io_with_path(e, local_file))?;
        let name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::Other(format!("bad file name: {local_file:?}")))?;
        let key = match artifact_path {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
            _ => name.to_string(),
        };
        let mut store = self.store.write().await;
        if !store.runs.contains_key(run_id) {
            return Err(TransferError::not_found("run", run_id));
        }
        store
            .run_artifacts
            .entry(run_id.to_string())
            .or_default()
            .insert(key, bytes);
        Ok(())
    }

    async fn log_artifacts(
        &self,
        run_id: &str,
        local_dir: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        if !store.runs.contains_key(run_id) {
            return Err(TransferError::not_found("run", run_id));
        }
        let tree = store.run_artifacts.entry(run_id.to_string()).or_default();
        upload_dir(tree, local_dir, artifact_path)
    }

    // ---- model registry ----

    async fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        let store = self.store.read().await;
        store
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| TransferError::not_found("registered model", name))
    }

    async fn create_registered_model(
        &self,
        name: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<RegisteredModel> {
        let mut store = self.store.write().await;
        if store.models.contains_key(name) {
            return Err(TransferError::Backend {
                message: format!("registered model already exists: {name}"),
                status: None,
                error_code: Some("RESOURCE_ALREADY_EXISTS".to_string()),
            });
        }
        let now = chrono::Utc::now().timestamp_millis();
        let model = RegisteredModel {
            name: name.to_string(),
            description: description.map(str::to_string),
            tags: tags.to_vec(),
            aliases: BTreeMap::new(),
            creation_timestamp: Some(now),
            last_updated_timestamp: Some(now),
            permissions: None,
        };
        store.models.insert(name.to_string(), model.clone());
        store.versions.insert(name.to_string(), vec![]);
        Ok(model)
    }

    async fn delete_registered_model(&self, name: &str) -> Result<()> {
        let mut store = self.store.write().await;
        // Workspace registries refuse to delete a model while any version
        // is still in Staging or Production.
        let staged = store
            .versions
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .any(|v| matches!(v.current_stage, Some(Stage::Staging | Stage::Production)))
            })
            .unwrap_or(false);
        if self.registry_kind == RegistryKind::Workspace && staged {
            return Err(TransferError::backend(format!(
                "cannot delete registered model {name}: versions are staged"
            )));
        }
        store
            .models
            .remove(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        store.versions.remove(name);
        Ok(())
    }

    async fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let model = store
            .models
            .get_mut(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        model.tags.retain(|t| t.key != key);
        model.tags.push(KeyValue::new(key, value));
        Ok(())
    }

    async fn search_registered_models(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<RegisteredModel>> {
        let store = self.store.read().await;
        let mut items: Vec<RegisteredModel> = store
            .models
            .values()
            .filter(|m| match_name_filter(filter, &m.name))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(items, max_results, page_token))
    }

    async fn search_model_versions(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<ModelVersion>> {
        let store = self.store.read().await;
        let mut items: Vec<ModelVersion> = store
            .versions
            .iter()
            .filter(|(name, _)| match_name_filter(filter, name))
            .flat_map(|(_, versions)| versions.clone())
            .collect();
        items.sort_by(|a, b| (a.name.clone(), a.version.clone()).cmp(&(b.name.clone(), b.version.clone())));
        Ok(paginate(items, max_results, page_token))
    }

    async fn get_model_version(&self, name: &str, version: &str) -> Result<ModelVersion> {
        let store = self.store.read().await;
        store
            .versions
            .get(name)
            .and_then(|versions| versions.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| {
                TransferError::not_found("model version", format!("{name}/{version}"))
            })
    }

    async fn get_latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let store = self.store.read().await;
        let versions = store
            .versions
            .get(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        let mut latest: BTreeMap<&'static str, ModelVersion> = BTreeMap::new();
        for version in versions {
            let stage = version.current_stage.unwrap_or(Stage::None);
            if !stages.is_empty() && !stages.contains(&stage) {
                continue;
            }
            let newer = latest
                .get(stage.as_str())
                .map(|held| {
                    version.version.parse::<u64>().unwrap_or(0)
                        > held.version.parse::<u64>().unwrap_or(0)
                })
                .unwrap_or(true);
            if newer {
                latest.insert(stage.as_str(), version.clone());
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<ModelVersion> {
        let mut store = self.store.write().await;
        if !store.models.contains_key(name) {
            return Err(TransferError::not_found("registered model", name));
        }
        let versions = store.versions.entry(name.to_string()).or_default();
        let number = versions
            .iter()
            .map(|v| v.version.parse::<u64>().unwrap_or(0))
            .max()
            .unwrap_or(0)
            + 1;
        let stage = match self.registry_kind {
            RegistryKind::Workspace => Some(Stage::None),
            RegistryKind::UnityCatalog => None,
        };
        let version = ModelVersion {
            name: name.to_string(),
            version: number.to_string(),
            run_id: run_id.to_string(),
            source: source.to_string(),
            current_stage: stage,
            description: description.map(str::to_string),
            tags: tags.to_vec(),
            aliases: vec![],
            creation_timestamp: Some(chrono::Utc::now().timestamp_millis()),
            last_updated_timestamp: None,
            status: Some("READY".to_string()),
        };
        versions.push(version.clone());
        Ok(version)
    }

    async fn delete_model_version(&self, name: &str, version: &str) -> Result<()> {
        let mut store = self.store.write().await;
        let versions = store
            .versions
            .get_mut(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        let before = versions.len();
        versions.retain(|v| v.version != version);
        if versions.len() == before {
            return Err(TransferError::not_found(
                "model version",
                format!("{name}/{version}"),
            ));
        }
        Ok(())
    }

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let entry = store
            .versions
            .get_mut(name)
            .and_then(|versions| versions.iter_mut().find(|v| v.version == version))
            .ok_or_else(|| {
                TransferError::not_found("model version", format!("{name}/{version}"))
            })?;
        entry.tags.retain(|t| t.key != key);
        entry.tags.push(KeyValue::new(key, value));
        Ok(())
    }

    async fn transition_model_version_stage(
        &self,
        name: &str,
        version: &str,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        if self.registry_kind == RegistryKind::UnityCatalog {
            return Err(TransferError::backend(
                "stages are not supported on Unity Catalog registries",
            ));
        }
        let mut store = self.store.write().await;
        let versions = store
            .versions
            .get_mut(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        if archive_existing && matches!(stage, Stage::Staging | Stage::Production) {
            for v in versions.iter_mut() {
                if v.version != version && v.current_stage == Some(stage) {
                    v.current_stage = Some(Stage::Archived);
                }
            }
        }
        let entry = versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| {
                TransferError::not_found("model version", format!("{name}/{version}"))
            })?;
        entry.current_stage = Some(stage);
        Ok(entry.clone())
    }

    async fn set_registered_model_alias(
        &self,
        name: &str,
        alias: &str,
        version: &str,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let model = store
            .models
            .get_mut(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        model.aliases.insert(alias.to_string(), version.to_string());
        if let Some(versions) = store.versions.get_mut(name) {
            for v in versions.iter_mut() {
                v.aliases.retain(|a| a != alias);
                if v.version == version {
                    v.aliases.push(alias.to_string());
                }
            }
        }
        Ok(())
    }

    async fn get_model_version_download_uri(&self, name: &str, version: &str) -> Result<String> {
        self.get_model_version(name, version).await.map(|v| v.source)
    }

    async fn update_registered_model_permissions(
        &self,
        name: &str,
        permissions: &serde_json::Value,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let model = store
            .models
            .get_mut(name)
            .ok_or_else(|| TransferError::not_found("registered model", name))?;
        model.permissions = Some(permissions.clone());
        Ok(())
    }

    // ---- logged models ----

    async fn get_logged_model(&self, model_id: &str) -> Result<LoggedModel> {
        let store = self.store.read().await;
        store
            .logged_models
            .get(model_id)
            .cloned()
            .ok_or_else(|| TransferError::not_found("logged model", model_id))
    }

    async fn search_logged_models(
        &self,
        experiment_ids: &[String],
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<LoggedModel>> {
        let store = self.store.read().await;
        let mut items: Vec<LoggedModel> = store
            .logged_models
            .values()
            .filter(|m| experiment_ids.contains(&m.experiment_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(paginate(items, max_results, page_token))
    }

    async fn create_logged_model(
        &self,
        experiment_id: &str,
        name: &str,
        source_run_id: Option<&str>,
        params: &[Param],
        metrics: &[Metric],
        tags: &[KeyValue],
    ) -> Result<LoggedModel> {
        let mut store = self.store.write().await;
        if !store.experiments.contains_key(experiment_id) {
            return Err(TransferError::not_found("experiment", experiment_id));
        }
        let model_id = format!("m-{}", uuid::Uuid::new_v4().simple());
        let model = LoggedModel {
            model_id: model_id.clone(),
            name: name.to_string(),
            experiment_id: experiment_id.to_string(),
            source_run_id: source_run_id.map(str::to_string),
            status: LoggedModelStatus::Pending,
            artifact_location: format!("{}/models/{}", self.tracking_uri, model_id),
            params: params.to_vec(),
            metrics: metrics.to_vec(),
            tags: tags.to_vec(),
            creation_timestamp: Some(chrono::Utc::now().timestamp_millis()),
        };
        store.logged_models.insert(model_id, model.clone());
        Ok(model)
    }

    async fn finalize_logged_model(
        &self,
        model_id: &str,
        status: LoggedModelStatus,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let model = store
            .logged_models
            .get_mut(model_id)
            .ok_or_else(|| TransferError::not_found("logged model", model_id))?;
        model.status = status;
        Ok(())
    }

    async fn list_logged_model_artifacts(
        &self,
        model_id: &str,
        path: Option<&str>,
    ) -> Result<Vec<ArtifactInfo>> {
        let store = self.store.read().await;
        if !store.logged_models.contains_key(model_id) {
            return Err(TransferError::not_found("logged model", model_id));
        }
        Ok(store
            .logged_model_artifacts
            .get(model_id)
            .map(|tree| list_tree_level(tree, path))
            .unwrap_or_default())
    }

    async fn download_logged_model_artifacts(
        &self,
        model_id: &str,
        path: &str,
        dst_dir: &Path,
    ) -> Result<PathBuf> {
        let store = self.store.read().await;
        if !store.logged_models.contains_key(model_id) {
            return Err(TransferError::not_found("logged model", model_id));
        }
        let empty = ArtifactTree::new();
        let tree = store.logged_model_artifacts.get(model_id).unwrap_or(&empty);
        download_tree(tree, path, dst_dir)
    }

    async fn log_logged_model_artifacts(&self, model_id: &str, local_dir: &Path) -> Result<()> {
        let mut store = self.store.write().await;
        if !store.logged_models.contains_key(model_id) {
            return Err(TransferError::not_found("logged model", model_id));
        }
        let tree = store
            .logged_model_artifacts
            .entry(model_id.to_string())
            .or_default();
        upload_dir(tree, local_dir, None)
    }

    // ---- traces ----

    async fn get_trace(&self, trace_id: &str) -> Result<TraceData> {
        let store = self.store.read().await;
        store
            .traces
            .get(trace_id)
            .cloned()
            .ok_or_else(|| TransferError::not_found("trace", trace_id))
    }

    async fn search_traces(
        &self,
        experiment_ids: &[String],
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<TraceInfo>> {
        let store = self.store.read().await;
        let mut items: Vec<TraceInfo> = store
            .traces
            .values()
            .filter(|t| experiment_ids.contains(&t.info.experiment_id))
            .map(|t| t.info.clone())
            .collect();
        items.sort_by(|a, b| a.trace_id.cmp(&b.trace_id));
        Ok(paginate(items, max_results, page_token))
    }

    async fn start_trace(
        &self,
        experiment_id: &str,
        timestamp_ms: i64,
        metadata: &BTreeMap<String, String>,
        tags: &[KeyValue],
    ) -> Result<String> {
        let mut store = self.store.write().await;
        if !store.experiments.contains_key(experiment_id) {
            return Err(TransferError::not_found("experiment", experiment_id));
        }
        let trace_id = format!("tr-{}", uuid::Uuid::new_v4().simple());
        store.traces.insert(
            trace_id.clone(),
            TraceData {
                info: TraceInfo {
                    trace_id: trace_id.clone(),
                    experiment_id: experiment_id.to_string(),
                    timestamp_ms,
                    execution_time_ms: 0,
                    state: TraceState::InProgress,
                    tags: tags.to_vec(),
                    trace_metadata: metadata.clone(),
                },
                spans: vec![],
                assessments: vec![],
            },
        );
        Ok(trace_id)
    }

    async fn start_span(
        &self,
        trace_id: &str,
        parent_span_id: Option<&str>,
        span: &Span,
    ) -> Result<String> {
        let mut store = self.store.write().await;
        let trace = store
            .traces
            .get_mut(trace_id)
            .ok_or_else(|| TransferError::not_found("trace", trace_id))?;
        if let Some(parent) = parent_span_id {
            if !trace.spans.iter().any(|s| s.span_id == parent) {
                return Err(TransferError::not_found("span", parent));
            }
        }
        let span_id = format!("sp-{}", uuid::Uuid::new_v4().simple());
        let mut created = span.clone();
        created.span_id = span_id.clone();
        created.parent_span_id = parent_span_id.map(str::to_string);
        trace.spans.push(created);
        Ok(span_id)
    }

    async fn end_span(
        &self,
        trace_id: &str,
        span_id: &str,
        status: SpanStatus,
        end_time_ns: i64,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let trace = store
            .traces
            .get_mut(trace_id)
            .ok_or_else(|| TransferError::not_found("trace", trace_id))?;
        let span = trace
            .spans
            .iter_mut()
            .find(|s| s.span_id == span_id)
            .ok_or_else(|| TransferError::not_found("span", span_id))?;
        span.status = status;
        span.end_time_ns = end_time_ns;
        Ok(())
    }

    async fn end_trace(
        &self,
        trace_id: &str,
        state: TraceState,
        execution_time_ms: i64,
    ) -> Result<()> {
        let mut store = self.store.write().await;
        let trace = store
            .traces
            .get_mut(trace_id)
            .ok_or_else(|| TransferError::not_found("trace", trace_id))?;
        trace.info.state = state;
        trace.info.execution_time_ms = execution_time_ms;
        Ok(())
    }

    async fn log_assessment(&self, trace_id: &str, assessment: &Assessment) -> Result<()> {
        let mut store = self.store.write().await;
        let trace = store
            .traces
            .get_mut(trace_id)
            .ok_or_else(|| TransferError::not_found("trace", trace_id))?;
        if let Some(span_id) = &assessment.span_id {
            if !trace.spans.iter().any(|s| &s.span_id == span_id) {
                return Err(TransferError::not_found("span", span_id.clone()));
            }
        }
        let mut stored = assessment.clone();
        if stored.assessment_id.is_none() {
            stored.assessment_id = Some(format!("as-{}", uuid::Uuid::new_v4().simple()));
        }
        trace.assessments.push(stored);
        Ok(())
    }

    // ---- prompts ----

    async fn search_prompts(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Prompt>> {
        let store = self.store.read().await;
        let mut items: Vec<Prompt> = store
            .prompts
            .values()
            .filter(|(p, _)| match_name_filter(filter, &p.name))
            .map(|(p, _)| p.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(items, max_results, page_token))
    }

    async fn search_prompt_versions(
        &self,
        name: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<PromptVersion>> {
        let store = self.store.read().await;
        let items = store
            .prompts
            .get(name)
            .map(|(_, versions)| versions.clone())
            .unwrap_or_default();
        Ok(paginate(items, max_results, page_token))
    }

    async fn get_prompt_version(&self, name: &str, version: u64) -> Result<PromptVersion> {
        let store = self.store.read().await;
        store
            .prompts
            .get(name)
            .and_then(|(_, versions)| versions.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| TransferError::not_found("prompt version", format!("{name}/{version}")))
    }

    async fn register_prompt(
        &self,
        name: &str,
        template: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<PromptVersion> {
        let mut store = self.store.write().await;
        let entry = store.prompts.entry(name.to_string()).or_insert_with(|| {
            (
                Prompt {
                    name: name.to_string(),
                    description: description.map(str::to_string),
                    tags: vec![],
                    latest_version: 0,
                },
                vec![],
            )
        });
        let version = entry.0.latest_version + 1;
        entry.0.latest_version = version;
        let prompt_version = PromptVersion {
            name: name.to_string(),
            version,
            template: template.to_string(),
            description: description.map(str::to_string),
            tags: tags.to_vec(),
            creation_timestamp: Some(chrono::Utc::now().timestamp_millis()),
        };
        entry.1.push(prompt_version.clone());
        Ok(prompt_version)
    }

    async fn delete_prompt(&self, name: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store
            .prompts
            .remove(name)
            .ok_or_else(|| TransferError::not_found("prompt", name))?;
        Ok(())
    }

    // ---- evaluation datasets ----

    async fn create_dataset(
        &self,
        name: &str,
        experiment_ids: &[String],
        tags: &[KeyValue],
    ) -> Result<EvaluationDataset> {
        let mut store = self.store.write().await;
        if store.datasets.values().any(|d| d.name == name) {
            return Err(TransferError::Backend {
                message: format!("evaluation dataset already exists: {name}"),
                status: None,
                error_code: Some("RESOURCE_ALREADY_EXISTS".to_string()),
            });
        }
        let dataset_id = format!("ds-{}", uuid::Uuid::new_v4().simple());
        let dataset = EvaluationDataset {
            dataset_id: dataset_id.clone(),
            name: name.to_string(),
            tags: tags.to_vec(),
            records: vec![],
            experiment_ids: experiment_ids.to_vec(),
            digest: None,
            created_time: Some(chrono::Utc::now().timestamp_millis()),
        };
        store.datasets.insert(dataset_id, dataset.clone());
        Ok(dataset)
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<EvaluationDataset> {
        let store = self.store.read().await;
        store
            .datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| TransferError::not_found("evaluation dataset", dataset_id))
    }

    async fn get_dataset_by_name(&self, name: &str) -> Result<Option<EvaluationDataset>> {
        let store = self.store.read().await;
        Ok(store.datasets.values().find(|d| d.name == name).cloned())
    }

    async fn search_datasets(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<EvaluationDataset>> {
        let store = self.store.read().await;
        let mut items: Vec<EvaluationDataset> = store
            .datasets
            .values()
            .filter(|d| match_name_filter(filter, &d.name))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(items, max_results, page_token))
    }

    async fn merge_records(&self, dataset_id: &str, records: &[DatasetRecord]) -> Result<()> {
        let mut store = self.store.write().await;
        let dataset = store
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| TransferError::not_found("evaluation dataset", dataset_id))?;
        dataset.records.extend_from_slice(records);
        Ok(())
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store
            .datasets
            .remove(dataset_id)
            .ok_or_else(|| TransferError::not_found("evaluation dataset", dataset_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_run_allocates_fresh_artifact_uri() {
        let backend = MemoryBackend::new("t");
        let exp = backend.create_experiment("e", &[]).await.unwrap();
        let run = backend.create_run(&exp, "me", 123, &[]).await.unwrap();
        assert!(run.info.artifact_uri.contains(&run.info.run_id));
        assert_eq!(run.info.start_time, 123);
    }

    #[tokio::test]
    async fn test_artifact_round_trip_through_fs() {
        let backend = MemoryBackend::new("t");
        let exp = backend.create_experiment("e", &[]).await.unwrap();
        let run = backend.create_run(&exp, "me", 0, &[]).await.unwrap();
        backend
            .put_artifact(&run.info.run_id, "dir/info.txt", b"hello")
            .await;

        let tmp = TempDir::new().unwrap();
        let root = backend
            .download_artifacts(&run.info.run_id, "", tmp.path())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(root.join("dir/info.txt")).unwrap(),
            b"hello".to_vec()
        );

        // One-level listing shows the directory, not the nested file.
        let entries = backend
            .list_artifacts(&run.info.run_id, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].path, "dir");
    }

    #[tokio::test]
    async fn test_search_runs_paginates() {
        let backend = MemoryBackend::new("t");
        let exp = backend.create_experiment("e", &[]).await.unwrap();
        for i in 0..5 {
            backend.create_run(&exp, "me", i, &[]).await.unwrap();
        }
        let first = backend
            .search_runs(&[exp.clone()], None, 2, None)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.next_page_token.unwrap();
        let second = backend
            .search_runs(&[exp.clone()], None, 2, Some(&token))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        let token = second.next_page_token.unwrap();
        let third = backend
            .search_runs(&[exp], None, 2, Some(&token))
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_stage_transition_archives_existing() {
        let backend = MemoryBackend::new("t");
        backend
            .create_registered_model("m", None, &[])
            .await
            .unwrap();
        let v1 = backend
            .create_model_version("m", "s1", "r1", None, &[])
            .await
            .unwrap();
        let v2 = backend
            .create_model_version("m", "s2", "r2", None, &[])
            .await
            .unwrap();
        backend
            .transition_model_version_stage("m", &v1.version, Stage::Production, false)
            .await
            .unwrap();
        backend
            .transition_model_version_stage("m", &v2.version, Stage::Production, true)
            .await
            .unwrap();
        let v1 = backend.get_model_version("m", &v1.version).await.unwrap();
        assert_eq!(v1.current_stage, Some(Stage::Archived));
    }

    #[tokio::test]
    async fn test_alias_moves_between_versions() {
        let backend = MemoryBackend::new("t");
        backend
            .create_registered_model("m", None, &[])
            .await
            .unwrap();
        backend
            .create_model_version("m", "s1", "r1", None, &[])
            .await
            .unwrap();
        backend
            .create_model_version("m", "s2", "r2", None, &[])
            .await
            .unwrap();
        backend
            .set_registered_model_alias("m", "champion", "1")
            .await
            .unwrap();
        backend
            .set_registered_model_alias("m", "champion", "2")
            .await
            .unwrap();
        let v1 = backend.get_model_version("m", "1").await.unwrap();
        let v2 = backend.get_model_version("m", "2").await.unwrap();
        assert!(v1.aliases.is_empty());
        assert_eq!(v2.aliases, vec!["champion".to_string()]);
    }
}
