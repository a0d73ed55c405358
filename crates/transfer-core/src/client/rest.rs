//! REST binding for open-source MLflow servers and Databricks workspaces.
//!
//! Thin JSON-over-HTTP mapping of the capability trait onto the
//! `/api/2.0/mlflow` surface. Artifact uploads go through the
//! `mlflow-artifacts` proxy routes, which requires the destination run's
//! artifact root to live behind the proxy; direct object-store artifact
//! roots are a collaborator concern this binding does not cover.

use super::{MlflowClient, Page, RegistryKind};
use crate::config::NetworkConfig;
use crate::error::{Result, TransferError};
use crate::models::{
    ArtifactInfo, Assessment, DatasetInput, DatasetRecord, EvaluationDataset, Experiment,
    KeyValue, LoggedModel, LoggedModelStatus, Metric, ModelVersion, Param, Prompt, PromptVersion,
    RegisteredModel, Run, RunStatus, Span, SpanStatus, Stage, TraceData, TraceInfo, TraceState,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// HTTP client against one MLflow tracking/registry endpoint.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    tracking_uri: String,
    registry_kind: RegistryKind,
    token: Option<String>,
}

impl RestClient {
    /// Create a client for `tracking_uri`, optionally with a bearer token.
    pub fn new(tracking_uri: &str, token: Option<String>) -> Result<Self> {
        let base_url = tracking_uri.trim_end_matches('/').to_string();
        let registry_kind = if base_url.starts_with("databricks-uc") {
            RegistryKind::UnityCatalog
        } else {
            RegistryKind::Workspace
        };
        let http = reqwest::Client::builder()
            .timeout(NetworkConfig::REQUEST_TIMEOUT)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            tracking_uri: tracking_uri.to_string(),
            registry_kind,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, NetworkConfig::API_PREFIX, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status.is_success() {
            if status == reqwest::StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let text = response.text().await?;
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let error_code = body
            .get("error_code")
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        Err(TransferError::Backend {
            message,
            status: Some(status.as_u16()),
            error_code,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path);
        debug!("GET {url}");
        let response = self
            .authorized(self.http.get(&url).query(query))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.endpoint(path);
        debug!("POST {url}");
        let response = self
            .authorized(self.http.post(&url).json(&body))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.endpoint(path);
        debug!("PATCH {url}");
        let response = self
            .authorized(self.http.patch(&url).json(&body))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn delete(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.endpoint(path);
        debug!("DELETE {url}");
        let response = self
            .authorized(self.http.delete(&url).json(&body))
            .send()
            .await?;
        Self::check(response).await
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value, context: &str) -> Result<T> {
        serde_json::from_value(value).map_err(|e| TransferError::Json {
            message: format!("unexpected {context} payload: {e}"),
            source: Some(e),
        })
    }

    fn parse_model(mut value: Value) -> Result<RegisteredModel> {
        // The REST alias shape is a list of {alias, version} pairs.
        let aliases: BTreeMap<String, String> = value
            .get("aliases")
            .and_then(Value::as_array)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|p| {
                        let alias = p.get("alias")?.as_str()?.to_string();
                        let version = p.get("version")?.as_str()?.to_string();
                        Some((alias, version))
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("aliases");
            obj.remove("latest_versions");
        }
        let mut model: RegisteredModel = Self::parse(value, "registered model")?;
        model.aliases = aliases;
        Ok(model)
    }

    fn page_token_field(value: &Value) -> Option<String> {
        value
            .get("next_page_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Relative proxy path for a run artifact, derived from its artifact
    /// URI. Only `mlflow-artifacts:` roots are uploadable through REST.
    fn proxy_artifact_path(artifact_uri: &str, artifact_path: &str) -> Result<String> {
        let root = artifact_uri
            .strip_prefix("mlflow-artifacts:/")
            .ok_or_else(|| {
                TransferError::backend(format!(
                    "artifact upload requires an mlflow-artifacts root, got {artifact_uri}"
                ))
            })?;
        let root = root.trim_matches('/');
        Ok(if artifact_path.is_empty() {
            root.to_string()
        } else {
            format!("{root}/{artifact_path}")
        })
    }

    /// Percent-encode each segment of a proxy path, keeping the `/`
    /// separators. Artifact names may carry spaces or reserved characters.
    fn encode_path(path: &str) -> String {
        path.split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    async fn upload_file(&self, proxy_path: &str, local_file: &Path) -> Result<()> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            NetworkConfig::ARTIFACTS_API_PREFIX,
            Self::encode_path(proxy_path)
        );
        debug!("PUT {url}");
        let bytes = tokio::fs::read(local_file)
            .await
            .map_err(|e| TransferError::io_with_path(e, local_file))?;
        let response = self.authorized(self.http.put(&url).body(bytes)).send().await?;
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl MlflowClient for RestClient {
    fn tracking_uri(&self) -> &str {
        &self.tracking_uri
    }

    fn registry_kind(&self) -> RegistryKind {
        self.registry_kind
    }

    async fn server_version(&self) -> Result<String> {
        let url = format!("{}/version", self.base_url);
        let response = self.authorized(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Backend {
                message: "version probe failed".to_string(),
                status: Some(status.as_u16()),
                error_code: None,
            });
        }
        Ok(response.text().await?.trim().to_string())
    }

    // ---- experiments ----

    async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment> {
        let value = self
            .get(
                "experiments/get",
                &[("experiment_id", experiment_id.to_string())],
            )
            .await?;
        Self::parse(value["experiment"].clone(), "experiment")
    }

    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let result = self
            .get(
                "experiments/get-by-name",
                &[("experiment_name", name.to_string())],
            )
            .await;
        match result {
            Ok(value) => Ok(Some(Self::parse(value["experiment"].clone(), "experiment")?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_experiment(&self, name: &str, tags: &[KeyValue]) -> Result<String> {
        let value = self
            .post(
                "experiments/create",
                json!({ "name": name, "tags": tags }),
            )
            .await?;
        value["experiment_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransferError::backend("create_experiment returned no id"))
    }

    async fn set_experiment_tag(&self, experiment_id: &str, key: &str, value: &str) -> Result<()> {
        self.post(
            "experiments/set-experiment-tag",
            json!({ "experiment_id": experiment_id, "key": key, "value": value }),
        )
        .await
        .map(|_| ())
    }

    async fn search_experiments(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Experiment>> {
        let value = self
            .post(
                "experiments/search",
                json!({
                    "filter": filter,
                    "max_results": max_results,
                    "page_token": page_token,
                }),
            )
            .await?;
        let items = Self::parse(
            value.get("experiments").cloned().unwrap_or(json!([])),
            "experiments",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn search_runs(
        &self,
        experiment_ids: &[String],
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Run>> {
        let value = self
            .post(
                "runs/search",
                json!({
                    "experiment_ids": experiment_ids,
                    "filter": filter,
                    "max_results": max_results,
                    "page_token": page_token,
                }),
            )
            .await?;
        let items = Self::parse(value.get("runs").cloned().unwrap_or(json!([])), "runs")?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    // ---- runs ----

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        let value = self
            .get("runs/get", &[("run_id", run_id.to_string())])
            .await?;
        Self::parse(value["run"].clone(), "run")
    }

    async fn create_run(
        &self,
        experiment_id: &str,
        user_id: &str,
        start_time: i64,
        tags: &[KeyValue],
    ) -> Result<Run> {
        let value = self
            .post(
                "runs/create",
                json!({
                    "experiment_id": experiment_id,
                    "user_id": user_id,
                    "start_time": start_time,
                    "tags": tags,
                }),
            )
            .await?;
        Self::parse(value["run"].clone(), "run")
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[KeyValue],
    ) -> Result<()> {
        self.post(
            "runs/log-batch",
            json!({
                "run_id": run_id,
                "metrics": metrics,
                "params": params,
                "tags": tags,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.post(
            "runs/set-tag",
            json!({ "run_id": run_id, "key": key, "value": value }),
        )
        .await
        .map(|_| ())
    }

    async fn set_terminated(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<i64>,
    ) -> Result<()> {
        self.post(
            "runs/update",
            json!({ "run_id": run_id, "status": status, "end_time": end_time }),
        )
        .await
        .map(|_| ())
    }

    async fn log_inputs(&self, run_id: &str, inputs: &[DatasetInput]) -> Result<()> {
        let datasets: Vec<Value> = inputs
            .iter()
            .map(|input| {
                json!({
                    "dataset": {
                        "name": input.name,
                        "digest": input.digest,
                        "source_type": input.source_type,
                        "source": input.source,
                    },
                    "tags": input.tags,
                })
            })
            .collect();
        self.post(
            "runs/log-inputs",
            json!({ "run_id": run_id, "datasets": datasets }),
        )
        .await
        .map(|_| ())
    }

    // ---- run artifacts ----

    async fn list_artifacts(&self, run_id: &str, path: Option<&str>) -> Result<Vec<ArtifactInfo>> {
        let mut query = vec![("run_id", run_id.to_string())];
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }
        let value = self.get("artifacts/list", &query).await?;
        let files = value.get("files").cloned().unwrap_or(json!([]));
        let entries = files.as_array().cloned().unwrap_or_default();
        Ok(entries
            .iter()
            .filter_map(|entry| {
                Some(ArtifactInfo {
                    path: entry.get("path")?.as_str()?.to_string(),
                    is_dir: entry.get("is_dir").and_then(Value::as_bool).unwrap_or(false),
                    file_size: entry.get("file_size").and_then(Value::as_u64),
                })
            })
            .collect())
    }

    async fn download_artifacts(
        &self,
        run_id: &str,
        path: &str,
        dst_dir: &Path,
    ) -> Result<PathBuf> {
        // Resolve the file set, then fetch each file through get-artifact.
        let files = if path.is_empty() {
            super::list_artifacts_recursive(self, run_id).await?
        } else {
            let listed = self.list_artifacts(run_id, self_path_parent(path)).await;
            match listed {
                Ok(entries) if entries.iter().any(|e| e.path == path && !e.is_dir) => {
                    vec![ArtifactInfo {
                        path: path.to_string(),
                        is_dir: false,
                        file_size: None,
                    }]
                }
                _ => {
                    // Treat as a directory prefix.
                    super::list_artifacts_recursive(self, run_id)
                        .await?
                        .into_iter()
                        .filter(|e| {
                            e.path == path || e.path.starts_with(&format!("{path}/"))
                        })
                        .collect()
                }
            }
        };
        if !path.is_empty() && files.is_empty() {
            return Err(TransferError::not_found("artifact", path));
        }
        for file in &files {
            let url = format!("{}/get-artifact", self.base_url);
            let response = self
                .authorized(self.http.get(&url).query(&[
                    ("run_id", run_id),
                    ("path", file.path.as_str()),
                ]))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransferError::Backend {
                    message: format!("artifact download failed for {}", file.path),
                    status: Some(status.as_u16()),
                    error_code: None,
                });
            }
            let bytes = response.bytes().await?;
            let local = dst_dir.join(&file.path);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransferError::io_with_path(e, parent))?;
            }
            tokio::fs::write(&local, &bytes)
                .await
                .map_err(|e| TransferError::io_with_path(e, &local))?;
        }
        Ok(if path.is_empty() {
            dst_dir.to_path_buf()
        } else {
            dst_dir.join(path)
        })
    }

    async fn log_artifact(
        &self,
        run_id: &str,
        local_file: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        let run = self.get_run(run_id).await?;
        let name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::Other(format!("bad file name: {local_file:?}")))?;
        let rel = match artifact_path {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{name}"),
            _ => name.to_string(),
        };
        let proxy_path = Self::proxy_artifact_path(&run.info.artifact_uri, &rel)?;
        self.upload_file(&proxy_path, local_file).await
    }

    async fn log_artifacts(
        &self,
        run_id: &str,
        local_dir: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        let run = self.get_run(run_id).await?;
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
            let rel = match artifact_path {
                Some(prefix) if !prefix.is_empty() => format!("{prefix}/{rel}"),
                _ => rel,
            };
            let proxy_path = Self::proxy_artifact_path(&run.info.artifact_uri, &rel)?;
            self.upload_file(&proxy_path, entry.path()).await?;
        }
        Ok(())
    }

    // ---- model registry ----

    async fn get_registered_model(&self, name: &str) -> Result<RegisteredModel> {
        let value = self
            .get("registered-models/get", &[("name", name.to_string())])
            .await?;
        Self::parse_model(value["registered_model"].clone())
    }

    async fn create_registered_model(
        &self,
        name: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<RegisteredModel> {
        let value = self
            .post(
                "registered-models/create",
                json!({ "name": name, "description": description, "tags": tags }),
            )
            .await?;
        Self::parse_model(value["registered_model"].clone())
    }

    async fn delete_registered_model(&self, name: &str) -> Result<()> {
        self.delete("registered-models/delete", json!({ "name": name }))
            .await
            .map(|_| ())
    }

    async fn set_registered_model_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.post(
            "registered-models/set-tag",
            json!({ "name": name, "key": key, "value": value }),
        )
        .await
        .map(|_| ())
    }

    async fn search_registered_models(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<RegisteredModel>> {
        let mut query = vec![("max_results", max_results.to_string())];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        let value = self.get("registered-models/search", &query).await?;
        let models = value
            .get("registered_models")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let items = models
            .into_iter()
            .map(Self::parse_model)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn search_model_versions(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<ModelVersion>> {
        let mut query = vec![("max_results", max_results.to_string())];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        let value = self.get("model-versions/search", &query).await?;
        let items = Self::parse(
            value.get("model_versions").cloned().unwrap_or(json!([])),
            "model versions",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn get_model_version(&self, name: &str, version: &str) -> Result<ModelVersion> {
        let value = self
            .get(
                "model-versions/get",
                &[("name", name.to_string()), ("version", version.to_string())],
            )
            .await?;
        Self::parse(value["model_version"].clone(), "model version")
    }

    async fn get_latest_versions(&self, name: &str, stages: &[Stage]) -> Result<Vec<ModelVersion>> {
        let stages: Vec<&str> = stages.iter().map(Stage::as_str).collect();
        let value = self
            .post(
                "registered-models/get-latest-versions",
                json!({ "name": name, "stages": stages }),
            )
            .await?;
        Self::parse(
            value.get("model_versions").cloned().unwrap_or(json!([])),
            "model versions",
        )
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<ModelVersion> {
        let value = self
            .post(
                "model-versions/create",
                json!({
                    "name": name,
                    "source": source,
                    "run_id": run_id,
                    "description": description,
                    "tags": tags,
                }),
            )
            .await?;
        Self::parse(value["model_version"].clone(), "model version")
    }

    async fn delete_model_version(&self, name: &str, version: &str) -> Result<()> {
        self.delete(
            "model-versions/delete",
            json!({ "name": name, "version": version }),
        )
        .await
        .map(|_| ())
    }

    async fn set_model_version_tag(
        &self,
        name: &str,
        version: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.post(
            "model-versions/set-tag",
            json!({ "name": name, "version": version, "key": key, "value": value }),
        )
        .await
        .map(|_| ())
    }

    async fn transition_model_version_stage(
        &self,
        name: &str,
        version: &str,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<ModelVersion> {
        let value = self
            .post(
                "model-versions/transition-stage",
                json!({
                    "name": name,
                    "version": version,
                    "stage": stage.as_str(),
                    "archive_existing_versions": archive_existing,
                }),
            )
            .await?;
        Self::parse(value["model_version"].clone(), "model version")
    }

    async fn set_registered_model_alias(
        &self,
        name: &str,
        alias: &str,
        version: &str,
    ) -> Result<()> {
        self.post(
            "registered-models/alias",
            json!({ "name": name, "alias": alias, "version": version }),
        )
        .await
        .map(|_| ())
    }

    async fn get_model_version_download_uri(&self, name: &str, version: &str) -> Result<String> {
        let value = self
            .get(
                "model-versions/get-download-uri",
                &[("name", name.to_string()), ("version", version.to_string())],
            )
            .await?;
        value["artifact_uri"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransferError::backend("get-download-uri returned no artifact_uri"))
    }

    // ---- logged models ----

    async fn get_logged_model(&self, model_id: &str) -> Result<LoggedModel> {
        let value = self
            .get(
                "logged-models/get",
                &[("model_id", model_id.to_string())],
            )
            .await?;
        Self::parse(value["model"].clone(), "logged model")
    }

    async fn search_logged_models(
        &self,
        experiment_ids: &[String],
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<LoggedModel>> {
        let value = self
            .post(
                "logged-models/search",
                json!({
                    "experiment_ids": experiment_ids,
                    "max_results": max_results,
                    "page_token": page_token,
                }),
            )
            .await?;
        let items = Self::parse(
            value.get("models").cloned().unwrap_or(json!([])),
            "logged models",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
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
        let value = self
            .post(
                "logged-models/create",
                json!({
                    "experiment_id": experiment_id,
                    "name": name,
                    "source_run_id": source_run_id,
                    "params": params,
                    "metrics": metrics,
                    "tags": tags,
                }),
            )
            .await?;
        Self::parse(value["model"].clone(), "logged model")
    }

    async fn finalize_logged_model(
        &self,
        model_id: &str,
        status: LoggedModelStatus,
    ) -> Result<()> {
        self.patch(
            &format!("logged-models/{model_id}"),
            json!({ "status": status }),
        )
        .await
        .map(|_| ())
    }

    async fn list_logged_model_artifacts(
        &self,
        model_id: &str,
        path: Option<&str>,
    ) -> Result<Vec<ArtifactInfo>> {
        let mut query = vec![("model_id", model_id.to_string())];
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }
        let value = self.get("logged-models/artifacts/list", &query).await?;
        Self::parse(
            value.get("files").cloned().unwrap_or(json!([])),
            "logged model artifacts",
        )
    }

    async fn download_logged_model_artifacts(
        &self,
        model_id: &str,
        path: &str,
        dst_dir: &Path,
    ) -> Result<PathBuf> {
        // Logged-model trees are shallow; list recursively then fetch.
        let mut files = Vec::new();
        let mut queue: Vec<Option<String>> = vec![None];
        while let Some(prefix) = queue.pop() {
            for entry in self
                .list_logged_model_artifacts(model_id, prefix.as_deref())
                .await?
            {
                if entry.is_dir {
                    queue.push(Some(entry.path.clone()));
                } else {
                    files.push(entry);
                }
            }
        }
        for file in files.iter().filter(|f| {
            path.is_empty() || f.path == path || f.path.starts_with(&format!("{path}/"))
        }) {
            let url = format!("{}/get-logged-model-artifact", self.base_url);
            let response = self
                .authorized(self.http.get(&url).query(&[
                    ("model_id", model_id),
                    ("path", file.path.as_str()),
                ]))
                .send()
                .await?;
            let bytes = response.bytes().await?;
            let local = dst_dir.join(&file.path);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransferError::io_with_path(e, parent))?;
            }
            tokio::fs::write(&local, &bytes)
                .await
                .map_err(|e| TransferError::io_with_path(e, &local))?;
        }
        Ok(if path.is_empty() {
            dst_dir.to_path_buf()
        } else {
            dst_dir.join(path)
        })
    }

    async fn log_logged_model_artifacts(&self, model_id: &str, local_dir: &Path) -> Result<()> {
        let model = self.get_logged_model(model_id).await?;
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
            let proxy_path = Self::proxy_artifact_path(&model.artifact_location, &rel)?;
            self.upload_file(&proxy_path, entry.path()).await?;
        }
        Ok(())
    }

    // ---- traces ----

    async fn get_trace(&self, trace_id: &str) -> Result<TraceData> {
        let value = self
            .get("traces/get", &[("trace_id", trace_id.to_string())])
            .await?;
        Self::parse(value["trace"].clone(), "trace")
    }

    async fn search_traces(
        &self,
        experiment_ids: &[String],
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<TraceInfo>> {
        let value = self
            .post(
                "traces/search",
                json!({
                    "experiment_ids": experiment_ids,
                    "max_results": max_results,
                    "page_token": page_token,
                }),
            )
            .await?;
        let items = Self::parse(
            value.get("traces").cloned().unwrap_or(json!([])),
            "traces",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn start_trace(
        &self,
        experiment_id: &str,
        timestamp_ms: i64,
        metadata: &BTreeMap<String, String>,
        tags: &[KeyValue],
    ) -> Result<String> {
        let value = self
            .post(
                "traces/start",
                json!({
                    "experiment_id": experiment_id,
                    "timestamp_ms": timestamp_ms,
                    "metadata": metadata,
                    "tags": tags,
                }),
            )
            .await?;
        value["trace_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransferError::backend("start_trace returned no trace_id"))
    }

    async fn start_span(
        &self,
        trace_id: &str,
        parent_span_id: Option<&str>,
        span: &Span,
    ) -> Result<String> {
        let value = self
            .post(
                &format!("traces/{trace_id}/spans"),
                json!({
                    "parent_span_id": parent_span_id,
                    "name": span.name,
                    "span_type": span.span_type,
                    "start_time_ns": span.start_time_ns,
                    "attributes": span.attributes,
                }),
            )
            .await?;
        value["span_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransferError::backend("start_span returned no span_id"))
    }

    async fn end_span(
        &self,
        trace_id: &str,
        span_id: &str,
        status: SpanStatus,
        end_time_ns: i64,
    ) -> Result<()> {
        self.patch(
            &format!("traces/{trace_id}/spans/{span_id}"),
            json!({ "status": status, "end_time_ns": end_time_ns }),
        )
        .await
        .map(|_| ())
    }

    async fn end_trace(
        &self,
        trace_id: &str,
        state: TraceState,
        execution_time_ms: i64,
    ) -> Result<()> {
        self.patch(
            &format!("traces/{trace_id}"),
            json!({ "state": state, "execution_time_ms": execution_time_ms }),
        )
        .await
        .map(|_| ())
    }

    async fn log_assessment(&self, trace_id: &str, assessment: &Assessment) -> Result<()> {
        self.post(
            &format!("traces/{trace_id}/assessments"),
            serde_json::to_value(assessment)?,
        )
        .await
        .map(|_| ())
    }

    // ---- prompts ----

    async fn search_prompts(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<Prompt>> {
        let mut query = vec![("max_results", max_results.to_string())];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        let value = self.get("prompts/search", &query).await?;
        let items = Self::parse(
            value.get("prompts").cloned().unwrap_or(json!([])),
            "prompts",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn search_prompt_versions(
        &self,
        name: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<PromptVersion>> {
        let mut query = vec![
            ("name", name.to_string()),
            ("max_results", max_results.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }
        let value = self.get("prompts/versions/search", &query).await?;
        let items = Self::parse(
            value.get("prompt_versions").cloned().unwrap_or(json!([])),
            "prompt versions",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn get_prompt_version(&self, name: &str, version: u64) -> Result<PromptVersion> {
        let value = self
            .get(
                "prompts/versions/get",
                &[("name", name.to_string()), ("version", version.to_string())],
            )
            .await?;
        Self::parse(value["prompt_version"].clone(), "prompt version")
    }

    async fn register_prompt(
        &self,
        name: &str,
        template: &str,
        description: Option<&str>,
        tags: &[KeyValue],
    ) -> Result<PromptVersion> {
        let value = self
            .post(
                "prompts/versions/create",
                json!({
                    "name": name,
                    "template": template,
                    "description": description,
                    "tags": tags,
                }),
            )
            .await?;
        Self::parse(value["prompt_version"].clone(), "prompt version")
    }

    async fn delete_prompt(&self, name: &str) -> Result<()> {
        self.delete("prompts/delete", json!({ "name": name }))
            .await
            .map(|_| ())
    }

    // ---- evaluation datasets ----

    async fn create_dataset(
        &self,
        name: &str,
        experiment_ids: &[String],
        tags: &[KeyValue],
    ) -> Result<EvaluationDataset> {
        let value = self
            .post(
                "datasets/create",
                json!({ "name": name, "experiment_ids": experiment_ids, "tags": tags }),
            )
            .await?;
        Self::parse(value["dataset"].clone(), "evaluation dataset")
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<EvaluationDataset> {
        let value = self
            .get("datasets/get", &[("dataset_id", dataset_id.to_string())])
            .await?;
        Self::parse(value["dataset"].clone(), "evaluation dataset")
    }

    async fn get_dataset_by_name(&self, name: &str) -> Result<Option<EvaluationDataset>> {
        let page = self
            .search_datasets(Some(&format!("name='{name}'")), 1, None)
            .await?;
        Ok(page.items.into_iter().next())
    }

    async fn search_datasets(
        &self,
        filter: Option<&str>,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<Page<EvaluationDataset>> {
        let value = self
            .post(
                "datasets/search",
                json!({
                    "filter": filter,
                    "max_results": max_results,
                    "page_token": page_token,
                }),
            )
            .await?;
        let items = Self::parse(
            value.get("datasets").cloned().unwrap_or(json!([])),
            "evaluation datasets",
        )?;
        Ok(Page {
            items,
            next_page_token: Self::page_token_field(&value),
        })
    }

    async fn merge_records(&self, dataset_id: &str, records: &[DatasetRecord]) -> Result<()> {
        self.post(
            &format!("datasets/{dataset_id}/records"),
            json!({ "records": records }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<()> {
        self.delete(
            "datasets/delete",
            json!({ "dataset_id": dataset_id }),
        )
        .await
        .map(|_| ())
    }
}

/// Parent prefix of an artifact path, None at the root.
fn self_path_parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_kind_from_uri() {
        let client = RestClient::new("databricks-uc", None).unwrap();
        assert_eq!(client.registry_kind(), RegistryKind::UnityCatalog);
        let client = RestClient::new("http://localhost:5000", None).unwrap();
        assert_eq!(client.registry_kind(), RegistryKind::Workspace);
    }

    #[test]
    fn test_proxy_artifact_path() {
        let path = RestClient::proxy_artifact_path(
            "mlflow-artifacts:/1/abc/artifacts",
            "model/MLmodel",
        )
        .unwrap();
        assert_eq!(path, "1/abc/artifacts/model/MLmodel");

        let err = RestClient::proxy_artifact_path("s3://bucket/1/abc", "f").unwrap_err();
        assert!(err.to_string().contains("mlflow-artifacts"));
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(
            RestClient::encode_path("1/abc/artifacts/eval results/run 1.csv"),
            "1/abc/artifacts/eval%20results/run%201.csv"
        );
        assert_eq!(
            RestClient::encode_path("1/abc/50%.txt"),
            "1/abc/50%25.txt"
        );
    }
}
