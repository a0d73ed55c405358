//! Registered-model exporter: `model.json` plus one run subdirectory per
//! exported version's backing run.

use super::run::{RunExportOptions, RunExporter};
use super::source_system_info;
use crate::client::{cursor, MlflowClient};
use crate::error::{Result, TransferError};
use crate::format::{run_dir, Envelope, MODEL_FILE};
use crate::models::{ModelVersion, Stage};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Polymorphic `stages` selector: a comma-separated string or an explicit
/// list, normalized to a lowercase stage set.
#[derive(Debug, Clone)]
pub enum StagesInput {
    Text(String),
    List(Vec<String>),
}

impl StagesInput {
    /// Normalize to a stage set; unknown stage names are a bad request.
    pub fn normalize(&self) -> Result<BTreeSet<Stage>> {
        let names: Vec<String> = match self {
            StagesInput::Text(text) => text.split(',').map(|s| s.trim().to_string()).collect(),
            StagesInput::List(list) => list.clone(),
        };
        let mut stages = BTreeSet::new();
        for name in names.iter().filter(|n| !n.is_empty()) {
            let stage = Stage::parse(name).ok_or_else(|| TransferError::BadRequest {
                message: format!("unknown stage: {name:?}"),
            })?;
            stages.insert(stage);
        }
        Ok(stages)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelExportOptions {
    /// Export only versions currently in these stages. Mutually exclusive
    /// with `versions`.
    pub stages: Option<StagesInput>,
    /// Export only these version numbers. Mutually exclusive with `stages`.
    pub versions: Vec<String>,
    /// Use `get_latest_versions` (one version per stage) instead of
    /// enumerating all versions.
    pub export_latest_versions: bool,
    /// Keep versions whose backing run is gone, recording them as deleted.
    pub export_deleted_runs: bool,
    /// Store the model's permission ACLs verbatim in the envelope.
    pub export_permissions: bool,
    pub skip_download_artifacts: bool,
}

/// Outcome of one model export.
#[derive(Debug, Clone)]
pub struct ModelExport {
    pub name: String,
    /// Versions written to the envelope, aliases attached.
    pub versions: Vec<ModelVersion>,
    /// Source run IDs backing the exported versions.
    pub run_ids: Vec<String>,
    /// Versions dropped because their backing run is gone.
    pub deleted_run_versions: Vec<String>,
}

pub struct ModelExporter {
    client: Arc<dyn MlflowClient>,
    opts: ModelExportOptions,
}

impl ModelExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, ModelExportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: ModelExportOptions) -> Self {
        Self { client, opts }
    }

    pub async fn export_model(&self, name: &str, out_dir: &Path) -> Result<ModelExport> {
        let stages = self.normalized_stages()?;
        let model = self.client.get_registered_model(name).await?;

        let candidates = if self.opts.export_latest_versions {
            let stage_list: Vec<Stage> = stages.iter().copied().collect();
            self.client.get_latest_versions(name, &stage_list).await?
        } else {
            cursor::model_versions(self.client.as_ref(), name.to_string())
                .collect_all()
                .await?
        };

        let mut export = ModelExport {
            name: name.to_string(),
            versions: Vec::new(),
            run_ids: Vec::new(),
            deleted_run_versions: Vec::new(),
        };
        let run_exporter = RunExporter::with_options(
            self.client.clone(),
            RunExportOptions {
                skip_download_artifacts: self.opts.skip_download_artifacts,
            },
        );
        for mut version in candidates {
            if !self.selected(&version, &stages) {
                continue;
            }
            version.aliases = model.aliases_for_version(&version.version);
            match run_exporter
                .export_run(&version.run_id, &run_dir(out_dir, &version.run_id))
                .await
            {
                Ok(_) => export.run_ids.push(version.run_id.clone()),
                Err(err) if err.is_not_found() => {
                    warn!(
                        name,
                        version = %version.version,
                        run_id = %version.run_id,
                        "backing run is gone"
                    );
                    export.deleted_run_versions.push(version.version.clone());
                    if !self.opts.export_deleted_runs {
                        continue;
                    }
                }
                Err(err) => return Err(err),
            }
            export.versions.push(version);
        }

        let mut payload = match serde_json::to_value(&model)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        // `versions` sits inside the model payload; permissions go last
        // for readability and only when asked for.
        let permissions = payload.remove("permissions");
        payload.insert("versions".to_string(), serde_json::to_value(&export.versions)?);
        if self.opts.export_permissions {
            if let Some(permissions) = permissions {
                payload.insert("permissions".to_string(), permissions);
            }
        }

        let envelope = Envelope::new(
            source_system_info(self.client.as_ref()).await,
            json!({
                "num_versions": export.versions.len(),
                "num_deleted_run_versions": export.deleted_run_versions.len(),
                "export_latest_versions": self.opts.export_latest_versions,
            }),
            json!({ "registered_model": Value::Object(payload) }),
        );
        envelope.write(&out_dir.join(MODEL_FILE)).await?;
        info!(name, versions = export.versions.len(), "exported model");
        Ok(export)
    }

    fn normalized_stages(&self) -> Result<BTreeSet<Stage>> {
        if self.opts.stages.is_some() && !self.opts.versions.is_empty() {
            return Err(TransferError::BadRequest {
                message: "stages and versions are mutually exclusive".to_string(),
            });
        }
        match &self.opts.stages {
            Some(input) => input.normalize(),
            None => Ok(BTreeSet::new()),
        }
    }

    fn selected(&self, version: &ModelVersion, stages: &BTreeSet<Stage>) -> bool {
        if !self.opts.versions.is_empty() {
            return self.opts.versions.contains(&version.version);
        }
        if stages.is_empty() {
            return true;
        }
        version
            .current_stage
            .map(|stage| stages.contains(&stage))
            .unwrap_or(false)
    }
}
