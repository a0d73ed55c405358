//! Registered-model importer.
//!
//! Ordering: the registered model exists before any version is created;
//! each version's backing run is imported before the version; aliases are
//! set only after every version exists.

use super::run::{RunImportOptions, RunImporter};
use super::{build_import_tags, check_version_skew, destination_version};
use crate::client::{cursor, ensure_experiment, MlflowClient, RegistryKind};
use crate::error::{Result, TransferError};
use crate::format::{run_dir, Envelope, MODEL_FILE};
use crate::models::{ModelVersion, RegisteredModel, Stage};
use crate::rewrite::{destination_source, model_artifact_path};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ModelImportOptions {
    /// Delete and recreate a pre-existing destination model instead of
    /// appending versions to it.
    pub delete_model: bool,
    /// Replay stages and aliases onto the destination versions.
    pub import_stages_and_aliases: bool,
    pub import_source_tags: bool,
    /// Replay stored permission ACLs when the envelope carries them.
    pub import_permissions: bool,
    pub skip_mlmodel_rewrite: bool,
}

impl Default for ModelImportOptions {
    fn default() -> Self {
        Self {
            delete_model: false,
            import_stages_and_aliases: true,
            import_source_tags: false,
            import_permissions: false,
            skip_mlmodel_rewrite: false,
        }
    }
}

/// Outcome of one model import.
#[derive(Debug, Clone)]
pub struct ModelImport {
    pub dst_model_name: String,
    /// (src version number, dst version) pairs in import order.
    pub versions: Vec<(String, ModelVersion)>,
    pub warnings: Vec<String>,
}

pub struct ModelImporter {
    client: Arc<dyn MlflowClient>,
    opts: ModelImportOptions,
}

impl ModelImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, ModelImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: ModelImportOptions) -> Self {
        Self { client, opts }
    }

    /// Import an exported model directory as `dst_model_name`, placing the
    /// backing runs into `dst_experiment_name`.
    pub async fn import_model(
        &self,
        input_dir: &Path,
        dst_model_name: &str,
        dst_experiment_name: &str,
    ) -> Result<ModelImport> {
        let envelope = Envelope::read(&input_dir.join(MODEL_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        check_version_skew(&envelope, dst_version.as_ref());

        let payload = envelope.mlflow["registered_model"].clone();
        let src_model: RegisteredModel = serde_json::from_value(payload.clone())?;
        let src_versions: Vec<ModelVersion> = match payload.get("versions") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };

        if self.opts.delete_model {
            self.delete_existing(dst_model_name).await?;
        }
        self.ensure_model(dst_model_name, &src_model).await?;
        let dst_experiment_id =
            ensure_experiment(self.client.as_ref(), dst_experiment_name, &[]).await?;

        let run_importer = RunImporter::with_options(
            self.client.clone(),
            RunImportOptions {
                import_source_tags: self.opts.import_source_tags,
                skip_mlmodel_rewrite: self.opts.skip_mlmodel_rewrite,
            },
        );

        let mut import = ModelImport {
            dst_model_name: dst_model_name.to_string(),
            versions: Vec::new(),
            warnings: Vec::new(),
        };
        // alias -> dst version number, applied once all versions exist.
        let mut aliases: BTreeMap<String, String> = BTreeMap::new();
        let mut ordered = src_versions;
        ordered.sort_by_key(|v| v.version.parse::<u64>().unwrap_or(u64::MAX));

        for src_version in ordered {
            let run_import = run_importer
                .import_run(
                    &run_dir(input_dir, &src_version.run_id),
                    &dst_experiment_id,
                )
                .await?;
            let model_path = model_artifact_path(&src_version.source);
            let source = destination_source(&run_import.dst_artifact_uri, &model_path);
            let tags = build_import_tags(
                &src_version.tags,
                self.opts.import_source_tags,
                &[
                    ("model_name", &src_version.name),
                    ("version", &src_version.version),
                    ("run_id", &src_version.run_id),
                ],
            );
            let dst_version = self
                .client
                .create_model_version(
                    dst_model_name,
                    &source,
                    &run_import.dst_run_id,
                    src_version.description.as_deref(),
                    &tags,
                )
                .await?;

            if self.opts.import_stages_and_aliases {
                for alias in &src_version.aliases {
                    aliases.insert(alias.clone(), dst_version.version.clone());
                }
                self.apply_stage(&src_version, &dst_version).await?;
            }
            import
                .versions
                .push((src_version.version.clone(), dst_version));
            import.warnings.extend(run_import.warnings);
        }

        for (alias, version) in &aliases {
            self.client
                .set_registered_model_alias(dst_model_name, alias, version)
                .await?;
        }
        if self.opts.import_permissions {
            self.apply_permissions(dst_model_name, &payload, &mut import.warnings)
                .await;
        }
        info!(
            dst_model_name,
            versions = import.versions.len(),
            "imported model"
        );
        Ok(import)
    }

    async fn delete_existing(&self, name: &str) -> Result<()> {
        match self.client.get_registered_model(name).await {
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
            Ok(_) => {}
        }
        // Workspace registries refuse to delete versions in a stage, so
        // archive them first. Several versions can share one stage, so
        // walk the full version list rather than the per-stage latest.
        if self.client.registry_kind() == RegistryKind::Workspace {
            let versions = cursor::model_versions(self.client.as_ref(), name.to_string())
                .collect_all()
                .await?;
            for version in versions {
                if matches!(version.current_stage, Some(Stage::Staging | Stage::Production)) {
                    self.client
                        .transition_model_version_stage(
                            name,
                            &version.version,
                            Stage::Archived,
                            false,
                        )
                        .await?;
                }
            }
        }
        warn!(name, "deleting pre-existing destination model");
        self.client.delete_registered_model(name).await
    }

    async fn ensure_model(&self, name: &str, src_model: &RegisteredModel) -> Result<()> {
        match self.client.get_registered_model(name).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                let tags = build_import_tags(
                    &src_model.tags,
                    self.opts.import_source_tags,
                    &[("model_name", &src_model.name)],
                );
                self.client
                    .create_registered_model(name, src_model.description.as_deref(), &tags)
                    .await
                    .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_stage(
        &self,
        src_version: &ModelVersion,
        dst_version: &ModelVersion,
    ) -> Result<()> {
        // Unity Catalog has no stages; aliases carry promotion state there.
        if self.client.registry_kind() == RegistryKind::UnityCatalog {
            return Ok(());
        }
        let Some(stage) = src_version.current_stage else {
            return Ok(());
        };
        if stage == Stage::None {
            return Ok(());
        }
        self.client
            .transition_model_version_stage(
                &dst_version.name,
                &dst_version.version,
                stage,
                false,
            )
            .await
            .map(|_| ())
    }

    /// Permission replay is best-effort; backends without the API produce
    /// a warning on the unit result, never a failure.
    async fn apply_permissions(
        &self,
        name: &str,
        payload: &serde_json::Value,
        warnings: &mut Vec<String>,
    ) {
        let Some(permissions) = payload.get("permissions") else {
            return;
        };
        if let Err(err) = self
            .client
            .update_registered_model_permissions(name, permissions)
            .await
        {
            let message = format!("permissions not applied: {}", err.summary());
            warn!(name, "{message}");
            warnings.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::export::{ModelExportOptions, ModelExporter, StagesInput};
    use tempfile::TempDir;

    async fn seed_and_export(
        stages: Option<StagesInput>,
        out: &Path,
    ) -> Arc<MemoryBackend> {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        src.create_registered_model("m", Some("src model"), &[])
            .await
            .unwrap();
        for stage in [Stage::Production, Stage::Staging, Stage::Archived, Stage::None] {
            let run = src.create_run(&experiment_id, "u", 0, &[]).await.unwrap();
            src.put_artifact(&run.info.run_id, "model/MLmodel", b"run_id: x\n").await;
            let source = format!("{}/model", run.info.artifact_uri);
            let version = src
                .create_model_version("m", &source, &run.info.run_id, None, &[])
                .await
                .unwrap();
            src.transition_model_version_stage("m", &version.version, stage, false)
                .await
                .unwrap();
        }
        src.set_registered_model_alias("m", "champion", "1")
            .await
            .unwrap();
        ModelExporter::with_options(
            src.clone(),
            ModelExportOptions {
                stages,
                ..Default::default()
            },
        )
        .export_model("m", out)
        .await
        .unwrap();
        src
    }

    #[tokio::test]
    async fn test_import_stage_filtered_model() {
        let out = TempDir::new().unwrap();
        seed_and_export(
            Some(StagesInput::List(vec![
                "Production".to_string(),
                "Staging".to_string(),
            ])),
            out.path(),
        )
        .await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        let import = ModelImporter::new(dst.clone())
            .import_model(out.path(), "m2", "imported-runs")
            .await
            .unwrap();
        assert_eq!(import.versions.len(), 2);

        let model = dst.get_registered_model("m2").await.unwrap();
        assert_eq!(model.aliases.get("champion"), Some(&"1".to_string()));

        // Reference consistency: source sits inside the new run's tree.
        for (_, version) in &import.versions {
            let run = dst.get_run(&version.run_id).await.unwrap();
            assert!(version.source.starts_with(&run.info.artifact_uri));
            assert!(version.source.ends_with("/model"));
        }
        let stages: Vec<Option<Stage>> = import
            .versions
            .iter()
            .map(|(_, v)| {
                // Stage state lives on the backend after transitions.
                v.current_stage
            })
            .collect();
        assert_eq!(stages.len(), 2);
        let v1 = dst.get_model_version("m2", "1").await.unwrap();
        assert_eq!(v1.current_stage, Some(Stage::Production));
    }

    #[tokio::test]
    async fn test_delete_model_recreates() {
        let out = TempDir::new().unwrap();
        seed_and_export(None, out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        dst.create_registered_model("m2", None, &[]).await.unwrap();
        let exp = dst.create_experiment("pre", &[]).await.unwrap();
        let run = dst.create_run(&exp, "u", 0, &[]).await.unwrap();
        dst.create_model_version("m2", "s", &run.info.run_id, None, &[])
            .await
            .unwrap();

        let importer = ModelImporter::with_options(
            dst.clone(),
            ModelImportOptions {
                delete_model: true,
                ..Default::default()
            },
        );
        let import = importer
            .import_model(out.path(), "m2", "imported-runs")
            .await
            .unwrap();
        // Versions restart at 1 on the recreated model.
        assert_eq!(import.versions.first().unwrap().1.version, "1");
        assert_eq!(import.versions.len(), 4);
    }

    #[tokio::test]
    async fn test_delete_model_archives_every_staged_version() {
        let out = TempDir::new().unwrap();
        seed_and_export(None, out.path()).await;

        // Two destination versions share the Production stage; both must
        // be archived before the model can be deleted.
        let dst = Arc::new(MemoryBackend::new("dst"));
        dst.create_registered_model("m2", None, &[]).await.unwrap();
        let exp = dst.create_experiment("pre", &[]).await.unwrap();
        for _ in 0..2 {
            let run = dst.create_run(&exp, "u", 0, &[]).await.unwrap();
            let version = dst
                .create_model_version("m2", "s", &run.info.run_id, None, &[])
                .await
                .unwrap();
            dst.transition_model_version_stage("m2", &version.version, Stage::Production, false)
                .await
                .unwrap();
        }

        let importer = ModelImporter::with_options(
            dst.clone(),
            ModelImportOptions {
                delete_model: true,
                ..Default::default()
            },
        );
        let import = importer
            .import_model(out.path(), "m2", "imported-runs")
            .await
            .unwrap();
        // Versions restart at 1 on the recreated model.
        assert_eq!(import.versions.first().unwrap().1.version, "1");
    }

    #[tokio::test]
    async fn test_append_to_existing_model() {
        let out = TempDir::new().unwrap();
        seed_and_export(Some(StagesInput::Text("production".to_string())), out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        dst.create_registered_model("m2", None, &[]).await.unwrap();
        let exp = dst.create_experiment("pre", &[]).await.unwrap();
        let run = dst.create_run(&exp, "u", 0, &[]).await.unwrap();
        dst.create_model_version("m2", "s", &run.info.run_id, None, &[])
            .await
            .unwrap();

        let import = ModelImporter::new(dst.clone())
            .import_model(out.path(), "m2", "imported-runs")
            .await
            .unwrap();
        assert_eq!(import.versions.first().unwrap().1.version, "2");
    }
}
