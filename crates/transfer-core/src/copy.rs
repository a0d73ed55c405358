//! Direct model-version copy between two live backends.
//!
//! Unlike export/import there is no on-disk envelope: artifacts stream
//! through a temporary directory straight into the destination run. The
//! source and destination may be different servers and different registry
//! kinds (workspace or Unity Catalog).

use crate::client::{ensure_experiment, MlflowClient, RegistryKind};
use crate::error::{Result, TransferError};
use crate::import::build_import_tags;
use crate::models::{ModelVersion, RegisteredModel, Stage};
use crate::rewrite::{destination_source, model_artifact_path, patch_mlmodel_tree};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Replay the source version's current stage onto the destination.
    /// Aliases are always copied; stages only exist on workspace
    /// registries.
    pub copy_stages_and_aliases: bool,
    /// Attach provenance tags naming the source model, version and run.
    pub copy_lineage_tags: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            copy_stages_and_aliases: false,
            copy_lineage_tags: true,
        }
    }
}

/// Outcome of one version copy.
#[derive(Debug, Clone)]
pub struct VersionCopy {
    pub dst_version: ModelVersion,
    pub dst_run_id: String,
    /// True when the source run was reused instead of cloned.
    pub reused_source_run: bool,
}

pub struct ModelVersionCopier {
    src: Arc<dyn MlflowClient>,
    dst: Arc<dyn MlflowClient>,
    opts: CopyOptions,
}

impl ModelVersionCopier {
    pub fn new(src: Arc<dyn MlflowClient>, dst: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(src, dst, CopyOptions::default())
    }

    pub fn with_options(
        src: Arc<dyn MlflowClient>,
        dst: Arc<dyn MlflowClient>,
        opts: CopyOptions,
    ) -> Self {
        Self { src, dst, opts }
    }

    /// Copy `src_model` version `src_version` to `dst_model`. With
    /// `dst_experiment_name` set, the backing run is cloned into that
    /// experiment; with `None`, both endpoints must be the same server
    /// and the new version points at the source run directly.
    pub async fn copy_model_version(
        &self,
        src_model: &str,
        src_version: &str,
        dst_model: &str,
        dst_experiment_name: Option<&str>,
    ) -> Result<VersionCopy> {
        let version = self.src.get_model_version(src_model, src_version).await?;
        let src_run = self.src.get_run(&version.run_id).await?;

        let (dst_run_id, source, reused) = match dst_experiment_name {
            Some(experiment) => {
                let (run_id, artifact_uri) = self.clone_run(&src_run, experiment).await?;
                let model_path = model_artifact_path(&version.source);
                (
                    run_id,
                    destination_source(&artifact_uri, &model_path),
                    false,
                )
            }
            None => {
                if self.src.tracking_uri() != self.dst.tracking_uri() {
                    return Err(TransferError::BadRequest {
                        message: "a destination experiment is required when copying \
                                  across tracking servers"
                            .to_string(),
                    });
                }
                (version.run_id.clone(), version.source.clone(), true)
            }
        };

        self.ensure_model(dst_model, &version).await?;
        let tags = build_import_tags(
            &version.tags,
            self.opts.copy_lineage_tags,
            &[
                ("model_name", &version.name),
                ("version", &version.version),
                ("run_id", &version.run_id),
            ],
        );
        let dst_version = self
            .dst
            .create_model_version(
                dst_model,
                &source,
                &dst_run_id,
                version.description.as_deref(),
                &tags,
            )
            .await?;

        for alias in &version.aliases {
            self.dst
                .set_registered_model_alias(dst_model, alias, &dst_version.version)
                .await?;
        }
        if self.opts.copy_stages_and_aliases {
            self.apply_stage(&version, &dst_version).await?;
        }
        info!(
            src = format!("{src_model}/{src_version}"),
            dst = format!("{dst_model}/{}", dst_version.version),
            reused_source_run = reused,
            "copied model version"
        );
        Ok(VersionCopy {
            dst_version,
            dst_run_id,
            reused_source_run: reused,
        })
    }

    /// Clone the backing run into the destination experiment: metadata
    /// via the batch endpoint, artifacts via a local staging directory
    /// with MLmodel descriptors patched before upload. Returns the new
    /// run ID and its artifact root.
    async fn clone_run(
        &self,
        src_run: &crate::models::Run,
        dst_experiment_name: &str,
    ) -> Result<(String, String)> {
        let experiment_id = ensure_experiment(self.dst.as_ref(), dst_experiment_name, &[]).await?;
        let tags = build_import_tags(
            &src_run.data.tags,
            self.opts.copy_lineage_tags,
            &[
                ("run_id", &src_run.info.run_id),
                ("experiment_id", &src_run.info.experiment_id),
            ],
        );
        let dst_run = self
            .dst
            .create_run(
                &experiment_id,
                &src_run.info.user_id,
                src_run.info.start_time,
                &tags,
            )
            .await?;
        let dst_run_id = dst_run.info.run_id.clone();
        crate::import::log_batched(
            self.dst.as_ref(),
            &dst_run_id,
            &src_run.data.metrics,
            &src_run.data.params,
        )
        .await?;

        let staging = tempfile::tempdir().map_err(|e| TransferError::io_with_path(e, "."))?;
        let local = self
            .src
            .download_artifacts(&src_run.info.run_id, "", staging.path())
            .await?;
        patch_mlmodel_tree(&local, Some(&dst_run_id), None).await?;
        self.dst.log_artifacts(&dst_run_id, &local, None).await?;
        debug!(src_run_id = %src_run.info.run_id, dst_run_id, "cloned backing run");

        self.dst
            .set_terminated(&dst_run_id, src_run.info.status, src_run.info.end_time)
            .await?;
        let dst_run = self.dst.get_run(&dst_run_id).await?;
        Ok((dst_run_id, dst_run.info.artifact_uri))
    }

    async fn ensure_model(&self, name: &str, src_version: &ModelVersion) -> Result<()> {
        match self.dst.get_registered_model(name).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                let src_model: Option<RegisteredModel> =
                    self.src.get_registered_model(&src_version.name).await.ok();
                let description = src_model.as_ref().and_then(|m| m.description.clone());
                self.dst
                    .create_registered_model(name, description.as_deref(), &[])
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
        if self.dst.registry_kind() == RegistryKind::UnityCatalog {
            return Ok(());
        }
        let Some(stage) = src_version.current_stage else {
            return Ok(());
        };
        if stage == Stage::None {
            return Ok(());
        }
        self.dst
            .transition_model_version_stage(&dst_version.name, &dst_version.version, stage, false)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::models::{Metric, Param};

    async fn seed_version(backend: &MemoryBackend) -> ModelVersion {
        let experiment_id = backend.create_experiment("exp", &[]).await.unwrap();
        let run = backend.create_run(&experiment_id, "u", 10, &[]).await.unwrap();
        backend
            .log_batch(
                &run.info.run_id,
                &[Metric::new("acc", 0.9, 1, 0)],
                &[Param::new("lr", "0.01")],
                &[],
            )
            .await
            .unwrap();
        backend.put_artifact(&run.info.run_id, "model/MLmodel", b"run_id: old\n").await;
        backend.put_artifact(&run.info.run_id, "model/weights.bin", b"\x00\x01").await;
        backend
            .create_registered_model("m", Some("demo"), &[])
            .await
            .unwrap();
        let source = format!("{}/model", run.info.artifact_uri);
        let version = backend
            .create_model_version("m", &source, &run.info.run_id, None, &[])
            .await
            .unwrap();
        backend
            .set_registered_model_alias("m", "champion", &version.version)
            .await
            .unwrap();
        backend
            .transition_model_version_stage("m", &version.version, Stage::Production, false)
            .await
            .unwrap();
        backend.get_model_version("m", &version.version).await.unwrap()
    }

    #[tokio::test]
    async fn test_cross_server_copy_clones_run() {
        let src = Arc::new(MemoryBackend::new("src"));
        let version = seed_version(&src).await;
        let dst = Arc::new(MemoryBackend::new("dst"));

        let copy = ModelVersionCopier::new(src.clone(), dst.clone())
            .copy_model_version("m", &version.version, "m2", Some("copied-runs"))
            .await
            .unwrap();
        assert!(!copy.reused_source_run);

        let dst_run = dst.get_run(&copy.dst_run_id).await.unwrap();
        assert_eq!(dst_run.data.params, vec![Param::new("lr", "0.01")]);
        assert!(copy
            .dst_version
            .source
            .starts_with(&dst_run.info.artifact_uri));
        // MLmodel rebound to the new run; binary payload untouched.
        let descriptor = dst.artifact_bytes(&copy.dst_run_id, "model/MLmodel").await.unwrap();
        assert!(String::from_utf8(descriptor)
            .unwrap()
            .contains(&copy.dst_run_id));
        assert_eq!(
            dst.artifact_bytes(&copy.dst_run_id, "model/weights.bin").await
                .unwrap(),
            b"\x00\x01"
        );

        let model = dst.get_registered_model("m2").await.unwrap();
        assert_eq!(
            model.aliases.get("champion"),
            Some(&copy.dst_version.version)
        );
    }

    #[tokio::test]
    async fn test_same_server_copy_reuses_run() {
        let backend = Arc::new(MemoryBackend::new("one"));
        let version = seed_version(&backend).await;

        let copy = ModelVersionCopier::new(backend.clone(), backend.clone())
            .copy_model_version("m", &version.version, "m2", None)
            .await
            .unwrap();
        assert!(copy.reused_source_run);
        assert_eq!(copy.dst_run_id, version.run_id);
        assert_eq!(copy.dst_version.source, version.source);
    }

    #[tokio::test]
    async fn test_cross_server_copy_without_experiment_is_rejected() {
        let src = Arc::new(MemoryBackend::new("src"));
        let version = seed_version(&src).await;
        let dst = Arc::new(MemoryBackend::new("dst"));

        let err = ModelVersionCopier::new(src, dst)
            .copy_model_version("m", &version.version, "m2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_stage_copy_gated_and_uc_skipped() {
        let src = Arc::new(MemoryBackend::new("src"));
        let version = seed_version(&src).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        let copy = ModelVersionCopier::with_options(
            src.clone(),
            dst.clone(),
            CopyOptions {
                copy_stages_and_aliases: true,
                ..Default::default()
            },
        )
        .copy_model_version("m", &version.version, "m2", Some("copied-runs"))
        .await
        .unwrap();
        let stored = dst
            .get_model_version("m2", &copy.dst_version.version)
            .await
            .unwrap();
        assert_eq!(stored.current_stage, Some(Stage::Production));

        // Unity Catalog destinations carry promotion state in aliases only.
        let uc = Arc::new(MemoryBackend::new("uc").with_registry_kind(RegistryKind::UnityCatalog));
        let copy = ModelVersionCopier::with_options(
            src,
            uc.clone(),
            CopyOptions {
                copy_stages_and_aliases: true,
                ..Default::default()
            },
        )
        .copy_model_version("m", &version.version, "cat.schema.m2", Some("copied-runs"))
        .await
        .unwrap();
        let stored = uc
            .get_model_version("cat.schema.m2", &copy.dst_version.version)
            .await
            .unwrap();
        assert!(matches!(stored.current_stage, None | Some(Stage::None)));
        let model = uc.get_registered_model("cat.schema.m2").await.unwrap();
        assert!(model.aliases.contains_key("champion"));
    }
}
