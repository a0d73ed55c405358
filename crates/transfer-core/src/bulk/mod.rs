//! Bulk orchestration: plan a name set, execute independent units on a
//! bounded worker pool, aggregate per-unit results, and write the root
//! manifest.
//!
//! Imports run in phases so dependency order holds without locking:
//! every experiment unit completes before the first model unit starts.
//! A unit failure never aborts its peers.

mod resolve;

pub use resolve::{resolve_experiments, resolve_models};

use crate::checkpoint::CheckpointLog;
use crate::client::MlflowClient;
use crate::error::{Result, TransferError};
use crate::export::{
    ExperimentExportOptions, ExperimentExporter, ModelExportOptions, ModelExporter,
};
use crate::format::{
    experiment_dir, model_dir, BulkManifest, Envelope, UnitResult, EXPERIMENTS_DIR,
    EXPERIMENT_FILE, MODELS_DIR, MODEL_FILE,
};
use crate::import::{
    ExperimentImportOptions, ExperimentImporter, ModelImportOptions, ModelImporter,
};
use crate::models::ObjectKind;
use crate::rename::RenameMaps;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// One independent work unit: a single-object export or import.
struct Unit {
    kind: ObjectKind,
    id: String,
    work: BoxFuture<'static, Result<Vec<String>>>,
}

/// Run units on a pool of at most `parallelism` concurrent workers.
/// Each successful unit is recorded in the checkpoint log as it finishes,
/// so a killed process loses at most the units still in flight.
async fn execute_units(
    parallelism: usize,
    units: Vec<Unit>,
    checkpoint: Option<Arc<CheckpointLog>>,
    phase: &'static str,
) -> Vec<UnitResult> {
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut pool = JoinSet::new();
    for unit in units {
        let semaphore = semaphore.clone();
        let checkpoint = checkpoint.clone();
        pool.spawn(async move {
            let Unit { kind, id, work } = unit;
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return UnitResult::failed(kind, &id, 0, TransferError::Cancelled.summary());
            };
            let start = Instant::now();
            let outcome = work.await;
            let duration = start.elapsed().as_millis() as u64;
            match outcome {
                Ok(warnings) => {
                    if let Some(log) = &checkpoint {
                        let unit_id = format!("{phase}:{kind}:{id}");
                        if let Err(err) = log.record(&unit_id) {
                            warn!(unit_id = %unit_id, "checkpoint record failed: {err}");
                        }
                    }
                    let mut result = UnitResult::succeeded(kind, &id, duration);
                    result.warnings = warnings;
                    result
                }
                Err(err) => {
                    warn!(kind = %kind, id = %id, "unit failed: {}", err.summary());
                    UnitResult::failed(kind, &id, duration, err.summary())
                }
            }
        });
    }
    let mut results = Vec::new();
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => warn!("worker panicked: {err}"),
        }
    }
    results
}

fn pool_size(use_threads: bool, max_workers: usize) -> usize {
    if !use_threads {
        return 1;
    }
    if max_workers > 0 {
        return max_workers;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Clone, Default)]
pub struct BulkExportOptions {
    pub use_threads: bool,
    /// Worker cap; 0 means the CPU count.
    pub max_workers: usize,
    /// Resume support: skip units recorded in the output's checkpoint log.
    pub use_checkpoint: bool,
    pub experiment: ExperimentExportOptions,
    pub model: ModelExportOptions,
}

pub struct BulkExporter {
    client: Arc<dyn MlflowClient>,
    opts: BulkExportOptions,
}

impl BulkExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, BulkExportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: BulkExportOptions) -> Self {
        Self { client, opts }
    }

    /// Export every experiment the selector resolves to under
    /// `<out>/experiments/`, then write the root manifest.
    pub async fn export_experiments(&self, spec: &str, out: &Path) -> Result<BulkManifest> {
        let names = resolve_experiments(self.client.as_ref(), spec).await?;
        let selection = names.into_iter().map(|name| (name, None)).collect();
        self.export_selected_experiments(selection, out).await
    }

    /// Selective bulk export: each experiment is exported with only its
    /// listed runs.
    pub async fn export_experiment_runs(
        &self,
        selection: &BTreeMap<String, Vec<String>>,
        out: &Path,
    ) -> Result<BulkManifest> {
        let selection = selection
            .iter()
            .map(|(name, runs)| (name.clone(), Some(runs.clone())))
            .collect();
        self.export_selected_experiments(selection, out).await
    }

    async fn export_selected_experiments(
        &self,
        selection: Vec<(String, Option<Vec<String>>)>,
        out: &Path,
    ) -> Result<BulkManifest> {
        info!(count = selection.len(), "bulk experiment export planned");
        let checkpoint = self.open_checkpoint(out)?;

        let mut results = Vec::new();
        let mut units = Vec::new();
        for (name, run_ids) in selection {
            let unit_id = format!("export:experiment:{name}");
            if skip_completed(checkpoint.as_deref(), &unit_id, ObjectKind::Experiment, &name) {
                results.push(UnitResult::skipped(ObjectKind::Experiment, &name));
                continue;
            }
            let client = self.client.clone();
            let mut opts = self.opts.experiment.clone();
            if run_ids.is_some() {
                opts.run_ids = run_ids;
            }
            let dir = experiment_dir(out, &name);
            let unit_name = name.clone();
            units.push(Unit {
                kind: ObjectKind::Experiment,
                id: name,
                work: Box::pin(async move {
                    ExperimentExporter::with_options(client, opts)
                        .export_experiment(&unit_name, &dir)
                        .await
                        .map(|manifest| {
                            manifest
                                .failed_run_ids
                                .iter()
                                .map(|id| format!("run {id} failed to export"))
                                .collect()
                        })
                }),
            });
        }
        results.extend(
            execute_units(
                pool_size(self.opts.use_threads, self.opts.max_workers),
                units,
                checkpoint.clone(),
                "export",
            )
            .await,
        );
        self.finish(out, "experiment", results, checkpoint).await
    }

    /// Export every model the selector resolves to under `<out>/models/`, plus
    /// the transitive closure of experiments backing their version runs.
    pub async fn export_models(&self, spec: &str, out: &Path) -> Result<BulkManifest> {
        let names = resolve_models(self.client.as_ref(), spec).await?;
        info!(count = names.len(), "bulk model export planned");
        let checkpoint = self.open_checkpoint(out)?;
        let closure: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));

        let mut results = Vec::new();
        let mut units = Vec::new();
        for name in names {
            let unit_id = format!("export:model:{name}");
            if skip_completed(checkpoint.as_deref(), &unit_id, ObjectKind::Model, &name) {
                results.push(UnitResult::skipped(ObjectKind::Model, &name));
                continue;
            }
            let client = self.client.clone();
            let opts = self.opts.model.clone();
            let dir = model_dir(out, &name);
            let closure = closure.clone();
            let unit_name = name.clone();
            units.push(Unit {
                kind: ObjectKind::Model,
                id: name,
                work: Box::pin(async move {
                    let export = ModelExporter::with_options(client.clone(), opts)
                        .export_model(&unit_name, &dir)
                        .await?;
                    let mut warnings: Vec<String> = export
                        .deleted_run_versions
                        .iter()
                        .map(|v| format!("version {v}: backing run is gone"))
                        .collect();
                    for run_id in &export.run_ids {
                        match client.get_run(run_id).await {
                            Ok(run) => {
                                if let Ok(mut set) = closure.lock() {
                                    set.insert(run.info.experiment_id);
                                }
                            }
                            Err(err) => warnings
                                .push(format!("experiment lookup for run {run_id} failed: {err}")),
                        }
                    }
                    Ok(warnings)
                }),
            });
        }
        let parallelism = pool_size(self.opts.use_threads, self.opts.max_workers);
        results.extend(execute_units(parallelism, units, checkpoint.clone(), "export").await);

        // Experiment closure: the experiments referenced by exported
        // version runs travel with the models.
        let experiment_ids: Vec<String> = closure
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut closure_units = Vec::new();
        for experiment_id in experiment_ids {
            let unit_id = format!("export:experiment:{experiment_id}");
            if skip_completed(
                checkpoint.as_deref(),
                &unit_id,
                ObjectKind::Experiment,
                &experiment_id,
            ) {
                results.push(UnitResult::skipped(ObjectKind::Experiment, &experiment_id));
                continue;
            }
            let client = self.client.clone();
            let opts = self.opts.experiment.clone();
            let dir = experiment_dir(out, &experiment_id);
            let unit_experiment = experiment_id.clone();
            closure_units.push(Unit {
                kind: ObjectKind::Experiment,
                id: experiment_id,
                work: Box::pin(async move {
                    ExperimentExporter::with_options(client, opts)
                        .export_experiment(&unit_experiment, &dir)
                        .await
                        .map(|_| Vec::new())
                }),
            });
        }
        results.extend(execute_units(parallelism, closure_units, checkpoint.clone(), "export").await);
        self.finish(out, "model", results, checkpoint).await
    }

    fn open_checkpoint(&self, root: &Path) -> Result<Option<Arc<CheckpointLog>>> {
        if self.opts.use_checkpoint {
            Ok(Some(Arc::new(CheckpointLog::open(root)?)))
        } else {
            Ok(None)
        }
    }

    async fn finish(
        &self,
        out: &Path,
        what: &str,
        results: Vec<UnitResult>,
        checkpoint: Option<Arc<CheckpointLog>>,
    ) -> Result<BulkManifest> {
        let manifest = BulkManifest::new(results);
        if let Some(checkpoint) = checkpoint {
            checkpoint.flush()?;
        }
        let system = crate::export::source_system_info(self.client.as_ref()).await;
        manifest.write(out, system).await?;
        info!(
            what,
            successful = manifest.successful(),
            failed = manifest.failed(),
            skipped = manifest.skipped(),
            "bulk export finished"
        );
        Ok(manifest)
    }
}

#[derive(Clone, Default)]
pub struct BulkImportOptions {
    pub use_threads: bool,
    pub max_workers: usize,
    /// Resume support: skip units recorded in the input's checkpoint log.
    pub use_checkpoint: bool,
    /// Prefix rewrites applied to destination names, one map per kind.
    pub rename: RenameMaps,
    pub experiment: ExperimentImportOptions,
    pub model: ModelImportOptions,
}

pub struct BulkImporter {
    client: Arc<dyn MlflowClient>,
    opts: BulkImportOptions,
}

impl BulkImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, BulkImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: BulkImportOptions) -> Self {
        Self { client, opts }
    }

    /// Import everything under a bulk export root, experiments first.
    pub async fn import_all(&self, input_root: &Path) -> Result<BulkManifest> {
        let checkpoint = self.open_checkpoint(input_root)?;
        let mut results = self
            .import_experiment_phase(input_root, checkpoint.clone())
            .await?;
        results.extend(
            self.import_model_phase(input_root, checkpoint.clone())
                .await?,
        );
        self.finish(results, checkpoint)
    }

    /// Import only the experiments of a bulk export root.
    pub async fn import_experiments(&self, input_root: &Path) -> Result<BulkManifest> {
        let checkpoint = self.open_checkpoint(input_root)?;
        let results = self
            .import_experiment_phase(input_root, checkpoint.clone())
            .await?;
        self.finish(results, checkpoint)
    }

    /// Import only the models of a bulk export root.
    pub async fn import_models(&self, input_root: &Path) -> Result<BulkManifest> {
        let checkpoint = self.open_checkpoint(input_root)?;
        let results = self
            .import_model_phase(input_root, checkpoint.clone())
            .await?;
        self.finish(results, checkpoint)
    }

    async fn import_experiment_phase(
        &self,
        input_root: &Path,
        checkpoint: Option<Arc<CheckpointLog>>,
    ) -> Result<Vec<UnitResult>> {
        let mut results = Vec::new();
        let mut units = Vec::new();
        for dir in subdirs(&input_root.join(EXPERIMENTS_DIR)).await? {
            // An unreadable envelope fails this unit only; its peers in
            // the same phase still run.
            let envelope = match Envelope::read(&dir.join(EXPERIMENT_FILE)).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    let label = dir_label(&dir);
                    warn!(name = %label, "unreadable experiment envelope: {}", err.summary());
                    results.push(UnitResult::failed(
                        ObjectKind::Experiment,
                        &label,
                        0,
                        err.summary(),
                    ));
                    continue;
                }
            };
            let src_name = envelope.mlflow["experiment"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let dst_name = self.opts.rename.experiments.apply(&src_name);
            let unit_id = format!("import:experiment:{src_name}");
            if skip_completed(checkpoint.as_deref(), &unit_id, ObjectKind::Experiment, &src_name) {
                results.push(UnitResult::skipped(ObjectKind::Experiment, &src_name));
                continue;
            }
            let client = self.client.clone();
            let opts = self.opts.experiment.clone();
            units.push(Unit {
                kind: ObjectKind::Experiment,
                id: src_name,
                work: Box::pin(async move {
                    let import = ExperimentImporter::with_options(client, opts)
                        .import_experiment(&dir, Some(&dst_name))
                        .await?;
                    Ok(import
                        .failed_run_ids
                        .iter()
                        .map(|id| format!("run {id} failed to import"))
                        .collect())
                }),
            });
        }
        results.extend(
            execute_units(
                pool_size(self.opts.use_threads, self.opts.max_workers),
                units,
                checkpoint,
                "import",
            )
            .await,
        );
        Ok(results)
    }

    async fn import_model_phase(
        &self,
        input_root: &Path,
        checkpoint: Option<Arc<CheckpointLog>>,
    ) -> Result<Vec<UnitResult>> {
        let mut results = Vec::new();
        let mut units = Vec::new();
        for dir in subdirs(&input_root.join(MODELS_DIR)).await? {
            let envelope = match Envelope::read(&dir.join(MODEL_FILE)).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    let label = dir_label(&dir);
                    warn!(name = %label, "unreadable model envelope: {}", err.summary());
                    results.push(UnitResult::failed(
                        ObjectKind::Model,
                        &label,
                        0,
                        err.summary(),
                    ));
                    continue;
                }
            };
            let src_name = envelope.mlflow["registered_model"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let dst_name = self.opts.rename.models.apply(&src_name);
            let unit_id = format!("import:model:{src_name}");
            if skip_completed(checkpoint.as_deref(), &unit_id, ObjectKind::Model, &src_name) {
                results.push(UnitResult::skipped(ObjectKind::Model, &src_name));
                continue;
            }
            let client = self.client.clone();
            let opts = self.opts.model.clone();
            units.push(Unit {
                kind: ObjectKind::Model,
                id: src_name,
                work: Box::pin(async move {
                    // Version runs land in an experiment named after the
                    // destination model.
                    let import = ModelImporter::with_options(client, opts)
                        .import_model(&dir, &dst_name, &dst_name)
                        .await?;
                    Ok(import.warnings)
                }),
            });
        }
        results.extend(
            execute_units(
                pool_size(self.opts.use_threads, self.opts.max_workers),
                units,
                checkpoint,
                "import",
            )
            .await,
        );
        Ok(results)
    }

    fn open_checkpoint(&self, root: &Path) -> Result<Option<Arc<CheckpointLog>>> {
        if self.opts.use_checkpoint {
            Ok(Some(Arc::new(CheckpointLog::open(root)?)))
        } else {
            Ok(None)
        }
    }

    fn finish(
        &self,
        results: Vec<UnitResult>,
        checkpoint: Option<Arc<CheckpointLog>>,
    ) -> Result<BulkManifest> {
        let manifest = BulkManifest::new(results);
        if let Some(checkpoint) = checkpoint {
            checkpoint.flush()?;
        }
        info!(
            successful = manifest.successful(),
            failed = manifest.failed(),
            skipped = manifest.skipped(),
            "bulk import finished"
        );
        Ok(manifest)
    }
}

fn skip_completed(
    checkpoint: Option<&CheckpointLog>,
    unit_id: &str,
    kind: ObjectKind,
    name: &str,
) -> bool {
    let completed = checkpoint
        .map(|log| log.is_completed(unit_id))
        .unwrap_or(false);
    if completed {
        info!(kind = %kind, name, "already completed, skipping");
    }
    completed
}

/// Directory basename, used as the unit label when an envelope cannot be
/// read and the real object name is unknown.
fn dir_label(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// Immediate subdirectories, sorted by name. A missing parent is an empty
/// phase, not an error.
async fn subdirs(parent: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = match tokio::fs::read_dir(parent).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(err) => return Err(TransferError::io_with_path(err, parent)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| TransferError::io_with_path(e, parent))?
    {
        if entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false)
        {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bulk_experiment_round_trip() {
        let src = Arc::new(MemoryBackend::new("src"));
        for name in ["exp-a", "exp-b"] {
            let id = src.create_experiment(name, &[]).await.unwrap();
            src.create_run(&id, "u", 0, &[]).await.unwrap();
        }
        let out = TempDir::new().unwrap();
        let manifest = BulkExporter::new(src)
            .export_experiments("all", out.path())
            .await
            .unwrap();
        assert_eq!(manifest.successful(), 2);

        let dst = Arc::new(MemoryBackend::new("dst"));
        let manifest = BulkImporter::new(dst.clone())
            .import_experiments(out.path())
            .await
            .unwrap();
        assert_eq!(manifest.successful(), 2);
        assert!(dst.get_experiment_by_name("exp-a").await.unwrap().is_some());
        assert!(dst.get_experiment_by_name("exp-b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_selective_run_export() {
        let src = Arc::new(MemoryBackend::new("src"));
        let id = src.create_experiment("exp", &[]).await.unwrap();
        let keep = src.create_run(&id, "u", 0, &[]).await.unwrap().info.run_id;
        src.create_run(&id, "u", 0, &[]).await.unwrap();

        let out = TempDir::new().unwrap();
        let selection = BTreeMap::from([("exp".to_string(), vec![keep.clone()])]);
        let manifest = BulkExporter::new(src)
            .export_experiment_runs(&selection, out.path())
            .await
            .unwrap();
        assert_eq!(manifest.successful(), 1);
        let exported = crate::format::ExperimentManifest::read(&experiment_dir(out.path(), "exp"))
            .await
            .unwrap();
        assert_eq!(exported.run_ids, vec![keep]);
    }

    #[tokio::test]
    async fn test_bulk_isolation_one_failure() {
        let src = Arc::new(MemoryBackend::new("src"));
        let id = src.create_experiment("good", &[]).await.unwrap();
        src.create_run(&id, "u", 0, &[]).await.unwrap();
        let out = TempDir::new().unwrap();
        let manifest = BulkExporter::new(src)
            .export_experiments("good,missing", out.path())
            .await
            .unwrap();
        assert_eq!(manifest.successful(), 1);
        assert_eq!(manifest.failed(), 1);
        let failed = manifest
            .objects
            .iter()
            .find(|u| u.error.is_some())
            .unwrap();
        assert_eq!(failed.id, "missing");
    }

    #[tokio::test]
    async fn test_rename_map_applied_on_import() {
        let src = Arc::new(MemoryBackend::new("src"));
        let id = src.create_experiment("/team/exp", &[]).await.unwrap();
        src.create_run(&id, "u", 0, &[]).await.unwrap();
        let out = TempDir::new().unwrap();
        BulkExporter::new(src)
            .export_experiments("all", out.path())
            .await
            .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let mut opts = BulkImportOptions::default();
        opts.rename.experiments = crate::rename::RenameMap::new(
            [("/team".to_string(), "/migrated".to_string())]
                .into_iter()
                .collect(),
        );
        BulkImporter::with_options(dst.clone(), opts)
            .import_all(out.path())
            .await
            .unwrap();
        assert!(dst
            .get_experiment_by_name("/migrated/exp")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_checkpoint_resume_skips_completed_models() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        for i in 0..10 {
            let name = format!("model-{i:02}");
            src.create_registered_model(&name, None, &[]).await.unwrap();
            let run = src.create_run(&experiment_id, "u", 0, &[]).await.unwrap();
            let source = format!("{}/model", run.info.artifact_uri);
            src.create_model_version(&name, &source, &run.info.run_id, None, &[])
                .await
                .unwrap();
        }
        let out = TempDir::new().unwrap();
        BulkExporter::new(src)
            .export_models("model-*", out.path())
            .await
            .unwrap();

        // Simulate a killed first import: 4 units recorded as done.
        {
            let log = CheckpointLog::open(out.path()).unwrap();
            for i in 0..4 {
                log.record(&format!("import:model:model-{i:02}")).unwrap();
            }
            log.close().unwrap();
        }

        let dst = Arc::new(MemoryBackend::new("dst"));
        let opts = BulkImportOptions {
            use_checkpoint: true,
            ..Default::default()
        };
        let manifest = BulkImporter::with_options(dst.clone(), opts)
            .import_models(out.path())
            .await
            .unwrap();
        assert_eq!(manifest.skipped(), 4);
        assert_eq!(manifest.successful(), 6);
        assert_eq!(dst.model_count().await, 6);
    }

    #[tokio::test]
    async fn test_units_record_checkpoint_as_they_complete() {
        let root = TempDir::new().unwrap();
        let checkpoint = Arc::new(CheckpointLog::open(root.path()).unwrap());
        let gate = Arc::new(tokio::sync::Notify::new());
        let release = gate.clone();
        let units = vec![
            Unit {
                kind: ObjectKind::Model,
                id: "fast".to_string(),
                work: Box::pin(async { Ok(Vec::new()) }),
            },
            Unit {
                kind: ObjectKind::Model,
                id: "slow".to_string(),
                work: Box::pin(async move {
                    gate.notified().await;
                    Ok(Vec::new())
                }),
            },
        ];
        let runner = tokio::spawn(execute_units(2, units, Some(checkpoint.clone()), "import"));

        // The finished unit must be recorded while its peer still runs,
        // not batched at the end of the bulk call.
        for _ in 0..200 {
            if checkpoint.is_completed("import:model:fast") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(checkpoint.is_completed("import:model:fast"));
        assert!(!checkpoint.is_completed("import:model:slow"));

        // A flush at this point survives a process kill.
        checkpoint.flush().unwrap();
        let reloaded = CheckpointLog::open(root.path()).unwrap();
        assert!(reloaded.is_completed("import:model:fast"));

        release.notify_one();
        let results = runner.await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(checkpoint.is_completed("import:model:slow"));
    }

    #[tokio::test]
    async fn test_corrupt_envelope_fails_one_unit_only() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        for i in 0..3 {
            let name = format!("model-{i}");
            src.create_registered_model(&name, None, &[]).await.unwrap();
            let run = src.create_run(&experiment_id, "u", 0, &[]).await.unwrap();
            let source = format!("{}/model", run.info.artifact_uri);
            src.create_model_version(&name, &source, &run.info.run_id, None, &[])
                .await
                .unwrap();
        }
        let out = TempDir::new().unwrap();
        BulkExporter::new(src)
            .export_models("all", out.path())
            .await
            .unwrap();
        std::fs::write(
            model_dir(out.path(), "model-1").join(MODEL_FILE),
            b"{ not json",
        )
        .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let manifest = BulkImporter::new(dst.clone())
            .import_models(out.path())
            .await
            .unwrap();
        assert_eq!(manifest.failed(), 1);
        assert_eq!(manifest.successful(), 2);
        let failed = manifest.objects.iter().find(|u| u.error.is_some()).unwrap();
        assert_eq!(failed.id, "model-1");
        assert_eq!(dst.model_count().await, 2);
    }

    #[tokio::test]
    async fn test_model_export_includes_experiment_closure() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("backing", &[]).await.unwrap();
        src.create_registered_model("m", None, &[]).await.unwrap();
        let run = src.create_run(&experiment_id, "u", 0, &[]).await.unwrap();
        let source = format!("{}/model", run.info.artifact_uri);
        src.create_model_version("m", &source, &run.info.run_id, None, &[])
            .await
            .unwrap();

        let out = TempDir::new().unwrap();
        let manifest = BulkExporter::new(src)
            .export_models("all", out.path())
            .await
            .unwrap();
        let kinds: Vec<ObjectKind> = manifest.objects.iter().map(|u| u.kind).collect();
        assert!(kinds.contains(&ObjectKind::Model));
        assert!(kinds.contains(&ObjectKind::Experiment));
        assert!(out
            .path()
            .join(EXPERIMENTS_DIR)
            .join(&experiment_id)
            .join(EXPERIMENT_FILE)
            .exists());
    }
}
