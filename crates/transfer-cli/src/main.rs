//! MLflow Transfer CLI - export, import and copy MLflow objects.
//!
//! This binary is a thin front end over the `mlflow-transfer` engine: one
//! subcommand per single-object and bulk operation. Connection details
//! come from flags or the `MLFLOW_TRACKING_URI_SRC` / `_DST` environment
//! variables; bearer tokens only from `MLFLOW_TRACKING_TOKEN_SRC` / `_DST`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mlflow_transfer::client::ensure_experiment;
use mlflow_transfer::config::EnvConfig;
use mlflow_transfer::export::{
    DatasetExporter, ExperimentExportOptions, ExperimentExporter, LoggedModelExporter,
    ModelExportOptions, ModelExporter, PromptExporter, RunExportOptions, RunExporter, StagesInput,
    TraceExporter,
};
use mlflow_transfer::import::{
    DatasetImportOptions, DatasetImporter, ExperimentImportOptions, ExperimentImporter,
    LoggedModelImportOptions, LoggedModelImporter, ModelImportOptions, ModelImporter,
    PromptImportOptions, PromptImportOutcome, PromptImporter, RunImportOptions, RunImporter,
    TraceImportOptions, TraceImporter,
};
use mlflow_transfer::{
    BulkExportOptions, BulkExporter, BulkImportOptions, BulkImporter, BulkManifest, CopyOptions,
    ModelVersionCopier, RenameMap, RenameMaps, RestClient,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mlflow-transfer")]
#[command(about = "Export, import and copy MLflow objects between tracking servers")]
struct Cli {
    /// Source tracking URI (default: $MLFLOW_TRACKING_URI_SRC)
    #[arg(long, global = true)]
    src_uri: Option<String>,

    /// Destination tracking URI (default: $MLFLOW_TRACKING_URI_DST)
    #[arg(long, global = true)]
    dst_uri: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export one run to a directory
    ExportRun {
        run_id: String,
        out: PathBuf,
        /// Skip the artifact tree (metadata only)
        #[arg(long)]
        skip_artifacts: bool,
    },
    /// Import one exported run into a destination experiment
    ImportRun {
        input: PathBuf,
        /// Destination experiment name (created when missing)
        #[arg(long)]
        experiment: String,
        #[arg(long)]
        import_source_tags: bool,
    },
    /// Export one experiment (by name or ID) with all selected runs
    ExportExperiment {
        experiment: String,
        out: PathBuf,
        /// Export only these runs (comma-separated run IDs)
        #[arg(long, value_delimiter = ',')]
        run_ids: Option<Vec<String>>,
        /// Expand the run selection with transitive child runs
        #[arg(long)]
        check_nested_runs: bool,
        #[arg(long)]
        skip_artifacts: bool,
    },
    /// Import one exported experiment
    ImportExperiment {
        input: PathBuf,
        /// Destination experiment name (default: the source name)
        #[arg(long)]
        experiment: Option<String>,
        #[arg(long)]
        import_source_tags: bool,
    },
    /// Export one registered model with its versions and backing runs
    ExportModel {
        model: String,
        out: PathBuf,
        /// Export only versions in these stages (comma-separated)
        #[arg(long)]
        stages: Option<String>,
        /// Export only these version numbers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        versions: Option<Vec<String>>,
        /// One version per stage instead of every version
        #[arg(long)]
        latest_versions: bool,
        /// Keep versions whose backing run was deleted
        #[arg(long)]
        export_deleted_runs: bool,
        #[arg(long)]
        export_permissions: bool,
        #[arg(long)]
        skip_artifacts: bool,
    },
    /// Import one exported model under a destination name
    ImportModel {
        input: PathBuf,
        /// Destination model name
        #[arg(long)]
        model: String,
        /// Destination experiment for the version runs
        #[arg(long)]
        experiment: String,
        /// Delete a pre-existing destination model first
        #[arg(long)]
        delete_model: bool,
        /// Do not replay stages and aliases
        #[arg(long)]
        skip_stages_and_aliases: bool,
        #[arg(long)]
        import_source_tags: bool,
        #[arg(long)]
        import_permissions: bool,
    },
    /// Export one logged model (MLflow 3+)
    ExportLoggedModel { model_id: String, out: PathBuf },
    /// Import one exported logged model
    ImportLoggedModel {
        input: PathBuf,
        /// Destination experiment name (created when missing)
        #[arg(long)]
        experiment: String,
        /// Link the new logged model to this destination run
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Export one trace with spans and assessments
    ExportTrace { trace_id: String, out: PathBuf },
    /// Import one exported trace
    ImportTrace {
        input: PathBuf,
        #[arg(long)]
        experiment: String,
        /// Drop assessments the destination cannot store
        #[arg(long)]
        skip_unsupported_assessments: bool,
    },
    /// Export one prompt with all its versions
    ExportPrompt { name: String, out: PathBuf },
    /// Import one exported prompt (skipped when the name exists)
    ImportPrompt {
        input: PathBuf,
        /// Delete a pre-existing destination prompt instead of skipping
        #[arg(long)]
        delete_prompt: bool,
        #[arg(long)]
        import_source_tags: bool,
    },
    /// Export one evaluation dataset (by name or ID)
    ExportDataset { dataset: String, out: PathBuf },
    /// Import one exported evaluation dataset (skipped when the name exists)
    ImportDataset {
        input: PathBuf,
        #[arg(long)]
        delete_dataset: bool,
        /// Destination experiment IDs to associate (comma-separated)
        #[arg(long, value_delimiter = ',')]
        experiment_ids: Option<Vec<String>>,
        #[arg(long)]
        import_source_tags: bool,
    },
    /// Export many experiments ("all", a prefix*, a names.txt or a comma list)
    ExportExperiments {
        #[arg(required_unless_present = "runs", conflicts_with = "runs")]
        spec: Option<String>,
        out: PathBuf,
        #[command(flatten)]
        bulk: BulkArgs,
        /// Export only selected runs, `experiment=run1,run2` (repeatable)
        #[arg(long = "runs", value_parser = parse_runs)]
        runs: Vec<(String, Vec<String>)>,
        #[arg(long)]
        skip_artifacts: bool,
    },
    /// Export many models plus the experiments backing their versions
    ExportModels {
        spec: String,
        out: PathBuf,
        #[command(flatten)]
        bulk: BulkArgs,
        #[arg(long)]
        stages: Option<String>,
        #[arg(long)]
        skip_artifacts: bool,
    },
    /// Import a bulk export root, experiments before models
    ImportAll {
        input: PathBuf,
        #[command(flatten)]
        bulk: BulkArgs,
        /// Experiment name prefix rewrites, `src=dst` (repeatable)
        #[arg(long = "rename-experiment", value_parser = parse_rename)]
        rename_experiments: Vec<(String, String)>,
        /// Model name prefix rewrites, `src=dst` (repeatable)
        #[arg(long = "rename-model", value_parser = parse_rename)]
        rename_models: Vec<(String, String)>,
        #[arg(long)]
        import_source_tags: bool,
    },
    /// Copy one model version between backends without an export tree
    CopyModelVersion {
        src_model: String,
        src_version: String,
        dst_model: String,
        /// Destination experiment for the cloned run; omit to reuse the
        /// source run (same server only)
        #[arg(long)]
        experiment: Option<String>,
        #[arg(long)]
        copy_stages_and_aliases: bool,
        /// Do not attach provenance tags
        #[arg(long)]
        skip_lineage_tags: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct BulkArgs {
    /// Run units sequentially instead of on a worker pool
    #[arg(long)]
    serial: bool,

    /// Worker cap (0 = CPU count)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Record finished units and skip them on restart
    #[arg(long)]
    use_checkpoint: bool,
}

fn parse_rename(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((src, dst)) => Ok((src.to_string(), dst.to_string())),
        None => Err(format!("expected src=dst, got {raw:?}")),
    }
}

fn parse_runs(raw: &str) -> std::result::Result<(String, Vec<String>), String> {
    match raw.split_once('=') {
        Some((experiment, runs)) if !runs.is_empty() => Ok((
            experiment.to_string(),
            runs.split(',').map(str::to_string).collect(),
        )),
        _ => Err(format!("expected experiment=run1,run2, got {raw:?}")),
    }
}

fn rename_map(pairs: Vec<(String, String)>) -> RenameMap {
    RenameMap::new(pairs.into_iter().collect::<BTreeMap<_, _>>())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn source_client(cli: &Cli) -> Result<Arc<RestClient>> {
    let uri = cli
        .src_uri
        .clone()
        .or_else(|| env_opt(EnvConfig::SOURCE_TRACKING_URI))
        .with_context(|| {
            format!(
                "no source: pass --src-uri or set {}",
                EnvConfig::SOURCE_TRACKING_URI
            )
        })?;
    Ok(Arc::new(RestClient::new(
        &uri,
        env_opt(EnvConfig::SOURCE_TOKEN),
    )?))
}

fn dest_client(cli: &Cli) -> Result<Arc<RestClient>> {
    let uri = cli
        .dst_uri
        .clone()
        .or_else(|| env_opt(EnvConfig::DEST_TRACKING_URI))
        .with_context(|| {
            format!(
                "no destination: pass --dst-uri or set {}",
                EnvConfig::DEST_TRACKING_URI
            )
        })?;
    Ok(Arc::new(RestClient::new(
        &uri,
        env_opt(EnvConfig::DEST_TOKEN),
    )?))
}

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);
    match env_opt(EnvConfig::LOG_FORMAT).as_deref() {
        Some("full") => builder.init(),
        _ => builder.compact().init(),
    }
}

/// Print bulk counters; a non-empty failure set is the process exit status.
fn report(manifest: &BulkManifest) -> Result<()> {
    println!(
        "successful={} failed={} skipped={}",
        manifest.successful(),
        manifest.failed(),
        manifest.skipped()
    );
    for unit in &manifest.objects {
        for warning in &unit.warnings {
            eprintln!("warning [{} {}]: {warning}", unit.kind, unit.id);
        }
        if let Some(error) = &unit.error {
            eprintln!("failed [{} {}]: {error}", unit.kind, unit.id);
        }
    }
    if manifest.failed() > 0 {
        bail!("{} unit(s) failed", manifest.failed());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::ExportRun {
            run_id,
            out,
            skip_artifacts,
        } => {
            let exporter = RunExporter::with_options(
                source_client(&cli)?,
                RunExportOptions {
                    skip_download_artifacts: *skip_artifacts,
                },
            );
            let run = exporter.export_run(run_id, out).await?;
            info!(run_id = %run.info.run_id, "exported run to {}", out.display());
        }
        Command::ImportRun {
            input,
            experiment,
            import_source_tags,
        } => {
            let client = dest_client(&cli)?;
            let experiment_id = ensure_experiment(client.as_ref(), experiment, &[]).await?;
            let import = RunImporter::with_options(
                client,
                RunImportOptions {
                    import_source_tags: *import_source_tags,
                    ..Default::default()
                },
            )
            .import_run(input, &experiment_id)
            .await?;
            for warning in &import.warnings {
                eprintln!("warning: {warning}");
            }
            println!("{}", import.dst_run_id);
        }
        Command::ExportExperiment {
            experiment,
            out,
            run_ids,
            check_nested_runs,
            skip_artifacts,
        } => {
            let manifest = ExperimentExporter::with_options(
                source_client(&cli)?,
                ExperimentExportOptions {
                    run_ids: run_ids.clone(),
                    check_nested_runs: *check_nested_runs,
                    skip_download_artifacts: *skip_artifacts,
                },
            )
            .export_experiment(experiment, out)
            .await?;
            info!(
                runs = manifest.run_ids.len(),
                failed = manifest.failed_run_ids.len(),
                "exported experiment to {}",
                out.display()
            );
            if !manifest.failed_run_ids.is_empty() {
                bail!("{} run(s) failed to export", manifest.failed_run_ids.len());
            }
        }
        Command::ImportExperiment {
            input,
            experiment,
            import_source_tags,
        } => {
            let import = ExperimentImporter::with_options(
                dest_client(&cli)?,
                ExperimentImportOptions {
                    import_source_tags: *import_source_tags,
                    ..Default::default()
                },
            )
            .import_experiment(input, experiment.as_deref())
            .await?;
            info!(
                experiment_id = %import.dst_experiment_id,
                runs = import.run_map.len(),
                "imported experiment"
            );
            if !import.failed_run_ids.is_empty() {
                bail!("{} run(s) failed to import", import.failed_run_ids.len());
            }
        }
        Command::ExportModel {
            model,
            out,
            stages,
            versions,
            latest_versions,
            export_deleted_runs,
            export_permissions,
            skip_artifacts,
        } => {
            let export = ModelExporter::with_options(
                source_client(&cli)?,
                ModelExportOptions {
                    stages: stages.clone().map(StagesInput::Text),
                    versions: versions.clone().unwrap_or_default(),
                    export_latest_versions: *latest_versions,
                    export_deleted_runs: *export_deleted_runs,
                    export_permissions: *export_permissions,
                    skip_download_artifacts: *skip_artifacts,
                },
            )
            .export_model(model, out)
            .await?;
            info!(
                versions = export.versions.len(),
                "exported model to {}",
                out.display()
            );
        }
        Command::ImportModel {
            input,
            model,
            experiment,
            delete_model,
            skip_stages_and_aliases,
            import_source_tags,
            import_permissions,
        } => {
            let import = ModelImporter::with_options(
                dest_client(&cli)?,
                ModelImportOptions {
                    delete_model: *delete_model,
                    import_stages_and_aliases: !*skip_stages_and_aliases,
                    import_source_tags: *import_source_tags,
                    import_permissions: *import_permissions,
                    ..Default::default()
                },
            )
            .import_model(input, model, experiment)
            .await?;
            for warning in &import.warnings {
                eprintln!("warning: {warning}");
            }
            info!(versions = import.versions.len(), "imported model {model}");
        }
        Command::ExportLoggedModel { model_id, out } => {
            let model = LoggedModelExporter::new(source_client(&cli)?)
                .export_logged_model(model_id, out)
                .await?;
            info!(name = %model.name, "exported logged model to {}", out.display());
        }
        Command::ImportLoggedModel {
            input,
            experiment,
            run_id,
        } => {
            let client = dest_client(&cli)?;
            let experiment_id = ensure_experiment(client.as_ref(), experiment, &[]).await?;
            let model = LoggedModelImporter::with_options(
                client,
                LoggedModelImportOptions {
                    dst_run_id: run_id.clone(),
                    ..Default::default()
                },
            )
            .import_logged_model(input, &experiment_id)
            .await?;
            println!("{}", model.model_id);
        }
        Command::ExportTrace { trace_id, out } => {
            let trace = TraceExporter::new(source_client(&cli)?)
                .export_trace(trace_id, out)
                .await?;
            info!(
                spans = trace.spans.len(),
                "exported trace to {}",
                out.display()
            );
        }
        Command::ImportTrace {
            input,
            experiment,
            skip_unsupported_assessments,
        } => {
            let client = dest_client(&cli)?;
            let experiment_id = ensure_experiment(client.as_ref(), experiment, &[]).await?;
            let trace_id = TraceImporter::with_options(
                client,
                TraceImportOptions {
                    skip_unsupported_assessments: *skip_unsupported_assessments,
                },
            )
            .import_trace(input, &experiment_id)
            .await?;
            println!("{trace_id}");
        }
        Command::ExportPrompt { name, out } => {
            let versions = PromptExporter::new(source_client(&cli)?)
                .export_prompt(name, out)
                .await?;
            info!(
                versions = versions.len(),
                "exported prompt to {}",
                out.display()
            );
        }
        Command::ImportPrompt {
            input,
            delete_prompt,
            import_source_tags,
        } => {
            let outcome = PromptImporter::with_options(
                dest_client(&cli)?,
                PromptImportOptions {
                    delete_prompt: *delete_prompt,
                    import_source_tags: *import_source_tags,
                },
            )
            .import_prompt(input)
            .await?;
            match outcome {
                PromptImportOutcome::Imported { versions } => {
                    info!(versions, "imported prompt");
                }
                PromptImportOutcome::SkippedExisting => {
                    println!("skipped: destination prompt already exists");
                }
            }
        }
        Command::ExportDataset { dataset, out } => {
            let exported = DatasetExporter::new(source_client(&cli)?)
                .export_dataset(dataset, out)
                .await?;
            info!(
                records = exported.records.len(),
                "exported dataset to {}",
                out.display()
            );
        }
        Command::ImportDataset {
            input,
            delete_dataset,
            experiment_ids,
            import_source_tags,
        } => {
            let outcome = DatasetImporter::with_options(
                dest_client(&cli)?,
                DatasetImportOptions {
                    delete_evaluation_dataset: *delete_dataset,
                    import_source_tags: *import_source_tags,
                    dst_experiment_ids: experiment_ids.clone().unwrap_or_default(),
                },
            )
            .import_dataset(input)
            .await?;
            match outcome {
                Some(dataset) => println!("{}", dataset.dataset_id),
                None => println!("skipped: destination dataset already exists"),
            }
        }
        Command::ExportExperiments {
            spec,
            out,
            bulk,
            runs,
            skip_artifacts,
        } => {
            let exporter = BulkExporter::with_options(
                source_client(&cli)?,
                BulkExportOptions {
                    use_threads: !bulk.serial,
                    max_workers: bulk.workers,
                    use_checkpoint: bulk.use_checkpoint,
                    experiment: ExperimentExportOptions {
                        skip_download_artifacts: *skip_artifacts,
                        ..Default::default()
                    },
                    ..Default::default()
                },
            );
            let manifest = match spec {
                Some(spec) => exporter.export_experiments(spec, out).await?,
                None => {
                    let selection: BTreeMap<String, Vec<String>> = runs.iter().cloned().collect();
                    exporter.export_experiment_runs(&selection, out).await?
                }
            };
            report(&manifest)?;
        }
        Command::ExportModels {
            spec,
            out,
            bulk,
            stages,
            skip_artifacts,
        } => {
            let manifest = BulkExporter::with_options(
                source_client(&cli)?,
                BulkExportOptions {
                    use_threads: !bulk.serial,
                    max_workers: bulk.workers,
                    use_checkpoint: bulk.use_checkpoint,
                    experiment: ExperimentExportOptions {
                        skip_download_artifacts: *skip_artifacts,
                        ..Default::default()
                    },
                    model: ModelExportOptions {
                        stages: stages.clone().map(StagesInput::Text),
                        skip_download_artifacts: *skip_artifacts,
                        ..Default::default()
                    },
                },
            )
            .export_models(spec, out)
            .await?;
            report(&manifest)?;
        }
        Command::ImportAll {
            input,
            bulk,
            rename_experiments,
            rename_models,
            import_source_tags,
        } => {
            let manifest = BulkImporter::with_options(
                dest_client(&cli)?,
                BulkImportOptions {
                    use_threads: !bulk.serial,
                    max_workers: bulk.workers,
                    use_checkpoint: bulk.use_checkpoint,
                    rename: RenameMaps {
                        experiments: rename_map(rename_experiments.clone()),
                        models: rename_map(rename_models.clone()),
                    },
                    experiment: ExperimentImportOptions {
                        import_source_tags: *import_source_tags,
                        ..Default::default()
                    },
                    model: ModelImportOptions {
                        import_source_tags: *import_source_tags,
                        ..Default::default()
                    },
                },
            )
            .import_all(input)
            .await?;
            report(&manifest)?;
        }
        Command::CopyModelVersion {
            src_model,
            src_version,
            dst_model,
            experiment,
            copy_stages_and_aliases,
            skip_lineage_tags,
        } => {
            let src = source_client(&cli)?;
            // Same-server copies may omit the destination endpoint.
            let dst = match dest_client(&cli) {
                Ok(dst) => dst,
                Err(_) => src.clone(),
            };
            let copy = ModelVersionCopier::with_options(
                src,
                dst,
                CopyOptions {
                    copy_stages_and_aliases: *copy_stages_and_aliases,
                    copy_lineage_tags: !*skip_lineage_tags,
                },
            )
            .copy_model_version(src_model, src_version, dst_model, experiment.as_deref())
            .await?;
            println!("{}/{}", dst_model, copy.dst_version.version);
        }
    }
    Ok(())
}
