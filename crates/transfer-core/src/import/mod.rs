//! Single-object importers.
//!
//! Symmetric to the exporters: read the envelope, probe the destination
//! for required features, ensure the target container, create the
//! destination object, then rebind embedded references. Destination
//! objects always get fresh IDs.

mod dataset;
mod experiment;
mod logged_model;
mod model;
mod prompt;
mod run;
mod trace;

pub use dataset::{DatasetImportOptions, DatasetImporter};
pub use experiment::{ExperimentImport, ExperimentImportOptions, ExperimentImporter};
pub use logged_model::{LoggedModelImportOptions, LoggedModelImporter};
pub use model::{ModelImport, ModelImportOptions, ModelImporter};
pub use prompt::{PromptImportOptions, PromptImportOutcome, PromptImporter};
pub use run::{RunImport, RunImportOptions, RunImporter};
pub use trace::{TraceImportOptions, TraceImporter};

use crate::client::MlflowClient;
use crate::compat::{warn_on_version_skew, BackendVersion};
use crate::config::{SearchConfig, TagsConfig};
use crate::error::Result;
use crate::format::Envelope;
use crate::models::{KeyValue, Metric, Param};
use tracing::warn;

/// Probe the destination backend version. A failed probe degrades to
/// `None`: feature checks are skipped and the backend's own errors
/// surface instead.
pub(crate) async fn destination_version(client: &dyn MlflowClient) -> Option<BackendVersion> {
    match client.server_version().await {
        Ok(raw) => match BackendVersion::parse(&raw) {
            Ok(version) => Some(version),
            Err(err) => {
                warn!("destination version {raw:?} unparseable: {err}");
                None
            }
        },
        Err(err) => {
            warn!("destination version probe failed: {err}");
            None
        }
    }
}

/// Compare the envelope's recorded source version against the destination
/// and warn on major skew.
pub(crate) fn check_version_skew(envelope: &Envelope, destination: Option<&BackendVersion>) {
    let Ok(source) = BackendVersion::parse(envelope.source_version()) else {
        return;
    };
    if let Some(destination) = destination {
        warn_on_version_skew(&source, destination);
    }
}

/// Destination tags for an imported object. Source tags are carried
/// verbatim; with `import_source_tags` the source's identifying fields
/// and its `mlflow.*` tags are additionally preserved under the
/// `mlflow_exim.src.` namespace.
pub(crate) fn build_import_tags(
    tags: &[KeyValue],
    import_source_tags: bool,
    source_fields: &[(&str, &str)],
) -> Vec<KeyValue> {
    let mut out = tags.to_vec();
    if import_source_tags {
        for (field, value) in source_fields {
            out.push(KeyValue::new(
                format!("{}{field}", TagsConfig::SOURCE_TAG_PREFIX),
                *value,
            ));
        }
        for tag in tags {
            if tag.key.starts_with(TagsConfig::MLFLOW_TAG_PREFIX) {
                out.push(KeyValue::new(
                    format!("{}{}", TagsConfig::SOURCE_TAG_PREFIX, tag.key),
                    tag.value.clone(),
                ));
            }
        }
    }
    out
}

/// Replay metrics and params through `log_batch`, honoring the per-call
/// entity limits.
pub(crate) async fn log_batched(
    client: &dyn MlflowClient,
    run_id: &str,
    metrics: &[Metric],
    params: &[Param],
) -> Result<()> {
    for chunk in params.chunks(SearchConfig::LOG_BATCH_PARAMS_LIMIT) {
        client.log_batch(run_id, &[], chunk, &[]).await?;
    }
    for chunk in metrics.chunks(SearchConfig::LOG_BATCH_LIMIT) {
        client.log_batch(run_id, chunk, &[], &[]).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_namespace() {
        let tags = vec![
            KeyValue::new("my_tag", "v"),
            KeyValue::new("mlflow.user", "alice"),
        ];
        let out = build_import_tags(&tags, true, &[("run_id", "abc")]);
        assert!(out.contains(&KeyValue::new("my_tag", "v")));
        assert!(out.contains(&KeyValue::new("mlflow_exim.src.run_id", "abc")));
        assert!(out.contains(&KeyValue::new("mlflow_exim.src.mlflow.user", "alice")));
    }

    #[test]
    fn test_no_namespace_without_flag() {
        let tags = vec![KeyValue::new("mlflow.user", "alice")];
        let out = build_import_tags(&tags, false, &[("run_id", "abc")]);
        assert_eq!(out, tags);
    }
}
