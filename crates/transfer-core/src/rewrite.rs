//! Reference rewriting on the import path.
//!
//! Imported objects get fresh identifiers, so every embedded source
//! reference has to be rebound: model version sources to the destination
//! run's artifact root, MLmodel descriptors to the destination run ID,
//! parent-run tags to the destination parent, span parents to destination
//! span IDs.

use crate::client::{list_artifacts_recursive, MlflowClient};
use crate::config::TagsConfig;
use crate::error::{Result, TransferError};
use crate::models::Span;
use serde_yaml::Value as YamlValue;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tracing::{debug, warn};

/// URI schemes whose path joins may have picked up DOS backslashes.
const CLOUD_SCHEMES: &[&str] = &["dbfs:", "s3:", "gs:", "wasbs:", "abfss:", "mlflow-artifacts:"];

/// The run-relative model artifact path embedded in a version's `source`
/// URI. The `artifacts/` segment is authoritative; a source with no such
/// segment points at the run's artifact root and yields the empty path.
pub fn model_artifact_path(source: &str) -> String {
    let mut source = source.to_string();
    if CLOUD_SCHEMES.iter().any(|s| source.starts_with(s)) {
        source = source.replace('\\', "/");
    }
    match source.find("artifacts/") {
        Some(idx) => source[idx + "artifacts/".len()..]
            .trim_matches('/')
            .to_string(),
        None => String::new(),
    }
}

/// The destination version's `source`: the new run's artifact root joined
/// with the preserved model artifact path.
pub fn destination_source(dst_artifact_uri: &str, model_path: &str) -> String {
    let root = dst_artifact_uri.trim_end_matches('/');
    if model_path.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{model_path}")
    }
}

/// Identifier fields of a logged-model MLmodel descriptor.
#[derive(Debug, Clone)]
pub struct LoggedModelIds {
    pub model_id: String,
    pub model_uuid: String,
    pub artifact_path: String,
}

/// Patch every MLmodel descriptor in a destination run's artifact tree so
/// its embedded `run_id` (and logged-model identifiers, when given) match
/// the destination. Each descriptor is downloaded, edited as YAML, and
/// uploaded back to its original subpath.
pub async fn rewrite_mlmodel_artifacts(
    client: &dyn MlflowClient,
    dst_run_id: &str,
    logged_model: Option<&LoggedModelIds>,
) -> Result<()> {
    let descriptors: Vec<String> = list_artifacts_recursive(client, dst_run_id)
        .await?
        .into_iter()
        .filter(|info| info.basename() == "MLmodel")
        .map(|info| info.path)
        .collect();
    if descriptors.is_empty() {
        return Ok(());
    }
    let staging = tempfile::tempdir().map_err(|e| TransferError::io_with_path(e, "."))?;
    for artifact_path in descriptors {
        debug!(run_id = dst_run_id, path = %artifact_path, "rewriting MLmodel");
        let local = client
            .download_artifacts(dst_run_id, &artifact_path, staging.path())
            .await?;
        patch_mlmodel_file(&local, Some(dst_run_id), logged_model).await?;
        let parent = artifact_parent(&artifact_path);
        client
            .log_artifact(dst_run_id, &local, parent.as_deref())
            .await?;
    }
    Ok(())
}

fn artifact_parent(path: &str) -> Option<String> {
    path.rsplit_once('/').map(|(parent, _)| parent.to_string())
}

/// Patch every MLmodel descriptor under a local directory in place. Used
/// before uploading a staged artifact tree whose destination IDs are
/// already known.
pub async fn patch_mlmodel_tree(
    dir: &Path,
    dst_run_id: Option<&str>,
    logged_model: Option<&LoggedModelIds>,
) -> Result<()> {
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && entry.file_name() == "MLmodel" {
            patch_mlmodel_file(entry.path(), dst_run_id, logged_model).await?;
        }
    }
    Ok(())
}

async fn patch_mlmodel_file(
    local: &Path,
    dst_run_id: Option<&str>,
    logged_model: Option<&LoggedModelIds>,
) -> Result<()> {
    let text = tokio::fs::read_to_string(local)
        .await
        .map_err(|e| TransferError::io_with_path(e, local))?;
    let mut doc: YamlValue = serde_yaml::from_str(&text).map_err(|e| TransferError::Yaml {
        context: format!("MLmodel at {}", local.display()),
        message: e.to_string(),
    })?;
    if let Some(map) = doc.as_mapping_mut() {
        if let Some(run_id) = dst_run_id {
            set_if_present(map, "run_id", run_id);
        }
        if let Some(ids) = logged_model {
            set_if_present(map, "model_id", &ids.model_id);
            set_if_present(map, "model_uuid", &ids.model_uuid);
            set_if_present(map, "artifact_path", &ids.artifact_path);
        }
    } else {
        warn!(path = %local.display(), "MLmodel is not a mapping, leaving unchanged");
        return Ok(());
    }
    let out = serde_yaml::to_string(&doc).map_err(|e| TransferError::Yaml {
        context: format!("MLmodel at {}", local.display()),
        message: e.to_string(),
    })?;
    tokio::fs::write(local, out)
        .await
        .map_err(|e| TransferError::io_with_path(e, local))?;
    Ok(())
}

fn set_if_present(map: &mut serde_yaml::Mapping, key: &str, value: &str) {
    let key = YamlValue::String(key.to_string());
    if map.contains_key(&key) {
        map.insert(key, YamlValue::String(value.to_string()));
    }
}

/// Rebind `mlflow.parentRunId` tags on destination runs after a batch of
/// runs has been imported. `run_map` is {src_run_id -> dst_run_id}; parents
/// outside the map are left alone.
pub async fn remap_parent_runs(
    client: &dyn MlflowClient,
    run_map: &BTreeMap<String, String>,
) -> Result<()> {
    for dst_run_id in run_map.values() {
        let run = client.get_run(dst_run_id).await?;
        let Some(parent) = run.tag(TagsConfig::PARENT_RUN_ID) else {
            continue;
        };
        if let Some(dst_parent) = run_map.get(parent) {
            client
                .set_tag(dst_run_id, TagsConfig::PARENT_RUN_ID, dst_parent)
                .await?;
        }
    }
    Ok(())
}

/// Order spans parent-before-child for re-creation. BFS from the root over
/// the parent->children adjacency; spans whose parent is missing from the
/// set are unreachable and reported as an error.
pub fn span_import_order(spans: &[Span]) -> Result<Vec<&Span>> {
    let root = spans
        .iter()
        .find(|s| s.parent_span_id.is_none())
        .ok_or_else(|| TransferError::Incompatible {
            message: "trace has no root span".to_string(),
        })?;
    let mut children: BTreeMap<&str, Vec<&Span>> = BTreeMap::new();
    for span in spans {
        if let Some(parent) = span.parent_span_id.as_deref() {
            children.entry(parent).or_default().push(span);
        }
    }
    let mut order = Vec::with_capacity(spans.len());
    let mut queue = VecDeque::from([root]);
    while let Some(span) = queue.pop_front() {
        order.push(span);
        if let Some(kids) = children.get(span.span_id.as_str()) {
            queue.extend(kids.iter().copied());
        }
    }
    if order.len() != spans.len() {
        return Err(TransferError::Incompatible {
            message: format!(
                "{} of {} spans unreachable from the root",
                spans.len() - order.len(),
                spans.len()
            ),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpanStatus;

    fn span(id: &str, parent: Option<&str>) -> Span {
        Span {
            span_id: id.to_string(),
            parent_span_id: parent.map(str::to_string),
            name: id.to_string(),
            span_type: String::new(),
            start_time_ns: 0,
            end_time_ns: 1,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_model_path_after_marker() {
        assert_eq!(
            model_artifact_path("mlflow-artifacts:/1/abc/artifacts/model"),
            "model"
        );
        assert_eq!(
            model_artifact_path("s3://bucket/5/def/artifacts/nested/flavor"),
            "nested/flavor"
        );
    }

    #[test]
    fn test_model_path_run_root() {
        assert_eq!(model_artifact_path("s3://bucket/5/def/artifacts"), "");
        assert_eq!(model_artifact_path("file:///tmp/no-marker/model"), "");
    }

    #[test]
    fn test_model_path_normalizes_backslashes_for_cloud_schemes() {
        assert_eq!(
            model_artifact_path("dbfs:/exp\\run\\artifacts/model\\sub"),
            "model/sub"
        );
        // Local Windows paths keep their separators.
        assert_eq!(model_artifact_path("C:\\runs\\artifacts\\model"), "");
    }

    #[test]
    fn test_destination_source_join() {
        assert_eq!(
            destination_source("mem://e/r/artifacts/", "model"),
            "mem://e/r/artifacts/model"
        );
        assert_eq!(destination_source("mem://e/r/artifacts", ""), "mem://e/r/artifacts");
    }

    #[test]
    fn test_span_order_parent_first() {
        let spans = vec![
            span("c1", Some("root")),
            span("root", None),
            span("c2", Some("root")),
            span("g1", Some("c1")),
        ];
        let order = span_import_order(&spans).unwrap();
        let ids: Vec<&str> = order.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids[0], "root");
        let pos = |id: &str| ids.iter().position(|x| *x == id).unwrap();
        assert!(pos("c1") < pos("g1"));
    }

    #[test]
    fn test_span_order_rejects_orphans() {
        let spans = vec![span("root", None), span("lost", Some("missing"))];
        assert!(span_import_order(&spans).is_err());
    }
}
