//! Trace importer: recreates the span tree parent-first and rebinds
//! assessments to the new span IDs.

use super::{check_version_skew, destination_version};
use crate::client::MlflowClient;
use crate::compat::Feature;
use crate::error::Result;
use crate::export::TRACE_FILE;
use crate::format::Envelope;
use crate::models::TraceData;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct TraceImportOptions {
    /// Drop assessments instead of failing when the destination predates
    /// them.
    pub skip_unsupported_assessments: bool,
}

pub struct TraceImporter {
    client: Arc<dyn MlflowClient>,
    opts: TraceImportOptions,
}

impl TraceImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, TraceImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: TraceImportOptions) -> Self {
        Self { client, opts }
    }

    /// Import one exported trace into `dst_experiment_id`, returning the
    /// destination trace ID.
    pub async fn import_trace(&self, input_dir: &Path, dst_experiment_id: &str) -> Result<String> {
        let envelope = Envelope::read(&input_dir.join(TRACE_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        if let Some(version) = &dst_version {
            version.require(Feature::Traces)?;
        }
        check_version_skew(&envelope, dst_version.as_ref());
        let trace: TraceData = serde_json::from_value(envelope.mlflow["trace"].clone())?;

        let dst_trace_id = self
            .client
            .start_trace(
                dst_experiment_id,
                trace.info.timestamp_ms,
                &trace.info.trace_metadata,
                &trace.info.tags,
            )
            .await?;

        // src_span_id -> dst_span_id, grown parent-first.
        let mut span_map: BTreeMap<String, String> = BTreeMap::new();
        if !trace.spans.is_empty() {
            for span in crate::rewrite::span_import_order(&trace.spans)? {
                let dst_parent = span
                    .parent_span_id
                    .as_deref()
                    .map(|p| span_map[p].clone());
                let dst_span_id = self
                    .client
                    .start_span(&dst_trace_id, dst_parent.as_deref(), span)
                    .await?;
                self.client
                    .end_span(&dst_trace_id, &dst_span_id, span.status, span.end_time_ns)
                    .await?;
                span_map.insert(span.span_id.clone(), dst_span_id);
            }
        }

        if !trace.assessments.is_empty() {
            let supported = dst_version
                .as_ref()
                .map(|v| v.supports(Feature::Assessments))
                .unwrap_or(true);
            if !supported && self.opts.skip_unsupported_assessments {
                warn!(dst_trace_id, "destination predates assessments, dropping");
            } else {
                for assessment in &trace.assessments {
                    let mut assessment = assessment.clone();
                    assessment.assessment_id = None;
                    if let Some(span_id) = &assessment.span_id {
                        assessment.span_id = span_map.get(span_id).cloned();
                    }
                    self.client
                        .log_assessment(&dst_trace_id, &assessment)
                        .await?;
                }
            }
        }

        self.client
            .end_trace(
                &dst_trace_id,
                trace.info.state,
                trace.info.execution_time_ms,
            )
            .await?;
        info!(
            src_trace_id = %trace.info.trace_id,
            dst_trace_id,
            spans = trace.spans.len(),
            "imported trace"
        );
        Ok(dst_trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::export::TraceExporter;
    use crate::models::{Assessment, Span, SpanStatus, TraceState};
    use serde_json::json;
    use tempfile::TempDir;

    fn span(id: &str, parent: Option<&str>) -> Span {
        Span {
            span_id: id.to_string(),
            parent_span_id: parent.map(str::to_string),
            name: id.to_string(),
            span_type: "CHAIN".to_string(),
            start_time_ns: 100,
            end_time_ns: 200,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_span_tree_and_assessment_rebinding() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let trace_id = src
            .start_trace(&experiment_id, 1000, &BTreeMap::new(), &[])
            .await
            .unwrap();
        let root = src
            .start_span(&trace_id, None, &span("r", None))
            .await
            .unwrap();
        let child = src
            .start_span(&trace_id, Some(&root), &span("c", Some("r")))
            .await
            .unwrap();
        src.log_assessment(
            &trace_id,
            &Assessment {
                assessment_id: None,
                name: "quality".to_string(),
                span_id: Some(child.clone()),
                value: json!(0.9),
                rationale: None,
                source: None,
            },
        )
        .await
        .unwrap();
        src.end_trace(&trace_id, TraceState::Ok, 42).await.unwrap();

        let out = TempDir::new().unwrap();
        TraceExporter::new(src)
            .export_trace(&trace_id, out.path())
            .await
            .unwrap();

        let dst = Arc::new(MemoryBackend::new("dst"));
        let dst_experiment = dst.create_experiment("imported", &[]).await.unwrap();
        let dst_trace_id = TraceImporter::new(dst.clone())
            .import_trace(out.path(), &dst_experiment)
            .await
            .unwrap();

        let dst_trace = dst.get_trace(&dst_trace_id).await.unwrap();
        assert_eq!(dst_trace.spans.len(), 2);
        let dst_root = dst_trace.root_span().unwrap();
        let dst_child = dst_trace
            .spans
            .iter()
            .find(|s| s.parent_span_id.is_some())
            .unwrap();
        assert_eq!(
            dst_child.parent_span_id.as_deref(),
            Some(dst_root.span_id.as_str())
        );
        assert_eq!(dst_trace.assessments.len(), 1);
        assert_eq!(
            dst_trace.assessments[0].span_id.as_deref(),
            Some(dst_child.span_id.as_str())
        );
    }
}
