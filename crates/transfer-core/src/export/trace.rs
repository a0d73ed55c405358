//! Trace exporter: one `trace.json` per trace, spans and assessments
//! included.

use super::source_system_info;
use crate::client::MlflowClient;
use crate::error::{Result, TransferError};
use crate::format::Envelope;
use crate::models::TraceData;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const TRACE_FILE: &str = "trace.json";

pub struct TraceExporter {
    client: Arc<dyn MlflowClient>,
}

impl TraceExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self { client }
    }

    pub async fn export_trace(&self, trace_id: &str, out_dir: &Path) -> Result<TraceData> {
        let trace = self.client.get_trace(trace_id).await?;
        if trace.root_span().is_none() && !trace.spans.is_empty() {
            return Err(TransferError::Incompatible {
                message: format!("trace {trace_id} has spans but no root span"),
            });
        }
        let envelope = Envelope::new(
            source_system_info(self.client.as_ref()).await,
            json!({
                "num_spans": trace.spans.len(),
                "num_assessments": trace.assessments.len(),
            }),
            json!({ "trace": trace }),
        );
        envelope.write(&out_dir.join(TRACE_FILE)).await?;
        info!(trace_id, spans = trace.spans.len(), "exported trace");
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::models::{Span, SpanStatus, TraceState};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn span(id: &str, parent: Option<&str>) -> Span {
        Span {
            span_id: id.to_string(),
            parent_span_id: parent.map(str::to_string),
            name: id.to_string(),
            span_type: "CHAIN".to_string(),
            start_time_ns: 10,
            end_time_ns: 20,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_export_trace_with_spans() {
        let src = Arc::new(MemoryBackend::new("src"));
        let experiment_id = src.create_experiment("exp", &[]).await.unwrap();
        let trace_id = src
            .start_trace(&experiment_id, 100, &BTreeMap::new(), &[])
            .await
            .unwrap();
        let root = src
            .start_span(&trace_id, None, &span("s", None))
            .await
            .unwrap();
        src.start_span(&trace_id, Some(&root), &span("c", Some("s")))
            .await
            .unwrap();
        src.end_trace(&trace_id, TraceState::Ok, 5).await.unwrap();

        let out = TempDir::new().unwrap();
        let trace = TraceExporter::new(src)
            .export_trace(&trace_id, out.path())
            .await
            .unwrap();
        assert_eq!(trace.spans.len(), 2);
        let envelope = Envelope::read(&out.path().join(TRACE_FILE)).await.unwrap();
        assert_eq!(envelope.info["num_spans"], 2);
    }
}
