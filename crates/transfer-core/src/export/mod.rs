//! Single-object exporters.
//!
//! Each exporter serializes one object kind into the transfer format:
//! exactly one JSON envelope plus any artifact tree. A not-found on the
//! root object propagates as a typed error; bulk callers catch it per
//! unit.

mod dataset;
mod experiment;
mod logged_model;
mod model;
mod prompt;
mod run;
mod trace;

pub use dataset::{DatasetExporter, DATASET_FILE};
pub use experiment::{ExperimentExportOptions, ExperimentExporter};
pub use logged_model::{LoggedModelExporter, LOGGED_MODEL_FILE};
pub use model::{ModelExportOptions, ModelExporter, StagesInput};
pub use prompt::{PromptExporter, PROMPT_FILE};
pub use run::{RunExportOptions, RunExporter};
pub use trace::{TraceExporter, TRACE_FILE};

use crate::client::MlflowClient;
use crate::format::SystemInfo;
use tracing::warn;

/// Provenance block for envelopes written against `client`. A failed
/// version probe degrades to `unknown` rather than failing the export.
pub(crate) async fn source_system_info(client: &dyn MlflowClient) -> SystemInfo {
    let version = match client.server_version().await {
        Ok(version) => version,
        Err(err) => {
            warn!("source version probe failed: {err}");
            "unknown".to_string()
        }
    };
    SystemInfo::new(&version, client.tracking_uri())
}
