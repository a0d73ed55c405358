//! Entity types for the MLflow object graph.
//!
//! These mirror the wire shapes of the tracking and registry services
//! closely enough to serialize into export envelopes unchanged. All
//! timestamps are milliseconds since epoch unless a field name says
//! otherwise.

mod artifact;
mod dataset;
mod experiment;
mod logged_model;
mod prompt;
mod registry;
mod run;
mod trace;

pub use artifact::ArtifactInfo;
pub use dataset::{DatasetRecord, EvaluationDataset};
pub use experiment::Experiment;
pub use logged_model::{LoggedModel, LoggedModelStatus};
pub use prompt::{Prompt, PromptVersion};
pub use registry::{ModelVersion, RegisteredModel, Stage};
pub use run::{DatasetInput, KeyValue, Metric, Param, Run, RunData, RunInfo, RunStatus};
pub use trace::{Assessment, Span, SpanStatus, TraceData, TraceInfo, TraceState};

/// The object kinds the engine can move between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Experiment,
    Run,
    Model,
    Version,
    LoggedModel,
    Trace,
    Prompt,
    Dataset,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Experiment => "experiment",
            ObjectKind::Run => "run",
            ObjectKind::Model => "model",
            ObjectKind::Version => "version",
            ObjectKind::LoggedModel => "logged_model",
            ObjectKind::Trace => "trace",
            ObjectKind::Prompt => "prompt",
            ObjectKind::Dataset => "dataset",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
