//! Logged model entity (MLflow 3+).

use super::run::{KeyValue, Metric, Param};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggedModelStatus {
    Pending,
    Ready,
    Failed,
}

/// A first-class model object, independent of any single run. Carries its
/// own artifact tree rooted at an MLmodel descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedModel {
    pub model_id: String,
    pub name: String,
    pub experiment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_run_id: Option<String>,
    pub status: LoggedModelStatus,
    #[serde(default)]
    pub artifact_location: String,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Metrics annotated with `dataset_name`/`dataset_digest`.
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,
}
