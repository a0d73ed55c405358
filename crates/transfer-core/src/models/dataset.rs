//! Evaluation dataset entities (MLflow 3.4+, SQL backends only).

use super::run::KeyValue;
use serde::{Deserialize, Serialize};

/// One input/target record of an evaluation dataset. Kept as free-form
/// JSON; the engine never interprets record contents.
pub type DatasetRecord = serde_json::Value;

/// A named collection of evaluation records, optionally associated with
/// experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationDataset {
    pub dataset_id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(default)]
    pub records: Vec<DatasetRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub experiment_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}
