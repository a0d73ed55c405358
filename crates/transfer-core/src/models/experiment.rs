//! Experiment entity.

use super::run::KeyValue;
use serde::{Deserialize, Serialize};

/// A named container for runs. Created on demand during import if the
/// destination has no experiment of the same (possibly renamed) name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub artifact_location: String,
    #[serde(default = "default_lifecycle_stage")]
    pub lifecycle_stage: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<i64>,
}

fn default_lifecycle_stage() -> String {
    "active".to_string()
}

impl Experiment {
    /// The experiment description, stored as the `mlflow.note.content` tag.
    pub fn description(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == crate::config::TagsConfig::NOTE_CONTENT)
            .map(|t| t.value.as_str())
    }
}
