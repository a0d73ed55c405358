//! Manifest files written at export roots.

use super::envelope::{Envelope, SystemInfo};
use super::layout::MANIFEST_FILE;
use crate::error::Result;
use crate::models::ObjectKind;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of one single-object export or import unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub kind: ObjectKind,
    pub id: String,
    pub status: UnitStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl UnitResult {
    pub fn succeeded(kind: ObjectKind, id: &str, duration_ms: u64) -> Self {
        Self {
            kind,
            id: id.to_string(),
            status: UnitStatus::Succeeded,
            duration_ms,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(kind: ObjectKind, id: &str, duration_ms: u64, error: String) -> Self {
        Self {
            kind,
            id: id.to_string(),
            status: UnitStatus::Failed,
            duration_ms,
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    pub fn skipped(kind: ObjectKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            status: UnitStatus::Skipped,
            duration_ms: 0,
            error: None,
            warnings: Vec::new(),
        }
    }
}

/// Root manifest of a bulk export or import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkManifest {
    pub objects: Vec<UnitResult>,
}

impl BulkManifest {
    pub fn new(objects: Vec<UnitResult>) -> Self {
        Self { objects }
    }

    pub fn successful(&self) -> usize {
        self.count(UnitStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(UnitStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(UnitStatus::Skipped)
    }

    fn count(&self, status: UnitStatus) -> usize {
        self.objects.iter().filter(|o| o.status == status).count()
    }

    /// Write `manifest.json` under `root`.
    pub async fn write(&self, root: &Path, system: SystemInfo) -> Result<()> {
        let info = json!({
            "successful": self.successful(),
            "failed": self.failed(),
            "skipped": self.skipped(),
        });
        let envelope = Envelope::new(system, info, serde_json::to_value(self)?);
        envelope.write(&root.join(MANIFEST_FILE)).await
    }

    pub async fn read(root: &Path) -> Result<Self> {
        let envelope = Envelope::read(&root.join(MANIFEST_FILE)).await?;
        Ok(serde_json::from_value(envelope.mlflow)?)
    }
}

/// Per-experiment manifest listing the run IDs exported beneath it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentManifest {
    pub experiment_id: String,
    pub run_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_run_ids: Vec<String>,
}

impl ExperimentManifest {
    pub async fn write(&self, experiment_dir: &Path, system: SystemInfo) -> Result<()> {
        let info = json!({
            "num_runs": self.run_ids.len(),
            "num_failed_runs": self.failed_run_ids.len(),
        });
        let envelope = Envelope::new(system, info, serde_json::to_value(self)?);
        envelope.write(&experiment_dir.join(MANIFEST_FILE)).await
    }

    pub async fn read(experiment_dir: &Path) -> Result<Self> {
        let envelope = Envelope::read(&experiment_dir.join(MANIFEST_FILE)).await?;
        Ok(serde_json::from_value(envelope.mlflow)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bulk_manifest_counters() {
        let dir = TempDir::new().unwrap();
        let manifest = BulkManifest::new(vec![
            UnitResult::succeeded(ObjectKind::Run, "r1", 10),
            UnitResult::failed(ObjectKind::Run, "r2", 5, "boom".to_string()),
            UnitResult::skipped(ObjectKind::Prompt, "p1"),
        ]);
        manifest
            .write(dir.path(), SystemInfo::new("3.4.0", "mem://src"))
            .await
            .unwrap();

        let back = BulkManifest::read(dir.path()).await.unwrap();
        assert_eq!(back.successful(), 1);
        assert_eq!(back.failed(), 1);
        assert_eq!(back.skipped(), 1);
        assert_eq!(back.objects[1].error.as_deref(), Some("boom"));
    }
}
