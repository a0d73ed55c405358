//! The JSON envelope every exported file carries.
//!
//! Readers consume only the `mlflow` section. `system` records provenance
//! for the compatibility probe and `info` records per-export counters and
//! the options the export ran with.

use crate::config::EngineConfig;
use crate::error::{Result, TransferError};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Provenance block written at export time. Advisory for readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub tool_name: String,
    pub tool_version: String,
    pub export_time: i64,
    #[serde(rename = "_export_time")]
    pub export_time_utc: String,
    pub source_backend_version: String,
    pub source_tracking_uri: String,
    pub platform: String,
    pub user: String,
}

impl SystemInfo {
    pub fn new(source_backend_version: &str, source_tracking_uri: &str) -> Self {
        let now = Utc::now();
        Self {
            tool_name: EngineConfig::TOOL_NAME.to_string(),
            tool_version: EngineConfig::TOOL_VERSION.to_string(),
            export_time: now.timestamp_millis(),
            export_time_utc: format_utc(now.timestamp_millis()),
            source_backend_version: source_backend_version.to_string(),
            source_tracking_uri: source_tracking_uri.to_string(),
            platform: std::env::consts::OS.to_string(),
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// One exported file: `{ system, info, mlflow }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub system: SystemInfo,
    #[serde(default)]
    pub info: Value,
    pub mlflow: Value,
}

impl Envelope {
    pub fn new(system: SystemInfo, info: Value, mut mlflow: Value) -> Self {
        mirror_timestamps(&mut mlflow);
        Self {
            system,
            info,
            mlflow,
        }
    }

    /// Write as strict JSON to `path`, creating parent directories.
    pub async fn write(&self, path: &Path) -> Result<()> {
        write_json(path, &serde_json::to_value(self)?).await
    }

    /// Read an envelope back. Fails with a typed error when the file is
    /// missing or the top-level sections are absent.
    pub async fn read(path: &Path) -> Result<Self> {
        let value = read_json(path).await?;
        serde_json::from_value(value).map_err(|e| TransferError::Json {
            message: format!("malformed envelope at {}: {e}", path.display()),
            source: Some(e),
        })
    }

    /// The backend version recorded at export time.
    pub fn source_version(&self) -> &str {
        &self.system.source_backend_version
    }
}

/// Timestamp keys that get a `_<key>` human-readable sibling.
const TIMESTAMP_KEYS: &[&str] = &[
    "start_time",
    "end_time",
    "export_time",
    "timestamp",
    "timestamp_ms",
    "creation_timestamp",
    "last_updated_timestamp",
];

/// Recursively insert a formatted UTC string next to every known
/// millisecond-epoch field. Existing `_` keys are overwritten.
pub fn mirror_timestamps(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mirrors: Vec<(String, i64)> = map
                .iter()
                .filter_map(|(key, v)| {
                    if TIMESTAMP_KEYS.contains(&key.as_str()) {
                        v.as_i64().map(|ms| (format!("_{key}"), ms))
                    } else {
                        None
                    }
                })
                .collect();
            for (key, ms) in mirrors {
                map.insert(key, Value::String(format_utc(ms)));
            }
            for v in map.values_mut() {
                mirror_timestamps(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                mirror_timestamps(item);
            }
        }
        _ => {}
    }
}

fn format_utc(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::new(),
    }
}

/// Serialize `value` with 2-space indent and a trailing newline, writing
/// through a temp file in the same directory so readers never observe a
/// partial file.
pub async fn write_json(path: &Path, value: &Value) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| TransferError::Other(format!("no parent directory for {path:?}")))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| TransferError::io_with_path(e, parent))?;
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, text.as_bytes())
        .await
        .map_err(|e| TransferError::io_with_path(e, &tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| TransferError::io_with_path(e, path))?;
    Ok(())
}

pub async fn read_json(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TransferError::io_with_path(e, path))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_mirror_timestamps_nested() {
        let mut value = json!({
            "start_time": 1700000000000i64,
            "runs": [{ "end_time": 1700000001000i64, "name": "r" }],
            "other": 5,
        });
        mirror_timestamps(&mut value);
        assert_eq!(value["_start_time"], "2023-11-14 22:13:20");
        assert!(value["runs"][0]["_end_time"].is_string());
        assert!(value.get("_other").is_none());
    }

    #[tokio::test]
    async fn test_envelope_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("run.json");
        let system = SystemInfo::new("3.4.0", "mem://src");
        let env = Envelope::new(system, json!({"num_runs": 1}), json!({"run": {"id": "abc"}}));
        env.write(&path).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.ends_with('\n'));

        let back = Envelope::read(&path).await.unwrap();
        assert_eq!(back.mlflow["run"]["id"], "abc");
        assert_eq!(back.source_version(), "3.4.0");
    }

    #[tokio::test]
    async fn test_missing_envelope_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = Envelope::read(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
    }
}
