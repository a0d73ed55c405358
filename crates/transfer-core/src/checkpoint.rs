//! Resumable-bulk checkpoint log.
//!
//! Completed unit IDs are buffered in memory and flushed to partitioned
//! parquet files under `<root>/checkpoints/`, after `FLUSH_RECORDS`
//! buffered records or `FLUSH_INTERVAL`, whichever comes first. On open,
//! all existing files are read back and their `id` column becomes the
//! already-done set.

use crate::config::CheckpointConfig;
use crate::error::{Result, TransferError};
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CheckpointRecord {
    id: String,
    completed_at: i64,
}

struct Inner {
    dir: PathBuf,
    queue: Mutex<Vec<CheckpointRecord>>,
}

impl Inner {
    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("completed_at", DataType::Int64, false),
        ]))
    }

    /// Drain the buffer into one new parquet file. Empty buffers write
    /// nothing.
    fn flush(&self) -> Result<()> {
        let records: Vec<CheckpointRecord> = {
            let mut queue = self.queue.lock().map_err(|_| TransferError::Checkpoint {
                message: "checkpoint queue poisoned".to_string(),
            })?;
            std::mem::take(&mut *queue)
        };
        if records.is_empty() {
            return Ok(());
        }
        let schema = Self::schema();
        let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()));
        let timestamps = Int64Array::from_iter_values(records.iter().map(|r| r.completed_at));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(ids), Arc::new(timestamps)],
        )?;

        let path = self.dir.join(format!("ckpt-{}.parquet", Uuid::new_v4()));
        let file = File::create(&path).map_err(|e| TransferError::io_with_path(e, &path))?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
        debug!(records = records.len(), path = %path.display(), "flushed checkpoint");
        Ok(())
    }
}

/// Append-only log of completed unit IDs, shared across workers.
pub struct CheckpointLog {
    inner: Arc<Inner>,
    completed: Mutex<HashSet<String>>,
    flusher: tokio::task::JoinHandle<()>,
}

impl CheckpointLog {
    /// Open (or create) the checkpoint directory under `root` and load
    /// every previously flushed ID.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(CheckpointConfig::DIR_NAME);
        std::fs::create_dir_all(&dir).map_err(|e| TransferError::io_with_path(e, &dir))?;
        let completed = load_completed(&dir)?;

        let inner = Arc::new(Inner {
            dir,
            queue: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&inner);
        let flusher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CheckpointConfig::FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = inner.flush() {
                    warn!("periodic checkpoint flush failed: {err}");
                }
            }
        });
        Ok(Self {
            inner,
            completed: Mutex::new(completed),
            flusher,
        })
    }

    /// True when a prior (or current) run already completed this unit.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Record a completed unit. Flushes when the buffer reaches the
    /// record cap.
    pub fn record(&self, id: &str) -> Result<()> {
        if let Ok(mut set) = self.completed.lock() {
            if !set.insert(id.to_string()) {
                return Ok(());
            }
        }
        let buffered = {
            let mut queue = self.inner.queue.lock().map_err(|_| TransferError::Checkpoint {
                message: "checkpoint queue poisoned".to_string(),
            })?;
            queue.push(CheckpointRecord {
                id: id.to_string(),
                completed_at: Utc::now().timestamp_millis(),
            });
            queue.len()
        };
        if buffered >= CheckpointConfig::FLUSH_RECORDS {
            self.inner.flush()?;
        }
        Ok(())
    }

    /// Flush buffered records without closing the log.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Final flush. Call before dropping when durability matters.
    pub fn close(self) -> Result<()> {
        self.flusher.abort();
        self.inner.flush()
    }
}

impl Drop for CheckpointLog {
    fn drop(&mut self) {
        self.flusher.abort();
        if let Err(err) = self.inner.flush() {
            warn!("checkpoint flush on drop failed: {err}");
        }
    }
}

/// Read the `id` column of every parquet file in the directory.
fn load_completed(dir: &Path) -> Result<HashSet<String>> {
    let mut completed = HashSet::new();
    let entries = std::fs::read_dir(dir).map_err(|e| TransferError::io_with_path(e, dir))?;
    for entry in entries {
        let entry = entry.map_err(|e| TransferError::io_with_path(e, dir))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }
        let file = File::open(&path).map_err(|e| TransferError::io_with_path(e, &path))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let mask = ProjectionMask::columns(builder.parquet_schema(), ["id"]);
        let reader = builder.with_projection(mask).build()?;
        for batch in reader {
            let batch = batch?;
            let ids = batch
                .column(0)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| TransferError::Checkpoint {
                    message: format!("unexpected id column type in {}", path.display()),
                })?;
            for id in ids.iter().flatten() {
                completed.insert(id.to_string());
            }
        }
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_flush_reload() {
        let root = TempDir::new().unwrap();
        let log = CheckpointLog::open(root.path()).unwrap();
        log.record("model-a").unwrap();
        log.record("model-b").unwrap();
        assert!(log.is_completed("model-a"));
        assert!(!log.is_completed("model-c"));
        log.close().unwrap();

        let reloaded = CheckpointLog::open(root.path()).unwrap();
        assert!(reloaded.is_completed("model-a"));
        assert!(reloaded.is_completed("model-b"));
        assert_eq!(reloaded.completed_count(), 2);
    }

    #[tokio::test]
    async fn test_flush_at_record_cap() {
        let root = TempDir::new().unwrap();
        let log = CheckpointLog::open(root.path()).unwrap();
        for i in 0..CheckpointConfig::FLUSH_RECORDS {
            log.record(&format!("id-{i}")).unwrap();
        }
        // The cap forces a flush without close().
        let files: Vec<_> = std::fs::read_dir(root.path().join(CheckpointConfig::DIR_NAME))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("parquet"))
            .collect();
        assert_eq!(files.len(), 1);
        log.close().unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_records_are_deduplicated() {
        let root = TempDir::new().unwrap();
        let log = CheckpointLog::open(root.path()).unwrap();
        log.record("same").unwrap();
        log.record("same").unwrap();
        log.close().unwrap();
        let reloaded = CheckpointLog::open(root.path()).unwrap();
        assert_eq!(reloaded.completed_count(), 1);
    }
}
