//! Centralized configuration for the transfer engine.
//!
//! Constants for pagination, batching, network timeouts, checkpoint flush
//! policy, and the reserved tag namespaces written during import.

use std::time::Duration;

/// Engine-level configuration.
pub struct EngineConfig;

impl EngineConfig {
    pub const TOOL_NAME: &'static str = "mlflow-transfer";
    pub const TOOL_VERSION: &'static str = env!("CARGO_PKG_VERSION");
    /// Export file format understood by the importers.
    pub const EXPORT_FORMAT_VERSION: u32 = 2;
}

/// Pagination and batching limits.
pub struct SearchConfig;

impl SearchConfig {
    /// Cap on per-page size forwarded to `search_*` endpoints.
    pub const MAX_RESULTS_PER_PAGE: usize = 1000;
    /// Smaller cap for registry searches (server-side limit is lower).
    pub const MAX_REGISTRY_RESULTS_PER_PAGE: usize = 200;
    /// Maximum entities per `log_batch` call.
    pub const LOG_BATCH_LIMIT: usize = 1000;
    /// Maximum params per `log_batch` call.
    pub const LOG_BATCH_PARAMS_LIMIT: usize = 100;
}

/// Network-related configuration for the REST binding.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const API_PREFIX: &'static str = "api/2.0/mlflow";
    pub const ARTIFACTS_API_PREFIX: &'static str = "api/2.0/mlflow-artifacts/artifacts";
}

/// Checkpoint log flush policy and layout.
pub struct CheckpointConfig;

impl CheckpointConfig {
    /// Subdirectory of the output root holding parquet checkpoint files.
    pub const DIR_NAME: &'static str = "checkpoints";
    /// Flush after this many buffered records.
    pub const FLUSH_RECORDS: usize = 100;
    /// Flush at least this often while records are buffered.
    pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);
}

/// Reserved MLflow tag names and the namespaces this tool writes.
pub struct TagsConfig;

impl TagsConfig {
    /// MLflow's parent-run back reference on nested runs.
    pub const PARENT_RUN_ID: &'static str = "mlflow.parentRunId";
    /// MLflow's description tag on runs and experiments.
    pub const NOTE_CONTENT: &'static str = "mlflow.note.content";
    /// Prefix under which source-object metadata is preserved when
    /// `import_source_tags` is set.
    pub const SOURCE_TAG_PREFIX: &'static str = "mlflow_exim.src.";
    /// Prefix for provenance tags written by the copy engine.
    pub const EXIM_TAG_PREFIX: &'static str = "mlflow_exim.";
    /// MLflow tag prefix; tags under it are remapped into the source
    /// namespace rather than set verbatim on the destination.
    pub const MLFLOW_TAG_PREFIX: &'static str = "mlflow.";
}

/// Environment variables consumed at the front-end boundary.
pub struct EnvConfig;

impl EnvConfig {
    pub const SOURCE_TRACKING_URI: &'static str = "MLFLOW_TRACKING_URI_SRC";
    pub const DEST_TRACKING_URI: &'static str = "MLFLOW_TRACKING_URI_DST";
    pub const SOURCE_TOKEN: &'static str = "MLFLOW_TRACKING_TOKEN_SRC";
    pub const DEST_TOKEN: &'static str = "MLFLOW_TRACKING_TOKEN_DST";
    pub const LOG_FORMAT: &'static str = "MLFLOW_TRANSFER_LOG_FORMAT";
}
