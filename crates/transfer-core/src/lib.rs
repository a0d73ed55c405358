//! MLflow Transfer - Object-graph export/import engine for MLflow.
//!
//! This crate exports MLflow tracking and registry objects (experiments,
//! runs, registered models, logged models, traces, prompts, evaluation
//! datasets) to a portable directory tree and imports them into another
//! backend with fresh identifiers and rebound references. It can be used
//! programmatically without the CLI layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use mlflow_transfer::client::RestClient;
//! use mlflow_transfer::export::ExperimentExporter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mlflow_transfer::Result<()> {
//!     let src = Arc::new(RestClient::new("http://localhost:5000", None)?);
//!     let manifest = ExperimentExporter::new(src)
//!         .export_experiment("my-experiment", "out/my-experiment".as_ref())
//!         .await?;
//!     println!("exported {} runs", manifest.run_ids.len());
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod checkpoint;
pub mod client;
pub mod compat;
pub mod config;
pub mod copy;
pub mod error;
pub mod export;
pub mod format;
pub mod import;
pub mod models;
pub mod rename;
pub mod rewrite;

// Re-export commonly used types
pub use bulk::{BulkExportOptions, BulkExporter, BulkImportOptions, BulkImporter};
pub use checkpoint::CheckpointLog;
pub use client::{MemoryBackend, MlflowClient, RegistryKind, RestClient};
pub use compat::{BackendVersion, Feature};
pub use copy::{CopyOptions, ModelVersionCopier, VersionCopy};
pub use error::{Result, TransferError};
pub use format::{BulkManifest, Envelope, UnitResult, UnitStatus};
pub use rename::{RenameMap, RenameMaps};
