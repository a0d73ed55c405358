//! Error types for the transfer engine.
//!
//! Three failure kinds matter to callers: a referenced source object is
//! missing (`NotFound`), the destination backend cannot accept the object
//! (`Incompatible` / `Unsupported`), and everything the backends or the
//! local filesystem throw at us (`Backend`, `Io`, ...). Bulk operations
//! record these per unit; single-object operations re-raise them.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Debug, Error)]
pub enum TransferError {
    // Missing source objects
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // Destination cannot accept the object
    #[error("destination does not support {feature} (requires MLflow >= {required}, server is {actual})")]
    Unsupported {
        feature: String,
        required: String,
        actual: String,
    },

    #[error("incompatible export file: {message}")]
    Incompatible { message: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    // Backend / network errors
    #[error("backend error: {message}")]
    Backend {
        message: String,
        /// HTTP status, when the failure came from a REST call
        status: Option<u16>,
        /// MLflow error code (e.g. RESOURCE_DOES_NOT_EXIST), when present
        error_code: Option<String>,
    },

    #[error("request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("YAML error in {context}: {message}")]
    Yaml { context: String, message: String },

    // Checkpoint storage errors
    #[error("checkpoint error: {message}")]
    Checkpoint { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransferError::Timeout(std::time::Duration::from_secs(0))
        } else {
            TransferError::Backend {
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
                error_code: None,
            }
        }
    }
}

impl From<parquet::errors::ParquetError> for TransferError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        TransferError::Checkpoint {
            message: err.to_string(),
        }
    }
}

impl From<arrow::error::ArrowError> for TransferError {
    fn from(err: arrow::error::ArrowError) -> Self {
        TransferError::Checkpoint {
            message: err.to_string(),
        }
    }
}

impl TransferError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TransferError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a not-found error for an object kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        TransferError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a backend error with just a message.
    pub fn backend(message: impl Into<String>) -> Self {
        TransferError::Backend {
            message: message.into(),
            status: None,
            error_code: None,
        }
    }

    /// True when the failure means the referenced source object is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            TransferError::NotFound { .. } => true,
            TransferError::Backend { error_code, status, .. } => {
                error_code.as_deref() == Some("RESOURCE_DOES_NOT_EXIST")
                    || *status == Some(404)
            }
            _ => false,
        }
    }

    /// One-line summary for bulk result records: first line of the
    /// message plus error code and HTTP status when present.
    pub fn summary(&self) -> String {
        let message = self.to_string();
        let first_line = message.lines().next().unwrap_or("").to_string();
        match self {
            TransferError::Backend {
                status, error_code, ..
            } => {
                let mut out = first_line;
                if let Some(code) = error_code {
                    out.push_str(&format!(" [{code}]"));
                }
                if let Some(status) = status {
                    out.push_str(&format!(" (HTTP {status})"));
                }
                out
            }
            _ => first_line,
        }
    }
}
