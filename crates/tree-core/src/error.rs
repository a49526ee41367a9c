//! Error types shared across the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to scan the tree root.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("Scan root not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl ScanError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ScanError::Missing(path.to_path_buf())
        } else {
            ScanError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }
}

/// Backend read/write failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Remote store error: {0}")]
    Remote(String),
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialize(e.to_string())
    }
}

/// Startup-time backend selection failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("A remote connection string is required when the remote store is mandatory")]
    MissingConnectionString,

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a sync operation served to clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("invalid JSON: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Client-side failure talking to a sync endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Server responded with {0}: {1}")]
    Status(u16, String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<SyncError> for TransportError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::MalformedInput(msg) => TransportError::Status(400, msg),
            other => TransportError::Status(500, other.to_string()),
        }
    }
}

/// Rejected annotation edit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Label name must not be empty")]
    EmptyLabelName,

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("The tree root cannot be annotated this way")]
    RootPath,
}
