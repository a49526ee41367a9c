//! Persistence backends for the annotation document.
//!
//! Implementations:
//! - `FileBackend` - `<stateRoot>/<project>/state.json` on local disk
//! - `DocumentStoreBackend` - one document per project in a `DocumentCollection`
//!
//! The backend is chosen once at startup by [`open_backend`].

mod document;
mod file;
mod select;

use std::fmt;

use async_trait::async_trait;

use crate::annotations::AnnotationState;
use crate::error::PersistenceError;

pub use document::{DocumentCollection, DocumentStoreBackend, InMemoryCollection, StoredDocument, UpsertOutcome};
pub use file::{FileBackend, STATE_FILE_NAME};
pub use select::{
    open_backend, select_backend, BackendDecision, BackendOptions, RemoteConnector, RemoteOptions,
};

/// Which storage a backend writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    DocumentStore,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::File => f.write_str("file"),
            BackendKind::DocumentStore => f.write_str("document-store"),
        }
    }
}

/// Load/save access to one project's annotation document.
#[async_trait]
pub trait StateBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable location, for logs.
    fn location(&self) -> String;

    /// Load the current document, normalized.
    async fn load(&self) -> Result<AnnotationState, PersistenceError>;

    /// Normalize and store the document, replacing the previous one.
    async fn save(&self, state: &AnnotationState) -> Result<(), PersistenceError>;

    /// Release any held connection.
    async fn close(&self) -> Result<(), PersistenceError>;
}
