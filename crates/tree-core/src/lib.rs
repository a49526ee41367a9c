//! Core of the annotated directory map.
//!
//! - `tree` - deterministic directory snapshots
//! - `annotations` - the per-project annotation document and its repair rules
//! - `persistence` - file and document-store backends, chosen once at startup
//! - `service` - the sync surface shared by HTTP and in-process callers
//! - `reconciler` - a viewer's debounced, drift-aware controller

pub mod annotations;
pub mod error;
pub mod path_key;
pub mod persistence;
pub mod reconciler;
pub mod service;
pub mod tree;

pub use annotations::{normalize, normalize_json_str, AnnotationState, Label};
pub use error::{BackendError, PersistenceError, ScanError, SessionError, SyncError, TransportError};
pub use path_key::{full_path, PathKey};
pub use persistence::{BackendKind, StateBackend};
pub use reconciler::{
    AnnotationSession, Clock, ManualClock, Reconciler, ReconcilerConfig, SyncTransport, SystemClock,
};
pub use service::{PageSnapshot, SyncService, TreeSource};
pub use tree::{NodeKind, TreeBuilder, TreeNode};
