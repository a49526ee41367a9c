//! Transport-independent sync surface.
//!
//! `SyncService` owns the scan root and the single backend handle for the
//! life of the process. The HTTP layer and the in-process loopback transport
//! both call into it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::annotations::{normalize_json_str, AnnotationState};
use crate::error::{PersistenceError, ScanError, SyncError, TransportError};
use crate::persistence::{BackendKind, StateBackend};
use crate::reconciler::SyncTransport;
use crate::tree::{TreeBuilder, TreeNode};

/// Where and how to scan.
#[derive(Debug, Clone)]
pub struct TreeSource {
    root: PathBuf,
    builder: TreeBuilder,
}

impl TreeSource {
    pub fn new(root: impl Into<PathBuf>, builder: TreeBuilder) -> Self {
        Self {
            root: root.into(),
            builder,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project key: base name of the root.
    pub fn project_name(&self) -> String {
        project_name(&self.root)
    }

    /// Blocking scan of the root.
    pub fn scan(&self) -> Result<TreeNode, ScanError> {
        self.builder.build(&self.root)
    }
}

/// Base name of a root directory, or its display form when it has none.
pub fn project_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

/// Cold-start view embedded into the served page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub project: String,
    pub root_display: String,
    pub tree: TreeNode,
    pub state: AnnotationState,
}

pub struct SyncService {
    source: Arc<TreeSource>,
    backend: Arc<dyn StateBackend>,
    snapshot: PageSnapshot,
}

impl SyncService {
    /// Scan and load once to build the page snapshot.
    ///
    /// Neither step is fatal here: an unreadable store embeds the default
    /// document and an unreadable root embeds an empty directory.
    pub async fn new(source: TreeSource, backend: Arc<dyn StateBackend>) -> Self {
        let source = Arc::new(source);
        let project = source.project_name();

        let tree = match scan_blocking(source.clone()).await {
            Ok(tree) => tree,
            Err(e) => {
                error!("Initial scan of {:?} failed: {}", source.root(), e);
                TreeNode::empty_dir(project.clone())
            }
        };

        let state = match backend.load().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to load initial state, using defaults: {}", e);
                AnnotationState::default()
            }
        };

        let snapshot = PageSnapshot {
            project,
            root_display: source.root().display().to_string(),
            tree,
            state,
        };

        Self {
            source,
            backend,
            snapshot,
        }
    }

    pub fn page_snapshot(&self) -> &PageSnapshot {
        &self.snapshot
    }

    pub fn project(&self) -> &str {
        &self.snapshot.project
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Current document, straight from the backend.
    pub async fn get_state(&self) -> Result<AnnotationState, SyncError> {
        Ok(self.backend.load().await?)
    }

    /// Parse, normalize and store a raw request body.
    pub async fn put_state(&self, body: &[u8]) -> Result<(), SyncError> {
        let text =
            std::str::from_utf8(body).map_err(|e| SyncError::MalformedInput(e.to_string()))?;
        let state = normalize_json_str(text)?;
        self.save(&state).await
    }

    /// Normalize and store an already parsed document.
    pub async fn put_state_json(&self, state: &AnnotationState) -> Result<(), SyncError> {
        self.save(&state.normalized()).await
    }

    async fn save(&self, state: &AnnotationState) -> Result<(), SyncError> {
        self.backend.save(state).await?;
        debug!("Stored state for {}", self.project());
        Ok(())
    }

    /// Fresh scan of the root. Never cached.
    pub async fn get_tree(&self) -> Result<TreeNode, SyncError> {
        scan_blocking(self.source.clone()).await.map_err(|e| {
            warn!("Tree scan failed: {}", e);
            SyncError::Scan(e)
        })
    }

    pub async fn close(&self) -> Result<(), PersistenceError> {
        self.backend.close().await
    }
}

async fn scan_blocking(source: Arc<TreeSource>) -> Result<TreeNode, ScanError> {
    let root = source.root().to_path_buf();
    match tokio::task::spawn_blocking(move || source.scan()).await {
        Ok(result) => result,
        Err(e) => Err(ScanError::Io {
            path: root,
            message: e.to_string(),
        }),
    }
}

/// Loopback transport: a reconciler talking to a service in the same process.
#[async_trait]
impl SyncTransport for SyncService {
    async fn get_state(&self) -> Result<AnnotationState, TransportError> {
        Ok(SyncService::get_state(self).await?)
    }

    async fn put_state(&self, state: &AnnotationState) -> Result<(), TransportError> {
        Ok(self.put_state_json(state).await?)
    }

    async fn get_tree(&self) -> Result<TreeNode, TransportError> {
        Ok(SyncService::get_tree(self).await?)
    }
}
