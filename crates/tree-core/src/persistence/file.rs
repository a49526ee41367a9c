//! Local JSON file backend.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BackendKind, StateBackend};
use crate::annotations::{normalize, AnnotationState};
use crate::error::PersistenceError;

pub const STATE_FILE_NAME: &str = "state.json";

/// Stores the document at `<stateRoot>/<project>/state.json`.
///
/// A missing or unreadable file loads as the default document, so a first run
/// and a corrupted file both recover on the next save.
pub struct FileBackend {
    project_dir: PathBuf,
    state_file: PathBuf,
    /// Serializes writers so the temp file is never shared.
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(state_root: &Path, project: &str) -> Self {
        let project_dir = state_root.join(project);
        let state_file = project_dir.join(STATE_FILE_NAME);
        Self {
            project_dir,
            state_file,
            write_lock: Mutex::new(()),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
        let temp_path = path.with_extension("json.tmp");

        if let Err(e) = fs::write(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(())
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn location(&self) -> String {
        self.state_file.display().to_string()
    }

    async fn load(&self) -> Result<AnnotationState, PersistenceError> {
        let content = match fs::read_to_string(&self.state_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at {:?}, using defaults", self.state_file);
                return Ok(AnnotationState::default());
            }
            Err(e) => {
                warn!("Unreadable state file {:?}, using defaults: {}", self.state_file, e);
                return Ok(AnnotationState::default());
            }
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(value) => Ok(normalize(&value)),
            Err(e) => {
                warn!("Corrupt state file {:?}, using defaults: {}", self.state_file, e);
                Ok(AnnotationState::default())
            }
        }
    }

    async fn save(&self, state: &AnnotationState) -> Result<(), PersistenceError> {
        let normalized = state.normalized();
        let content = serde_json::to_string_pretty(&normalized)?;

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.project_dir).await?;
        Self::atomic_write(&self.state_file, &content).await?;
        debug!("Saved state to {:?}", self.state_file);
        Ok(())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}
