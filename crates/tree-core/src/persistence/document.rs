//! Document-store backend.
//!
//! The annotation document lives in a collection keyed by project name with
//! the fields `{project, state, updatedAt}`. Writes are upserts, so saving the
//! same state repeatedly leaves one document whose `updatedAt` moves forward.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendKind, StateBackend};
use crate::annotations::{normalize, AnnotationState};
use crate::error::PersistenceError;

/// One stored project document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub project: String,
    pub state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document existed for the project
    Inserted,
    /// An existing document was overwritten
    Updated { state_changed: bool },
}

/// A keyed collection of project documents.
///
/// Implementations: `InMemoryCollection` here, a Redis-backed collection in
/// the server crate.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    fn location(&self) -> String;

    /// Point lookup by project key.
    async fn find_one(&self, project: &str) -> Result<Option<StoredDocument>, PersistenceError>;

    /// Insert or replace the document for `doc.project`, atomically.
    async fn upsert(&self, doc: StoredDocument) -> Result<UpsertOutcome, PersistenceError>;

    async fn close(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Collection held in process memory.
#[derive(Default)]
pub struct InMemoryCollection {
    docs: RwLock<BTreeMap<String, StoredDocument>>,
}

impl InMemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, project: &str) -> Option<StoredDocument> {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).get(project).cloned()
    }
}

#[async_trait]
impl DocumentCollection for InMemoryCollection {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn find_one(&self, project: &str) -> Result<Option<StoredDocument>, PersistenceError> {
        Ok(self.get(project))
    }

    async fn upsert(&self, doc: StoredDocument) -> Result<UpsertOutcome, PersistenceError> {
        let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
        let outcome = match docs.get(&doc.project) {
            Some(existing) => UpsertOutcome::Updated {
                state_changed: existing.state != doc.state,
            },
            None => UpsertOutcome::Inserted,
        };
        docs.insert(doc.project.clone(), doc);
        Ok(outcome)
    }
}

/// Annotation backend over a document collection.
pub struct DocumentStoreBackend {
    project: String,
    collection: Arc<dyn DocumentCollection>,
}

impl DocumentStoreBackend {
    pub fn new(project: impl Into<String>, collection: Arc<dyn DocumentCollection>) -> Self {
        Self {
            project: project.into(),
            collection,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

#[async_trait]
impl StateBackend for DocumentStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DocumentStore
    }

    fn location(&self) -> String {
        format!("{} (project={})", self.collection.location(), self.project)
    }

    async fn load(&self) -> Result<AnnotationState, PersistenceError> {
        let doc = self.collection.find_one(&self.project).await?;
        Ok(doc.map(|d| normalize(&d.state)).unwrap_or_default())
    }

    async fn save(&self, state: &AnnotationState) -> Result<(), PersistenceError> {
        let doc = StoredDocument {
            project: self.project.clone(),
            state: serde_json::to_value(state.normalized())?,
            updated_at: Utc::now(),
        };
        match self.collection.upsert(doc).await? {
            UpsertOutcome::Inserted => {
                info!("Created state document (project={})", self.project);
            }
            UpsertOutcome::Updated { state_changed } => {
                debug!(
                    "Updated state document (project={}, changed={})",
                    self.project, state_changed
                );
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        self.collection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::Label;
    use serde_json::json;

    fn backend(collection: &Arc<InMemoryCollection>, project: &str) -> DocumentStoreBackend {
        DocumentStoreBackend::new(project, collection.clone() as Arc<dyn DocumentCollection>)
    }

    #[tokio::test]
    async fn test_missing_document_loads_default() {
        let collection = Arc::new(InMemoryCollection::new());
        let state = backend(&collection, "proj").load().await.unwrap();
        assert_eq!(state, AnnotationState::default());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let collection = Arc::new(InMemoryCollection::new());
        let backend = backend(&collection, "proj");
        let mut state = AnnotationState::default();
        state.labels.push(Label::new("todo", "#329AF8"));
        state.hidden_paths.push("src".into());

        backend.save(&state).await.unwrap();
        let first = collection.get("proj").unwrap();
        let loaded_first = backend.load().await.unwrap();

        backend.save(&state).await.unwrap();
        let second = collection.get("proj").unwrap();
        let loaded_second = backend.load().await.unwrap();

        assert_eq!(collection.len(), 1);
        assert_eq!(first.project, "proj");
        assert_eq!(first.state, second.state);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(loaded_first, loaded_second);
        assert_eq!(loaded_second, state);
    }

    #[tokio::test]
    async fn test_upsert_reports_outcome() {
        let collection = InMemoryCollection::new();
        let doc = |state: serde_json::Value| StoredDocument {
            project: "p".into(),
            state,
            updated_at: Utc::now(),
        };

        assert_eq!(collection.upsert(doc(json!({}))).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(
            collection.upsert(doc(json!({}))).await.unwrap(),
            UpsertOutcome::Updated { state_changed: false }
        );
        assert_eq!(
            collection.upsert(doc(json!({ "noteContent": "x" }))).await.unwrap(),
            UpsertOutcome::Updated { state_changed: true }
        );
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let collection = Arc::new(InMemoryCollection::new());
        let a = backend(&collection, "a");
        let b = backend(&collection, "b");

        let mut state = AnnotationState::default();
        state.note_content = "only a".into();
        a.save(&state).await.unwrap();

        assert_eq!(collection.len(), 1);
        assert_eq!(b.load().await.unwrap(), AnnotationState::default());
        assert_eq!(a.load().await.unwrap().note_content, "only a");
    }

    #[tokio::test]
    async fn test_stored_malformed_state_is_normalized_on_load() {
        let collection = Arc::new(InMemoryCollection::new());
        collection
            .upsert(StoredDocument {
                project: "proj".into(),
                state: json!({ "hiddenPaths": "oops", "noteContent": "kept" }),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let state = backend(&collection, "proj").load().await.unwrap();
        assert!(state.hidden_paths.is_empty());
        assert_eq!(state.note_content, "kept");
    }

    #[test]
    fn test_document_field_names() {
        let doc = StoredDocument {
            project: "p".into(),
            state: json!({}),
            updated_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["project"], "p");
        assert_eq!(value["updatedAt"], "2024-01-01T00:00:00Z");
    }
}
