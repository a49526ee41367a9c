//! MongoDB-backed document collection.
//!
//! One document per project in `<database>.<collection>`, keyed by the
//! `project` field: `{ project, state, updatedAt }` with `updatedAt` stored as a
//! BSON date. Upserts are a single `findOneAndUpdate` returning the previous
//! document, so inserted vs updated falls out of the same round trip.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{ClientOptions, ReturnDocument};
use mongodb::{Client, Collection};
use tracing::info;
use tree_core::error::{BackendError, PersistenceError};
use tree_core::persistence::{DocumentCollection, RemoteOptions, StoredDocument, UpsertOutcome};

pub struct MongoCollection {
    client: Client,
    collection: Collection<Document>,
    location: String,
}

impl MongoCollection {
    pub fn new(client: Client, database: &str, collection: &str) -> Self {
        Self {
            collection: client.database(database).collection(collection),
            client,
            location: format!("mongodb {}.{}", database, collection),
        }
    }
}

fn remote_err(e: mongodb::error::Error) -> PersistenceError {
    PersistenceError::Remote(e.to_string())
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn find_one(&self, project: &str) -> Result<Option<StoredDocument>, PersistenceError> {
        let found = self
            .collection
            .find_one(doc! { "project": project })
            .await
            .map_err(remote_err)?;
        Ok(found.map(|document| decode_document(project, document)))
    }

    async fn upsert(&self, document: StoredDocument) -> Result<UpsertOutcome, PersistenceError> {
        let state = bson::to_bson(&document.state)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;
        let updated_at = BsonDateTime::from_millis(document.updated_at.timestamp_millis());

        let previous = self
            .collection
            .find_one_and_update(
                doc! { "project": document.project.as_str() },
                doc! {
                    "$set": {
                        "project": document.project.as_str(),
                        "state": state,
                        "updatedAt": updated_at,
                    }
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .await
            .map_err(remote_err)?;

        Ok(match previous {
            None => UpsertOutcome::Inserted,
            Some(prev) => UpsertOutcome::Updated {
                state_changed: state_json(&prev) != document.state,
            },
        })
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

fn state_json(document: &Document) -> serde_json::Value {
    document
        .get("state")
        .cloned()
        .map(Bson::into_relaxed_extjson)
        .unwrap_or(serde_json::Value::Null)
}

fn decode_document(project: &str, document: Document) -> StoredDocument {
    // A missing or mistyped date reads as the epoch; state is normalized on load.
    let updated_at = document
        .get_datetime("updatedAt")
        .ok()
        .and_then(|t| DateTime::<Utc>::from_timestamp_millis(t.timestamp_millis()))
        .unwrap_or_default();
    StoredDocument {
        project: project.to_string(),
        state: state_json(&document),
        updated_at,
    }
}

/// Connects with one attempt bounded by `timeout`, confirmed by a `ping`.
pub async fn connect_collection(
    remote: &RemoteOptions,
    timeout: Duration,
) -> Result<MongoCollection, BackendError> {
    let unavailable = |e: mongodb::error::Error| BackendError::Unavailable(e.to_string());

    let attempt = async {
        let mut options = ClientOptions::parse(remote.uri.as_str()).await?;
        options.app_name = Some("tree-map".to_string());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        let client = Client::with_options(options)?;
        client
            .database(&remote.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok::<_, mongodb::error::Error>(client)
    };
    let client = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| {
            BackendError::Unavailable(format!("no answer from mongodb within {:?}", timeout))
        })?
        .map_err(unavailable)?;

    info!(
        "Connected to mongodb (db={}, collection={})",
        remote.database, remote.collection
    );
    Ok(MongoCollection::new(
        client,
        &remote.database,
        &remote.collection,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_decode_document() {
        let stored = doc! {
            "project": "proj",
            "state": { "noteContent": "hi", "hiddenPaths": ["src"], "filterText": "" },
            "updatedAt": BsonDateTime::from_millis(1_714_557_600_000),
        };
        let decoded = decode_document("proj", stored);
        assert_eq!(decoded.project, "proj");
        assert_eq!(decoded.state["noteContent"], "hi");
        assert_eq!(decoded.state["hiddenPaths"][0], "src");
        assert_eq!(decoded.updated_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let decoded = decode_document("proj", doc! { "project": "proj", "updatedAt": "yesterday" });
        assert!(decoded.state.is_null());
        assert_eq!(decoded.updated_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_state_comparison_ignores_integer_width() {
        let stored = doc! { "state": { "count": 3_i32, "labels": [] } };
        assert_eq!(
            state_json(&stored),
            serde_json::json!({ "count": 3, "labels": [] })
        );
    }

    fn remote(uri: String) -> RemoteOptions {
        RemoteOptions {
            uri,
            database: "modules_DB".into(),
            collection: "tree".into(),
        }
    }

    #[tokio::test]
    async fn test_malformed_uri_is_unavailable() {
        let err = connect_collection(&remote("not a url".into()), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_closed_port_gives_up_after_the_timeout() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let started = Instant::now();
        let err = connect_collection(
            &remote(format!("mongodb://127.0.0.1:{}/?directConnection=true", port)),
            Duration::from_millis(300),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
