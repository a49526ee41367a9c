//! Redis-backed document collection.
//!
//! Each project document is a hash at `<database>:<collection>:<project>`
//! with the fields `project`, `state` (JSON text) and `updatedAt` (RFC 3339).
//! An upsert reads the previous `state` and writes all three fields in one
//! MULTI/EXEC transaction.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};
use tree_core::error::{BackendError, PersistenceError};
use tree_core::persistence::{DocumentCollection, RemoteOptions, StoredDocument, UpsertOutcome};

pub struct RedisCollection {
    conn: MultiplexedConnection,
    prefix: String,
    location: String,
}

impl RedisCollection {
    pub fn new(conn: MultiplexedConnection, database: &str, collection: &str) -> Self {
        Self {
            conn,
            prefix: key_prefix(database, collection),
            location: format!("redis {}/{}", database, collection),
        }
    }

    fn key(&self, project: &str) -> String {
        format!("{}{}", self.prefix, project)
    }
}

fn key_prefix(database: &str, collection: &str) -> String {
    format!("{}:{}:", database, collection)
}

fn remote_err(e: redis::RedisError) -> PersistenceError {
    PersistenceError::Remote(e.to_string())
}

#[async_trait]
impl DocumentCollection for RedisCollection {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn find_one(&self, project: &str) -> Result<Option<StoredDocument>, PersistenceError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(self.key(project)).await.map_err(remote_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_document(project, fields).map(Some)
    }

    async fn upsert(&self, doc: StoredDocument) -> Result<UpsertOutcome, PersistenceError> {
        let mut conn = self.conn.clone();
        let key = self.key(&doc.project);
        let state = serde_json::to_string(&doc.state)?;
        let updated_at = doc.updated_at.to_rfc3339();

        let (previous,): (Option<String>,) = redis::pipe()
            .atomic()
            .hget(&key, "state")
            .hset_multiple(
                &key,
                &[
                    ("project", doc.project.as_str()),
                    ("state", state.as_str()),
                    ("updatedAt", updated_at.as_str()),
                ],
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(remote_err)?;

        Ok(match previous {
            None => UpsertOutcome::Inserted,
            Some(prev) => UpsertOutcome::Updated {
                state_changed: prev != state,
            },
        })
    }
}

fn decode_document(
    project: &str,
    fields: impl IntoIterator<Item = (String, String)>,
) -> Result<StoredDocument, PersistenceError> {
    let mut state = serde_json::Value::Null;
    let mut updated_at = None;
    for (field, value) in fields {
        match field.as_str() {
            // An unparsable stored state normalizes to defaults on load.
            "state" => state = serde_json::from_str(&value).unwrap_or(serde_json::Value::Null),
            "updatedAt" => {
                updated_at = DateTime::parse_from_rfc3339(&value)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }
            _ => {}
        }
    }
    Ok(StoredDocument {
        project: project.to_string(),
        state,
        updated_at: updated_at.unwrap_or_default(),
    })
}

/// Connects with one attempt bounded by `timeout`: open the socket, then PING.
pub async fn connect_collection(
    remote: &RemoteOptions,
    timeout: Duration,
) -> Result<RedisCollection, BackendError> {
    let unavailable = |e: redis::RedisError| BackendError::Unavailable(e.to_string());

    let client = Client::open(remote.uri.as_str()).map_err(unavailable)?;
    let attempt = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok::<_, redis::RedisError>((conn, pong))
    };
    let (conn, pong) = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| {
            BackendError::Unavailable(format!("no answer from redis within {:?}", timeout))
        })?
        .map_err(unavailable)?;
    debug!("Remote store answered {}", pong);

    info!(
        "Connected to redis (db={}, collection={})",
        remote.database, remote.collection
    );
    Ok(RedisCollection::new(conn, &remote.database, &remote.collection))
}
