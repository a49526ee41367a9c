//! Picks the remote store from the connection string's scheme.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tree_core::error::BackendError;
use tree_core::persistence::{DocumentCollection, RemoteConnector, RemoteOptions};

use crate::{mongo_store, redis_store};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScheme {
    Mongo,
    Redis,
}

impl StoreScheme {
    pub fn of(uri: &str) -> Option<Self> {
        let (scheme, _) = uri.trim().split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "mongodb" | "mongodb+srv" => Some(Self::Mongo),
            "redis" | "rediss" => Some(Self::Redis),
            _ => None,
        }
    }
}

/// Opens the collection named by a connection string with a single attempt.
#[derive(Debug, Clone, Copy)]
pub struct StoreConnector {
    pub connect_timeout: Duration,
}

impl StoreConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for StoreConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl RemoteConnector for StoreConnector {
    async fn connect(
        &self,
        remote: &RemoteOptions,
    ) -> Result<Arc<dyn DocumentCollection>, BackendError> {
        // The URI may carry credentials; only the scheme is ever reported.
        match StoreScheme::of(&remote.uri) {
            Some(StoreScheme::Mongo) => {
                let collection =
                    mongo_store::connect_collection(remote, self.connect_timeout).await?;
                Ok(Arc::new(collection))
            }
            Some(StoreScheme::Redis) => {
                let collection =
                    redis_store::connect_collection(remote, self.connect_timeout).await?;
                Ok(Arc::new(collection))
            }
            None => Err(BackendError::Unavailable(
                "unsupported connection string scheme (expected mongodb:// or redis://)".into(),
            )),
        }
    }
}
