//! Startup backend selection.
//!
//! Three tiers, evaluated once:
//! 1. remote required: a connection string is mandatory and a failed connect aborts
//! 2. connection string configured: try the remote store, fall back to the file on failure
//! 3. otherwise: local file
//!
//! [`select_backend`] is the pure decision; [`open_backend`] performs the
//! single connection attempt and applies it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{DocumentCollection, DocumentStoreBackend, FileBackend, StateBackend};
use crate::error::BackendError;

/// Remote store coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOptions {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

/// Everything needed to pick and open a backend.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub project: String,
    pub state_root: PathBuf,
    pub remote: Option<RemoteOptions>,
    pub require_remote: bool,
}

impl BackendOptions {
    fn connection_string(&self) -> Option<&RemoteOptions> {
        self.remote.as_ref().filter(|r| !r.uri.trim().is_empty())
    }
}

/// Opens a remote document collection. A single attempt, no retry.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        remote: &RemoteOptions,
    ) -> Result<Arc<dyn DocumentCollection>, BackendError>;
}

/// Next step of backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendDecision {
    /// Attempt the remote connection, then decide again with its result
    Connect,
    UseRemote,
    UseLocal,
    /// Remote configured but unreachable; use the file and warn
    FallBackToLocal,
    Abort(BackendError),
}

/// Decide which backend to use.
///
/// `connected` is `None` before a connection attempt and `Some(result)` after.
pub fn select_backend(
    require_remote: bool,
    connection_string_present: bool,
    connected: Option<Result<(), BackendError>>,
) -> BackendDecision {
    match (require_remote, connection_string_present, connected) {
        (true, false, _) => BackendDecision::Abort(BackendError::MissingConnectionString),
        (false, false, _) => BackendDecision::UseLocal,
        (_, true, None) => BackendDecision::Connect,
        (_, true, Some(Ok(()))) => BackendDecision::UseRemote,
        (true, true, Some(Err(e))) => BackendDecision::Abort(e),
        (false, true, Some(Err(_))) => BackendDecision::FallBackToLocal,
    }
}

/// Pick, connect and construct the backend for this process.
pub async fn open_backend(
    options: &BackendOptions,
    connector: &dyn RemoteConnector,
) -> Result<Arc<dyn StateBackend>, BackendError> {
    let remote = options.connection_string();
    let mut collection = None;
    let mut decision = select_backend(options.require_remote, remote.is_some(), None);

    if let (BackendDecision::Connect, Some(remote)) = (&decision, remote) {
        let attempt = match connector.connect(remote).await {
            Ok(c) => {
                collection = Some(c);
                Ok(())
            }
            Err(e) => {
                error!("Remote store connection failed: {}", e);
                Err(e)
            }
        };
        decision = select_backend(options.require_remote, true, Some(attempt));
    }

    let file = || -> Arc<dyn StateBackend> {
        Arc::new(FileBackend::new(&options.state_root, &options.project))
    };

    let backend = match decision {
        BackendDecision::UseRemote => match collection {
            Some(c) => {
                let backend: Arc<dyn StateBackend> =
                    Arc::new(DocumentStoreBackend::new(options.project.clone(), c));
                if options.require_remote {
                    info!("Using remote state store (no fallback)");
                }
                backend
            }
            None => return Err(BackendError::Unavailable("no collection".to_string())),
        },
        BackendDecision::UseLocal => file(),
        BackendDecision::FallBackToLocal => {
            warn!("Falling back to the local state file");
            file()
        }
        BackendDecision::Abort(e) => return Err(e),
        BackendDecision::Connect => {
            return Err(BackendError::Unavailable("connection was not attempted".to_string()));
        }
    };

    info!(
        "State backend: {} at {}",
        backend.kind(),
        backend.location()
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{BackendKind, InMemoryCollection};
    use tempfile::TempDir;

    struct OkConnector;

    #[async_trait]
    impl RemoteConnector for OkConnector {
        async fn connect(
            &self,
            _remote: &RemoteOptions,
        ) -> Result<Arc<dyn DocumentCollection>, BackendError> {
            Ok(Arc::new(InMemoryCollection::new()))
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl RemoteConnector for FailingConnector {
        async fn connect(
            &self,
            _remote: &RemoteOptions,
        ) -> Result<Arc<dyn DocumentCollection>, BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }

    fn options(temp: &TempDir, uri: Option<&str>, require_remote: bool) -> BackendOptions {
        BackendOptions {
            project: "proj".to_string(),
            state_root: temp.path().to_path_buf(),
            remote: uri.map(|uri| RemoteOptions {
                uri: uri.to_string(),
                database: "modules_DB".to_string(),
                collection: "tree".to_string(),
            }),
            require_remote,
        }
    }

    fn unavailable() -> BackendError {
        BackendError::Unavailable("down".to_string())
    }

    #[test]
    fn test_decision_table() {
        use BackendDecision::*;

        assert_eq!(
            select_backend(true, false, None),
            Abort(BackendError::MissingConnectionString)
        );
        assert_eq!(select_backend(true, true, None), Connect);
        assert_eq!(select_backend(true, true, Some(Ok(()))), UseRemote);
        assert_eq!(select_backend(true, true, Some(Err(unavailable()))), Abort(unavailable()));

        assert_eq!(select_backend(false, true, None), Connect);
        assert_eq!(select_backend(false, true, Some(Ok(()))), UseRemote);
        assert_eq!(select_backend(false, true, Some(Err(unavailable()))), FallBackToLocal);

        assert_eq!(select_backend(false, false, None), UseLocal);
    }

    #[tokio::test]
    async fn test_no_connection_string_uses_file() {
        let temp = TempDir::new().unwrap();
        let backend = open_backend(&options(&temp, None, false), &OkConnector).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::File);
    }

    #[tokio::test]
    async fn test_blank_connection_string_counts_as_absent() {
        let temp = TempDir::new().unwrap();
        let backend = open_backend(&options(&temp, Some("  "), false), &OkConnector)
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::File);

        let result = open_backend(&options(&temp, Some(""), true), &OkConnector).await;
        assert!(matches!(result, Err(BackendError::MissingConnectionString)));
    }

    #[tokio::test]
    async fn test_configured_remote_is_used_when_reachable() {
        let temp = TempDir::new().unwrap();
        let backend = open_backend(&options(&temp, Some("redis://db"), false), &OkConnector)
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::DocumentStore);
    }

    #[tokio::test]
    async fn test_unreachable_remote_falls_back_to_file() {
        let temp = TempDir::new().unwrap();
        let backend = open_backend(&options(&temp, Some("redis://db"), false), &FailingConnector)
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::File);
    }

    #[tokio::test]
    async fn test_required_remote_never_falls_back() {
        let temp = TempDir::new().unwrap();

        let result = open_backend(&options(&temp, Some("redis://db"), true), &FailingConnector).await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));

        let result = open_backend(&options(&temp, None, true), &OkConnector).await;
        assert!(matches!(result, Err(BackendError::MissingConnectionString)));

        let backend = open_backend(&options(&temp, Some("redis://db"), true), &OkConnector)
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::DocumentStore);
    }
}
