//! HTTP client for a running tree server.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tree_core::error::TransportError;
use tree_core::reconciler::SyncTransport;
use tree_core::{normalize, AnnotationState, TreeNode};

/// Talks to `/state` and `/tree` of a server at `base_url`.
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    base_url: String,
    http: Client,
}

impl HttpSyncClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn request_err(e: reqwest::Error) -> TransportError {
    TransportError::Request(e.to_string())
}

/// Fail on a non-success status, carrying the server's `error` message.
async fn check(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(TransportError::Status(status.as_u16(), message))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl SyncTransport for HttpSyncClient {
    async fn get_state(&self) -> Result<AnnotationState, TransportError> {
        let response = self.http.get(self.url("/state")).send().await.map_err(request_err)?;
        let raw: serde_json::Value = decode(check(response).await?).await?;
        Ok(normalize(&raw))
    }

    async fn put_state(&self, state: &AnnotationState) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.url("/state"))
            .json(state)
            .send()
            .await
            .map_err(request_err)?;
        check(response).await?;
        Ok(())
    }

    async fn get_tree(&self) -> Result<TreeNode, TransportError> {
        let response = self.http.get(self.url("/tree")).send().await.map_err(request_err)?;
        decode(check(response).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let client = HttpSyncClient::new("http://127.0.0.1:4000/");
        assert_eq!(client.base_url(), "http://127.0.0.1:4000");
        assert_eq!(client.url("/state"), "http://127.0.0.1:4000/state");
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpSyncClient::new(format!("http://{}", addr));
        let err = client.get_tree().await.unwrap_err();
        assert!(matches!(err, TransportError::Request(_)));
    }
}
