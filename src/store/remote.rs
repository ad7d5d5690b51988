//! Secondary remote copy of the store.
//!
//! The local file stays the source of truth. The remote blob is pushed after
//! every local commit and only read when the local file is missing or
//! unreadable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::common::error::{StoreError, StoreResult};

const REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// A blob store holding one copy of the persisted state.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Replace the remote copy.
    async fn push(&self, bytes: Vec<u8>) -> StoreResult<()>;

    /// Fetch the remote copy, `None` if there is none yet.
    async fn pull(&self) -> StoreResult<Option<Vec<u8>>>;
}

fn remote_error(message: impl std::fmt::Display) -> StoreError {
    StoreError::Remote {
        message: message.to_string(),
    }
}

/// Remote copy stored at a single URL via HTTP `GET`/`PUT`.
pub struct HttpBlobBackend {
    url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpBlobBackend {
    pub fn new(url: String, token: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("guild-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        info!(url = %url, authenticated = token.is_some(), "Remote store configured");

        Self {
            url,
            token,
            http_client,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBlobBackend {
    async fn push(&self, bytes: Vec<u8>) -> StoreResult<()> {
        let size = bytes.len();
        let response = self
            .authorize(self.http_client.put(&self.url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(remote_error)?;

        if !response.status().is_success() {
            return Err(remote_error(format!("push returned {}", response.status())));
        }
        debug!(bytes = size, "Remote store updated");
        Ok(())
    }

    async fn pull(&self) -> StoreResult<Option<Vec<u8>>> {
        let response = self
            .authorize(self.http_client.get(&self.url))
            .send()
            .await
            .map_err(remote_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(remote_error)?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(remote_error(format!("pull returned {}", status))),
        }
    }
}
