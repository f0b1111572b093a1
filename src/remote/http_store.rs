use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::store::RemoteStore;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ContainerId, ItemId, TransferDescriptor};

const DEFAULT_THROTTLE_WAIT_SECS: u64 = 5;

/// One authenticated connection to the remote store, with its own throttling
/// quota on the remote side.
#[derive(Debug)]
struct Session {
    client: Client,
    credential: String,
}

/// [`RemoteStore`] implementation over the platform's HTTP API.
///
/// Endpoints:
/// - `GET {base}/containers/{container}/items/{item}` — transfer metadata
/// - `GET {base}/media/{handle}/chunk?offset={n}` — one aligned chunk
/// - `GET {base}/containers/{container}/items/{item}/thumb` — JPEG bytes
#[derive(Debug)]
pub struct HttpRemoteStore {
    api_base: String,
    sessions: Vec<Session>,
}

#[derive(Debug, Deserialize)]
struct ItemMetadata {
    handle: String,
    size: u64,
    mime_type: Option<String>,
    file_name: Option<String>,
    content_id: String,
}

impl HttpRemoteStore {
    pub fn new(api_base: impl Into<String>, credentials: &[String]) -> Result<Self> {
        anyhow::ensure!(
            !credentials.is_empty(),
            "at least one remote credential is required"
        );

        let sessions = credentials
            .iter()
            .map(|credential| {
                let client = Client::builder()
                    .connect_timeout(Duration::from_secs(10))
                    .build()
                    .context("Failed to build remote HTTP client")?;
                Ok(Session {
                    client,
                    credential: credential.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            sessions,
        })
    }

    fn session(&self, index: usize) -> &Session {
        &self.sessions[index % self.sessions.len()]
    }

    async fn get(&self, session: usize, url: &str, query: &[(&str, String)]) -> GatewayResult<Response> {
        let session = self.session(session);
        let response = session
            .client
            .get(url)
            .query(query)
            .bearer_auth(&session.credential)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(GatewayError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let wait_secs = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_THROTTLE_WAIT_SECS);
                Err(GatewayError::Throttled { wait_secs })
            }
            status => Err(GatewayError::Transient(format!(
                "remote returned status {status}"
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn locate(
        &self,
        session: usize,
        container_id: &ContainerId,
        item_id: &ItemId,
    ) -> GatewayResult<TransferDescriptor> {
        let url = format!(
            "{}/containers/{}/items/{}",
            self.api_base, container_id, item_id
        );
        debug!(%container_id, %item_id, session, "locating remote item");

        let metadata: ItemMetadata = self
            .get(session, &url, &[])
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("invalid item metadata: {e}")))?;

        Ok(TransferDescriptor {
            handle: metadata.handle,
            size: metadata.size,
            mime_type: metadata.mime_type,
            file_name: metadata.file_name,
            content_id: metadata.content_id,
        })
    }

    async fn fetch_chunk(
        &self,
        session: usize,
        descriptor: &TransferDescriptor,
        offset: u64,
    ) -> GatewayResult<Bytes> {
        let url = format!("{}/media/{}/chunk", self.api_base, descriptor.handle);
        let response = self
            .get(session, &url, &[("offset", offset.to_string())])
            .await?;

        response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transient(format!("chunk body failed: {e}")))
    }

    async fn thumbnail(
        &self,
        session: usize,
        container_id: &ContainerId,
        item_id: &ItemId,
    ) -> GatewayResult<Bytes> {
        let url = format!(
            "{}/containers/{}/items/{}/thumb",
            self.api_base, container_id, item_id
        );
        let response = self.get(session, &url, &[]).await?;

        response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transient(format!("thumbnail body failed: {e}")))
    }
}
