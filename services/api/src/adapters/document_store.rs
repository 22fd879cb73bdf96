//! services/api/src/adapters/document_store.rs
//!
//! Publishes print PDFs to a Dropbox-style file store and returns a link the
//! print provider can download directly.

use crate::adapters::http::{ensure_success, request_failed, status_error};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use storyforge_core::ports::{DocumentStore, PortError, PortResult};
use tracing::debug;

const SERVICE: &str = "document store";

#[derive(Debug, Deserialize)]
struct SharedLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SharedLinkList {
    #[serde(default)]
    links: Vec<SharedLink>,
}

/// Turns a preview share link into a raw-content download link.
pub fn direct_download_url(shared: &str) -> String {
    if shared.contains("dl=0") {
        return shared.replace("dl=0", "raw=1");
    }
    if shared.contains("raw=1") {
        return shared.to_string();
    }
    let separator = if shared.contains('?') { '&' } else { '?' };
    format!("{}{}raw=1", shared, separator)
}

#[derive(Clone)]
pub struct DropboxDocumentStore {
    http: reqwest::Client,
    api_url: String,
    content_url: String,
    token: String,
}

impl DropboxDocumentStore {
    pub fn new(http: reqwest::Client, api_url: String, content_url: String, token: String) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            content_url: content_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn upload(&self, path: &str, bytes: Bytes) -> PortResult<()> {
        let arg = json!({ "path": path, "mode": "overwrite", "mute": true }).to_string();
        let response = self
            .http
            .post(format!("{}/files/upload", self.content_url))
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        Ok(())
    }

    /// Creates a share link, or reuses the one that already exists for `path`.
    async fn shared_link(&self, path: &str) -> PortResult<String> {
        let response = self
            .http
            .post(format!("{}/sharing/create_shared_link_with_settings", self.api_url))
            .bearer_auth(&self.token)
            .json(&json!({ "path": path }))
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        let status = response.status();
        if status.is_success() {
            let link: SharedLink = response
                .json()
                .await
                .map_err(|e| request_failed(SERVICE, e))?;
            return Ok(link.url);
        }

        let body = response.text().await.unwrap_or_default();
        if status != StatusCode::CONFLICT || !body.contains("shared_link_already_exists") {
            return Err(status_error(SERVICE, status, &body));
        }

        debug!(path, "share link exists, listing it");
        let response = self
            .http
            .post(format!("{}/sharing/list_shared_links", self.api_url))
            .bearer_auth(&self.token)
            .json(&json!({ "path": path, "direct_only": true }))
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        let list: SharedLinkList = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        list.links
            .into_iter()
            .next()
            .map(|l| l.url)
            .ok_or_else(|| PortError::Unexpected(format!("no share link listed for {}", path)))
    }
}

#[async_trait]
impl DocumentStore for DropboxDocumentStore {
    async fn publish_document(&self, path: &str, bytes: Bytes) -> PortResult<String> {
        self.upload(path, bytes).await?;
        let shared = self.shared_link(path).await?;
        Ok(direct_download_url(&shared))
    }
}
