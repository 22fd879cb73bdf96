//! services/api/src/adapters/asset_store.rs
//!
//! Object storage for page photos and generated illustrations. Objects are
//! written with upsert semantics so re-running a job overwrites in place.

use crate::adapters::http::{ensure_success, request_failed};
use async_trait::async_trait;
use bytes::Bytes;
use storyforge_core::ports::{AssetStore, PortResult};

const SERVICE: &str = "asset store";

#[derive(Clone)]
pub struct HttpAssetStore {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    api_key: Option<String>,
}

impl HttpAssetStore {
    pub fn new(http: reqwest::Client, base_url: String, bucket: String, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            api_key,
        }
    }

    /// The public, durable URL of an object.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, self.bucket, key)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        // Only our own objects carry the storage key.
        let request = self.http.get(url);
        let request = if url.starts_with(&self.base_url) {
            self.authorized(request)
        } else {
            request
        };
        let response = request.send().await.map_err(|e| request_failed(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;
        response.bytes().await.map_err(|e| request_failed(SERVICE, e))
    }

    async fn put_object(&self, key: &str, bytes: Bytes, content_type: &str) -> PortResult<String> {
        let request = self
            .http
            .put(format!("{}/object/{}/{}", self.base_url, self.bucket, key))
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;
        Ok(self.public_url(key))
    }
}
