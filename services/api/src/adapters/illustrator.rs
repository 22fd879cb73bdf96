//! services/api/src/adapters/illustrator.rs
//!
//! Implements the `Illustrator` port against an OpenAI-compatible image edit
//! endpoint. The source photo and the style reference are both sent as
//! conditioning images; the answer is one base64 encoded PNG.

use crate::adapters::http::{request_failed, status_error};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use storyforge_core::ports::{
    IllustrationRequest, ImageGeneration, Illustrator, PortError, PortResult,
};
use tracing::warn;

const SERVICE: &str = "image generation";

/// Error codes the image API uses when it refuses to draw something.
const POLICY_CODES: [&str; 3] = [
    "moderation_blocked",
    "content_policy_violation",
    "safety_violation",
];

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    code: Option<String>,
}

/// Picks a file name and mime type from the image bytes themselves.
fn image_part(bytes: Bytes, stem: &str) -> PortResult<Part> {
    let (ext, mime) = match image::guess_format(&bytes) {
        Ok(image::ImageFormat::Jpeg) => ("jpg", "image/jpeg"),
        Ok(image::ImageFormat::WebP) => ("webp", "image/webp"),
        _ => ("png", "image/png"),
    };
    Part::bytes(bytes.to_vec())
        .file_name(format!("{}.{}", stem, ext))
        .mime_str(mime)
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

/// Reads a non-2xx answer: a policy refusal is a declined generation,
/// anything else an error.
fn classify_failure(status: StatusCode, body: &str) -> PortResult<ImageGeneration> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let refused = envelope
            .error
            .code
            .as_deref()
            .map(|c| POLICY_CODES.contains(&c))
            .unwrap_or(false);
        if refused {
            return Ok(ImageGeneration::Declined {
                reason: envelope.error.message,
            });
        }
    }
    Err(status_error(SERVICE, status, body))
}

#[derive(Clone)]
pub struct OpenAiImageAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiImageAdapter {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Illustrator for OpenAiImageAdapter {
    async fn illustrate(&self, request: IllustrationRequest) -> PortResult<ImageGeneration> {
        let form = Form::new()
            .text("model", self.model.clone())
            .text("prompt", request.prompt)
            .text("n", "1")
            .text("size", "1024x1024")
            .part("image[]", image_part(request.source_image, "source")?)
            .part("image[]", image_part(request.style_reference, "style")?);

        let response = self
            .http
            .post(format!("{}/images/edits", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        if !status.is_success() {
            return classify_failure(status, &body);
        }

        let parsed: ImagesResponse = serde_json::from_str(&body)
            .map_err(|e| PortError::Unexpected(format!("{} returned malformed JSON: {}", SERVICE, e)))?;
        let Some(encoded) = parsed.data.into_iter().find_map(|d| d.b64_json) else {
            warn!("image generation answered without image data");
            return Ok(ImageGeneration::Declined {
                reason: "no image data returned".to_string(),
            });
        };
        let decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| PortError::Unexpected(format!("undecodable image payload: {}", e)))?;
        Ok(ImageGeneration::Image(Bytes::from(decoded)))
    }
}
