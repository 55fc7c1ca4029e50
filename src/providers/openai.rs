//! Client for OpenAI-compatible image generation endpoints.
//!
//! Talks to `POST {base_url}/v1/images/generations` and downloads the
//! returned image URL. Works against OpenAI itself and against any server
//! that speaks the same request/response shape.
//! See: <https://platform.openai.com/docs/api-reference/images/create>

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::ImageBackend;
use crate::error::{BackendError, BackendResult};
use crate::{GeneratedImage, GenerationParams};

/// Default base URL for the OpenAI API
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_SIZE: &str = "1024x1024";
const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Image backend for the OpenAI images API.
///
/// Request parameters understood: `model`, `width`/`height` (sent as
/// `size`), `quality`, `style`. Unset values fall back to the client's
/// defaults.
#[derive(Clone)]
pub struct OpenAiImageBackend {
    api_key: String,
    http: Client,
    base_url: String,
    model: String,
    size: String,
    quality: Option<String>,
}

impl OpenAiImageBackend {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            size: DEFAULT_SIZE.to_string(),
            quality: None,
        }
    }

    /// Model used when the request does not name one.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Size (`WIDTHxHEIGHT`) used when the request does not set one.
    pub fn size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    /// Quality used when the request does not set one.
    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    fn build_request<'a>(&'a self, prompt: &'a str, params: &'a GenerationParams) -> ImageRequest<'a> {
        let size = match (params.get_u64("width"), params.get_u64("height")) {
            (Some(w), Some(h)) => format!("{w}x{h}"),
            _ => params.get_str("size").unwrap_or(&self.size).to_string(),
        };
        ImageRequest {
            model: params.get_str("model").unwrap_or(&self.model),
            prompt,
            n: 1,
            size,
            quality: params.get_str("quality").or(self.quality.as_deref()),
            style: params.get_str("style"),
            response_format: "url",
        }
    }

    async fn download(&self, url: &str, timeout: Duration) -> BackendResult<(Vec<u8>, String)> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let response = check_status(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        Ok((bytes.to_vec(), content_type))
    }
}

#[async_trait]
impl ImageBackend for OpenAiImageBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        timeout: Duration,
    ) -> BackendResult<GeneratedImage> {
        let url = format!("{}/v1/images/generations", self.base_url);
        let request = self.build_request(prompt, params);
        debug!(model = request.model, size = %request.size, "requesting image");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let response = check_status(response).await?;

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("malformed response: {e}")))?;
        let item = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Unavailable("response contained no images".to_string()))?;
        let image_url = item
            .url
            .ok_or_else(|| BackendError::Unavailable("response contained no image url".to_string()))?;

        let (data, content_type) = self.download(&image_url, timeout).await?;
        let mut image = GeneratedImage::new(data, content_type);
        if let Some(revised) = item.revised_prompt {
            image = image.with_revised_prompt(revised);
        }
        Ok(image)
    }
}

/// Map a failed send/read to a backend error.
fn transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Unavailable(err.to_string())
    }
}

/// Check response status and map to the appropriate backend error.
///
/// Client errors are terminal except 408 and 429; server errors are
/// transient.
async fn check_status(response: reqwest::Response) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorResponse>()
        .await
        .ok()
        .map(|body| body.error.message)
        .unwrap_or_else(|| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Rejected(format!("authentication failed: {message}"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Unavailable(format!("{}: {message}", status.as_u16()))
        }
        s if s.is_server_error() => {
            BackendError::Unavailable(format!("{}: {message}", status.as_u16()))
        }
        _ => BackendError::Rejected(message),
    })
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
    revised_prompt: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
