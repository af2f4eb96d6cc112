/// Upstream LLM API client
///
/// Thin `reqwest` wrapper around an OpenRouter-compatible completion API:
/// model listing, single model lookup, chat completion and streamed chat
/// completion (server-sent events).

use std::time::Duration;

use actix_web::http::StatusCode;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::configuration::LlmSettings;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Request to the LLM API timed out")]
    Timeout,
    #[error("Could not connect to the LLM API")]
    Connection,
    #[error("LLM API rate limit exceeded, please try again later")]
    RateLimited { retry_after: Option<String> },
    #[error("LLM API rejected the configured API key")]
    Unauthorized,
    #[error("LLM API endpoint or model not found")]
    NotFound,
    #[error("LLM API returned HTTP {status}")]
    Http { status: u16, body: String },
    #[error("Unexpected LLM API response: {0}")]
    Decode(String),
}

impl LlmError {
    /// Error code for clients. The upstream HTTP status is carried by the
    /// response status, not the code.
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::Timeout => "LLM_TIMEOUT",
            LlmError::Connection => "LLM_CONNECTION_ERROR",
            LlmError::RateLimited { .. } => "LLM_RATE_LIMITED",
            LlmError::Unauthorized => "LLM_UNAUTHORIZED",
            LlmError::NotFound => "LLM_NOT_FOUND",
            LlmError::Http { .. } => "LLM_HTTP_ERROR",
            LlmError::Decode(_) => "LLM_BAD_RESPONSE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LlmError::Timeout => StatusCode::REQUEST_TIMEOUT,
            LlmError::Connection => StatusCode::SERVICE_UNAVAILABLE,
            LlmError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            LlmError::Unauthorized | LlmError::Decode(_) => StatusCode::BAD_GATEWAY,
            LlmError::NotFound => StatusCode::NOT_FOUND,
            LlmError::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Connection
        } else if err.is_decode() {
            LlmError::Decode(err.to_string())
        } else {
            LlmError::Http {
                status: err.status().map_or(502, |s| s.as_u16()),
                body: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body sent upstream for `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub stream: bool,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Clone)]
pub struct LlmClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Decode(format!("client construction failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends the request and maps transport failures and non-2xx statuses.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, LlmError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("LLM request failed: {}", e);
                LlmError::from(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let err = match status.as_u16() {
            429 => LlmError::RateLimited {
                retry_after: response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            },
            401 => LlmError::Unauthorized,
            404 => LlmError::NotFound,
            code => LlmError::Http {
                status: code,
                body: response.text().await.unwrap_or_default(),
            },
        };
        tracing::warn!(status = status.as_u16(), error = %err, "LLM API returned an error status");
        Err(err)
    }

    pub async fn list_models(&self) -> Result<Vec<Value>, LlmError> {
        let response = self.send(self.http_client.get(self.url("models"))).await?;
        let models: ModelList = response.json().await?;
        Ok(models.data)
    }

    /// Returns `None` when the upstream does not know `model_id`.
    pub async fn get_model(&self, model_id: &str) -> Result<Option<Value>, LlmError> {
        let url = self.url(&format!("models/{}", model_id));
        match self.send(self.http_client.get(url)).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(LlmError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Non-streaming completion; returns the upstream JSON unchanged.
    pub async fn chat_completion(&self, request: &ChatCompletionRequest) -> Result<Value, LlmError> {
        let mut body = request.clone();
        body.stream = false;

        let response = self
            .send(self.http_client.post(self.url("chat/completions")).json(&body))
            .await?;
        Ok(response.json().await?)
    }

    /// Streaming completion; yields the content deltas in arrival order.
    pub async fn chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<impl Stream<Item = Result<String, LlmError>> + Send + 'static, LlmError> {
        let mut body = request.clone();
        body.stream = true;

        let response = self
            .send(self.http_client.post(self.url("chat/completions")).json(&body))
            .await?;

        let mut decoder = SseDecoder::default();
        let deltas = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(LlmError::from(e))],
            })
            .flat_map(stream::iter);

        Ok(deltas)
    }
}

/// Incremental decoder for the upstream server-sent event stream.
///
/// Network chunks may split lines anywhere, including inside a multi-byte
/// character, so bytes are buffered until a full line is available.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feeds one chunk and returns the content deltas it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = parse_sse_line(line.trim_end()) {
                deltas.push(delta);
            }
        }
        deltas
    }
}

/// Extracts `choices[0].delta.content` from one `data:` line.
///
/// Comments, `[DONE]`, non-JSON payloads and empty deltas yield `None`.
pub fn parse_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let data: Value = serde_json::from_str(payload).ok()?;
    data.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}
