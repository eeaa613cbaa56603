//! Embedder backed by an OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use mediaflow_ai::{AiError, Embedder};
use mediaflow_cache::Embedding;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Clone, PartialEq, Eq)]
pub struct OpenAiEmbedderConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

impl core::fmt::Debug for OpenAiEmbedderConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenAiEmbedderConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiEmbedderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(client: reqwest::Client, config: OpenAiEmbedderConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, AiError> {
        let payload = serde_json::json!({
            "input": [text],
            "model": self.config.model,
            "encoding_format": "float",
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.api_base.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AiError::Unavailable(format!("embedding request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AiError::Unavailable(format!("embedding response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(error_for_status(status, &body));
        }

        let embedding = parse_embedding_response(&body)?;
        debug!(model = %self.config.model, dims = embedding.len(), "embedding computed");
        Ok(embedding)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Extract the single vector from an `/embeddings` response body.
pub fn parse_embedding_response(body: &str) -> Result<Embedding, AiError> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| AiError::InferenceFailed(format!("invalid embedding response: {e}")))?;
    match <[EmbeddingItem; 1]>::try_from(response.data) {
        Ok([item]) => Ok(item.embedding),
        Err(items) => Err(AiError::InferenceFailed(format!(
            "expected one embedding, got {}",
            items.len()
        ))),
    }
}

/// Rate limits and server errors are worth retrying later; anything else is not.
pub fn error_for_status(status: StatusCode, body: &str) -> AiError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("http {}", status.as_u16()));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AiError::Unavailable(message)
    } else if status == StatusCode::BAD_REQUEST {
        AiError::InvalidInput(message)
    } else {
        AiError::InferenceFailed(message)
    }
}
