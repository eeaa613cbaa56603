use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mediaflow_cache::Embedding;
use mediaflow_core::ResourceId;

use crate::error::AiError;

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    /// Model identifier, used in logs.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedding, AiError>;
}

/// Speech-to-text over hosted media.
#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
    /// Transcribe the media reachable at `media_url`.
    async fn transcribe(&self, media_url: &str) -> Result<Transcript, AiError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
}

/// Persistence boundary for computed vectors.
///
/// The vector store itself lives outside this subsystem.
#[async_trait]
pub trait EmbeddingSink: Send + Sync + 'static {
    async fn store(&self, resource_id: ResourceId, embedding: &Embedding) -> Result<(), AiError>;
}
