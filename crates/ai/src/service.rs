//! Cache-through embedding lookups.

use std::sync::Arc;

use tracing::{debug, info, warn};

use mediaflow_cache::{Embedding, MultiTierCache};

use crate::error::AiError;
use crate::ports::Embedder;

/// Computes embeddings once per normalized input and serves repeats from the cache.
#[derive(Clone)]
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: Arc<MultiTierCache>,
}

impl core::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<MultiTierCache>) -> Self {
        Self { embedder, cache }
    }

    pub fn cache(&self) -> &Arc<MultiTierCache> {
        &self.cache
    }

    /// Embedding for document content (long-lived tier).
    pub async fn embed_content(&self, text: &str) -> Result<Embedding, AiError> {
        if let Some(hit) = self.cache.get_embedding(text) {
            debug!(model = self.embedder.model(), "content embedding served from cache");
            return Ok(hit);
        }
        let embedding = self.compute(text).await?;
        self.cache.set_embedding(text, &embedding);
        Ok(embedding)
    }

    /// Embedding for a search query (short-lived tier).
    pub async fn embed_query(&self, query: &str) -> Result<Embedding, AiError> {
        if let Some(hit) = self.cache.get_query_embedding(query) {
            debug!(model = self.embedder.model(), "query embedding served from cache");
            return Ok(hit);
        }
        let embedding = self.compute(query).await?;
        self.cache.set_query_embedding(query, &embedding);
        Ok(embedding)
    }

    /// Pre-compute embeddings for common queries that are not cached yet.
    ///
    /// Failures are logged and skipped. Returns how many queries were computed.
    pub async fn warm_queries<I, S>(&self, queries: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut warmed = 0;
        for query in queries {
            let query = query.as_ref();
            if self.cache.has_query_embedding(query) {
                continue;
            }
            match self.compute(query).await {
                Ok(embedding) => {
                    self.cache.set_query_embedding(query, &embedding);
                    warmed += 1;
                }
                Err(err) => warn!(error = %err, "query warm-up failed"),
            }
        }
        info!(warmed, "query embedding warm-up finished");
        warmed
    }

    async fn compute(&self, text: &str) -> Result<Embedding, AiError> {
        if text.trim().is_empty() {
            return Err(AiError::InvalidInput("cannot embed empty text".to_string()));
        }
        let embedding = self.embedder.embed(text).await?;
        if embedding.is_empty() {
            return Err(AiError::InferenceFailed(format!(
                "model {} returned an empty vector",
                self.embedder.model()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(AiError::InferenceFailed(format!(
                "model {} returned a non-finite component",
                self.embedder.model()
            )));
        }
        Ok(embedding)
    }
}
