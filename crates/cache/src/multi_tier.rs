//! The three-tier cache and its consumer API.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::clock::{Clock, SystemClock};
use crate::health::{CacheHealth, HealthThresholds};
use crate::key::{CacheKey, SearchOptions};
use crate::tier::{CacheTier, TierConfig, TierStats};

/// An embedding vector.
pub type Embedding = Vec<f32>;

/// Per-tier parameters plus health thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub embedding: TierConfig,
    pub query: TierConfig,
    pub search: TierConfig,
    pub health: HealthThresholds,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding: TierConfig::new("embedding", Duration::from_secs(24 * 60 * 60), 1000),
            query: TierConfig::new("query_embedding", Duration::from_secs(60 * 60), 200),
            search: TierConfig::new("search_results", Duration::from_secs(30 * 60), 500),
            health: HealthThresholds::default(),
        }
    }
}

/// Stats for every tier and their aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiTierStats {
    pub embedding: TierStats,
    pub query: TierStats,
    pub search: TierStats,
    pub overall: TierStats,
}

/// Content-addressed cache for embeddings, query embeddings and search results.
///
/// Construct one per process and share it (`Arc<MultiTierCache>`); tests build
/// isolated instances with a manual clock.
#[derive(Debug)]
pub struct MultiTierCache {
    embeddings: CacheTier<Embedding>,
    queries: CacheTier<Embedding>,
    search_results: CacheTier<JsonValue>,
    health: HealthThresholds,
}

impl MultiTierCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            embeddings: CacheTier::new(config.embedding, clock.clone()),
            queries: CacheTier::new(config.query, clock.clone()),
            search_results: CacheTier::new(config.search, clock),
            health: config.health,
        }
    }

    pub fn get_embedding(&self, text: &str) -> Option<Embedding> {
        self.embeddings.get(&CacheKey::for_text(text))
    }

    pub fn set_embedding(&self, text: &str, embedding: &Embedding) {
        self.embeddings.set(CacheKey::for_text(text), embedding);
    }

    pub fn get_query_embedding(&self, query: &str) -> Option<Embedding> {
        self.queries.get(&CacheKey::for_text(query))
    }

    pub fn set_query_embedding(&self, query: &str, embedding: &Embedding) {
        self.queries.set(CacheKey::for_text(query), embedding);
    }

    pub fn has_query_embedding(&self, query: &str) -> bool {
        self.queries.contains(&CacheKey::for_text(query))
    }

    pub fn get_search_results(&self, query: &str, options: &SearchOptions) -> Option<JsonValue> {
        self.search_results.get(&CacheKey::for_search(query, options))
    }

    pub fn set_search_results(&self, query: &str, options: &SearchOptions, results: &JsonValue) {
        self.search_results
            .set(CacheKey::for_search(query, options), results);
    }

    pub fn stats(&self) -> MultiTierStats {
        let embedding = self.embeddings.stats();
        let query = self.queries.stats();
        let search = self.search_results.stats();
        let overall = TierStats::aggregate([&embedding, &query, &search]);
        MultiTierStats {
            embedding,
            query,
            search,
            overall,
        }
    }

    pub fn health_status(&self) -> CacheHealth {
        CacheHealth::evaluate(&self.stats().overall, &self.health)
    }

    pub fn clear_embeddings(&self) {
        self.embeddings.clear();
    }

    pub fn clear_queries(&self) {
        self.queries.clear();
    }

    pub fn clear_search_results(&self) {
        self.search_results.clear();
    }

    /// Drop every entry in every tier and zero the counters.
    pub fn clear_all(&self) {
        self.embeddings.reset();
        self.queries.reset();
        self.search_results.reset();
    }
}

impl Default for MultiTierCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
