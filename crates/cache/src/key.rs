//! Content-addressed cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DEFAULT_MAX_RESULTS: usize = 10;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Stable hash of normalized input (hex-encoded SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for free text: trimmed and lower-cased before hashing.
    pub fn for_text(text: &str) -> Self {
        Self::digest(normalize(text).as_bytes())
    }

    /// Key for a search: query plus the option set that shapes the result.
    pub fn for_search(query: &str, options: &SearchOptions) -> Self {
        let mut content_types = options.content_types.clone();
        content_types.sort();

        let params = SearchKeyParams {
            query: normalize(query),
            content_types,
            max_results: options.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            similarity_threshold: options
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
        };

        // Struct field order is fixed, so the encoding is canonical.
        let encoded = serde_json::to_vec(&params).unwrap_or_default();
        Self::digest(&encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }
}

impl core::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options that participate in the search-results key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(default)]
    pub content_types: Vec<String>,
    pub max_results: Option<usize>,
    pub similarity_threshold: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchKeyParams {
    query: String,
    content_types: Vec<String>,
    max_results: usize,
    similarity_threshold: f64,
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}
