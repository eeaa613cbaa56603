//! Multi-tier cache for expensive embedding and search computations.
//!
//! ## Design
//!
//! - Three independent tiers (content embeddings, query embeddings, search results)
//! - Each tier has its own TTL and hard capacity ceiling
//! - Keys are content-addressed: SHA-256 of the normalized input
//! - Expired entries are never returned (lazy check on read, purge on write)
//! - Eviction is hybrid LFU/LRU: lowest hit count first, oldest first on ties,
//!   insertion order as the final tie-break
//! - Callers always receive copies; stored payloads are never handed out by reference
//!
//! ## Components
//!
//! - `CacheTier`: one bounded, TTL-aware map guarded by its own lock
//! - `MultiTierCache`: the three tiers plus the consumer API and health reporting
//! - `Clock`: time source (system clock in production, manual clock in tests)

pub mod clock;
pub mod health;
pub mod key;
pub mod multi_tier;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use health::{CacheHealth, HealthStatus, HealthThresholds};
pub use key::{CacheKey, SearchOptions};
pub use multi_tier::{CacheConfig, Embedding, MultiTierCache, MultiTierStats};
pub use tier::{CacheTier, EstimateSize, TierConfig, TierStats};
