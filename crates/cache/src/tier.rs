//! A single bounded, TTL-aware cache tier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::key::CacheKey;

/// Rough per-entry memory footprint, used for stats and health checks only.
pub trait EstimateSize {
    fn estimated_bytes(&self) -> usize;
}

impl EstimateSize for Vec<f32> {
    fn estimated_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }
}

impl EstimateSize for serde_json::Value {
    /// Search result sets are budgeted at 1 KiB each.
    fn estimated_bytes(&self) -> usize {
        1024
    }
}

/// Static parameters of a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    /// Name used in logs and stats.
    pub name: &'static str,
    /// Entries older than this are never returned.
    pub ttl: Duration,
    /// Hard ceiling on the number of live entries.
    pub capacity: usize,
}

impl TierConfig {
    pub fn new(name: &'static str, ttl: Duration, capacity: usize) -> Self {
        Self { name, ttl, capacity }
    }
}

/// Point-in-time counters for one tier (or the aggregate of several).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub estimated_memory_bytes: usize,
}

impl TierStats {
    /// Sum several tiers; the hit rate is recomputed from the summed counters.
    pub fn aggregate<'a>(parts: impl IntoIterator<Item = &'a TierStats>) -> TierStats {
        let mut total = TierStats::default();
        for part in parts {
            total.size += part.size;
            total.max_size += part.max_size;
            total.hits += part.hits;
            total.misses += part.misses;
            total.estimated_memory_bytes += part.estimated_memory_bytes;
        }
        total.hit_rate = hit_rate(total.hits, total.misses);
        total
    }

    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    payload: T,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    /// Insertion sequence, the final eviction tie-break.
    seq: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug)]
struct TierState<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
    hits: u64,
    misses: u64,
    next_seq: u64,
}

impl<T> TierState<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            next_seq: 0,
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Remove entries until `len < capacity`, lowest `(hit_count, created_at, seq)` first.
    fn evict_to_fit(&mut self, capacity: usize) -> usize {
        if self.entries.len() < capacity {
            return 0;
        }

        let mut victims: Vec<(u64, Instant, u64, CacheKey)> = self
            .entries
            .iter()
            .map(|(key, e)| (e.hit_count, e.created_at, e.seq, key.clone()))
            .collect();
        victims.sort();

        let to_remove = self.entries.len() + 1 - capacity;
        for (_, _, _, key) in victims.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
        to_remove
    }
}

/// One cache tier: a bounded map with TTL and hybrid LFU/LRU eviction.
///
/// All operations take the tier's own lock, so tiers never contend with each
/// other. Payloads are cloned on the way in and on the way out.
pub struct CacheTier<T> {
    config: TierConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<TierState<T>>,
}

impl<T> core::fmt::Debug for CacheTier<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheTier")
            .field("config", &self.config)
            .field("size", &self.state.lock().entries.len())
            .finish()
    }
}

impl<T> CacheTier<T>
where
    T: Clone + EstimateSize,
{
    pub fn new(config: TierConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(TierState::new()),
        }
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Look up a live entry, counting the hit or miss.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                state.misses += 1;
                debug!(tier = self.config.name, key = %key, "cache miss");
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            state.misses += 1;
            debug!(tier = self.config.name, key = %key, "cache entry expired");
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.hit_count += 1;
        let payload = entry.payload.clone();
        state.hits += 1;
        debug!(tier = self.config.name, key = %key, "cache hit");
        Some(payload)
    }

    /// Store a copy of `value` under `key`.
    ///
    /// Expired entries are purged first; if the tier is still full the
    /// least-valuable entries are evicted before the new one is inserted.
    /// Replacing an existing key never evicts anything else.
    pub fn set(&self, key: CacheKey, value: &T) {
        if self.config.capacity == 0 {
            return;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();

        let purged = state.purge_expired(now);
        let evicted = if state.entries.contains_key(&key) {
            0
        } else {
            state.evict_to_fit(self.config.capacity)
        };

        if purged > 0 || evicted > 0 {
            debug!(tier = self.config.name, purged, evicted, "cache tier made room");
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                payload: value.clone(),
                created_at: now,
                ttl: self.config.ttl,
                hit_count: 1,
                seq,
            },
        );
    }

    /// Whether a live entry exists, without touching counters.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries; counters are kept.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Drop all entries and zero the hit/miss counters.
    pub fn reset(&self) {
        *self.state.lock() = TierState::new();
    }

    pub fn stats(&self) -> TierStats {
        let state = self.state.lock();
        TierStats {
            size: state.entries.len(),
            max_size: self.config.capacity,
            hits: state.hits,
            misses: state.misses,
            hit_rate: hit_rate(state.hits, state.misses),
            estimated_memory_bytes: state
                .entries
                .values()
                .map(|e| e.payload.estimated_bytes())
                .sum(),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
