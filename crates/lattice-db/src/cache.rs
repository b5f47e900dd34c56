//! Time-boxed memoization of read-query results.
//!
//! Entries are keyed by a digest of the query text and parameter tuple
//! (or an explicit caller-supplied key) and considered fresh while
//! `now - inserted_at < ttl`. Capacity is bounded: inserting past the
//! maximum evicts the single oldest-timestamped entry — age-based, not
//! access-based. The cache lock is independent of the pool's and is never
//! held across a storage call.
//!
//! The cache does not observe out-of-band writes; content is a pure
//! function of (query, params, freshness).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::value::{Row, Value};

/// Derive a deterministic cache key from query text and parameters.
///
/// Identical (query, params) pairs always derive the same key; any
/// parameter change derives a different one. Hash collisions across
/// unrelated inputs are an accepted risk of digest-based keying.
pub fn cache_key(query: &str, params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_string(params).unwrap_or_default().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

struct CacheEntry {
    rows: Arc<Vec<Row>>,
    inserted_at: Instant,
}

/// Bounded, TTL-checked query-result cache.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fetch a fresh entry, counting a hit; expired or absent counts a miss.
    ///
    /// Expired entries are removed on observation.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<Arc<Vec<Row>>> {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "query cache hit");
                Some(Arc::clone(&entry.rows))
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a result set, evicting the oldest entry if at capacity.
    ///
    /// The evict-then-insert sequence is atomic with respect to concurrent
    /// cache writers.
    pub fn insert(&self, key: String, rows: Arc<Vec<Row>>) {
        let mut entries = self.entries.lock().expect("cache lock");
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = %oldest, "evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                rows,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove entries whose key contains `pattern`; no pattern clears all.
    pub fn clear(&self, pattern: Option<&str>) {
        let mut entries = self.entries.lock().expect("cache lock");
        match pattern {
            Some(p) => entries.retain(|key, _| !key.contains(p)),
            None => entries.clear(),
        }
        info!(pattern = pattern.unwrap_or("*"), "query cache cleared");
    }

    /// Number of cached result sets.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
