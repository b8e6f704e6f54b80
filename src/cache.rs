use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A cached correction and the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: String,
    pub backend: String,
}

/// Fixed-TTL memoization of corrections keyed by request fingerprint.
///
/// There is no capacity bound: the store grows with the number of distinct
/// requests seen within the TTL. Expired entries are never returned.
pub struct ResponseCache {
    cache: Cache<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).build();
        Self { cache }
    }

    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        self.cache.get(fingerprint)
    }

    /// Insert or overwrite; the entry's lifetime restarts.
    pub fn set(&self, fingerprint: impl Into<String>, value: impl Into<String>, backend: impl Into<String>) {
        let entry = CacheEntry {
            value: value.into(),
            backend: backend.into(),
        };
        self.cache.insert(fingerprint.into(), entry);
    }

    /// Live entries, after pending expirations have been applied.
    pub fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for a correction request.
pub fn fingerprint(text: &str, lang: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0x1f]);
    hasher.update(lang.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}
