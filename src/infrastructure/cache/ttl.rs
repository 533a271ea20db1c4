use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::clock::{to_chrono, Clock};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// In-memory key/value cache with per-entry expiry.
///
/// Expired entries are removed lazily on `get`, or in bulk by
/// `cleanup_expired`. Not synchronized: wrap in a mutex to share it.
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V> TtlCache<V> {
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            clock,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(to_chrono(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.entries
            .insert(key.into(), CacheEntry { value, expires_at });
    }

    pub fn get(&mut self, key: &str) -> Option<&V> {
        let now = self.clock.now();

        if self.entries.get(key)?.is_expired(now) {
            self.entries.remove(key);
            tracing::debug!(key, "cache entry expired");
            return None;
        }

        self.entries.get(key).map(|e| &e.value)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));

        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "cache sweep");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
