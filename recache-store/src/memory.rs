//! In-process cache store.
//!
//! The smallest valid [`CacheStore`]: a `RwLock`-guarded map plus a
//! [`TagIndex`]. Physical expiry is checked lazily on read; an expired
//! record is simply not returned. This backend carries the deterministic
//! test suite and serves single-process deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use recache_core::{CacheEntry, CacheError, CacheKey, CacheResult, Timestamp};

use crate::tag_index::TagIndex;
use crate::traits::CacheStore;

#[derive(Debug)]
struct StoredEntry {
    entry: CacheEntry,
    expires_at: Option<Timestamp>,
}

impl StoredEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, StoredEntry>,
    tags: TagIndex,
}

/// In-memory cache store with tag invalidation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entry records currently held, including ones that are
    /// physically expired but not yet dropped.
    pub fn entry_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.entries.len())
            .unwrap_or(0)
    }

    /// Whether a live tag-set exists for `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.tags.contains(tag, Utc::now()))
            .unwrap_or(false)
    }

    /// Expiry deadline of the tag-set for `tag`; `None` when the set is
    /// absent or persists indefinitely.
    pub fn tag_expiry(&self, tag: &str) -> Option<Timestamp> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.tags.expires_at(tag))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| CacheError::store_read("store lock poisoned"))?;

        let now = Utc::now();
        Ok(inner
            .entries
            .get(key)
            .filter(|stored| !stored.is_expired(now))
            .map(|stored| stored.entry.clone()))
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| CacheError::store_write("store lock poisoned"))?;

        let expires_at = entry.expires_at();
        inner
            .tags
            .record(key, &entry.options.tags, expires_at, Utc::now());
        inner
            .entries
            .insert(key.clone(), StoredEntry { entry, expires_at });
        Ok(())
    }

    async fn invalidate(&self, tags: &[String]) -> CacheResult<u64> {
        if tags.is_empty() {
            return Ok(0);
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| CacheError::store_write("store lock poisoned"))?;

        let now = Utc::now();
        let mut deleted = 0u64;
        for tag in tags {
            for key in inner.tags.take(tag, now) {
                if let Some(stored) = inner.entries.remove(&key) {
                    if !stored.is_expired(now) {
                        deleted += 1;
                    }
                }
            }
        }
        tracing::debug!(tags = ?tags, deleted, "invalidated tagged cache entries");
        Ok(deleted)
    }

    async fn invalidate_all(&self) -> CacheResult<u64> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| CacheError::store_write("store lock poisoned"))?;

        let now = Utc::now();
        let live_entries = inner
            .entries
            .values()
            .filter(|stored| !stored.is_expired(now))
            .count() as u64;
        let deleted = live_entries + inner.tags.len(now) as u64;

        inner.entries.clear();
        inner.tags.clear();
        tracing::debug!(deleted, "invalidated all cache records");
        Ok(deleted)
    }
}
