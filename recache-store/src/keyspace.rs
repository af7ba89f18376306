//! Reserved key namespace for cache records.
//!
//! All physical keys live under a product prefix so bulk deletion can scan
//! only the cache's own records, never unrelated keys sharing the backing
//! store. Query entries and tag-sets occupy separate sub-namespaces.

use recache_core::CacheKey;

/// Default namespace prefix.
pub const DEFAULT_PREFIX: &str = "recache";

/// Formats physical store keys under a fixed namespace prefix.
///
/// Layout:
/// - query entries: `<prefix>:query:<fingerprint>`
/// - tag-sets:      `<prefix>:tag:<tag>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeySpace {
    /// Create a keyspace under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The namespace prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical key for a query entry.
    pub fn query_key(&self, key: &CacheKey) -> String {
        format!("{}:query:{}", self.prefix, key)
    }

    /// Physical key for a tag-set.
    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }

    /// Glob pattern matching every key managed by this cache, for
    /// namespace-scoped bulk deletion.
    pub fn match_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }
}
