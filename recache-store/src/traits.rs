//! The backing-store contract.

use async_trait::async_trait;
use recache_core::{CacheEntry, CacheKey, CacheResult};

/// Contract for pluggable cache backends.
///
/// Implementations must be safe for concurrent use; the coordinator shares
/// one store across all invocations and does not serialize access itself.
///
/// # Atomicity
///
/// `set` must apply the entry write, its expiry, and every tag-set update
/// as one unit: under concurrent writers referencing the same tag, no
/// writer's TTL contribution may be lost, and readers must never observe a
/// partially applied write. Backends achieve this with a transactional
/// batch or a server-side procedure.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the entry for `key`, or `None` if absent (or physically
    /// expired).
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Durably persist `entry` under `key`, fully replacing any previous
    /// entry. When the entry carries a total TTL, the record must self-evict
    /// after it even if invalidation is never called. Every tag in the
    /// entry's options gains `key` as a member, with the tag-set TTL policy
    /// applied (monotonic max; an untimed write clears the tag-set's TTL).
    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()>;

    /// Delete every entry referenced by any of `tags`, then the tag-sets
    /// themselves. Unknown tags and an empty list are no-ops. Returns the
    /// number of entries deleted. Keys and tags not implicated must not be
    /// disturbed.
    async fn invalidate(&self, tags: &[String]) -> CacheResult<u64>;

    /// Delete every entry and tag-set managed by this cache, leaving keys
    /// outside its reserved namespace untouched. Returns the number of
    /// records deleted.
    async fn invalidate_all(&self) -> CacheResult<u64>;
}
