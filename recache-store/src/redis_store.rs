//! Redis-backed reference store.
//!
//! Demonstrates the two valid implementation strategies over a networked
//! key-value backend:
//!
//! - **Batched**: client-orchestrated atomic `MULTI` pipelines for writes,
//!   and `SSCAN`/`SCAN` paging with bounded `COUNT` for bulk deletion. A
//!   reader may observe a tag-set momentarily shrinking mid-scan; the end
//!   state is identical.
//! - **Scripted**: server-side Lua procedures performing invalidation in
//!   one indivisible step, at the cost of requiring scripting support.
//!
//! Both strategies are externally indistinguishable. The tag-set TTL
//! policy is expressed with `EXPIRE .. GT` + `EXPIRE .. NX` (monotonic
//! max, arm-if-unset) and `PERSIST` (untimed write clears the TTL), which
//! needs Redis 7.0 or newer.

use std::str::FromStr;

use async_trait::async_trait;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use recache_core::{CacheEntry, CacheError, CacheKey, CacheResult};

use crate::keyspace::{KeySpace, DEFAULT_PREFIX};
use crate::traits::CacheStore;

/// How bulk invalidation is executed against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationStrategy {
    /// Client-orchestrated command batches plus streaming scans.
    #[default]
    Batched,
    /// Server-side Lua procedures.
    Scripted,
}

impl FromStr for InvalidationStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "batched" => Ok(Self::Batched),
            "scripted" => Ok(Self::Scripted),
            _ => Err(format!("Unknown invalidation strategy: {value}")),
        }
    }
}

impl std::fmt::Display for InvalidationStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Batched => write!(formatter, "batched"),
            Self::Scripted => write!(formatter, "scripted"),
        }
    }
}

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL (`redis://..`).
    pub url: String,
    /// Namespace prefix for every key this cache owns.
    pub prefix: String,
    /// Invalidation strategy.
    pub strategy: InvalidationStrategy,
    /// Page size hint for `SCAN`/`SSCAN` during bulk deletion.
    pub scan_count: usize,
}

impl RedisStoreConfig {
    /// Create a config for `url` with default prefix, strategy, and page
    /// size.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            strategy: InvalidationStrategy::default(),
            scan_count: 100,
        }
    }

    /// Set the namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the invalidation strategy.
    pub fn with_strategy(mut self, strategy: InvalidationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the scan page size.
    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count;
        self
    }
}

/// Deletes every member of a tag-set, then the set itself, in one
/// server-side step. Returns the number of entry keys deleted.
const INVALIDATE_TAG_SCRIPT: &str = r"
local deleted = 0
local members = redis.call('SMEMBERS', KEYS[1])
for i = 1, #members do
    deleted = deleted + redis.call('DEL', members[i])
end
redis.call('DEL', KEYS[1])
return deleted
";

/// Deletes every key under the cache's namespace prefix in one server-side
/// step. Returns the number of keys deleted.
const INVALIDATE_ALL_SCRIPT: &str = r"
local cursor = '0'
local deleted = 0
repeat
    local result = redis.call('SCAN', cursor, 'MATCH', ARGV[1], 'COUNT', ARGV[2])
    cursor = result[1]
    local keys = result[2]
    for i = 1, #keys do
        deleted = deleted + redis.call('DEL', keys[i])
    end
until cursor == '0'
return deleted
";

/// Redis-backed [`CacheStore`].
///
/// The connection pool is shared across all coordinator invocations;
/// commands from concurrent callers interleave freely and are never
/// serialized client-side.
pub struct RedisStore {
    pool: Pool,
    keyspace: KeySpace,
    strategy: InvalidationStrategy,
    scan_count: usize,
    invalidate_tag_script: redis::Script,
    invalidate_all_script: redis::Script,
}

impl RedisStore {
    /// Create a store from `config`. Fails when the URL cannot be parsed
    /// or the pool cannot be created; no connection is attempted yet.
    pub fn new(config: RedisStoreConfig) -> CacheResult<Self> {
        let pool = deadpool_redis::Config::from_url(&config.url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| CacheError::StoreUnavailable {
                reason: err.to_string(),
            })?;

        Ok(Self {
            pool,
            keyspace: KeySpace::new(config.prefix),
            strategy: config.strategy,
            scan_count: config.scan_count,
            invalidate_tag_script: redis::Script::new(INVALIDATE_TAG_SCRIPT),
            invalidate_all_script: redis::Script::new(INVALIDATE_ALL_SCRIPT),
        })
    }

    /// The keyspace this store writes under.
    pub fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    /// The configured invalidation strategy.
    pub fn strategy(&self) -> InvalidationStrategy {
        self.strategy
    }

    async fn read_connection(&self) -> CacheResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(CacheError::store_read)
    }

    async fn write_connection(&self) -> CacheResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(CacheError::store_write)
    }

    /// Batched invalidation of one tag: page through the tag-set with
    /// `SSCAN`, deleting each page of members, then delete the set. The
    /// set being momentarily empty mid-scan is tolerated.
    async fn invalidate_tag_batched(
        &self,
        conn: &mut deadpool_redis::Connection,
        tag: &str,
    ) -> CacheResult<u64> {
        let tag_key = self.keyspace.tag_key(tag);
        let mut deleted = 0u64;
        let mut cursor: u64 = 0;

        loop {
            let (next, members): (u64, Vec<String>) = redis::cmd("SSCAN")
                .arg(&tag_key)
                .arg(cursor)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::store_write)?;

            if !members.is_empty() {
                let removed: u64 = redis::cmd("DEL")
                    .arg(&members)
                    .query_async(&mut *conn)
                    .await
                    .map_err(CacheError::store_write)?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let _: u64 = redis::cmd("DEL")
            .arg(&tag_key)
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::store_write)?;
        Ok(deleted)
    }

    async fn invalidate_tag_scripted(
        &self,
        conn: &mut deadpool_redis::Connection,
        tag: &str,
    ) -> CacheResult<u64> {
        self.invalidate_tag_script
            .key(self.keyspace.tag_key(tag))
            .invoke_async::<u64>(&mut *conn)
            .await
            .map_err(CacheError::store_write)
    }

    async fn invalidate_all_batched(
        &self,
        conn: &mut deadpool_redis::Connection,
    ) -> CacheResult<u64> {
        let pattern = self.keyspace.match_pattern();
        let mut deleted = 0u64;
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut *conn)
                .await
                .map_err(CacheError::store_write)?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut *conn)
                    .await
                    .map_err(CacheError::store_write)?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }

    async fn invalidate_all_scripted(
        &self,
        conn: &mut deadpool_redis::Connection,
    ) -> CacheResult<u64> {
        self.invalidate_all_script
            .arg(self.keyspace.match_pattern())
            .arg(self.scan_count)
            .invoke_async::<u64>(&mut *conn)
            .await
            .map_err(CacheError::store_write)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut conn = self.read_connection().await?;
        let payload: Option<String> = conn
            .get(self.keyspace.query_key(key))
            .await
            .map_err(CacheError::store_read)?;

        match payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(CacheError::store_read),
        }
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let payload = serde_json::to_string(&entry).map_err(CacheError::store_write)?;
        let query_key = self.keyspace.query_key(key);
        let total_ttl = entry.total_ttl();

        // One MULTI/EXEC batch: the entry write, its expiry, and every
        // tag-set update apply together or not at all.
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(&query_key, &payload).ignore();
        if let Some(ttl) = total_ttl {
            pipe.expire(&query_key, ttl as i64).ignore();
        }

        for tag in &entry.options.tags {
            let tag_key = self.keyspace.tag_key(tag);
            pipe.sadd(&tag_key, &query_key).ignore();
            match total_ttl {
                Some(ttl) => {
                    // GT: extend an existing deadline only if this write's
                    // is later. NX: arm the deadline when the set has none.
                    pipe.cmd("EXPIRE").arg(&tag_key).arg(ttl).arg("GT").ignore();
                    pipe.cmd("EXPIRE").arg(&tag_key).arg(ttl).arg("NX").ignore();
                }
                None => {
                    pipe.persist(&tag_key).ignore();
                }
            }
        }

        let mut conn = self.write_connection().await?;
        let _: () = pipe
            .query_async(&mut *conn)
            .await
            .map_err(CacheError::store_write)?;
        Ok(())
    }

    async fn invalidate(&self, tags: &[String]) -> CacheResult<u64> {
        if tags.is_empty() {
            return Ok(0);
        }

        let mut conn = self.write_connection().await?;
        let mut deleted = 0u64;
        for tag in tags {
            deleted += match self.strategy {
                InvalidationStrategy::Batched => {
                    self.invalidate_tag_batched(&mut conn, tag).await?
                }
                InvalidationStrategy::Scripted => {
                    self.invalidate_tag_scripted(&mut conn, tag).await?
                }
            };
        }
        tracing::debug!(tags = ?tags, deleted, "invalidated tagged cache entries");
        Ok(deleted)
    }

    async fn invalidate_all(&self) -> CacheResult<u64> {
        let mut conn = self.write_connection().await?;
        let deleted = match self.strategy {
            InvalidationStrategy::Batched => self.invalidate_all_batched(&mut conn).await?,
            InvalidationStrategy::Scripted => self.invalidate_all_scripted(&mut conn).await?,
        };
        tracing::debug!(deleted, "invalidated all cache records");
        Ok(deleted)
    }
}
